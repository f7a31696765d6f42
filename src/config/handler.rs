// Per-handler file serving settings
// Built once, canonicalized at build time, read-only afterwards

use super::types::FilesConfig;
use crate::error::ServeError;
use std::path::{Path, PathBuf};

/// Immutable settings shared by every request on one handler
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    document_root: PathBuf,
    document_root_canonical: PathBuf,
    follow_symbolic_links: bool,
    cache_time_seconds: i64,
}

impl HandlerConfig {
    /// Start building settings for a document root
    pub fn builder(document_root: impl Into<PathBuf>) -> HandlerConfigBuilder {
        HandlerConfigBuilder {
            document_root: document_root.into(),
            follow_symbolic_links: false,
            cache_time_seconds: 0,
        }
    }

    /// Build settings from the `[files]` configuration section
    pub fn from_files(files: &FilesConfig) -> Result<Self, ServeError> {
        Self::builder(&files.document_root)
            .follow_symbolic_links(files.follow_symbolic_links)
            .cache_time_seconds(files.cache_time_seconds)
            .build()
    }

    /// Document root as configured (absolute)
    pub fn document_root(&self) -> &Path {
        &self.document_root
    }

    /// Document root with all symlinks resolved
    pub fn document_root_canonical(&self) -> &Path {
        &self.document_root_canonical
    }

    pub const fn follow_symbolic_links(&self) -> bool {
        self.follow_symbolic_links
    }

    pub const fn cache_time_seconds(&self) -> i64 {
        self.cache_time_seconds
    }
}

/// Builder for [`HandlerConfig`]
#[derive(Debug, Clone)]
pub struct HandlerConfigBuilder {
    document_root: PathBuf,
    follow_symbolic_links: bool,
    cache_time_seconds: i64,
}

impl HandlerConfigBuilder {
    #[must_use]
    pub const fn follow_symbolic_links(mut self, follow: bool) -> Self {
        self.follow_symbolic_links = follow;
        self
    }

    #[must_use]
    pub const fn cache_time_seconds(mut self, seconds: i64) -> Self {
        self.cache_time_seconds = seconds;
        self
    }

    /// Resolve the document root and freeze the settings
    ///
    /// Fails with [`ServeError::DocumentRoot`] when the root cannot be
    /// canonicalized (missing, unreadable, ...).
    pub fn build(self) -> Result<HandlerConfig, ServeError> {
        let invalid = |reason: String| ServeError::DocumentRoot {
            path: self.document_root.clone(),
            reason,
        };

        let document_root = if self.document_root.is_absolute() {
            self.document_root.clone()
        } else {
            std::env::current_dir()
                .map_err(|e| invalid(e.to_string()))?
                .join(&self.document_root)
        };
        let document_root_canonical =
            std::fs::canonicalize(&document_root).map_err(|e| invalid(e.to_string()))?;

        if !document_root_canonical.is_dir() {
            return Err(invalid("not a directory".to_string()));
        }

        Ok(HandlerConfig {
            document_root,
            document_root_canonical,
            follow_symbolic_links: self.follow_symbolic_links,
            cache_time_seconds: self.cache_time_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_canonicalizes_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = HandlerConfig::builder(dir.path())
            .follow_symbolic_links(true)
            .cache_time_seconds(60)
            .build()
            .unwrap();

        assert_eq!(
            config.document_root_canonical(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
        assert!(config.document_root().is_absolute());
        assert!(config.follow_symbolic_links());
        assert_eq!(config.cache_time_seconds(), 60);
    }

    #[test]
    fn test_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        match HandlerConfig::builder(&missing).build() {
            Err(ServeError::DocumentRoot { path, .. }) => assert_eq!(path, missing),
            other => panic!("Expected DocumentRoot error, got {other:?}"),
        }
    }

    #[test]
    fn test_file_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            HandlerConfig::builder(&file).build(),
            Err(ServeError::DocumentRoot { .. })
        ));
    }

    #[test]
    fn test_from_files_section() {
        let dir = tempfile::tempdir().unwrap();
        let files = FilesConfig {
            document_root: dir.path().to_string_lossy().into_owned(),
            follow_symbolic_links: false,
            cache_time_seconds: 5,
            descriptor_cache: crate::config::DescriptorCacheConfig::default(),
        };
        let config = HandlerConfig::from_files(&files).unwrap();
        assert_eq!(config.cache_time_seconds(), 5);
        assert!(!config.follow_symbolic_links());
    }
}
