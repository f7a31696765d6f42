//! Path resolution and access guard
//!
//! Two steps: [`resolve`] maps a request target onto the document root
//! without touching the filesystem, then [`guard_and_stat`] canonicalizes
//! the result, checks containment against the canonical root, and stats the
//! literal path according to the symlink policy.

use crate::config::HandlerConfig;
use crate::error::ServeError;
use crate::logger;
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stat snapshot of a regular file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub len: u64,
    pub modified: SystemTime,
    /// (device, inode) where the platform exposes them
    id: Option<(u64, u64)>,
}

impl FileInfo {
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            len: meta.len(),
            modified: meta.modified().unwrap_or(UNIX_EPOCH),
            id: file_id(meta),
        }
    }

    /// Modification time truncated to whole seconds
    pub fn modified_secs(&self) -> i64 {
        crate::http::date::unix_seconds(self.modified)
    }

    /// Whether both snapshots describe the same unchanged file
    pub fn same_file(&self, other: &Self) -> bool {
        self.id.is_some() && self == other
    }
}

#[cfg(unix)]
fn file_id(meta: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_id(_meta: &Metadata) -> Option<(u64, u64)> {
    None
}

/// Map a request target onto the document root
///
/// Query and fragment are stripped; `.` and empty segments are dropped and
/// `..` pops a segment. A `..` that would climb above the root is rejected
/// with `AccessDenied` before any filesystem access.
///
/// # Examples
/// ```no_run
/// # use serve_files::config::HandlerConfig;
/// # use serve_files::handler::resolve::resolve;
/// let config = HandlerConfig::builder("/srv/www").build().unwrap();
/// let path = resolve(&config, "/css/../site.css?v=3").unwrap();
/// assert_eq!(path, std::path::Path::new("/srv/www/site.css"));
/// ```
pub fn resolve(config: &HandlerConfig, target: &str) -> Result<PathBuf, ServeError> {
    let end = target.find(|c| c == '?' || c == '#').unwrap_or(target.len());
    let request_path = &target[..end];

    let mut segments: Vec<&str> = Vec::new();
    for segment in request_path.split(is_separator) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    logger::log_warning(&format!("Path traversal attempt blocked: {target}"));
                    return Err(ServeError::AccessDenied);
                }
            }
            s => segments.push(s),
        }
    }

    let mut path = config.document_root().to_path_buf();
    path.extend(segments);
    Ok(path)
}

const fn is_separator(c: char) -> bool {
    c == '/' || (cfg!(windows) && c == '\\')
}

/// Canonical containment check, then stat of the literal path
///
/// Symlinks are only followed when the handler allows it; otherwise a link
/// is stat'ed as itself and rejected as not a regular file.
///
/// # Arguments
/// * `config` - Handler settings with the canonical document root
/// * `path` - Absolute path produced by [`resolve`]
pub async fn guard_and_stat(config: &HandlerConfig, path: &Path) -> Result<FileInfo, ServeError> {
    let canonical = match tokio::fs::canonicalize(path).await {
        Ok(p) => p,
        // File not found is common (404), no need to log
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(ServeError::NotFound),
        Err(e) => {
            logger::log_debug(&format!("Canonicalization failed for {}: {e}", path.display()));
            return Err(ServeError::AccessDenied);
        }
    };

    if !is_within(&canonical, config.document_root_canonical()) {
        logger::log_warning(&format!(
            "Path traversal attempt blocked: {} -> {}",
            path.display(),
            canonical.display()
        ));
        return Err(ServeError::AccessDenied);
    }

    let meta = if config.follow_symbolic_links() {
        tokio::fs::metadata(path).await
    } else {
        tokio::fs::symlink_metadata(path).await
    }
    .map_err(|_| ServeError::NotFound)?;

    if !meta.is_file() {
        if meta.file_type().is_symlink() {
            logger::log_warning(&format!("Symbolic link refused: {}", path.display()));
        }
        return Err(ServeError::AccessDenied);
    }

    Ok(FileInfo::from_metadata(&meta))
}

/// Prefix check on canonical paths; case-insensitive where the filesystem is
fn is_within(canonical: &Path, root: &Path) -> bool {
    components_within(canonical, root, cfg!(windows))
}

/// Whole-component prefix match, so `/www-evil` is never inside `/www`
fn components_within(path: &Path, root: &Path, ignore_case: bool) -> bool {
    let mut path = path.components();
    root.components().all(|expected| {
        path.next().is_some_and(|actual| {
            if ignore_case {
                let actual = actual.as_os_str().to_string_lossy().to_lowercase();
                actual == expected.as_os_str().to_string_lossy().to_lowercase()
            } else {
                actual == expected
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, HandlerConfig) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("public");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("test.txt"), "0123456789").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "hidden").unwrap();
        let config = HandlerConfig::builder(&root).build().unwrap();
        (dir, config)
    }

    #[test]
    fn test_resolve_strips_query_and_fragment() {
        let (_dir, config) = setup();
        let path = resolve(&config, "/test.txt?download=1#top").unwrap();
        assert_eq!(path, config.document_root().join("test.txt"));
    }

    #[test]
    fn test_resolve_normalizes_segments() {
        let (_dir, config) = setup();
        let path = resolve(&config, "//sub/./../test.txt").unwrap();
        assert_eq!(path, config.document_root().join("test.txt"));
        assert_eq!(resolve(&config, "/").unwrap(), config.document_root());
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let (_dir, config) = setup();
        assert_eq!(
            resolve(&config, "/../secret.txt"),
            Err(ServeError::AccessDenied)
        );
        assert_eq!(
            resolve(&config, "/sub/../../secret.txt"),
            Err(ServeError::AccessDenied)
        );
    }

    #[tokio::test]
    async fn test_guard_regular_file() {
        let (_dir, config) = setup();
        let path = resolve(&config, "/test.txt").unwrap();
        let info = guard_and_stat(&config, &path).await.unwrap();
        assert_eq!(info.len, 10);
        assert!(info.modified_secs() > 0);
    }

    #[tokio::test]
    async fn test_guard_missing_file() {
        let (_dir, config) = setup();
        let path = resolve(&config, "/missing.txt").unwrap();
        assert_eq!(
            guard_and_stat(&config, &path).await,
            Err(ServeError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_guard_directory_denied() {
        let (_dir, config) = setup();
        let path = resolve(&config, "/sub").unwrap();
        assert_eq!(
            guard_and_stat(&config, &path).await,
            Err(ServeError::AccessDenied)
        );
    }

    #[tokio::test]
    async fn test_guard_outside_root_denied() {
        let (dir, config) = setup();
        // Absolute path that bypasses resolve()
        let outside = dir.path().join("secret.txt");
        assert_eq!(
            guard_and_stat(&config, &outside).await,
            Err(ServeError::AccessDenied)
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_policy() {
        let (dir, config) = setup();
        let root = config.document_root().to_path_buf();
        std::os::unix::fs::symlink(root.join("test.txt"), root.join("inside.txt")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("secret.txt"), root.join("escape.txt"))
            .unwrap();

        // Link to a file inside the root: refused unless following is enabled
        let inside = resolve(&config, "/inside.txt").unwrap();
        assert_eq!(
            guard_and_stat(&config, &inside).await,
            Err(ServeError::AccessDenied)
        );

        let following = HandlerConfig::builder(&root)
            .follow_symbolic_links(true)
            .build()
            .unwrap();
        assert_eq!(guard_and_stat(&following, &inside).await.unwrap().len, 10);

        // Link escaping the root: refused even when following
        let escape = resolve(&following, "/escape.txt").unwrap();
        assert_eq!(
            guard_and_stat(&following, &escape).await,
            Err(ServeError::AccessDenied)
        );
    }

    #[test]
    fn test_containment_matches_whole_components() {
        let root = Path::new("/srv/www");
        for ignore_case in [false, true] {
            assert!(components_within(Path::new("/srv/www/a.txt"), root, ignore_case));
            assert!(components_within(root, root, ignore_case));
            assert!(!components_within(Path::new("/srv/www-evil/a.txt"), root, ignore_case));
            assert!(!components_within(Path::new("/srv/wwwx"), root, ignore_case));
            assert!(!components_within(Path::new("/srv"), root, ignore_case));
        }
        assert!(components_within(Path::new("/SRV/Www/a.txt"), root, true));
        assert!(!components_within(Path::new("/SRV/Www/a.txt"), root, false));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_to_prefixed_sibling_denied() {
        let (dir, _) = setup();
        let root = dir.path().join("www");
        std::fs::create_dir(&root).unwrap();
        let sibling = dir.path().join("www-evil");
        std::fs::create_dir(&sibling).unwrap();
        std::fs::write(sibling.join("secret.txt"), "hidden").unwrap();
        std::os::unix::fs::symlink(&sibling, root.join("l")).unwrap();

        let config = HandlerConfig::builder(&root)
            .follow_symbolic_links(true)
            .build()
            .unwrap();
        let path = resolve(&config, "/l/secret.txt").unwrap();
        assert_eq!(
            guard_and_stat(&config, &path).await,
            Err(ServeError::AccessDenied)
        );
    }

    #[test]
    fn test_same_file() {
        let (_dir, config) = setup();
        let path = config.document_root().join("test.txt");
        let a = FileInfo::from_metadata(&std::fs::metadata(&path).unwrap());
        let b = FileInfo::from_metadata(&std::fs::metadata(&path).unwrap());
        assert_eq!(a.same_file(&b), cfg!(unix));

        let other = config.document_root().join("other.txt");
        std::fs::write(&other, "0123456789").unwrap();
        let c = FileInfo::from_metadata(&std::fs::metadata(&other).unwrap());
        assert!(!a.same_file(&c));
    }
}
