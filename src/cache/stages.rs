//! Cache-backed stage set

use super::{DescriptorCache, Lease};
use crate::config::HandlerConfig;
use crate::error::ServeError;
use crate::handler::resolve::FileInfo;
use crate::handler::Stages;
use crate::pump::PumpSource;
use std::path::Path;
use std::sync::Arc;

/// Stats through the descriptor cache and pumps from the cached descriptor
#[derive(Clone)]
pub struct CachedStages {
    cache: Arc<DescriptorCache>,
}

impl CachedStages {
    pub const fn new(cache: Arc<DescriptorCache>) -> Self {
        Self { cache }
    }
}

impl Stages for CachedStages {
    type Source = Lease;

    async fn file_info(
        &self,
        config: &HandlerConfig,
        path: &Path,
    ) -> Result<(FileInfo, Lease), ServeError> {
        self.cache.lookup(config, path).await
    }

    async fn open_source(&self, _path: &Path, lease: Lease) -> Result<PumpSource, ServeError> {
        Ok(PumpSource::Cached(lease))
    }
}
