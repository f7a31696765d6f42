//! Descriptor cache module
//!
//! Keeps open descriptors and stat results warm across requests, keyed by
//! resolved path. Concurrent misses for one path are coalesced: the first
//! spawns a loader and every caller that arrives before it finishes receives
//! the same result.
//!
//! ```text
//! DescriptorCache
//!   entries: path -> CachedFile (LRU-bounded)
//!
//! CachedFile
//!   descriptor   Arc<File> + the stat it was opened with
//!   info         last stat result (or error)
//!   valid_until  freshness deadline
//!   waiters      coalesced callers of an in-flight load
//!   open_refs    outstanding leases on the current descriptor
//!   generation   bumped whenever the descriptor is replaced or dropped
//! ```
//!
//! A [`Lease`] pins the descriptor for one transfer and releases on drop.
//! Releasing the last lease closes the descriptor only when the entry is idle
//! and stale, and only for the lease's own generation, so a late release can
//! never close a descriptor opened by a newer load.

mod stages;

pub use stages::CachedStages;

use crate::config::{DescriptorCacheConfig, HandlerConfig};
use crate::error::ServeError;
use crate::handler::resolve::{guard_and_stat, FileInfo};
use crate::logger;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

type LookupResult = Result<(FileInfo, Lease), ServeError>;

/// Bounds for a [`DescriptorCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum number of cached paths
    pub capacity: usize,
    /// Ceiling on how long a failed open/stat is remembered
    pub error_ttl: Duration,
}

impl CacheSettings {
    pub const fn from_config(config: &DescriptorCacheConfig) -> Self {
        Self {
            capacity: config.capacity,
            error_ttl: Duration::from_secs(config.error_ttl_seconds),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from_config(&DescriptorCacheConfig::default())
    }
}

/// Shared cache of open descriptors
pub struct DescriptorCache {
    settings: CacheSettings,
    entries: Mutex<Entries>,
    opens: AtomicU64,
}

#[derive(Default)]
struct Entries {
    map: HashMap<PathBuf, Slot>,
    tick: u64,
}

struct Slot {
    entry: Arc<CachedFile>,
    last_used: u64,
}

impl Entries {
    /// Drop the least recently used entry nobody else references
    fn evict_one(&mut self) -> bool {
        let victim = self
            .map
            .iter()
            .filter(|(_, slot)| Arc::strong_count(&slot.entry) == 1)
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(path, _)| path.clone());

        victim.is_some_and(|path| self.map.remove(&path).is_some())
    }
}

impl DescriptorCache {
    pub fn new(settings: CacheSettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            entries: Mutex::new(Entries::default()),
            opens: AtomicU64::new(0),
        })
    }

    /// Stat `path` through the cache and pin its descriptor
    ///
    /// A fresh entry answers without suspending. Otherwise the caller joins
    /// the entry's waiters; only the first waiter starts the open+stat.
    /// Errors are cached too, for at most `error_ttl`.
    pub async fn lookup(self: &Arc<Self>, config: &HandlerConfig, path: &Path) -> LookupResult {
        let entry = self.entry_for(path);

        let rx = {
            let mut state = entry.lock();
            if state.is_fresh(Instant::now()) {
                return state.deliver(&entry);
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            if !state.loading {
                state.loading = true;
                tokio::spawn(Arc::clone(self).load(Arc::clone(&entry), config.clone()));
            }
            rx
        };

        rx.await.unwrap_or_else(|_| {
            logger::log_error(&format!("Descriptor loader vanished for {}", path.display()));
            Err(ServeError::Internal("descriptor loader vanished".to_string()))
        })
    }

    /// Remove idle entries whose freshness window has passed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock_entries();
        let before = entries.map.len();
        entries.map.retain(|_, slot| {
            Arc::strong_count(&slot.entry) > 1 || slot.entry.lock().is_fresh(now)
        });
        before - entries.map.len()
    }

    /// Number of cached paths
    pub fn len(&self) -> usize {
        self.lock_entries().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Underlying open+stat operations performed so far
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    fn lock_entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry_for(&self, path: &Path) -> Arc<CachedFile> {
        let mut entries = self.lock_entries();
        entries.tick += 1;
        let tick = entries.tick;

        if let Some(slot) = entries.map.get_mut(path) {
            slot.last_used = tick;
            return Arc::clone(&slot.entry);
        }

        let entry = Arc::new(CachedFile::new(path.to_path_buf()));
        if entries.map.len() >= self.settings.capacity && !entries.evict_one() {
            // Every slot is busy: serve this request from a transient entry
            logger::log_debug(&format!("Descriptor cache full, not caching {}", path.display()));
            return entry;
        }

        entries.map.insert(
            path.to_path_buf(),
            Slot {
                entry: Arc::clone(&entry),
                last_used: tick,
            },
        );
        entry
    }

    async fn load(self: Arc<Self>, entry: Arc<CachedFile>, config: HandlerConfig) {
        self.opens.fetch_add(1, Ordering::Relaxed);
        let result = open_and_stat(&config, &entry).await;

        let ttl = Duration::from_secs(u64::try_from(config.cache_time_seconds()).unwrap_or(0));
        let deliveries: Vec<_> = {
            let mut state = entry.lock();
            let now = Instant::now();

            match result {
                Ok((info, file)) => {
                    let replaced = state
                        .descriptor
                        .as_ref()
                        .map_or(true, |d| !Arc::ptr_eq(&d.file, &file));
                    if replaced {
                        state.bump_generation();
                    }
                    state.descriptor = Some(Descriptor { file, info });
                    state.info = Some(Ok(info));
                    state.valid_until = now + ttl;
                }
                Err(err) => {
                    if state.descriptor.take().is_some() {
                        state.bump_generation();
                    }
                    state.info = Some(Err(err));
                    state.valid_until = now + ttl.min(self.settings.error_ttl);
                }
            }
            state.loading = false;

            let waiters = std::mem::take(&mut state.waiters);
            waiters
                .into_iter()
                .map(|tx| (tx, state.deliver(&entry)))
                .collect()
        };

        // A caller that gave up drops the lease, which releases it
        for (tx, outcome) in deliveries {
            let _ = tx.send(outcome);
        }

        // Nobody took a lease (all errors or all callers gone): settle now
        entry.settle();
    }
}

#[cfg(test)]
impl DescriptorCache {
    /// Outstanding leases on the current descriptor of a cached path
    pub(crate) fn open_refs(&self, path: &Path) -> usize {
        let entries = self.lock_entries();
        let state = entries.map[path].entry.lock();
        state.open_refs
    }

    pub(crate) fn has_descriptor(&self, path: &Path) -> bool {
        let entries = self.lock_entries();
        let state = entries.map[path].entry.lock();
        state.descriptor.is_some()
    }
}

/// Guard+stat the path, reusing the current descriptor when it still names the same file
async fn open_and_stat(
    config: &HandlerConfig,
    entry: &CachedFile,
) -> Result<(FileInfo, Arc<File>), ServeError> {
    let info = guard_and_stat(config, &entry.path).await?;

    let current = entry
        .lock()
        .descriptor
        .as_ref()
        .filter(|d| d.info.same_file(&info))
        .map(|d| Arc::clone(&d.file));
    if let Some(file) = current {
        return Ok((info, file));
    }

    let file = tokio::fs::File::open(&entry.path).await.map_err(|e| {
        logger::log_debug(&format!("Open failed for {}: {e}", entry.path.display()));
        ServeError::NotFound
    })?;
    Ok((info, Arc::new(file.into_std().await)))
}

struct Descriptor {
    file: Arc<File>,
    /// Stat taken when the descriptor was (re)validated
    info: FileInfo,
}

struct EntryState {
    descriptor: Option<Descriptor>,
    info: Option<Result<FileInfo, ServeError>>,
    valid_until: Instant,
    waiters: Vec<oneshot::Sender<LookupResult>>,
    loading: bool,
    open_refs: usize,
    generation: u64,
}

impl EntryState {
    fn is_fresh(&self, now: Instant) -> bool {
        self.info.is_some() && now < self.valid_until
    }

    fn is_idle(&self) -> bool {
        self.open_refs == 0 && !self.loading && self.waiters.is_empty()
    }

    fn bump_generation(&mut self) {
        self.generation += 1;
        // Leases of the previous descriptor no longer count against this one
        self.open_refs = 0;
    }

    /// Hand out the current result, acquiring a lease on success
    fn deliver(&mut self, entry: &Arc<CachedFile>) -> LookupResult {
        match &self.info {
            Some(Ok(info)) => {
                let Some(descriptor) = &self.descriptor else {
                    logger::log_error(&format!(
                        "Cache consistency violation: stat without descriptor for {}",
                        entry.path.display()
                    ));
                    return Err(ServeError::Internal(
                        "cached stat without descriptor".to_string(),
                    ));
                };
                let lease = Lease {
                    entry: Arc::clone(entry),
                    file: Arc::clone(&descriptor.file),
                    generation: self.generation,
                };
                let info = *info;
                self.open_refs += 1;
                Ok((info, lease))
            }
            Some(Err(err)) => Err(err.clone()),
            None => Err(ServeError::Internal("cache entry has no stat".to_string())),
        }
    }
}

/// One cached path
pub struct CachedFile {
    path: PathBuf,
    state: Mutex<EntryState>,
}

impl CachedFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(EntryState {
                descriptor: None,
                info: None,
                valid_until: Instant::now(),
                waiters: Vec::new(),
                loading: false,
                open_refs: 0,
                generation: 0,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, generation: u64) {
        let mut state = self.lock();
        if generation != state.generation {
            // Lease of a replaced descriptor; its Arc closes the old file
            return;
        }
        debug_assert!(state.open_refs > 0, "lease released twice");
        state.open_refs = state.open_refs.saturating_sub(1);
        Self::close_if_idle(&mut state, Instant::now());
    }

    /// Close the descriptor of an idle, stale entry
    fn settle(&self) {
        Self::close_if_idle(&mut self.lock(), Instant::now());
    }

    fn close_if_idle(state: &mut EntryState, now: Instant) {
        if state.is_idle() && !state.is_fresh(now) && state.descriptor.is_some() {
            state.descriptor = None;
            state.info = None;
            state.bump_generation();
        }
    }
}

/// Reference on a cached descriptor; released exactly once, on drop
pub struct Lease {
    entry: Arc<CachedFile>,
    file: Arc<File>,
    generation: u64,
}

impl Lease {
    pub fn file(&self) -> &Arc<File> {
        &self.file
    }

    pub fn path(&self) -> &Path {
        self.entry.path()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.entry.release(self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup(cache_time_seconds: i64) -> (TempDir, HandlerConfig) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.txt"), "0123456789").unwrap();
        std::fs::write(dir.path().join("other.txt"), "abc").unwrap();
        let config = HandlerConfig::builder(dir.path())
            .cache_time_seconds(cache_time_seconds)
            .build()
            .unwrap();
        (dir, config)
    }

    fn settings(capacity: usize) -> CacheSettings {
        CacheSettings {
            capacity,
            error_ttl: Duration::from_secs(10),
        }
    }

    fn refs(cache: &DescriptorCache, path: &Path) -> usize {
        cache.open_refs(path)
    }

    fn has_descriptor(cache: &DescriptorCache, path: &Path) -> bool {
        cache.has_descriptor(path)
    }

    #[tokio::test]
    async fn test_hit_after_miss() {
        let (_dir, config) = setup(60);
        let cache = DescriptorCache::new(settings(8));
        let path = config.document_root().join("test.txt");

        let (info, lease) = cache.lookup(&config, &path).await.unwrap();
        assert_eq!(info.len, 10);
        assert_eq!(lease.path(), path);
        drop(lease);

        let (again, _lease) = cache.lookup(&config, &path).await.unwrap();
        assert_eq!(again, info);
        assert_eq!(cache.opens(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let (_dir, config) = setup(60);
        let cache = DescriptorCache::new(settings(8));
        let path = config.document_root().join("test.txt");

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let (cache, config, path) = (Arc::clone(&cache), config.clone(), path.clone());
            tasks.spawn(async move { cache.lookup(&config, &path).await });
        }
        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            results.push(joined.unwrap());
        }

        assert_eq!(cache.opens(), 1, "only the first miss may open");
        let first = results[0].as_ref().unwrap().0;
        for result in &results {
            let (info, lease) = result.as_ref().unwrap();
            assert_eq!(*info, first);
            assert!(Arc::ptr_eq(lease.file(), results[0].as_ref().unwrap().1.file()));
        }
        assert_eq!(refs(&cache, &path), 16);

        drop(results);
        assert_eq!(refs(&cache, &path), 0);
        // Still fresh: descriptor stays open for the next request
        assert!(has_descriptor(&cache, &path));
    }

    #[tokio::test]
    async fn test_stale_descriptor_closed_on_last_release() {
        let (_dir, config) = setup(0);
        let cache = DescriptorCache::new(settings(8));
        let path = config.document_root().join("test.txt");

        let (_, a) = cache.lookup(&config, &path).await.unwrap();
        let (_, b) = cache.lookup(&config, &path).await.unwrap();
        // Caching disabled: each lookup revalidates but reuses the descriptor
        assert_eq!(cache.opens(), 2);
        assert_eq!(Arc::ptr_eq(a.file(), b.file()), cfg!(unix));
        if cfg!(unix) {
            assert_eq!(refs(&cache, &path), 2);
        }

        drop(a);
        assert!(has_descriptor(&cache, &path));
        drop(b);
        assert!(!has_descriptor(&cache, &path));
    }

    #[tokio::test]
    async fn test_replaced_file_gets_new_descriptor() {
        let (dir, config) = setup(0);
        let cache = DescriptorCache::new(settings(8));
        let path = config.document_root().join("test.txt");

        let (_, old) = cache.lookup(&config, &path).await.unwrap();

        // Replace the file under the same name
        let tmp = dir.path().join("replacement");
        std::fs::write(&tmp, "new contents").unwrap();
        std::fs::rename(&tmp, &path).unwrap();

        let (info, new) = cache.lookup(&config, &path).await.unwrap();
        assert_eq!(info.len, 12);
        assert!(!Arc::ptr_eq(old.file(), new.file()));

        // Releasing the old lease must not close the new descriptor
        drop(old);
        assert!(has_descriptor(&cache, &path));
        assert_eq!(refs(&cache, &path), 1);
        drop(new);
        assert!(!has_descriptor(&cache, &path));
    }

    #[tokio::test]
    async fn test_errors_are_cached_briefly() {
        let (_dir, config) = setup(60);
        let cache = DescriptorCache::new(settings(8));
        let path = config.document_root().join("missing.txt");

        assert_eq!(
            cache.lookup(&config, &path).await.err(),
            Some(ServeError::NotFound)
        );
        assert_eq!(
            cache.lookup(&config, &path).await.err(),
            Some(ServeError::NotFound)
        );
        assert_eq!(cache.opens(), 1);

        let entries = cache.lock_entries();
        let state = entries.map[&path].entry.lock();
        assert!(state.valid_until <= Instant::now() + Duration::from_secs(10));
        assert!(state.descriptor.is_none());
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let (_dir, config) = setup(60);
        let cache = DescriptorCache::new(settings(1));
        let test = config.document_root().join("test.txt");
        let other = config.document_root().join("other.txt");

        drop(cache.lookup(&config, &test).await.unwrap());
        drop(cache.lookup(&config, &other).await.unwrap());

        assert_eq!(cache.len(), 1);
        let entries = cache.lock_entries();
        assert!(entries.map.contains_key(&other));
    }

    #[tokio::test]
    async fn test_busy_cache_serves_transient_entries() {
        let (_dir, config) = setup(60);
        let cache = DescriptorCache::new(settings(1));
        let test = config.document_root().join("test.txt");
        let other = config.document_root().join("other.txt");

        let (_, pinned) = cache.lookup(&config, &test).await.unwrap();
        let (info, lease) = cache.lookup(&config, &other).await.unwrap();

        assert_eq!(info.len, 3);
        assert_eq!(cache.len(), 1);
        drop((pinned, lease));
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_idle_entries() {
        let (_dir, config) = setup(0);
        let cache = DescriptorCache::new(settings(8));
        let path = config.document_root().join("test.txt");

        let (_, lease) = cache.lookup(&config, &path).await.unwrap();
        assert_eq!(cache.sweep(), 0, "leased entries survive");
        drop(lease);
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }
}
