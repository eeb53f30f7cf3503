use crate::changelog::log::{ChangeLog, ChangeLogError, ChangeLogHeader};
use crate::fs_util;
use crate::peer::{Epoch, SegmentId};
use lru::LruCache;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const EXTENSION: &str = "log";

/// Keeps recently used segments open. Segments still referenced outside the cache are never
/// evicted, so the cache may briefly hold more than `capacity` entries.
pub(crate) struct ChangeLogCache {
    logger: slog::Logger,
    directory: PathBuf,
    capacity: usize,
    cache: Mutex<LruCache<SegmentId, Arc<ChangeLog>>>,
}

impl ChangeLogCache {
    pub(crate) fn new(logger: slog::Logger, directory: PathBuf, capacity: usize) -> Result<Self, ChangeLogError> {
        fs::create_dir_all(&directory)?;

        Ok(ChangeLogCache {
            logger,
            directory,
            capacity,
            cache: Mutex::new(LruCache::unbounded()),
        })
    }

    /// Fails with `NoSuchChangeLog` if the segment has no file.
    pub(crate) fn get(&self, id: SegmentId) -> Result<Arc<ChangeLog>, ChangeLogError> {
        if let Some(log) = self.lock().get(&id) {
            return Ok(log.clone());
        }

        // Opening scans the whole file, so do it outside the lock.
        let log = Arc::new(ChangeLog::open(&self.logger, &self.path(id), id)?);
        Ok(self.insert(id, log))
    }

    /// Fails with `AlreadyExists` if the segment has a file.
    pub(crate) fn create(
        &self,
        id: SegmentId,
        prev_record_count: u32,
        epoch: Epoch,
    ) -> Result<Arc<ChangeLog>, ChangeLogError> {
        let header = ChangeLogHeader {
            segment_id: id,
            prev_record_count,
            epoch,
        };
        let log = Arc::new(ChangeLog::create(&self.path(id), header)?);
        slog::debug!(
            self.logger,
            "Created changelog {} (prev record count {}, epoch {})",
            id,
            prev_record_count,
            epoch
        );

        Ok(self.insert(id, log))
    }

    /// Deletes the segment's file. Handles already given out stay readable until dropped.
    pub(crate) fn remove(&self, id: SegmentId) -> Result<(), ChangeLogError> {
        self.lock().pop(&id);
        fs_util::remove_file_if_exists(&self.path(id))?;
        slog::info!(self.logger, "Removed changelog {}", id);
        Ok(())
    }

    #[cfg(test)]
    fn exists(&self, id: SegmentId) -> bool {
        self.lock().contains(&id) || self.path(id).exists()
    }

    pub(crate) fn segment_ids(&self) -> Result<Vec<SegmentId>, ChangeLogError> {
        Ok(fs_util::numbered_files(&self.directory, EXTENSION)?)
    }

    pub(crate) fn max_segment_id(&self) -> Result<Option<SegmentId>, ChangeLogError> {
        Ok(self.segment_ids()?.last().copied())
    }

    fn insert(&self, id: SegmentId, log: Arc<ChangeLog>) -> Arc<ChangeLog> {
        let mut cache = self.lock();
        if let Some(existing) = cache.get(&id) {
            return existing.clone();
        }

        cache.put(id, log.clone());
        while cache.len() > self.capacity {
            let victim = cache
                .iter()
                .rev()
                .find(|(_, log)| Arc::strong_count(log) == 1)
                .map(|(id, _)| *id);
            match victim {
                Some(victim) => {
                    cache.pop(&victim);
                }
                None => break,
            }
        }

        log
    }

    fn path(&self, id: SegmentId) -> PathBuf {
        self.directory.join(fs_util::numbered_file_name(id, EXTENSION))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<SegmentId, Arc<ChangeLog>>> {
        self.cache.lock().expect("ChangeLogCache mutex guard poison")
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.lock().len()
    }
}
