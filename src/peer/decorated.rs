use crate::api::MetaState;
use crate::changelog::{ChangeLog, ChangeLogCache, ChangeLogError};
use crate::peer::rpc_api::{ChangeLogInfo, MetaStateError};
use crate::peer::types::{Checksum, Epoch, MetaVersion, SegmentId};
use crate::snapshot::{SnapshotError, SnapshotInfo, SnapshotStore};
use bytes::{Buf, Bytes};
use std::sync::Arc;

const REPLAY_BATCH_SIZE: u32 = 1024;

/// The application state together with the durable history that produced it.
///
/// Only ever touched from the state context, one call at a time. Every change is appended to the
/// current changelog segment before the application sees it.
pub(crate) struct DecoratedMetaState {
    logger: slog::Logger,
    state: Box<dyn MetaState>,
    changelog_cache: Arc<ChangeLogCache>,
    snapshot_store: Arc<SnapshotStore>,
    version: MetaVersion,
    reachable_version: MetaVersion,
    current_changelog: Option<Arc<ChangeLog>>,
    // On-disk history was rewritten under the applied state, which must be rebuilt before use.
    stale: bool,
}

impl DecoratedMetaState {
    pub(crate) fn new(
        logger: slog::Logger,
        state: Box<dyn MetaState>,
        changelog_cache: Arc<ChangeLogCache>,
        snapshot_store: Arc<SnapshotStore>,
    ) -> Result<Self, MetaStateError> {
        let mut decorated = DecoratedMetaState {
            logger,
            state,
            changelog_cache,
            snapshot_store,
            version: MetaVersion::default(),
            reachable_version: MetaVersion::default(),
            current_changelog: None,
            stale: false,
        };
        decorated.state.clear();
        decorated.refresh_reachable_version()?;

        Ok(decorated)
    }

    /// Version of the applied state.
    pub(crate) fn version(&self) -> MetaVersion {
        self.version
    }

    /// Furthest version local history could replay to.
    pub(crate) fn reachable_version(&self) -> MetaVersion {
        self.reachable_version
    }

    pub(crate) fn max_snapshot_id(&self) -> Result<Option<SegmentId>, MetaStateError> {
        Ok(self.snapshot_store.max_snapshot_id()?)
    }

    pub(crate) fn refresh_reachable_version(&mut self) -> Result<MetaVersion, MetaStateError> {
        let max_snapshot_id = self.snapshot_store.max_snapshot_id()?;
        let max_changelog_id = self.changelog_cache.max_segment_id()?;

        self.reachable_version = match max_snapshot_id.max(max_changelog_id) {
            None => MetaVersion::default(),
            Some(id) if max_changelog_id == Some(id) => {
                MetaVersion::new(id, self.changelog_cache.get(id)?.record_count())
            }
            Some(id) => MetaVersion::new(id, 0),
        };

        Ok(self.reachable_version)
    }

    pub(crate) fn clear(&mut self) {
        self.state.clear();
        self.version = MetaVersion::default();
        self.current_changelog = None;
        self.stale = false;
    }

    /// Logs and applies `changes`, the first of which must be at exactly the current version.
    pub(crate) fn apply_changes(&mut self, start: MetaVersion, changes: &[Bytes]) -> Result<MetaVersion, MetaStateError> {
        if start != self.version {
            return Err(MetaStateError::InvalidVersion {
                expected: self.version,
                received: start,
            });
        }

        let changelog = self.current_changelog()?;
        self.append_to_active(&changelog, changes)?;
        for change in changes {
            self.state.apply_change(change);
        }
        self.version = self.version.advance(changes.len() as u32);
        self.reachable_version = self.reachable_version.max(self.version);

        Ok(self.version)
    }

    /// Snapshots the state at `version` and starts the next segment. The snapshot takes the id
    /// of the new segment.
    pub(crate) fn create_snapshot(&mut self, version: MetaVersion, epoch: Epoch) -> Result<Checksum, MetaStateError> {
        if version != self.version {
            return Err(MetaStateError::InvalidVersion {
                expected: self.version,
                received: version,
            });
        }

        let mut data = Vec::new();
        self.state
            .save(&mut data)
            .map_err(|e| MetaStateError::IoError(format!("Failed to save state: {}", e)))?;
        let snapshot_id = version.segment_id + 1;
        let info = self.snapshot_store.write(snapshot_id, version.record_count, &data)?;
        slog::info!(
            self.logger,
            "Created snapshot {} at version {} ({} bytes, checksum {:#010x})",
            snapshot_id,
            version,
            info.length,
            info.checksum
        );

        self.rotate_changelog(epoch)?;
        Ok(info.checksum)
    }

    /// Seals the current segment and moves on to a fresh one.
    pub(crate) fn rotate_changelog(&mut self, epoch: Epoch) -> Result<(), MetaStateError> {
        let next = self.version.next_segment();
        let changelog = self.create_changelog(next.segment_id, self.version.record_count, epoch)?;

        self.current_changelog = Some(changelog);
        self.version = next;
        self.reachable_version = self.reachable_version.max(self.version);
        Ok(())
    }

    /// Gives a new epoch a segment that no other epoch has written to. A non-empty segment is
    /// sealed; an empty one is re-created under the new epoch.
    pub(crate) fn start_epoch_segment(&mut self, epoch: Epoch) -> Result<MetaVersion, MetaStateError> {
        if self.version.record_count > 0 {
            self.rotate_changelog(epoch)?;
            return Ok(self.version);
        }

        let segment_id = self.version.segment_id;
        let prev_record_count = match self.changelog_info(segment_id)? {
            Some(info) if info.record_count > 0 => {
                return Err(MetaStateError::IoError(format!(
                    "Changelog {} holds {} records not reflected in applied version {}",
                    segment_id, info.record_count, self.version
                )));
            }
            Some(info) => info.prev_record_count,
            None => self.snapshot_info(segment_id)?.map_or(0, |info| info.prev_record_count),
        };

        self.current_changelog = None;
        self.changelog_cache.remove(segment_id)?;
        self.current_changelog = Some(self.create_changelog(segment_id, prev_record_count, epoch)?);
        self.refresh_reachable_version()?;

        Ok(self.version)
    }

    pub(crate) fn changelog_info(&self, segment_id: SegmentId) -> Result<Option<ChangeLogInfo>, MetaStateError> {
        match self.changelog_cache.get(segment_id) {
            Ok(changelog) => Ok(Some(changelog.info())),
            Err(ChangeLogError::NoSuchChangeLog(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn snapshot_info(&self, snapshot_id: SegmentId) -> Result<Option<SnapshotInfo>, MetaStateError> {
        match self.snapshot_store.info(snapshot_id) {
            Ok(info) => Ok(Some(info)),
            Err(SnapshotError::NoSuchSnapshot(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn latest_snapshot_id_at_most(&self, max_id: SegmentId) -> Result<Option<SegmentId>, MetaStateError> {
        Ok(self.snapshot_store.latest_snapshot_id_at_most(max_id)?)
    }

    /// Deletes every segment and snapshot past `segment_id`.
    pub(crate) fn discard_beyond(&mut self, segment_id: SegmentId) -> Result<(), MetaStateError> {
        for id in self.changelog_cache.segment_ids()? {
            if id > segment_id {
                slog::warn!(self.logger, "Discarding changelog {} beyond segment {}", id, segment_id);
                self.changelog_cache.remove(id)?;
            }
        }
        for id in self.snapshot_store.snapshot_ids()? {
            if id > segment_id {
                slog::warn!(self.logger, "Discarding snapshot {} beyond segment {}", id, segment_id);
                self.snapshot_store.remove(id)?;
            }
        }

        if self.version.segment_id > segment_id {
            self.stale = true;
            self.current_changelog = None;
        }
        self.refresh_reachable_version()?;
        Ok(())
    }

    /// Makes local segment `segment_id` a prefix of the remote one: a segment from another
    /// epoch is replaced, and records past `max_record_count` are cut. Returns the number of
    /// records left locally.
    pub(crate) fn reconcile_segment(
        &mut self,
        segment_id: SegmentId,
        remote: ChangeLogInfo,
        max_record_count: u32,
    ) -> Result<u32, MetaStateError> {
        let local = match self.changelog_cache.get(segment_id) {
            Ok(changelog) => Some(changelog),
            Err(ChangeLogError::NoSuchChangeLog(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let changelog = match local {
            Some(changelog)
                if changelog.epoch() == remote.epoch && changelog.prev_record_count() == remote.prev_record_count =>
            {
                changelog
            }
            Some(changelog) => {
                slog::warn!(
                    self.logger,
                    "Changelog {} diverged from leader (local epoch {}, leader epoch {}), replacing it",
                    segment_id,
                    changelog.epoch(),
                    remote.epoch
                );
                drop(changelog);
                if self.version > MetaVersion::new(segment_id, 0) {
                    self.stale = true;
                }
                self.current_changelog = None;
                self.changelog_cache.remove(segment_id)?;
                self.create_changelog(segment_id, remote.prev_record_count, remote.epoch)?
            }
            None => self.create_changelog(segment_id, remote.prev_record_count, remote.epoch)?,
        };

        if changelog.record_count() > max_record_count {
            slog::info!(
                self.logger,
                "Truncating changelog {} from {} to {} records",
                segment_id,
                changelog.record_count(),
                max_record_count
            );
            changelog.truncate(max_record_count)?;
            if self.version > MetaVersion::new(segment_id, max_record_count) {
                self.stale = true;
            }
        }

        self.refresh_reachable_version()?;
        Ok(changelog.record_count())
    }

    /// Appends records fetched from another peer to local segment `segment_id`, which must
    /// currently hold exactly `start` records.
    pub(crate) fn append_downloaded(
        &mut self,
        segment_id: SegmentId,
        start: u32,
        records: &[Bytes],
    ) -> Result<u32, MetaStateError> {
        let changelog = self.changelog_cache.get(segment_id)?;
        if changelog.record_count() != start {
            return Err(MetaStateError::InvalidVersion {
                expected: MetaVersion::new(segment_id, changelog.record_count()),
                received: MetaVersion::new(segment_id, start),
            });
        }

        changelog.append(records)?;
        self.refresh_reachable_version()?;
        Ok(changelog.record_count())
    }

    /// Drops a local snapshot the leader's history doesn't vouch for.
    pub(crate) fn discard_snapshot(&mut self, snapshot_id: SegmentId) -> Result<(), MetaStateError> {
        slog::warn!(self.logger, "Discarding snapshot {}", snapshot_id);
        self.snapshot_store.remove(snapshot_id)?;
        self.stale = true;
        self.refresh_reachable_version()?;
        Ok(())
    }

    /// Makes the next `restore` rebuild the applied state from scratch.
    pub(crate) fn invalidate(&mut self) {
        self.stale = true;
        self.current_changelog = None;
    }

    pub(crate) fn load_snapshot(&mut self, snapshot_id: SegmentId) -> Result<(), MetaStateError> {
        let (_, data) = self.snapshot_store.load(snapshot_id)?;
        self.state.clear();
        self.state
            .load(&mut data.reader())
            .map_err(|e| MetaStateError::IoError(format!("Failed to load snapshot {}: {}", snapshot_id, e)))?;

        self.version = MetaVersion::new(snapshot_id, 0);
        self.current_changelog = None;
        self.stale = false;
        slog::info!(self.logger, "Loaded snapshot {}", snapshot_id);
        Ok(())
    }

    /// Brings the applied state to `target` from local snapshots and changelogs alone.
    pub(crate) fn restore(&mut self, target: MetaVersion) -> Result<(), MetaStateError> {
        let snapshot_id = self.snapshot_store.latest_snapshot_id_at_most(target.segment_id)?;
        let base = MetaVersion::new(snapshot_id.unwrap_or(0), 0);
        if self.stale || self.version > target || self.version < base {
            match snapshot_id {
                Some(id) => self.load_snapshot(id)?,
                None => self.clear(),
            }
        }

        while self.version.segment_id < target.segment_id {
            let changelog = self.changelog_cache.get(self.version.segment_id)?;
            self.replay(&changelog, changelog.record_count())?;

            let next = self.changelog_cache.get(self.version.segment_id + 1)?;
            if next.prev_record_count() != self.version.record_count {
                return Err(MetaStateError::IoError(format!(
                    "Changelog {} expects {} records before it, but changelog {} holds {}",
                    next.id(),
                    next.prev_record_count(),
                    self.version.segment_id,
                    self.version.record_count
                )));
            }
            self.version = self.version.next_segment();
            self.current_changelog = None;
        }

        if self.version.record_count < target.record_count {
            let changelog = self.changelog_cache.get(target.segment_id)?;
            self.replay(&changelog, target.record_count)?;
        }

        self.reachable_version = self.reachable_version.max(self.version);
        slog::info!(self.logger, "Restored state to version {}", self.version);
        Ok(())
    }

    fn replay(&mut self, changelog: &ChangeLog, target_count: u32) -> Result<(), MetaStateError> {
        if changelog.record_count() < target_count {
            return Err(MetaStateError::IoError(format!(
                "Changelog {} holds {} records, can't replay to {}",
                changelog.id(),
                changelog.record_count(),
                target_count
            )));
        }

        while self.version.record_count < target_count {
            let batch_size = (target_count - self.version.record_count).min(REPLAY_BATCH_SIZE);
            let records = changelog.read(self.version.record_count, batch_size)?;
            if records.is_empty() {
                return Err(MetaStateError::IoError(format!(
                    "Changelog {} shrank during replay",
                    changelog.id()
                )));
            }
            for record in &records {
                self.state.apply_change(record);
            }
            self.version = self.version.advance(records.len() as u32);
        }

        Ok(())
    }

    // A failed append leaves the file as it was, so one retry is safe. The active segment
    // refusing writes twice is fatal: nothing can be committed past it.
    fn append_to_active(&self, changelog: &ChangeLog, changes: &[Bytes]) -> Result<(), MetaStateError> {
        match changelog.append(changes) {
            Ok(()) => Ok(()),
            Err(ChangeLogError::Io(e)) => {
                slog::error!(self.logger, "Append to changelog {} failed, retrying: {}", changelog.id(), e);
                if let Err(e) = changelog.append(changes) {
                    slog::crit!(self.logger, "Changelog {} can't be written: {}", changelog.id(), e);
                    panic!("Changelog {} can't be written: {}", changelog.id(), e);
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn current_changelog(&mut self) -> Result<Arc<ChangeLog>, MetaStateError> {
        let segment_id = self.version.segment_id;
        let cached = self
            .current_changelog
            .as_ref()
            .filter(|changelog| changelog.id() == segment_id)
            .cloned();
        let changelog = match cached {
            Some(changelog) => changelog,
            None => {
                let changelog = self.changelog_cache.get(segment_id)?;
                self.current_changelog = Some(changelog.clone());
                changelog
            }
        };

        if changelog.record_count() != self.version.record_count {
            return Err(MetaStateError::IoError(format!(
                "Changelog {} holds {} records but applied version is {}",
                segment_id,
                changelog.record_count(),
                self.version
            )));
        }

        Ok(changelog)
    }

    fn create_changelog(
        &self,
        segment_id: SegmentId,
        prev_record_count: u32,
        epoch: Epoch,
    ) -> Result<Arc<ChangeLog>, MetaStateError> {
        match self.changelog_cache.create(segment_id, prev_record_count, epoch) {
            Ok(changelog) => Ok(changelog),
            Err(ChangeLogError::AlreadyExists(id)) => {
                slog::crit!(self.logger, "Changelog {} already exists, history is corrupt", id);
                panic!("Changelog {} already exists", id);
            }
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(test)]
    pub(crate) fn saved_state(&self) -> Vec<u8> {
        let mut data = Vec::new();
        self.state.save(&mut data).unwrap();
        data
    }
}
