use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct MetaStateOptions {
    /// How often a follower pings its leader.
    pub ping_interval: Option<Duration>,
    /// How long the leader counts a follower as active after its last ping.
    pub follower_liveness_timeout: Option<Duration>,
    pub rpc_timeout: Option<Duration>,
    /// How long the leader waits for a quorum before giving up on the epoch.
    pub commit_timeout: Option<Duration>,
    /// How long the leader waits for a follower to snapshot on `AdvanceSegment`. Followers that
    /// don't answer in time are left out of the distributed snapshot.
    pub snapshot_timeout: Option<Duration>,
    /// The leader builds a distributed snapshot once the current segment holds this many
    /// records. Unset means snapshots are only built on request.
    pub max_changes_between_snapshots: Option<u32>,
    pub changelog_cache_capacity: Option<usize>,
    /// Most changes sent to a follower in one `ApplyChanges` call.
    pub max_batch_size: Option<usize>,
    /// Bytes per `ReadSnapshot` call during recovery.
    pub snapshot_block_size: Option<u32>,
    /// Records per `ReadChangeLog` call during recovery.
    pub changelog_block_size: Option<u32>,
    pub recovery_retry_backoff: Option<Duration>,
    pub recovery_max_attempts: Option<u32>,
}

#[derive(Clone, Debug)]
pub(crate) struct MetaStateOptionsValidated {
    pub ping_interval: Duration,
    pub follower_liveness_timeout: Duration,
    pub rpc_timeout: Duration,
    pub commit_timeout: Duration,
    pub snapshot_timeout: Duration,
    pub max_changes_between_snapshots: Option<u32>,
    pub changelog_cache_capacity: usize,
    pub max_batch_size: usize,
    pub snapshot_block_size: u32,
    pub changelog_block_size: u32,
    pub recovery_retry_backoff: Duration,
    pub recovery_max_attempts: u32,
}

impl MetaStateOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.ping_interval >= self.follower_liveness_timeout {
            return Err("Follower liveness timeout must be greater than the ping interval");
        }
        if self.rpc_timeout >= self.commit_timeout {
            return Err("RPC timeout must be less than the commit timeout");
        }
        if self.rpc_timeout > self.snapshot_timeout {
            return Err("Snapshot timeout must be at least the RPC timeout");
        }
        if self.max_changes_between_snapshots == Some(0) {
            return Err("Max changes between snapshots must be positive when set");
        }
        if self.changelog_cache_capacity == 0 {
            return Err("Changelog cache capacity must be positive");
        }
        if self.max_batch_size == 0 {
            return Err("Max batch size must be positive");
        }
        if self.snapshot_block_size == 0 || self.changelog_block_size == 0 {
            return Err("Recovery block sizes must be positive");
        }
        if self.recovery_max_attempts == 0 {
            return Err("Recovery needs at least one attempt per call");
        }

        Ok(())
    }
}

impl TryFrom<MetaStateOptions> for MetaStateOptionsValidated {
    type Error = &'static str;

    fn try_from(options: MetaStateOptions) -> Result<Self, Self::Error> {
        let values = MetaStateOptionsValidated {
            ping_interval: options.ping_interval.unwrap_or(Duration::from_millis(100)),
            follower_liveness_timeout: options.follower_liveness_timeout.unwrap_or(Duration::from_millis(500)),
            rpc_timeout: options.rpc_timeout.unwrap_or(Duration::from_millis(300)),
            commit_timeout: options.commit_timeout.unwrap_or(Duration::from_millis(1000)),
            snapshot_timeout: options.snapshot_timeout.unwrap_or(Duration::from_secs(10)),
            max_changes_between_snapshots: options.max_changes_between_snapshots,
            changelog_cache_capacity: options.changelog_cache_capacity.unwrap_or(4),
            max_batch_size: options.max_batch_size.unwrap_or(100),
            snapshot_block_size: options.snapshot_block_size.unwrap_or(64 * 1024),
            changelog_block_size: options.changelog_block_size.unwrap_or(1024),
            recovery_retry_backoff: options.recovery_retry_backoff.unwrap_or(Duration::from_millis(50)),
            recovery_max_attempts: options.recovery_max_attempts.unwrap_or(5),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = MetaStateOptionsValidated::try_from(MetaStateOptions::default()).unwrap();
        assert_eq!(options.rpc_timeout, Duration::from_millis(300));
        assert_eq!(options.max_changes_between_snapshots, None);
    }

    #[test]
    fn rejects_inconsistent_timeouts() {
        let options = MetaStateOptions {
            ping_interval: Some(Duration::from_millis(600)),
            ..Default::default()
        };
        assert!(MetaStateOptionsValidated::try_from(options).is_err());

        let options = MetaStateOptions {
            rpc_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        assert!(MetaStateOptionsValidated::try_from(options).is_err());

        let options = MetaStateOptions {
            snapshot_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        assert!(MetaStateOptionsValidated::try_from(options).is_err());
    }

    #[test]
    fn rejects_zero_sizes() {
        let options = MetaStateOptions {
            max_changes_between_snapshots: Some(0),
            ..Default::default()
        };
        assert!(MetaStateOptionsValidated::try_from(options).is_err());

        let options = MetaStateOptions {
            max_batch_size: Some(0),
            ..Default::default()
        };
        assert!(MetaStateOptionsValidated::try_from(options).is_err());
    }
}
