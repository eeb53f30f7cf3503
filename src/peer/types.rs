use std::convert::TryFrom;
use std::fmt;
use uuid::Uuid;

/// Id of a changelog segment. A snapshot shares the id of the segment that starts right after it.
pub type SegmentId = u32;

/// CRC32 of a snapshot's serialized state.
pub type Checksum = u32;

/// Position in the replicated history: the number of changes applied within the current segment.
///
/// Ordering is lexicographic, segment first.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetaVersion {
    pub segment_id: SegmentId,
    pub record_count: u32,
}

impl MetaVersion {
    pub const fn new(segment_id: SegmentId, record_count: u32) -> Self {
        MetaVersion {
            segment_id,
            record_count,
        }
    }

    /// Version after applying one more change in the same segment.
    pub fn next(self) -> Self {
        self.advance(1)
    }

    pub fn advance(self, num_changes: u32) -> Self {
        MetaVersion::new(self.segment_id, self.record_count + num_changes)
    }

    /// Version right after the segment is sealed and the next one is started.
    pub fn next_segment(self) -> Self {
        MetaVersion::new(self.segment_id + 1, 0)
    }

    /// Election priority. Peers that can reach further into the history win.
    pub fn priority(self) -> u64 {
        (u64::from(self.segment_id) << 32) | u64::from(self.record_count)
    }
}

impl fmt::Display for MetaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.segment_id, self.record_count)
    }
}

/// Identifies one leadership term. Issued by the election layer, compared only for equality.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Epoch(Uuid);

impl Epoch {
    pub fn new_random() -> Self {
        Epoch(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Epoch(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl TryFrom<&[u8]> for Epoch {
    type Error = InvalidEpochBytes;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Uuid::from_slice(bytes).map(Epoch).map_err(|_| InvalidEpochBytes(bytes.len()))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Epoch must be 16 bytes, got {0}")]
pub struct InvalidEpochBytes(usize);

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PeerState {
    Stopped,
    Elections,
    FollowerRecovery,
    Following,
    LeaderRecovery,
    Leading,
}

impl PeerState {
    pub(crate) fn as_u32(self) -> u32 {
        match self {
            PeerState::Stopped => 0,
            PeerState::Elections => 1,
            PeerState::FollowerRecovery => 2,
            PeerState::Following => 3,
            PeerState::LeaderRecovery => 4,
            PeerState::Leading => 5,
        }
    }

    pub(crate) fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(PeerState::Stopped),
            1 => Some(PeerState::Elections),
            2 => Some(PeerState::FollowerRecovery),
            3 => Some(PeerState::Following),
            4 => Some(PeerState::LeaderRecovery),
            5 => Some(PeerState::Leading),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommitMode {
    /// Reject immediately if the leader can't see an active quorum.
    MayFail,
    /// Keep retrying until the change is submitted or the epoch ends.
    NeverFails,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommitResult {
    /// Durable on a quorum.
    Committed,
    /// Submitted, but the epoch ended before a quorum acknowledged it. It may or may not survive.
    MaybeCommitted,
    /// Never submitted.
    NotCommitted,
    /// This peer isn't an active leader.
    InvalidState,
}

/// Client-supplied idempotency key for a change.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MutationId(Uuid);

impl MutationId {
    pub fn new_random() -> Self {
        MutationId(Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering_is_segment_major() {
        assert!(MetaVersion::new(1, 0) > MetaVersion::new(0, 1000));
        assert!(MetaVersion::new(2, 5) < MetaVersion::new(2, 6));
        assert_eq!(MetaVersion::new(3, 7).next(), MetaVersion::new(3, 8));
        assert_eq!(MetaVersion::new(3, 7).next_segment(), MetaVersion::new(4, 0));
    }

    #[test]
    fn priority_agrees_with_ordering() {
        let versions = [
            MetaVersion::new(0, 0),
            MetaVersion::new(0, u32::MAX),
            MetaVersion::new(1, 0),
            MetaVersion::new(5, 10),
        ];
        for pair in versions.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].priority() < pair[1].priority());
        }
    }

    #[test]
    fn version_display() {
        assert_eq!(MetaVersion::new(5, 10).to_string(), "(5, 10)");
    }

    #[test]
    fn epoch_bytes() {
        let epoch = Epoch::new_random();
        let parsed = Epoch::try_from(&epoch.as_bytes()[..]).unwrap();
        assert_eq!(epoch, parsed);
        assert_ne!(epoch, Epoch::new_random());
        assert!(Epoch::try_from(&[1u8, 2, 3][..]).is_err());
    }

    #[test]
    fn peer_state_u32() {
        for state in [
            PeerState::Stopped,
            PeerState::Elections,
            PeerState::FollowerRecovery,
            PeerState::Following,
            PeerState::LeaderRecovery,
            PeerState::Leading,
        ]
        .iter()
        {
            assert_eq!(PeerState::from_u32(state.as_u32()), Some(*state));
        }
        assert_eq!(PeerState::from_u32(42), None);
    }
}
