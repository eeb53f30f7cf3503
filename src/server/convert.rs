//! Mapping between wire messages and the peer API types, shared by the server and the client.
use crate::grpc::{
    proto_error, ProtoError, ProtoInvalidEpoch, ProtoInvalidSegmentId, ProtoInvalidState, ProtoInvalidVersion,
    ProtoMetaVersion, ProtoNoSuchChangeLog, ProtoServerFault,
};
use crate::peer::{Epoch, MetaStateError, MetaVersion, PeerState};
use std::convert::TryFrom;

/// A message from the other side that doesn't decode.
#[derive(Debug)]
pub(crate) struct Malformed(pub(crate) String);

pub(crate) fn epoch_to_proto(epoch: Epoch) -> Vec<u8> {
    epoch.as_bytes().to_vec()
}

pub(crate) fn epoch_from_proto(bytes: &[u8]) -> Result<Epoch, Malformed> {
    Epoch::try_from(bytes).map_err(|e| Malformed(e.to_string()))
}

pub(crate) fn version_to_proto(version: MetaVersion) -> Option<ProtoMetaVersion> {
    Some(ProtoMetaVersion {
        segment_id: version.segment_id,
        record_count: version.record_count,
    })
}

pub(crate) fn version_from_proto(version: Option<ProtoMetaVersion>) -> Result<MetaVersion, Malformed> {
    version
        .map(|v| MetaVersion::new(v.segment_id, v.record_count))
        .ok_or_else(|| Malformed("Missing version".to_string()))
}

pub(crate) fn state_from_proto(state: u32) -> Result<PeerState, Malformed> {
    PeerState::from_u32(state).ok_or_else(|| Malformed(format!("Unknown peer state {}", state)))
}

pub(crate) fn error_to_proto(error: MetaStateError) -> ProtoError {
    let err = match error {
        MetaStateError::InvalidState(state) => proto_error::Err::InvalidState(ProtoInvalidState {
            current_state: state.as_u32(),
        }),
        MetaStateError::InvalidEpoch { expected, received } => proto_error::Err::InvalidEpoch(ProtoInvalidEpoch {
            expected: epoch_to_proto(expected),
            received: epoch_to_proto(received),
        }),
        MetaStateError::InvalidVersion { expected, received } => {
            proto_error::Err::InvalidVersion(ProtoInvalidVersion {
                expected: version_to_proto(expected),
                received: version_to_proto(received),
            })
        }
        MetaStateError::NoSuchChangeLog(change_log_id) => {
            proto_error::Err::NoSuchChangeLog(ProtoNoSuchChangeLog { change_log_id })
        }
        MetaStateError::InvalidSegmentId(segment_id) => {
            proto_error::Err::InvalidSegmentId(ProtoInvalidSegmentId { segment_id })
        }
        MetaStateError::IoError(message) => proto_error::Err::IoError(ProtoServerFault { message }),
        MetaStateError::Unavailable(message) => proto_error::Err::ServerFault(ProtoServerFault { message }),
        MetaStateError::ActorExited => proto_error::Err::ServerFault(ProtoServerFault {
            message: "Server internal peer task has exited".to_string(),
        }),
    };

    ProtoError { err: Some(err) }
}

pub(crate) fn error_from_proto(error: ProtoError) -> MetaStateError {
    let decoded = match error.err {
        Some(proto_error::Err::InvalidState(e)) => state_from_proto(e.current_state).map(MetaStateError::InvalidState),
        Some(proto_error::Err::InvalidEpoch(e)) => epoch_from_proto(&e.expected).and_then(|expected| {
            let received = epoch_from_proto(&e.received)?;
            Ok(MetaStateError::InvalidEpoch { expected, received })
        }),
        Some(proto_error::Err::InvalidVersion(ProtoInvalidVersion { expected, received })) => {
            version_from_proto(expected).and_then(|expected| {
                let received = version_from_proto(received)?;
                Ok(MetaStateError::InvalidVersion { expected, received })
            })
        }
        Some(proto_error::Err::NoSuchChangeLog(e)) => Ok(MetaStateError::NoSuchChangeLog(e.change_log_id)),
        Some(proto_error::Err::InvalidSegmentId(e)) => Ok(MetaStateError::InvalidSegmentId(e.segment_id)),
        Some(proto_error::Err::IoError(e)) => Ok(MetaStateError::IoError(e.message)),
        Some(proto_error::Err::ServerFault(e)) => Ok(MetaStateError::Unavailable(e.message)),
        None => Err(Malformed("Empty error".to_string())),
    };

    decoded.unwrap_or_else(malformed_reply)
}

pub(crate) fn malformed_reply(malformed: Malformed) -> MetaStateError {
    MetaStateError::IoError(format!("Malformed reply: {}", malformed.0))
}
