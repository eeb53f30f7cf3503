use crate::grpc::grpc_meta_state_client::GrpcMetaStateClient;
use crate::grpc::{
    proto_advance_segment_result, proto_apply_changes_result, proto_get_change_log_info_result,
    proto_get_snapshot_info_result, proto_read_change_log_result, proto_read_snapshot_result, proto_sync_result,
    ProtoAdvanceSegmentReq, ProtoApplyChangesReq, ProtoError, ProtoGetChangeLogInfoReq, ProtoGetSnapshotInfoReq,
    ProtoPingLeaderReq, ProtoReadChangeLogReq, ProtoReadSnapshotReq, ProtoSyncReq,
};
use crate::peer::rpc_api::{
    AdvanceSegmentInput, AdvanceSegmentOutput, ApplyChangesInput, ApplyChangesOutput, ChangeLogInfo, MetaStateError,
    MetaStateService, PingLeaderInput, ReadChangeLogInput, ReadSnapshotInput, SyncOutput,
};
use crate::peer::types::SegmentId;
use crate::server::convert::{
    epoch_from_proto, epoch_to_proto, error_from_proto, malformed_reply, version_from_proto, version_to_proto,
    Malformed,
};
use crate::snapshot::SnapshotInfo;
use bytes::Bytes;
use std::error::Error;
use std::net::SocketAddr;
use tonic::codegen::http::uri;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

/// gRPC channel to a remote peer. Connects lazily, so a peer that is down at creation time is
/// only reported as `Unavailable` once it is actually called.
pub(crate) struct GrpcPeerClient {
    logger: slog::Logger,
    inner: GrpcMetaStateClient<Channel>,
}

impl GrpcPeerClient {
    pub(crate) fn new(logger: slog::Logger, socket_addr: SocketAddr) -> Result<Self, ConnectError> {
        let url = format!("http://{}", socket_addr);
        slog::info!(logger, "Creating channel to {}", url);
        let endpoint = Endpoint::from_shared(url)?;

        let connection = endpoint.connect_lazy()?;

        Ok(GrpcPeerClient {
            logger,
            inner: GrpcMetaStateClient::new(connection),
        })
    }

    fn client(&self) -> GrpcMetaStateClient<Channel> {
        self.inner.clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Invalid peer uri: {0}")]
    InvalidUri(uri::InvalidUri),
    #[error("Failed to create channel: {0}")]
    ConnectFailure(Box<dyn Error + Send + Sync>),
}

impl From<uri::InvalidUri> for ConnectError {
    fn from(e: uri::InvalidUri) -> Self {
        ConnectError::InvalidUri(e)
    }
}

impl From<tonic::transport::Error> for ConnectError {
    fn from(e: tonic::transport::Error) -> Self {
        ConnectError::ConnectFailure(e.into())
    }
}

fn transport_failure(status: Status) -> MetaStateError {
    MetaStateError::Unavailable(format!("{:?}: {}", status.code(), status.message()))
}

fn missing_result() -> MetaStateError {
    malformed_reply(Malformed("Missing result".to_string()))
}

fn remote_error(error: ProtoError) -> MetaStateError {
    error_from_proto(error)
}

#[async_trait::async_trait]
impl MetaStateService for GrpcPeerClient {
    async fn sync(&self) -> Result<SyncOutput, MetaStateError> {
        let rpc_request = ProtoSyncReq {};
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_request);
        let rpc_reply = self.client().sync(rpc_request).await;
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_reply);

        match rpc_reply.map_err(transport_failure)?.into_inner().result {
            Some(proto_sync_result::Result::Ok(ok)) => Ok(SyncOutput {
                version: version_from_proto(ok.version).map_err(malformed_reply)?,
                epoch: epoch_from_proto(&ok.epoch).map_err(malformed_reply)?,
                max_snapshot_id: if ok.has_max_snapshot_id {
                    Some(ok.max_snapshot_id)
                } else {
                    None
                },
            }),
            Some(proto_sync_result::Result::Err(e)) => Err(remote_error(e)),
            None => Err(missing_result()),
        }
    }

    async fn get_snapshot_info(&self, snapshot_id: SegmentId) -> Result<SnapshotInfo, MetaStateError> {
        let rpc_request = ProtoGetSnapshotInfoReq { snapshot_id };
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_request);
        let rpc_reply = self.client().get_snapshot_info(rpc_request).await;
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_reply);

        match rpc_reply.map_err(transport_failure)?.into_inner().result {
            Some(proto_get_snapshot_info_result::Result::Ok(ok)) => Ok(SnapshotInfo {
                length: ok.length,
                prev_record_count: ok.prev_record_count,
                checksum: ok.checksum,
            }),
            Some(proto_get_snapshot_info_result::Result::Err(e)) => Err(remote_error(e)),
            None => Err(missing_result()),
        }
    }

    async fn read_snapshot(&self, input: ReadSnapshotInput) -> Result<Bytes, MetaStateError> {
        let rpc_request = ProtoReadSnapshotReq {
            snapshot_id: input.snapshot_id,
            offset: input.offset,
            length: input.length,
        };
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_request);
        let rpc_reply = self.client().read_snapshot(rpc_request).await;

        match rpc_reply.map_err(transport_failure)?.into_inner().result {
            Some(proto_read_snapshot_result::Result::Ok(ok)) => {
                slog::debug!(self.logger, "ClientWire - {} snapshot bytes", ok.data.len());
                Ok(Bytes::from(ok.data))
            }
            Some(proto_read_snapshot_result::Result::Err(e)) => {
                slog::debug!(self.logger, "ClientWire - {:?}", e);
                Err(remote_error(e))
            }
            None => Err(missing_result()),
        }
    }

    async fn get_change_log_info(&self, change_log_id: SegmentId) -> Result<ChangeLogInfo, MetaStateError> {
        let rpc_request = ProtoGetChangeLogInfoReq { change_log_id };
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_request);
        let rpc_reply = self.client().get_change_log_info(rpc_request).await;
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_reply);

        match rpc_reply.map_err(transport_failure)?.into_inner().result {
            Some(proto_get_change_log_info_result::Result::Ok(ok)) => Ok(ChangeLogInfo {
                record_count: ok.record_count,
                prev_record_count: ok.prev_record_count,
                epoch: epoch_from_proto(&ok.epoch).map_err(malformed_reply)?,
            }),
            Some(proto_get_change_log_info_result::Result::Err(e)) => Err(remote_error(e)),
            None => Err(missing_result()),
        }
    }

    async fn read_change_log(&self, input: ReadChangeLogInput) -> Result<Vec<Bytes>, MetaStateError> {
        let rpc_request = ProtoReadChangeLogReq {
            change_log_id: input.change_log_id,
            start_record_id: input.start_record_id,
            record_count: input.record_count,
        };
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_request);
        let rpc_reply = self.client().read_change_log(rpc_request).await;

        match rpc_reply.map_err(transport_failure)?.into_inner().result {
            Some(proto_read_change_log_result::Result::Ok(ok)) => {
                slog::debug!(self.logger, "ClientWire - {} records", ok.records.len());
                Ok(ok.records.into_iter().map(Bytes::from).collect())
            }
            Some(proto_read_change_log_result::Result::Err(e)) => {
                slog::debug!(self.logger, "ClientWire - {:?}", e);
                Err(remote_error(e))
            }
            None => Err(missing_result()),
        }
    }

    async fn apply_changes(&self, input: ApplyChangesInput) -> Result<ApplyChangesOutput, MetaStateError> {
        let rpc_request = ProtoApplyChangesReq {
            epoch: epoch_to_proto(input.epoch),
            version: version_to_proto(input.version),
            changes: input.changes.iter().map(|change| change.to_vec()).collect(),
        };
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_request);
        let rpc_reply = self.client().apply_changes(rpc_request).await;
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_reply);

        match rpc_reply.map_err(transport_failure)?.into_inner().result {
            Some(proto_apply_changes_result::Result::Ok(ok)) => Ok(ApplyChangesOutput {
                committed: ok.committed,
            }),
            Some(proto_apply_changes_result::Result::Err(e)) => Err(remote_error(e)),
            None => Err(missing_result()),
        }
    }

    async fn advance_segment(&self, input: AdvanceSegmentInput) -> Result<AdvanceSegmentOutput, MetaStateError> {
        let rpc_request = ProtoAdvanceSegmentReq {
            epoch: epoch_to_proto(input.epoch),
            version: version_to_proto(input.version),
        };
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_request);
        let rpc_reply = self.client().advance_segment(rpc_request).await;
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_reply);

        match rpc_reply.map_err(transport_failure)?.into_inner().result {
            Some(proto_advance_segment_result::Result::Ok(ok)) => Ok(AdvanceSegmentOutput { checksum: ok.checksum }),
            Some(proto_advance_segment_result::Result::Err(e)) => Err(remote_error(e)),
            None => Err(missing_result()),
        }
    }

    async fn ping_leader(&self, input: PingLeaderInput) -> Result<(), MetaStateError> {
        let rpc_request = ProtoPingLeaderReq {
            follower_id: input.follower_id.0,
            epoch: epoch_to_proto(input.epoch),
            state: input.state.as_u32(),
        };
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_request);
        let rpc_reply = self.client().ping_leader(rpc_request).await;
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_reply);

        rpc_reply.map(|_| ()).map_err(transport_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::discard_logger;
    use crate::peer::types::PeerState;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn unreachable_peer_is_unavailable() {
        // Nothing listens on the discard port.
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9);
        let client = GrpcPeerClient::new(discard_logger(), addr).unwrap();

        assert!(matches!(client.sync().await, Err(MetaStateError::Unavailable(_))));
        assert!(matches!(
            client
                .ping_leader(PingLeaderInput {
                    follower_id: crate::peer::types::PeerId(1),
                    epoch: crate::peer::types::Epoch::new_random(),
                    state: PeerState::Following,
                })
                .await,
            Err(MetaStateError::Unavailable(_))
        ));
    }
}
