use crate::grpc::grpc_meta_state_server::{GrpcMetaState, GrpcMetaStateServer};
use crate::grpc::{
    proto_advance_segment_result, proto_apply_changes_result, proto_get_change_log_info_result,
    proto_get_snapshot_info_result, proto_read_change_log_result, proto_read_snapshot_result, proto_sync_result,
    ProtoAdvanceSegmentReq, ProtoAdvanceSegmentResult, ProtoAdvanceSegmentSuccess, ProtoApplyChangesReq,
    ProtoApplyChangesResult, ProtoApplyChangesSuccess, ProtoGetChangeLogInfoReq, ProtoGetChangeLogInfoResult,
    ProtoGetChangeLogInfoSuccess, ProtoGetSnapshotInfoReq, ProtoGetSnapshotInfoResult, ProtoGetSnapshotInfoSuccess,
    ProtoPingLeaderReq, ProtoPingLeaderResult, ProtoReadChangeLogReq, ProtoReadChangeLogResult,
    ProtoReadChangeLogSuccess, ProtoReadSnapshotReq, ProtoReadSnapshotResult, ProtoReadSnapshotSuccess, ProtoSyncReq,
    ProtoSyncResult, ProtoSyncSuccess,
};
use crate::peer::{
    AdvanceSegmentInput, AdvanceSegmentOutput, ApplyChangesInput, ApplyChangesOutput, ChangeLogInfo, MetaStateError,
    MetaStateService, PeerId, PingLeaderInput, ReadChangeLogInput, ReadSnapshotInput, SyncOutput,
};
use crate::server::convert::{
    epoch_from_proto, epoch_to_proto, error_to_proto, state_from_proto, version_from_proto, version_to_proto,
    Malformed,
};
use crate::server::RpcServerShutdownSignal;
use crate::snapshot::SnapshotInfo;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// RpcServer is the type that implements the meta state gRPC interface on top of a local peer.
pub struct RpcServer {
    logger: slog::Logger,
    local_peer: Arc<dyn MetaStateService>,
}

impl RpcServer {
    pub fn new(logger: slog::Logger, local_peer: Arc<dyn MetaStateService>) -> Self {
        RpcServer { logger, local_peer }
    }

    pub async fn run(self, socket_addr: SocketAddr, shutdown_signal: RpcServerShutdownSignal) {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", socket_addr);

        let result = Server::builder()
            .add_service(GrpcMetaStateServer::new(self))
            .serve_with_shutdown(socket_addr, shutdown_signal)
            .await;

        slog::info!(logger, "Server run() has exited: {:?}", result);
    }

    async fn handle_sync(&self, _rpc_request: ProtoSyncReq) -> Result<ProtoSyncResult, Status> {
        let app_result = self.local_peer.sync().await;
        Ok(Self::convert_sync_result(app_result))
    }

    fn convert_sync_result(app_result: Result<SyncOutput, MetaStateError>) -> ProtoSyncResult {
        let result = match app_result {
            Ok(ok) => proto_sync_result::Result::Ok(ProtoSyncSuccess {
                version: version_to_proto(ok.version),
                epoch: epoch_to_proto(ok.epoch),
                max_snapshot_id: ok.max_snapshot_id.unwrap_or(0),
                has_max_snapshot_id: ok.max_snapshot_id.is_some(),
            }),
            Err(e) => proto_sync_result::Result::Err(error_to_proto(e)),
        };

        ProtoSyncResult { result: Some(result) }
    }

    async fn handle_get_snapshot_info(
        &self,
        rpc_request: ProtoGetSnapshotInfoReq,
    ) -> Result<ProtoGetSnapshotInfoResult, Status> {
        let app_result = self.local_peer.get_snapshot_info(rpc_request.snapshot_id).await;
        Ok(Self::convert_get_snapshot_info_result(app_result))
    }

    fn convert_get_snapshot_info_result(
        app_result: Result<SnapshotInfo, MetaStateError>,
    ) -> ProtoGetSnapshotInfoResult {
        let result = match app_result {
            Ok(ok) => proto_get_snapshot_info_result::Result::Ok(ProtoGetSnapshotInfoSuccess {
                length: ok.length,
                prev_record_count: ok.prev_record_count,
                checksum: ok.checksum,
            }),
            Err(e) => proto_get_snapshot_info_result::Result::Err(error_to_proto(e)),
        };

        ProtoGetSnapshotInfoResult { result: Some(result) }
    }

    async fn handle_read_snapshot(&self, rpc_request: ProtoReadSnapshotReq) -> Result<ProtoReadSnapshotResult, Status> {
        let app_input = ReadSnapshotInput {
            snapshot_id: rpc_request.snapshot_id,
            offset: rpc_request.offset,
            length: rpc_request.length,
        };
        let app_result = self.local_peer.read_snapshot(app_input).await;
        Ok(Self::convert_read_snapshot_result(app_result))
    }

    fn convert_read_snapshot_result(app_result: Result<Bytes, MetaStateError>) -> ProtoReadSnapshotResult {
        let result = match app_result {
            Ok(data) => proto_read_snapshot_result::Result::Ok(ProtoReadSnapshotSuccess { data: data.to_vec() }),
            Err(e) => proto_read_snapshot_result::Result::Err(error_to_proto(e)),
        };

        ProtoReadSnapshotResult { result: Some(result) }
    }

    async fn handle_get_change_log_info(
        &self,
        rpc_request: ProtoGetChangeLogInfoReq,
    ) -> Result<ProtoGetChangeLogInfoResult, Status> {
        let app_result = self.local_peer.get_change_log_info(rpc_request.change_log_id).await;
        Ok(Self::convert_get_change_log_info_result(app_result))
    }

    fn convert_get_change_log_info_result(
        app_result: Result<ChangeLogInfo, MetaStateError>,
    ) -> ProtoGetChangeLogInfoResult {
        let result = match app_result {
            Ok(ok) => proto_get_change_log_info_result::Result::Ok(ProtoGetChangeLogInfoSuccess {
                record_count: ok.record_count,
                prev_record_count: ok.prev_record_count,
                epoch: epoch_to_proto(ok.epoch),
            }),
            Err(e) => proto_get_change_log_info_result::Result::Err(error_to_proto(e)),
        };

        ProtoGetChangeLogInfoResult { result: Some(result) }
    }

    async fn handle_read_change_log(
        &self,
        rpc_request: ProtoReadChangeLogReq,
    ) -> Result<ProtoReadChangeLogResult, Status> {
        let app_input = ReadChangeLogInput {
            change_log_id: rpc_request.change_log_id,
            start_record_id: rpc_request.start_record_id,
            record_count: rpc_request.record_count,
        };
        let app_result = self.local_peer.read_change_log(app_input).await;
        Ok(Self::convert_read_change_log_result(app_result))
    }

    fn convert_read_change_log_result(app_result: Result<Vec<Bytes>, MetaStateError>) -> ProtoReadChangeLogResult {
        let result = match app_result {
            Ok(records) => proto_read_change_log_result::Result::Ok(ProtoReadChangeLogSuccess {
                records: records.iter().map(|record| record.to_vec()).collect(),
            }),
            Err(e) => proto_read_change_log_result::Result::Err(error_to_proto(e)),
        };

        ProtoReadChangeLogResult { result: Some(result) }
    }

    async fn handle_apply_changes(&self, rpc_request: ProtoApplyChangesReq) -> Result<ProtoApplyChangesResult, Status> {
        let app_input = Self::convert_apply_changes_input(rpc_request).map_err(invalid_argument)?;
        let app_result = self.local_peer.apply_changes(app_input).await;
        Ok(Self::convert_apply_changes_result(app_result))
    }

    fn convert_apply_changes_input(rpc_request: ProtoApplyChangesReq) -> Result<ApplyChangesInput, Malformed> {
        Ok(ApplyChangesInput {
            epoch: epoch_from_proto(&rpc_request.epoch)?,
            version: version_from_proto(rpc_request.version)?,
            changes: rpc_request.changes.into_iter().map(Bytes::from).collect(),
        })
    }

    fn convert_apply_changes_result(app_result: Result<ApplyChangesOutput, MetaStateError>) -> ProtoApplyChangesResult {
        let result = match app_result {
            Ok(ok) => proto_apply_changes_result::Result::Ok(ProtoApplyChangesSuccess {
                committed: ok.committed,
            }),
            Err(e) => proto_apply_changes_result::Result::Err(error_to_proto(e)),
        };

        ProtoApplyChangesResult { result: Some(result) }
    }

    async fn handle_advance_segment(
        &self,
        rpc_request: ProtoAdvanceSegmentReq,
    ) -> Result<ProtoAdvanceSegmentResult, Status> {
        let app_input = AdvanceSegmentInput {
            epoch: epoch_from_proto(&rpc_request.epoch).map_err(invalid_argument)?,
            version: version_from_proto(rpc_request.version).map_err(invalid_argument)?,
        };
        let app_result = self.local_peer.advance_segment(app_input).await;
        Ok(Self::convert_advance_segment_result(app_result))
    }

    fn convert_advance_segment_result(
        app_result: Result<AdvanceSegmentOutput, MetaStateError>,
    ) -> ProtoAdvanceSegmentResult {
        let result = match app_result {
            Ok(ok) => proto_advance_segment_result::Result::Ok(ProtoAdvanceSegmentSuccess { checksum: ok.checksum }),
            Err(e) => proto_advance_segment_result::Result::Err(error_to_proto(e)),
        };

        ProtoAdvanceSegmentResult { result: Some(result) }
    }

    async fn handle_ping_leader(&self, rpc_request: ProtoPingLeaderReq) -> Result<ProtoPingLeaderResult, Status> {
        let app_input = PingLeaderInput {
            follower_id: PeerId(rpc_request.follower_id),
            epoch: epoch_from_proto(&rpc_request.epoch).map_err(invalid_argument)?,
            state: state_from_proto(rpc_request.state).map_err(invalid_argument)?,
        };
        // Pings always succeed; whatever went wrong is the leader's business.
        if let Err(e) = self.local_peer.ping_leader(app_input).await {
            slog::debug!(self.logger, "Ping from {} not processed: {}", app_input.follower_id, e);
        }

        Ok(ProtoPingLeaderResult {})
    }
}

fn invalid_argument(malformed: Malformed) -> Status {
    Status::invalid_argument(malformed.0)
}

#[async_trait::async_trait]
impl GrpcMetaState for RpcServer {
    async fn sync(&self, rpc_request_wrapped: Request<ProtoSyncReq>) -> Result<Response<ProtoSyncResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_sync(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn get_snapshot_info(
        &self,
        rpc_request_wrapped: Request<ProtoGetSnapshotInfoReq>,
    ) -> Result<Response<ProtoGetSnapshotInfoResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_get_snapshot_info(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn read_snapshot(
        &self,
        rpc_request_wrapped: Request<ProtoReadSnapshotReq>,
    ) -> Result<Response<ProtoReadSnapshotResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_read_snapshot(rpc_request).await;
        // Blocks are large; log their size only.
        match &rpc_result {
            Ok(ProtoReadSnapshotResult {
                result: Some(proto_read_snapshot_result::Result::Ok(ok)),
            }) => slog::debug!(self.logger, "ServerWire - {} snapshot bytes", ok.data.len()),
            other => slog::debug!(self.logger, "ServerWire - {:?}", other),
        }

        rpc_result.map(Response::new)
    }

    async fn get_change_log_info(
        &self,
        rpc_request_wrapped: Request<ProtoGetChangeLogInfoReq>,
    ) -> Result<Response<ProtoGetChangeLogInfoResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_get_change_log_info(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn read_change_log(
        &self,
        rpc_request_wrapped: Request<ProtoReadChangeLogReq>,
    ) -> Result<Response<ProtoReadChangeLogResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_read_change_log(rpc_request).await;
        match &rpc_result {
            Ok(ProtoReadChangeLogResult {
                result: Some(proto_read_change_log_result::Result::Ok(ok)),
            }) => slog::debug!(self.logger, "ServerWire - {} records", ok.records.len()),
            other => slog::debug!(self.logger, "ServerWire - {:?}", other),
        }

        rpc_result.map(Response::new)
    }

    async fn apply_changes(
        &self,
        rpc_request_wrapped: Request<ProtoApplyChangesReq>,
    ) -> Result<Response<ProtoApplyChangesResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_apply_changes(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn advance_segment(
        &self,
        rpc_request_wrapped: Request<ProtoAdvanceSegmentReq>,
    ) -> Result<Response<ProtoAdvanceSegmentResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_advance_segment(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn ping_leader(
        &self,
        rpc_request_wrapped: Request<ProtoPingLeaderReq>,
    ) -> Result<Response<ProtoPingLeaderResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_ping_leader(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }
}
