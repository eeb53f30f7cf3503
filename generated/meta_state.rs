// -- Shared --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoMetaVersion {
    #[prost(uint32, tag = "1")]
    pub segment_id: u32,
    #[prost(uint32, tag = "2")]
    pub record_count: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoError {
    #[prost(oneof = "proto_error::Err", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub err: ::core::option::Option<proto_error::Err>,
}
/// Nested message and enum types in `ProtoError`.
pub mod proto_error {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Err {
        #[prost(message, tag = "1")]
        InvalidState(super::ProtoInvalidState),
        #[prost(message, tag = "2")]
        InvalidEpoch(super::ProtoInvalidEpoch),
        #[prost(message, tag = "3")]
        InvalidVersion(super::ProtoInvalidVersion),
        #[prost(message, tag = "4")]
        NoSuchChangeLog(super::ProtoNoSuchChangeLog),
        #[prost(message, tag = "5")]
        InvalidSegmentId(super::ProtoInvalidSegmentId),
        #[prost(message, tag = "6")]
        IoError(super::ProtoServerFault),
        #[prost(message, tag = "7")]
        ServerFault(super::ProtoServerFault),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoInvalidState {
    #[prost(uint32, tag = "1")]
    pub current_state: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoInvalidEpoch {
    #[prost(bytes = "vec", tag = "1")]
    pub expected: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub received: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoInvalidVersion {
    #[prost(message, optional, tag = "1")]
    pub expected: ::core::option::Option<ProtoMetaVersion>,
    #[prost(message, optional, tag = "2")]
    pub received: ::core::option::Option<ProtoMetaVersion>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoNoSuchChangeLog {
    #[prost(uint32, tag = "1")]
    pub change_log_id: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoInvalidSegmentId {
    #[prost(uint32, tag = "1")]
    pub segment_id: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoServerFault {
    #[prost(string, tag = "1")]
    pub message: ::prost::alloc::string::String,
}
// -- Sync --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoSyncReq {}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoSyncSuccess {
    #[prost(message, optional, tag = "1")]
    pub version: ::core::option::Option<ProtoMetaVersion>,
    #[prost(bytes = "vec", tag = "2")]
    pub epoch: ::prost::alloc::vec::Vec<u8>,
    /// `has_max_snapshot_id` is false if the leader holds no snapshot.
    #[prost(uint32, tag = "3")]
    pub max_snapshot_id: u32,
    #[prost(bool, tag = "4")]
    pub has_max_snapshot_id: bool,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoSyncResult {
    #[prost(oneof = "proto_sync_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_sync_result::Result>,
}
/// Nested message and enum types in `ProtoSyncResult`.
pub mod proto_sync_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoSyncSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoError),
    }
}
// -- GetSnapshotInfo --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGetSnapshotInfoReq {
    #[prost(uint32, tag = "1")]
    pub snapshot_id: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGetSnapshotInfoSuccess {
    #[prost(uint64, tag = "1")]
    pub length: u64,
    #[prost(uint32, tag = "2")]
    pub prev_record_count: u32,
    #[prost(uint32, tag = "3")]
    pub checksum: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGetSnapshotInfoResult {
    #[prost(oneof = "proto_get_snapshot_info_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_get_snapshot_info_result::Result>,
}
/// Nested message and enum types in `ProtoGetSnapshotInfoResult`.
pub mod proto_get_snapshot_info_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoGetSnapshotInfoSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoError),
    }
}
// -- ReadSnapshot --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoReadSnapshotReq {
    #[prost(uint32, tag = "1")]
    pub snapshot_id: u32,
    #[prost(uint64, tag = "2")]
    pub offset: u64,
    #[prost(uint32, tag = "3")]
    pub length: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoReadSnapshotSuccess {
    #[prost(bytes = "vec", tag = "1")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoReadSnapshotResult {
    #[prost(oneof = "proto_read_snapshot_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_read_snapshot_result::Result>,
}
/// Nested message and enum types in `ProtoReadSnapshotResult`.
pub mod proto_read_snapshot_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoReadSnapshotSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoError),
    }
}
// -- GetChangeLogInfo --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGetChangeLogInfoReq {
    #[prost(uint32, tag = "1")]
    pub change_log_id: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGetChangeLogInfoSuccess {
    #[prost(uint32, tag = "1")]
    pub record_count: u32,
    #[prost(uint32, tag = "2")]
    pub prev_record_count: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub epoch: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoGetChangeLogInfoResult {
    #[prost(oneof = "proto_get_change_log_info_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_get_change_log_info_result::Result>,
}
/// Nested message and enum types in `ProtoGetChangeLogInfoResult`.
pub mod proto_get_change_log_info_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoGetChangeLogInfoSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoError),
    }
}
// -- ReadChangeLog --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoReadChangeLogReq {
    #[prost(uint32, tag = "1")]
    pub change_log_id: u32,
    #[prost(uint32, tag = "2")]
    pub start_record_id: u32,
    #[prost(uint32, tag = "3")]
    pub record_count: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoReadChangeLogSuccess {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub records: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoReadChangeLogResult {
    #[prost(oneof = "proto_read_change_log_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_read_change_log_result::Result>,
}
/// Nested message and enum types in `ProtoReadChangeLogResult`.
pub mod proto_read_change_log_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoReadChangeLogSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoError),
    }
}
// -- ApplyChanges --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoApplyChangesReq {
    #[prost(bytes = "vec", tag = "1")]
    pub epoch: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub version: ::core::option::Option<ProtoMetaVersion>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub changes: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoApplyChangesSuccess {
    #[prost(bool, tag = "1")]
    pub committed: bool,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoApplyChangesResult {
    #[prost(oneof = "proto_apply_changes_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_apply_changes_result::Result>,
}
/// Nested message and enum types in `ProtoApplyChangesResult`.
pub mod proto_apply_changes_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoApplyChangesSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoError),
    }
}
// -- AdvanceSegment --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAdvanceSegmentReq {
    #[prost(bytes = "vec", tag = "1")]
    pub epoch: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub version: ::core::option::Option<ProtoMetaVersion>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAdvanceSegmentSuccess {
    #[prost(uint32, tag = "1")]
    pub checksum: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAdvanceSegmentResult {
    #[prost(oneof = "proto_advance_segment_result::Result", tags = "1, 2")]
    pub result: ::core::option::Option<proto_advance_segment_result::Result>,
}
/// Nested message and enum types in `ProtoAdvanceSegmentResult`.
pub mod proto_advance_segment_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag = "1")]
        Ok(super::ProtoAdvanceSegmentSuccess),
        #[prost(message, tag = "2")]
        Err(super::ProtoError),
    }
}
// -- PingLeader --

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPingLeaderReq {
    #[prost(uint32, tag = "1")]
    pub follower_id: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub epoch: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub state: u32,
}
/// Always succeeds.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPingLeaderResult {}
#[doc = r" Generated client implementations."]
pub mod grpc_meta_state_client {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = " Peer-to-peer RPCs of the replicated meta state."]
    pub struct GrpcMetaStateClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl GrpcMetaStateClient<tonic::transport::Channel> {
        #[doc = r" Attempt to create a new client by connecting to a given endpoint."]
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: std::convert::TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> GrpcMetaStateClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::ResponseBody: Body + HttpBody + Send + 'static,
        T::Error: Into<StdError>,
        <T::ResponseBody as HttpBody>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = tonic::client::Grpc::with_interceptor(inner, interceptor);
            Self { inner }
        }
        pub async fn sync(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoSyncReq>,
        ) -> Result<tonic::Response<super::ProtoSyncResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/meta_state.GrpcMetaState/Sync");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn get_snapshot_info(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoGetSnapshotInfoReq>,
        ) -> Result<tonic::Response<super::ProtoGetSnapshotInfoResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/meta_state.GrpcMetaState/GetSnapshotInfo");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn read_snapshot(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoReadSnapshotReq>,
        ) -> Result<tonic::Response<super::ProtoReadSnapshotResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/meta_state.GrpcMetaState/ReadSnapshot");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn get_change_log_info(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoGetChangeLogInfoReq>,
        ) -> Result<tonic::Response<super::ProtoGetChangeLogInfoResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/meta_state.GrpcMetaState/GetChangeLogInfo");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn read_change_log(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoReadChangeLogReq>,
        ) -> Result<tonic::Response<super::ProtoReadChangeLogResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/meta_state.GrpcMetaState/ReadChangeLog");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn apply_changes(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoApplyChangesReq>,
        ) -> Result<tonic::Response<super::ProtoApplyChangesResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/meta_state.GrpcMetaState/ApplyChanges");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn advance_segment(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoAdvanceSegmentReq>,
        ) -> Result<tonic::Response<super::ProtoAdvanceSegmentResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/meta_state.GrpcMetaState/AdvanceSegment");
            self.inner.unary(request.into_request(), path, codec).await
        }
        pub async fn ping_leader(
            &mut self,
            request: impl tonic::IntoRequest<super::ProtoPingLeaderReq>,
        ) -> Result<tonic::Response<super::ProtoPingLeaderResult>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/meta_state.GrpcMetaState/PingLeader");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
    impl<T: Clone> Clone for GrpcMetaStateClient<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }
    impl<T> std::fmt::Debug for GrpcMetaStateClient<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "GrpcMetaStateClient {{ ... }}")
        }
    }
}
#[doc = r" Generated server implementations."]
pub mod grpc_meta_state_server {
    #![allow(unused_variables, dead_code, missing_docs)]
    use tonic::codegen::*;
    #[doc = "Generated trait containing gRPC methods that should be implemented for use with GrpcMetaStateServer."]
    #[async_trait]
    pub trait GrpcMetaState: Send + Sync + 'static {
        async fn sync(
            &self,
            request: tonic::Request<super::ProtoSyncReq>,
        ) -> Result<tonic::Response<super::ProtoSyncResult>, tonic::Status>;
        async fn get_snapshot_info(
            &self,
            request: tonic::Request<super::ProtoGetSnapshotInfoReq>,
        ) -> Result<tonic::Response<super::ProtoGetSnapshotInfoResult>, tonic::Status>;
        async fn read_snapshot(
            &self,
            request: tonic::Request<super::ProtoReadSnapshotReq>,
        ) -> Result<tonic::Response<super::ProtoReadSnapshotResult>, tonic::Status>;
        async fn get_change_log_info(
            &self,
            request: tonic::Request<super::ProtoGetChangeLogInfoReq>,
        ) -> Result<tonic::Response<super::ProtoGetChangeLogInfoResult>, tonic::Status>;
        async fn read_change_log(
            &self,
            request: tonic::Request<super::ProtoReadChangeLogReq>,
        ) -> Result<tonic::Response<super::ProtoReadChangeLogResult>, tonic::Status>;
        async fn apply_changes(
            &self,
            request: tonic::Request<super::ProtoApplyChangesReq>,
        ) -> Result<tonic::Response<super::ProtoApplyChangesResult>, tonic::Status>;
        async fn advance_segment(
            &self,
            request: tonic::Request<super::ProtoAdvanceSegmentReq>,
        ) -> Result<tonic::Response<super::ProtoAdvanceSegmentResult>, tonic::Status>;
        async fn ping_leader(
            &self,
            request: tonic::Request<super::ProtoPingLeaderReq>,
        ) -> Result<tonic::Response<super::ProtoPingLeaderResult>, tonic::Status>;
    }
    #[doc = " Peer-to-peer RPCs of the replicated meta state."]
    #[derive(Debug)]
    pub struct GrpcMetaStateServer<T: GrpcMetaState> {
        inner: _Inner<T>,
    }
    struct _Inner<T>(Arc<T>, Option<tonic::Interceptor>);
    impl<T: GrpcMetaState> GrpcMetaStateServer<T> {
        pub fn new(inner: T) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, None);
            Self { inner }
        }
        pub fn with_interceptor(inner: T, interceptor: impl Into<tonic::Interceptor>) -> Self {
            let inner = Arc::new(inner);
            let inner = _Inner(inner, Some(interceptor.into()));
            Self { inner }
        }
    }
    impl<T, B> Service<http::Request<B>> for GrpcMetaStateServer<T>
    where
        T: GrpcMetaState,
        B: HttpBody + Send + Sync + 'static,
        B::Error: Into<StdError> + Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = Never;
        type Future = BoxFuture<Self::Response, Self::Error>;
        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = self.inner.clone();
            match req.uri().path() {
                "/meta_state.GrpcMetaState/Sync" => {
                    #[allow(non_camel_case_types)]
                    struct SyncSvc<T: GrpcMetaState>(pub Arc<T>);
                    impl<T: GrpcMetaState> tonic::server::UnaryService<super::ProtoSyncReq> for SyncSvc<T> {
                        type Response = super::ProtoSyncResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoSyncReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).sync(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = SyncSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/meta_state.GrpcMetaState/GetSnapshotInfo" => {
                    #[allow(non_camel_case_types)]
                    struct GetSnapshotInfoSvc<T: GrpcMetaState>(pub Arc<T>);
                    impl<T: GrpcMetaState>
                        tonic::server::UnaryService<super::ProtoGetSnapshotInfoReq>
                        for GetSnapshotInfoSvc<T>
                    {
                        type Response = super::ProtoGetSnapshotInfoResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoGetSnapshotInfoReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).get_snapshot_info(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = GetSnapshotInfoSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/meta_state.GrpcMetaState/ReadSnapshot" => {
                    #[allow(non_camel_case_types)]
                    struct ReadSnapshotSvc<T: GrpcMetaState>(pub Arc<T>);
                    impl<T: GrpcMetaState> tonic::server::UnaryService<super::ProtoReadSnapshotReq>
                        for ReadSnapshotSvc<T>
                    {
                        type Response = super::ProtoReadSnapshotResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoReadSnapshotReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).read_snapshot(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = ReadSnapshotSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/meta_state.GrpcMetaState/GetChangeLogInfo" => {
                    #[allow(non_camel_case_types)]
                    struct GetChangeLogInfoSvc<T: GrpcMetaState>(pub Arc<T>);
                    impl<T: GrpcMetaState>
                        tonic::server::UnaryService<super::ProtoGetChangeLogInfoReq>
                        for GetChangeLogInfoSvc<T>
                    {
                        type Response = super::ProtoGetChangeLogInfoResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoGetChangeLogInfoReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).get_change_log_info(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = GetChangeLogInfoSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/meta_state.GrpcMetaState/ReadChangeLog" => {
                    #[allow(non_camel_case_types)]
                    struct ReadChangeLogSvc<T: GrpcMetaState>(pub Arc<T>);
                    impl<T: GrpcMetaState> tonic::server::UnaryService<super::ProtoReadChangeLogReq>
                        for ReadChangeLogSvc<T>
                    {
                        type Response = super::ProtoReadChangeLogResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoReadChangeLogReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).read_change_log(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = ReadChangeLogSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/meta_state.GrpcMetaState/ApplyChanges" => {
                    #[allow(non_camel_case_types)]
                    struct ApplyChangesSvc<T: GrpcMetaState>(pub Arc<T>);
                    impl<T: GrpcMetaState> tonic::server::UnaryService<super::ProtoApplyChangesReq>
                        for ApplyChangesSvc<T>
                    {
                        type Response = super::ProtoApplyChangesResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoApplyChangesReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).apply_changes(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = ApplyChangesSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/meta_state.GrpcMetaState/AdvanceSegment" => {
                    #[allow(non_camel_case_types)]
                    struct AdvanceSegmentSvc<T: GrpcMetaState>(pub Arc<T>);
                    impl<T: GrpcMetaState>
                        tonic::server::UnaryService<super::ProtoAdvanceSegmentReq>
                        for AdvanceSegmentSvc<T>
                    {
                        type Response = super::ProtoAdvanceSegmentResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoAdvanceSegmentReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).advance_segment(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = AdvanceSegmentSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/meta_state.GrpcMetaState/PingLeader" => {
                    #[allow(non_camel_case_types)]
                    struct PingLeaderSvc<T: GrpcMetaState>(pub Arc<T>);
                    impl<T: GrpcMetaState> tonic::server::UnaryService<super::ProtoPingLeaderReq> for PingLeaderSvc<T> {
                        type Response = super::ProtoPingLeaderResult;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::ProtoPingLeaderReq>,
                        ) -> Self::Future {
                            let inner = self.0.clone();
                            let fut = async move { (*inner).ping_leader(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let interceptor = inner.1.clone();
                        let inner = inner.0;
                        let method = PingLeaderSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = if let Some(interceptor) = interceptor {
                            tonic::server::Grpc::with_interceptor(codec, interceptor)
                        } else {
                            tonic::server::Grpc::new(codec)
                        };
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    Ok(http::Response::builder()
                        .status(200)
                        .header("grpc-status", "12")
                        .header("content-type", "application/grpc")
                        .body(tonic::body::BoxBody::empty())
                        .unwrap())
                }),
            }
        }
    }
    impl<T: GrpcMetaState> Clone for GrpcMetaStateServer<T> {
        fn clone(&self) -> Self {
            let inner = self.inner.clone();
            Self { inner }
        }
    }
    impl<T: GrpcMetaState> Clone for _Inner<T> {
        fn clone(&self) -> Self {
            Self(self.0.clone(), self.1.clone())
        }
    }
    impl<T: std::fmt::Debug> std::fmt::Debug for _Inner<T> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }
    impl<T: GrpcMetaState> tonic::transport::NamedService for GrpcMetaStateServer<T> {
        const NAME: &'static str = "meta_state.GrpcMetaState";
    }
}
