use crate::actor::{self, PeerActor};
use crate::api::local_service::LocalPeerService;
use crate::api::options::MetaStateOptionsValidated;
use crate::api::{ElectionManager, MetaState, MetaStateManager, MetaStateOptions};
use crate::changelog::ChangeLogCache;
use crate::peer::{
    self, CellManager, DecoratedMetaState, GrpcPeerClient, MetaStateService, Peer, PeerId, PeerState,
    StateInvoker,
};
use crate::server::{self, RpcServer, RpcServerShutdownHandle};
use crate::snapshot::SnapshotStore;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

const ACTOR_QUEUE_SIZE: usize = 64;

pub struct MetaStateConfig {
    pub logger: slog::Logger,
    pub cell: CellConfig,
    // Directories are created if missing. Two peers must never share one.
    pub changelog_directory: PathBuf,
    pub snapshot_directory: PathBuf,
    pub meta_state: Box<dyn MetaState>,
    pub election: Arc<dyn ElectionManager>,
    pub options: MetaStateOptions,
}

/// Static membership. `peers[i]` is the channel to the peer with id `i`; the entry at `self_id`
/// must be `PeerChannel::Me`.
pub struct CellConfig {
    pub self_id: PeerId,
    pub peers: Vec<PeerChannel>,
}

pub enum PeerChannel {
    Me,
    Remote(SocketAddr),
    Service(Arc<dyn MetaStateService>),
}

#[derive(Debug, thiserror::Error)]
pub enum CreationError {
    #[error("Illegal options: {0}")]
    IllegalOptions(String),
    #[error("Invalid cell config: {0}")]
    InvalidCell(String),
    #[error("Storage initialization failure")]
    StorageInitialization(Box<dyn Error + Send + Sync>),
}

/// Wires up one peer: storage, the state context, and the control task. The peer starts out
/// `Stopped`; call `MetaStateManager::start` to join elections.
pub async fn create_meta_state_manager(config: MetaStateConfig) -> Result<MetaStateManager, CreationError> {
    let root_logger = config.logger;

    let options = MetaStateOptionsValidated::try_from(config.options)
        .map_err(|e| CreationError::IllegalOptions(e.to_string()))?;

    let cell = Arc::new(create_cell(&root_logger, config.cell)?);

    let changelog_cache = Arc::new(
        ChangeLogCache::new(
            root_logger.clone(),
            config.changelog_directory,
            options.changelog_cache_capacity,
        )
        .map_err(storage_error)?,
    );
    let snapshot_store =
        Arc::new(SnapshotStore::new(root_logger.clone(), config.snapshot_directory).map_err(storage_error)?);

    let decorated = DecoratedMetaState::new(
        root_logger.clone(),
        config.meta_state,
        changelog_cache.clone(),
        snapshot_store.clone(),
    )
    .map_err(storage_error)?;
    slog::info!(
        root_logger,
        "Storage opened; reachable version is {}",
        decorated.reachable_version()
    );

    let state_invoker = StateInvoker::spawn(root_logger.clone(), decorated).map_err(storage_error)?;

    let (actor_client, actor_queue_rx) = actor::create(ACTOR_QUEUE_SIZE);
    let (state_notifier, state_listener) = peer::state_change_channel(PeerState::Stopped);

    let peer = Peer::new(
        root_logger.clone(),
        cell,
        config.election,
        state_invoker.clone(),
        snapshot_store.clone(),
        actor_client.weak(),
        options,
        state_notifier,
    );
    let peer_actor = PeerActor::new(actor_queue_rx, peer);
    tokio::spawn(peer_actor.run_event_loop());

    let local_service = Arc::new(LocalPeerService::new(
        actor_client.weak(),
        changelog_cache,
        snapshot_store,
    ));

    Ok(MetaStateManager::new(
        root_logger,
        actor_client,
        state_invoker,
        local_service,
        state_listener,
    ))
}

/// Serves the peer-to-peer protocol for `manager` on `socket_addr` until the returned handle is
/// dropped.
pub fn serve_rpc(manager: &MetaStateManager, socket_addr: SocketAddr) -> RpcServerShutdownHandle {
    let (server_shutdown_handle, server_shutdown_signal) = server::shutdown_signal();

    let rpc_server = RpcServer::new(manager.logger().clone(), manager.local_service());
    tokio::spawn(rpc_server.run(socket_addr, server_shutdown_signal));

    server_shutdown_handle
}

fn create_cell(logger: &slog::Logger, cell: CellConfig) -> Result<CellManager, CreationError> {
    let self_index = cell.self_id.0 as usize;
    match cell.peers.get(self_index) {
        Some(PeerChannel::Me) => {}
        Some(_) => {
            return Err(CreationError::InvalidCell(format!(
                "Peer {} must be configured as Me",
                cell.self_id
            )))
        }
        None => {
            return Err(CreationError::InvalidCell(format!(
                "Self id {} out of range for {} peers",
                cell.self_id,
                cell.peers.len()
            )))
        }
    }

    let mut others: BTreeMap<PeerId, Arc<dyn MetaStateService>> = BTreeMap::new();
    for (index, channel) in cell.peers.into_iter().enumerate() {
        let peer_id = PeerId(index as u32);
        let channel: Arc<dyn MetaStateService> = match channel {
            PeerChannel::Me if peer_id == cell.self_id => continue,
            PeerChannel::Me => {
                return Err(CreationError::InvalidCell(format!(
                    "Peer {} configured as Me, but self id is {}",
                    peer_id, cell.self_id
                )))
            }
            PeerChannel::Remote(socket_addr) => {
                let peer_logger = logger.new(slog::o!("Peer" => peer_id.0));
                let client = GrpcPeerClient::new(peer_logger, socket_addr)
                    .map_err(|e| CreationError::InvalidCell(format!("Peer {}: {}", peer_id, e)))?;
                Arc::new(client)
            }
            PeerChannel::Service(service) => service,
        };
        others.insert(peer_id, channel);
    }

    Ok(CellManager::new(cell.self_id, others))
}

fn storage_error<E: Into<Box<dyn Error + Send + Sync>>>(e: E) -> CreationError {
    CreationError::StorageInitialization(e.into())
}
