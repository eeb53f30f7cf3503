//! The library's client-facing API: the traits an application implements, and the manager it
//! drives its peer through.
mod election;
mod local_service;
mod manager;
mod meta_state;
mod options;
mod wiring;

pub use election::ElectionManager;
pub use manager::MetaStateManager;
pub use meta_state::MetaState;
pub use options::MetaStateOptions;
pub use wiring::create_meta_state_manager;
pub use wiring::serve_rpc;
pub use wiring::CellConfig;
pub use wiring::CreationError;
pub use wiring::MetaStateConfig;
pub use wiring::PeerChannel;

pub(crate) use options::MetaStateOptionsValidated;
