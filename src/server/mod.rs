pub(crate) mod convert;
mod server;
mod shutdown;

pub(crate) use server::RpcServer;
pub(crate) use shutdown::shutdown_signal;
pub use shutdown::RpcServerShutdownHandle;
pub(crate) use shutdown::RpcServerShutdownSignal;
