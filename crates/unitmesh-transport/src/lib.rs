//! Blocking socket transport for the unitmesh fabric.
//!
//! Two endpoint families are supported:
//! - `ipc://<path>` — Unix domain sockets, used for the RPC namespace and
//!   local publish/pull addresses
//! - `tcp://<host>:<port>` — network sockets, used when addresses are
//!   allocated from a port template
//!
//! This is the lowest layer of unitmesh. Everything else builds on the
//! [`FabStream`] and [`FabListener`] types provided here.

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod stream;
pub mod tcp;
#[cfg(unix)]
pub mod uds;

pub use endpoint::{fill_port, scan_port, Endpoint, RPC_IPC_PREFIX};
pub use error::{Result, TransportError};
pub use listener::{connect, FabListener};
pub use stream::FabStream;
pub use tcp::TcpSocket;
#[cfg(unix)]
pub use uds::UnixDomainSocket;
