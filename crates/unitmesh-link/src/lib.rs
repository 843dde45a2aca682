//! Transport links and RPC dispatch for the unitmesh fabric.
//!
//! A [`Link`] is a single-role socket: publish, subscribe, push or pull,
//! each with its own lifecycle and (for receiving roles) a background
//! receive loop. The RPC side derives request/reply from the same
//! primitives: [`RpcServer`] owns the named-action dispatch table behind a
//! serve link, [`RpcClient`] performs single-shot calls against it.

pub mod error;
pub mod link;
pub mod role;
pub mod rpc;

pub use error::{LinkError, Result};
pub use link::{FrameCallback, Link, DEFAULT_TIMEOUT};
pub use role::LinkRole;
pub use rpc::{unit_call, unit_call_str, ActionHandler, RpcClient, RpcServer, NOT_ACTION};
