//! Wire framing and parameter packing for the unitmesh fabric.
//!
//! Every message is framed with:
//! - A 2-byte magic number ("UM") for stream synchronization
//! - A 1-byte flags field; bit 0 ("MORE") marks a multi-part message, as
//!   used by the two-part RPC request (action frame, then parameter frame)
//! - A 4-byte little-endian payload length
//!
//! The [`params`] module carries the fixed two-slot parameter codec used
//! by RPC payloads: `[len(param0): 1 byte][param0][param1]`.

pub mod codec;
pub mod error;
pub mod params;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use params::{pack, unpack, unpack_str};
pub use reader::FrameReader;
pub use writer::FrameWriter;
