/// Errors that can occur during frame or parameter encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x554D \"UM\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// The first slot of a parameter pack exceeds the one-byte length
    /// prefix.
    #[error("param0 too long ({0} bytes, max 255)")]
    ParamTooLong(usize),

    /// A parameter pack is shorter than its own header claims.
    #[error("truncated parameter pack (need {need} bytes, have {have})")]
    ParamTruncated { need: usize, have: usize },

    /// A parameter slot is not valid UTF-8 where text was expected.
    #[error("parameter is not valid UTF-8")]
    ParamNotUtf8(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
