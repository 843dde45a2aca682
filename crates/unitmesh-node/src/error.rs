/// Errors surfaced by the unit-side components.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Link-level error.
    #[error("link error: {0}")]
    Link(#[from] unitmesh_link::LinkError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] unitmesh_transport::TransportError),

    /// Frame or parameter codec error.
    #[error("frame error: {0}")]
    Frame(#[from] unitmesh_frame::FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A work-id subscription could not be resolved to an address.
    #[error("no output address registered for work id {0}")]
    UnresolvedWorkId(String),

    /// No push destination is currently set on the router.
    #[error("no push destination set")]
    NoPushDestination,

    /// The port pool is exhausted; registration is refused.
    #[error("port pool exhausted")]
    PortsExhausted,

    /// A port was released that the pool does not consider in use.
    #[error("port {0} is not allocated")]
    PortNotAllocated(u16),

    /// The work id is unknown to the registry.
    #[error("unknown work id {0}")]
    UnknownWorkId(String),

    /// A stream chunk is missing a required field or carries a bad value.
    #[error("malformed stream chunk: {0}")]
    MalformedChunk(String),

    /// A terminal stream chunk arrived with a gap in the buffered
    /// indices; the stream is abandoned.
    #[error("stream index gap (have {have} chunks, highest index {highest})")]
    IndexGap { have: usize, highest: u64 },
}

pub type Result<T> = std::result::Result<T, NodeError>;
