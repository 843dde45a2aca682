use crate::role::LinkRole;

/// Errors that can occur on fabric links and RPC calls.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] unitmesh_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] unitmesh_frame::FrameError),

    /// A connect, send or receive exceeded the configured timeout.
    #[error("timed out after {timeout:?} on {endpoint}")]
    Timeout {
        endpoint: String,
        timeout: std::time::Duration,
    },

    /// The operation is not valid for this link's role.
    #[error("{op} is not valid on a {role} link")]
    InvalidRole { role: LinkRole, op: &'static str },

    /// The link has already been closed.
    #[error("link closed")]
    Closed,
}

impl LinkError {
    /// Fold an I/O-level deadline miss into [`LinkError::Timeout`] with
    /// endpoint context; everything else stays a frame error.
    pub(crate) fn from_frame_at(
        err: unitmesh_frame::FrameError,
        endpoint: &unitmesh_transport::Endpoint,
        timeout: std::time::Duration,
    ) -> Self {
        match err {
            unitmesh_frame::FrameError::Io(io)
                if matches!(
                    io.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                LinkError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout,
                }
            }
            other => LinkError::Frame(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
