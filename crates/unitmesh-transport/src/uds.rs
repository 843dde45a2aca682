use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::FabStream;

/// Unix domain socket listener.
///
/// Binding removes a stale socket file left behind by a crashed process,
/// but never removes a path that is not a socket. The socket file is
/// unlinked again on drop if it is still ours.
#[derive(Debug)]
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
}

/// `sockaddr_un.sun_path` limit: 108 bytes on Linux, 104 elsewhere.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

impl UnixDomainSocket {
    /// Bind and listen on a filesystem-path Unix domain socket.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let len = path.as_os_str().len();
        if len >= MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: MAX_PATH_LEN,
            });
        }

        remove_stale_socket(&path)?;

        let listener = UnixListener::bind(&path).map_err(|e| TransportError::Bind {
            endpoint: format!("ipc://{}", path.display()),
            source: e,
        })?;

        info!(?path, "listening on unix domain socket");
        Ok(Self { listener, path })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<FabStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(FabStream::from_unix(stream))
    }

    /// Connect to a listening Unix domain socket (blocking).
    ///
    /// Fast-fails with [`TransportError::MissingSocketFile`] when the
    /// backing file is absent, so callers never block on a server that
    /// was never started.
    pub fn connect(path: impl AsRef<Path>) -> Result<FabStream> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TransportError::MissingSocketFile(path.to_path_buf()));
        }
        let stream =
            std::os::unix::net::UnixStream::connect(path).map_err(|e| TransportError::Connect {
                endpoint: format!("ipc://{}", path.display()),
                source: e,
            })?;
        Ok(FabStream::from_unix(stream))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn remove_stale_socket(path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return Ok(()),
    };
    if metadata.file_type().is_socket() {
        debug!(?path, "removing stale socket");
        std::fs::remove_file(path).map_err(|e| TransportError::Bind {
            endpoint: format!("ipc://{}", path.display()),
            source: e,
        })
    } else {
        Err(TransportError::Bind {
            endpoint: format!("ipc://{}", path.display()),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "existing path is not a unix socket",
            ),
        })
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket() {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}
