use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::error::Result;

/// A connected fabric stream — implements Read + Write.
///
/// This is the fundamental I/O type returned by transport operations,
/// wrapping either a Unix domain socket or a TCP stream depending on the
/// endpoint family.
pub struct FabStream {
    inner: FabStreamInner,
}

enum FabStreamInner {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Read for FabStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            FabStreamInner::Unix(stream) => stream.read(buf),
            FabStreamInner::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for FabStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            FabStreamInner::Unix(stream) => stream.write(buf),
            FabStreamInner::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            FabStreamInner::Unix(stream) => stream.flush(),
            FabStreamInner::Tcp(stream) => stream.flush(),
        }
    }
}

impl FabStream {
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: UnixStream) -> Self {
        Self {
            inner: FabStreamInner::Unix(stream),
        }
    }

    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: FabStreamInner::Tcp(stream),
        }
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            FabStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            FabStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            FabStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            FabStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            FabStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
            FabStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
        }
    }

    /// Shut down both halves, unblocking any reader on a clone.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            FabStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both).map_err(Into::into),
            FabStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both).map_err(Into::into),
        }
    }
}

impl std::fmt::Debug for FabStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let family = match &self.inner {
            #[cfg(unix)]
            FabStreamInner::Unix(_) => "unix",
            FabStreamInner::Tcp(_) => "tcp",
        };
        f.debug_struct("FabStream").field("family", &family).finish()
    }
}
