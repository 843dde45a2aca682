use std::net::{TcpListener, TcpStream};

use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::FabStream;

/// TCP listener for `tcp://host:port` endpoints.
pub struct TcpSocket {
    listener: TcpListener,
    authority: String,
}

impl TcpSocket {
    /// Bind and listen on a TCP authority (`host:port`, `*` = all
    /// interfaces).
    pub fn bind(authority: &str) -> Result<Self> {
        let bind_addr = Endpoint::tcp_bind_authority(authority);
        let listener = TcpListener::bind(&bind_addr).map_err(|e| TransportError::Bind {
            endpoint: format!("tcp://{authority}"),
            source: e,
        })?;
        info!(%authority, "listening on tcp socket");
        Ok(Self {
            listener,
            authority: authority.to_string(),
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<FabStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, "accepted connection");
        let _ = stream.set_nodelay(true);
        Ok(FabStream::from_tcp(stream))
    }

    /// Connect to a listening TCP endpoint (blocking).
    pub fn connect(authority: &str) -> Result<FabStream> {
        let connect_addr = Endpoint::tcp_connect_authority(authority);
        let stream = TcpStream::connect(&connect_addr).map_err(|e| TransportError::Connect {
            endpoint: format!("tcp://{authority}"),
            source: e,
        })?;
        let _ = stream.set_nodelay(true);
        Ok(FabStream::from_tcp(stream))
    }

    /// The authority this socket is bound to, with the real local port
    /// substituted when the caller bound port 0.
    pub fn authority(&self) -> String {
        match self.listener.local_addr() {
            Ok(addr) => match self.authority.rsplit_once(':') {
                Some((host, "0")) => format!("{host}:{}", addr.port()),
                _ => self.authority.clone(),
            },
            Err(_) => self.authority.clone(),
        }
    }
}
