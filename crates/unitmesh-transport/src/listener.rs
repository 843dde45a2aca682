use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::stream::FabStream;
use crate::tcp::TcpSocket;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

/// Endpoint-family-agnostic listener used by every bound link role.
pub enum FabListener {
    #[cfg(unix)]
    Unix(UnixDomainSocket),
    Tcp(TcpSocket),
}

impl FabListener {
    /// Bind to an endpoint.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            #[cfg(unix)]
            Endpoint::Ipc(path) => Ok(FabListener::Unix(UnixDomainSocket::bind(path)?)),
            Endpoint::Tcp(authority) => Ok(FabListener::Tcp(TcpSocket::bind(authority)?)),
        }
    }

    /// Accept the next incoming connection (blocking).
    pub fn accept(&self) -> Result<FabStream> {
        match self {
            #[cfg(unix)]
            FabListener::Unix(socket) => socket.accept(),
            FabListener::Tcp(socket) => socket.accept(),
        }
    }

    /// The endpoint this listener is bound to.
    pub fn endpoint(&self) -> Endpoint {
        match self {
            #[cfg(unix)]
            FabListener::Unix(socket) => Endpoint::Ipc(socket.path().to_path_buf()),
            FabListener::Tcp(socket) => Endpoint::Tcp(socket.authority()),
        }
    }
}

/// Connect to an endpoint of either family (blocking).
pub fn connect(endpoint: &Endpoint) -> Result<FabStream> {
    match endpoint {
        #[cfg(unix)]
        Endpoint::Ipc(path) => UnixDomainSocket::connect(path),
        Endpoint::Tcp(authority) => TcpSocket::connect(authority),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn roundtrip_over_both_families() {
        let dir = std::env::temp_dir().join(format!("unitmesh-lsn-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let ipc = Endpoint::Ipc(dir.join("fab.sock"));
        let tcp_listener = FabListener::bind(&Endpoint::Tcp("127.0.0.1:0".into())).unwrap();
        let tcp = tcp_listener.endpoint();

        for (endpoint, listener) in [
            (ipc.clone(), FabListener::bind(&ipc).unwrap()),
            (tcp, tcp_listener),
        ] {
            let handle = std::thread::spawn(move || {
                let mut client = connect(&endpoint).unwrap();
                client.write_all(b"fab").unwrap();
            });
            let mut server = listener.accept().unwrap();
            let mut buf = [0u8; 3];
            server.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"fab");
            handle.join().unwrap();
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
