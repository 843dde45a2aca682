use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, TransportError};

/// Fixed namespace prefix for RPC endpoints addressed by unit name.
///
/// `Endpoint::for_rpc("sys")` resolves to `ipc:///tmp/rpc.sys`. A name that
/// already carries a scheme (`://`) is parsed as a full endpoint instead.
pub const RPC_IPC_PREFIX: &str = "ipc:///tmp/rpc.";

/// A parsed fabric address.
///
/// `Ipc` endpoints are filesystem-backed Unix domain sockets; `Tcp`
/// endpoints hold the raw `host:port` authority. A `*` host binds all
/// interfaces and connects to loopback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Ipc(PathBuf),
    Tcp(String),
}

impl Endpoint {
    /// Parse an `ipc://` or `tcp://` URL.
    pub fn parse(url: &str) -> Result<Self> {
        if let Some(path) = url.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(TransportError::InvalidEndpoint(url.to_string()));
            }
            return Ok(Endpoint::Ipc(PathBuf::from(path)));
        }
        if let Some(authority) = url.strip_prefix("tcp://") {
            if authority.rsplit_once(':').is_none_or(|(host, port)| {
                host.is_empty() || port.parse::<u16>().is_err()
            }) {
                return Err(TransportError::InvalidEndpoint(url.to_string()));
            }
            return Ok(Endpoint::Tcp(authority.to_string()));
        }
        Err(TransportError::InvalidEndpoint(url.to_string()))
    }

    /// Resolve an RPC server name to its endpoint.
    ///
    /// Bare names live under the fixed IPC namespace; names that already
    /// contain a scheme are used as-is.
    pub fn for_rpc(name: &str) -> Result<Self> {
        if name.contains("://") {
            Self::parse(name)
        } else {
            Self::parse(&format!("{RPC_IPC_PREFIX}{name}"))
        }
    }

    /// The filesystem path backing this endpoint, if any.
    pub fn socket_path(&self) -> Option<&std::path::Path> {
        match self {
            Endpoint::Ipc(path) => Some(path),
            Endpoint::Tcp(_) => None,
        }
    }

    /// Authority to pass to a TCP bind, with `*` mapped to all interfaces.
    pub(crate) fn tcp_bind_authority(authority: &str) -> String {
        match authority.rsplit_once(':') {
            Some(("*", port)) => format!("0.0.0.0:{port}"),
            _ => authority.to_string(),
        }
    }

    /// Authority to pass to a TCP connect, with `*` mapped to loopback.
    pub(crate) fn tcp_connect_authority(authority: &str) -> String {
        match authority.rsplit_once(':') {
            Some(("*", port)) => format!("127.0.0.1:{port}"),
            _ => authority.to_string(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Endpoint::Tcp(authority) => write!(f, "tcp://{authority}"),
        }
    }
}

/// Substitute a port number into a printf-style address template.
///
/// The template carries a single `%d`, e.g. `tcp://*:%d` or
/// `ipc:///tmp/fab/%d.sock`.
pub fn fill_port(template: &str, port: u16) -> String {
    template.replacen("%d", &port.to_string(), 1)
}

/// Reverse of [`fill_port`]: extract the port back out of a filled address.
///
/// The template must stay format-symmetric with the one used to fill, or
/// reverse allocation breaks; a mismatched prefix/suffix yields `None`.
pub fn scan_port(template: &str, addr: &str) -> Option<u16> {
    let (prefix, suffix) = template.split_once("%d")?;
    let rest = addr.strip_prefix(prefix)?;
    let digits = rest.strip_suffix(suffix)?;
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipc_endpoint() {
        let ep = Endpoint::parse("ipc:///tmp/rpc.sys").unwrap();
        assert_eq!(ep, Endpoint::Ipc(PathBuf::from("/tmp/rpc.sys")));
        assert_eq!(ep.to_string(), "ipc:///tmp/rpc.sys");
    }

    #[test]
    fn parses_tcp_endpoint() {
        let ep = Endpoint::parse("tcp://*:5001").unwrap();
        assert_eq!(ep, Endpoint::Tcp("*:5001".to_string()));
        assert_eq!(ep.to_string(), "tcp://*:5001");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(matches!(
            Endpoint::parse("udp://host:1"),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            Endpoint::parse("tcp://host:notaport"),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            Endpoint::parse("ipc://"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn rpc_name_resolves_under_namespace() {
        let ep = Endpoint::for_rpc("sys").unwrap();
        assert_eq!(ep, Endpoint::Ipc(PathBuf::from("/tmp/rpc.sys")));
    }

    #[test]
    fn rpc_name_with_scheme_is_used_verbatim() {
        let ep = Endpoint::for_rpc("tcp://127.0.0.1:7000").unwrap();
        assert_eq!(ep, Endpoint::Tcp("127.0.0.1:7000".to_string()));
    }

    #[test]
    fn bind_and_connect_authorities_map_wildcard() {
        assert_eq!(Endpoint::tcp_bind_authority("*:9000"), "0.0.0.0:9000");
        assert_eq!(Endpoint::tcp_connect_authority("*:9000"), "127.0.0.1:9000");
        assert_eq!(Endpoint::tcp_bind_authority("10.0.0.1:9000"), "10.0.0.1:9000");
    }

    #[test]
    fn fill_scan_symmetry() {
        for template in ["tcp://*:%d", "ipc:///tmp/fab/%d.sock"] {
            for port in [1u16, 5001, 65535] {
                let addr = fill_port(template, port);
                assert_eq!(scan_port(template, &addr), Some(port));
            }
        }
    }

    #[test]
    fn scan_rejects_mismatched_template() {
        assert_eq!(scan_port("tcp://*:%d", "ipc:///tmp/fab/7.sock"), None);
        assert_eq!(scan_port("ipc:///tmp/fab/%d.sock", "ipc:///tmp/fab/x.sock"), None);
    }
}
