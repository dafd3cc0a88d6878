use std::fmt::{self, Display, Formatter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::ServerConfig;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::server::Scheme;

/// Address of one side of an accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAddr {
    Tcp(SocketAddr),
    /// Unix-domain peer; `None` for unnamed sockets.
    Unix(Option<PathBuf>),
}

impl Display for ClientAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ClientAddr::Tcp(addr) => write!(f, "{addr}"),
            ClientAddr::Unix(Some(path)) => write!(f, "{}", path.display()),
            ClientAddr::Unix(None) => write!(f, "<unnamed>"),
        }
    }
}

/// Socket accepted from a listening endpoint. Ownership transfers to the
/// client built around it.
pub enum AcceptedStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// Everything the client factory gets about one accepted socket.
pub struct AcceptedConnection {
    pub remote_addr: ClientAddr,
    pub local_addr: ClientAddr,
    pub stream: AcceptedStream,
    pub scheme: Scheme,
    /// TLS configuration of the accepting endpoint. The handshake itself is
    /// the client's job and runs after admission, never on the accept path.
    pub tls: Option<Arc<ServerConfig>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_tcp_and_unix_forms() {
        let tcp = ClientAddr::Tcp("203.0.113.5:80".parse().unwrap());
        assert_eq!(tcp.to_string(), "203.0.113.5:80");

        let named = ClientAddr::Unix(Some("/run/app.sock".into()));
        assert_eq!(named.to_string(), "/run/app.sock");

        let unnamed = ClientAddr::Unix(None);
        assert_eq!(unnamed.to_string(), "<unnamed>");
    }
}
