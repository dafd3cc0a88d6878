use std::io;
use std::sync::Arc;

use rustls::ServerConfig;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

use crate::client::{AcceptedConnection, AcceptedStream, ClientAddr};

/// Protocol scheme served by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// An already-bound listening socket. The server never binds; embedders hand
/// over sockets they bound themselves.
pub enum BoundSocket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl BoundSocket {
    fn display_address(&self) -> String {
        match self {
            BoundSocket::Tcp(listener) => listener
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "<unknown>".to_string()),
            #[cfg(unix)]
            BoundSocket::Unix(listener) => listener
                .local_addr()
                .ok()
                .and_then(|addr| addr.as_pathname().map(|path| path.display().to_string()))
                .unwrap_or_else(|| "<unix>".to_string()),
        }
    }
}

impl From<TcpListener> for BoundSocket {
    fn from(listener: TcpListener) -> Self {
        BoundSocket::Tcp(listener)
    }
}

#[cfg(unix)]
impl From<UnixListener> for BoundSocket {
    fn from(listener: UnixListener) -> Self {
        BoundSocket::Unix(listener)
    }
}

/// A listening endpoint: the bound socket, its scheme, and for HTTPS the TLS
/// configuration whose ALPN list the server fills in at startup.
///
/// The socket moves into the endpoint's accept task when the server starts
/// and is dropped when that task ends, freeing the port promptly.
pub struct BoundEndpoint {
    display_address: String,
    socket: BoundSocket,
    scheme: Scheme,
    tls: Option<Arc<ServerConfig>>,
}

impl BoundEndpoint {
    pub fn http(socket: impl Into<BoundSocket>) -> Self {
        let socket = socket.into();
        Self {
            display_address: socket.display_address(),
            socket,
            scheme: Scheme::Http,
            tls: None,
        }
    }

    pub fn https(socket: impl Into<BoundSocket>, tls: Arc<ServerConfig>) -> Self {
        let socket = socket.into();
        Self {
            display_address: socket.display_address(),
            socket,
            scheme: Scheme::Https,
            tls: Some(tls),
        }
    }

    pub fn display_address(&self) -> &str {
        &self.display_address
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// ALPN identifiers currently offered by this endpoint; empty for plain
    /// HTTP endpoints.
    pub fn alpn_protocols(&self) -> Vec<String> {
        self.tls
            .as_ref()
            .map(|config| {
                config
                    .alpn_protocols
                    .iter()
                    .map(|protocol| String::from_utf8_lossy(protocol).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Applies the driver's ALPN preference list to the TLS configuration.
    ///
    /// Returns false when the configuration is shared outside the server and
    /// cannot be mutated in place; the existing list then stays.
    pub(crate) fn set_alpn_protocols(&mut self, protocols: &[String]) -> bool {
        let Some(config) = self.tls.as_mut() else {
            return true;
        };
        match Arc::get_mut(config) {
            Some(config) => {
                config.alpn_protocols =
                    protocols.iter().map(|protocol| protocol.as_bytes().to_vec()).collect();
                true
            }
            None => false,
        }
    }

    pub(crate) async fn accept(&self) -> io::Result<AcceptedConnection> {
        match &self.socket {
            BoundSocket::Tcp(listener) => {
                let (stream, remote) = listener.accept().await?;
                let local = stream.local_addr()?;
                Ok(AcceptedConnection {
                    remote_addr: ClientAddr::Tcp(remote),
                    local_addr: ClientAddr::Tcp(local),
                    stream: AcceptedStream::Tcp(stream),
                    scheme: self.scheme,
                    tls: self.tls.clone(),
                })
            }
            #[cfg(unix)]
            BoundSocket::Unix(listener) => {
                let (stream, remote) = listener.accept().await?;
                let remote =
                    ClientAddr::Unix(remote.as_pathname().map(|path| path.to_path_buf()));
                let local = ClientAddr::Unix(
                    listener
                        .local_addr()
                        .ok()
                        .and_then(|addr| addr.as_pathname().map(|path| path.to_path_buf())),
                );
                Ok(AcceptedConnection {
                    remote_addr: remote,
                    local_addr: local,
                    stream: AcceptedStream::Unix(stream),
                    scheme: self.scheme,
                    tls: self.tls.clone(),
                })
            }
        }
    }
}
