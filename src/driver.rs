use std::sync::Arc;

use crate::server::ServerObserver;

/// Creates per-connection protocol drivers and advertises which application
/// protocols they speak.
///
/// The server itself consumes only the ALPN list, copying it into each HTTPS
/// endpoint's TLS configuration at startup. How a driver is constructed from
/// an admitted client is a private matter between the factory and the client
/// implementation it is paired with.
pub trait DriverFactory: Send + Sync + 'static {
    /// ALPN protocol identifiers in preference order, e.g. `["h2", "http/1.1"]`.
    fn alpn_protocols(&self) -> Vec<String>;

    /// Lets the factory take part in the server lifecycle.
    fn as_observer(self: Arc<Self>) -> Option<Arc<dyn ServerObserver>> {
        None
    }
}
