use std::fmt::{self, Display, Formatter};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::driver::DriverFactory;
use crate::handler::{ErrorHandler, Handler};
use crate::server::{ServerObserver, ServerOptions, TimeoutHandle};

use super::addr::{AcceptedConnection, ClientAddr};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique, monotonically increasing connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    /// Allocates the next id. Client implementations call this once per
    /// connection.
    pub fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback invoked exactly once when a client closes.
pub type CloseCallback = Box<dyn FnOnce() + Send>;

/// One accepted connection, driven by an externally supplied protocol engine.
///
/// The server registers a close callback at accept time; beyond that it only
/// calls `start` on admission, `stop` during graceful shutdown, `close` on
/// rejection or idle timeout, and `is_waiting_on_response` from the timeout
/// sweep.
#[async_trait]
pub trait Client: Send + Sync + 'static {
    fn id(&self) -> ClientId;

    fn remote_addr(&self) -> &ClientAddr;

    fn local_addr(&self) -> &ClientAddr;

    /// Hands the connection to its protocol driver. Runs after admission;
    /// anything that may suspend, the TLS handshake included, belongs here.
    fn start(&self, driver_factory: Arc<dyn DriverFactory>);

    /// Asks the client to drain within `timeout`, closing forcibly afterwards.
    async fn stop(&self, timeout: Duration);

    /// Closes immediately. The close callbacks must fire exactly once, even
    /// for clients that were never started.
    fn close(&self);

    /// True while a response for an already-accepted request is still being
    /// produced. Such clients are not closed for idling; the delay is the
    /// server's own debt.
    fn is_waiting_on_response(&self) -> bool;

    /// Registers a close callback; fires immediately if already closed.
    fn on_close(&self, callback: CloseCallback);
}

/// Shared collaborators handed to the client factory for every connection.
#[derive(Clone)]
pub struct ClientContext {
    pub handler: Arc<dyn Handler>,
    pub error_handler: Arc<dyn ErrorHandler>,
    pub options: Arc<ServerOptions>,
    /// Handle into the server's timeout wheel. Clients schedule their idle
    /// deadline here once they start and refresh it on protocol activity.
    pub timeouts: TimeoutHandle,
}

/// Builds a [`Client`] around an accepted socket.
pub trait ClientFactory: Send + Sync + 'static {
    /// Creation must not suspend; it runs on the accept path before the
    /// admission checks. Failures are logged and the socket is dropped.
    fn create(
        &self,
        connection: AcceptedConnection,
        ctx: &ClientContext,
    ) -> io::Result<Arc<dyn Client>>;

    /// Lets the factory take part in the server lifecycle.
    fn as_observer(self: Arc<Self>) -> Option<Arc<dyn ServerObserver>> {
        None
    }
}
