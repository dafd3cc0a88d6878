use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{AcceptedConnection, Client, ClientContext, ClientFactory, ClientId};
use crate::driver::DriverFactory;
use crate::handler::{DefaultErrorHandler, ErrorHandler, Handler};
use crate::BoxError;

use super::admission::network_key;
use super::endpoint::{BoundEndpoint, Scheme};
use super::error::{AggregateError, ServerBuildError, ServerError};
use super::observer::{ObserverSet, ServerObserver};
use super::registry::{AdmissionOutcome, SharedState};
use super::timeout::{now_seconds, TimeoutHandle};

/// Lifecycle state of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl Display for ServerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Started => "started",
            ServerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Tunables for admission, timeouts and shutdown.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Maximum concurrent connections; 0 means unlimited.
    pub connection_limit: usize,
    /// Maximum concurrent connections per network block, /32 for IPv4 and /56
    /// for IPv6; 0 means unlimited. Loopback and Unix peers are exempt.
    pub connections_per_ip_limit: usize,
    /// Whether drivers should offer response compression. Downgraded with a
    /// warning when the crate is built without the `compression` feature.
    pub compression_enabled: bool,
    /// Drain budget handed to each client when the server stops.
    pub shutdown_timeout: Duration,
    /// Cadence of the idle-timeout sweep; zero disables it.
    pub timeout_tick_interval: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            connection_limit: 1000,
            connections_per_ip_limit: 10,
            compression_enabled: true,
            shutdown_timeout: Duration::from_millis(3000),
            timeout_tick_interval: Duration::from_millis(1000),
        }
    }
}

pub struct HttpServerBuilder {
    endpoints: Vec<BoundEndpoint>,
    handler: Option<Arc<dyn Handler>>,
    error_handler: Arc<dyn ErrorHandler>,
    client_factory: Option<Arc<dyn ClientFactory>>,
    driver_factory: Option<Arc<dyn DriverFactory>>,
    options: ServerOptions,
}

impl HttpServerBuilder {
    fn new() -> Self {
        Self {
            endpoints: Vec::new(),
            handler: None,
            error_handler: Arc::new(DefaultErrorHandler),
            client_factory: None,
            driver_factory: None,
            options: ServerOptions::default(),
        }
    }

    /// Adds a listening endpoint; at least one is required.
    pub fn endpoint(mut self, endpoint: BoundEndpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = error_handler;
        self
    }

    pub fn client_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.client_factory = Some(factory);
        self
    }

    pub fn driver_factory(mut self, factory: Arc<dyn DriverFactory>) -> Self {
        self.driver_factory = Some(factory);
        self
    }

    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<HttpServer, ServerBuildError> {
        if self.endpoints.is_empty() {
            return Err(ServerBuildError::MissingEndpoints);
        }
        let handler = self.handler.ok_or(ServerBuildError::MissingHandler)?;
        let client_factory = self.client_factory.ok_or(ServerBuildError::MissingClientFactory)?;
        let driver_factory = self.driver_factory.ok_or(ServerBuildError::MissingDriverFactory)?;

        let mut options = self.options;
        if options.compression_enabled && !compression_supported() {
            warn!("compression requested but this build does not support it, disabling");
            options.compression_enabled = false;
        }

        Ok(HttpServer {
            inner: Arc::new(Inner {
                collaborators: Mutex::new(Collaborators {
                    handler,
                    error_handler: self.error_handler,
                    client_factory,
                    driver_factory,
                }),
                options: Arc::new(options),
                observers: Mutex::new(ObserverSet::new()),
                lifecycle: Mutex::new(Lifecycle {
                    state: ServerState::Stopped,
                    endpoints: self.endpoints,
                    listeners: Vec::new(),
                    tick: None,
                }),
                shared: Arc::new(Mutex::new(SharedState::new())),
            }),
        })
    }
}

/// Whether this build can offer response compression to protocol drivers.
fn compression_supported() -> bool {
    cfg!(feature = "compression")
}

struct Collaborators {
    handler: Arc<dyn Handler>,
    error_handler: Arc<dyn ErrorHandler>,
    client_factory: Arc<dyn ClientFactory>,
    driver_factory: Arc<dyn DriverFactory>,
}

struct TaskHandle {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TaskHandle {
    /// Cancels the task and waits for it to finish.
    async fn shutdown(self) {
        let _ = self.cancel.send(());
        let _ = self.task.await;
    }
}

struct Lifecycle {
    state: ServerState,
    endpoints: Vec<BoundEndpoint>,
    listeners: Vec<TaskHandle>,
    tick: Option<TaskHandle>,
}

struct Inner {
    collaborators: Mutex<Collaborators>,
    options: Arc<ServerOptions>,
    observers: Mutex<ObserverSet>,
    lifecycle: Mutex<Lifecycle>,
    shared: Arc<Mutex<SharedState>>,
}

/// The server orchestrator.
///
/// Owns the listening endpoints, admits connections under the configured
/// limits, sweeps idle clients, and drives the start/stop lifecycle across
/// the attached observers. Clones are cheap and share the same server.
///
/// Lock order, for anyone extending this file: lifecycle, then collaborators,
/// then observers, then shared state. No lock is held across an await and no
/// foreign code runs under one.
#[derive(Clone)]
pub struct HttpServer {
    inner: Arc<Inner>,
}

impl HttpServer {
    pub fn builder() -> HttpServerBuilder {
        HttpServerBuilder::new()
    }

    pub fn state(&self) -> ServerState {
        self.lifecycle().state
    }

    /// Number of currently counted connections.
    pub fn client_count(&self) -> usize {
        self.shared().registry.client_count()
    }

    pub fn options(&self) -> &ServerOptions {
        self.inner.options.as_ref()
    }

    pub fn error_handler(&self) -> Arc<dyn ErrorHandler> {
        self.collaborators().error_handler.clone()
    }

    /// Attaches a lifecycle observer. Only legal while stopped; attaching the
    /// same observer twice is refused.
    pub fn attach_observer(&self, observer: Arc<dyn ServerObserver>) -> Result<(), ServerError> {
        let lifecycle = self.lifecycle();
        if lifecycle.state != ServerState::Stopped {
            return Err(ServerError::InvalidState {
                expected: ServerState::Stopped,
                actual: lifecycle.state,
            });
        }
        if !self.observer_set().insert(observer) {
            return Err(ServerError::DuplicateObserver);
        }
        Ok(())
    }

    pub fn set_client_factory(&self, factory: Arc<dyn ClientFactory>) -> Result<(), ServerError> {
        self.mutate(move |collaborators| collaborators.client_factory = factory)
    }

    pub fn set_driver_factory(&self, factory: Arc<dyn DriverFactory>) -> Result<(), ServerError> {
        self.mutate(move |collaborators| collaborators.driver_factory = factory)
    }

    pub fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) -> Result<(), ServerError> {
        self.mutate(move |collaborators| collaborators.error_handler = handler)
    }

    fn mutate(&self, apply: impl FnOnce(&mut Collaborators)) -> Result<(), ServerError> {
        let lifecycle = self.lifecycle();
        if lifecycle.state != ServerState::Stopped {
            return Err(ServerError::InvalidState {
                expected: ServerState::Stopped,
                actual: lifecycle.state,
            });
        }
        apply(&mut self.collaborators());
        Ok(())
    }

    /// Starts the server: notifies the observers, then begins accepting on
    /// every endpoint and sweeping idle connections.
    ///
    /// If any observer fails the startup is rolled back with a best-effort
    /// shutdown and all collected failures are surfaced; the server ends up
    /// stopped either way.
    pub async fn start(&self) -> Result<(), ServerError> {
        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state != ServerState::Stopped {
                return Err(ServerError::InvalidState {
                    expected: ServerState::Stopped,
                    actual: lifecycle.state,
                });
            }
            if lifecycle.endpoints.is_empty() {
                return Err(ServerError::CannotRestart);
            }
            lifecycle.state = ServerState::Starting;
        }

        let observers = self.observers_for_cycle();
        let failures = self.notify_start(&observers).await;
        if !failures.is_empty() {
            let rollback_failures = self.shutdown_inner(self.inner.options.shutdown_timeout).await;
            for failure in &rollback_failures {
                warn!(cause = %failure, "observer failed during startup rollback");
            }
            return Err(ServerError::StartupFailed(AggregateError::new(failures)));
        }

        let driver_factory = self.collaborators().driver_factory.clone();
        let alpn_protocols = driver_factory.alpn_protocols();

        let mut lifecycle = self.lifecycle();
        lifecycle.state = ServerState::Started;

        let endpoints = std::mem::take(&mut lifecycle.endpoints);
        for mut endpoint in endpoints {
            if endpoint.scheme() == Scheme::Https
                && !alpn_protocols.is_empty()
                && !endpoint.set_alpn_protocols(&alpn_protocols)
            {
                warn!(
                    address = %endpoint.display_address(),
                    "TLS configuration is shared, cannot apply ALPN protocols"
                );
            }
            info!(
                address = %endpoint.display_address(),
                scheme = endpoint.scheme().as_str(),
                "listening"
            );
            let (cancel, cancelled) = oneshot::channel();
            let task = tokio::spawn(accept_loop(self.clone(), endpoint, cancelled));
            lifecycle.listeners.push(TaskHandle { cancel, task });
        }

        if !self.inner.options.timeout_tick_interval.is_zero() {
            let (cancel, cancelled) = oneshot::channel();
            let task = tokio::spawn(timeout_loop(self.clone(), cancelled));
            lifecycle.tick = Some(TaskHandle { cancel, task });
        }

        Ok(())
    }

    /// Stops with the configured shutdown budget.
    pub async fn stop(&self) -> Result<(), ServerError> {
        self.stop_within(self.inner.options.shutdown_timeout).await
    }

    /// Gracefully stops the server: closes the listeners, drains every client
    /// within `timeout`, then notifies the observers. A no-op when already
    /// stopped; per-client overruns never fail the call, observer errors do.
    pub async fn stop_within(&self, timeout: Duration) -> Result<(), ServerError> {
        {
            let lifecycle = self.lifecycle();
            match lifecycle.state {
                ServerState::Stopped => return Ok(()),
                ServerState::Started => {}
                actual => {
                    return Err(ServerError::InvalidState {
                        expected: ServerState::Started,
                        actual,
                    })
                }
            }
        }

        let failures = self.shutdown_inner(timeout).await;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ServerError::ShutdownFailed(AggregateError::new(failures)))
        }
    }

    /// Shutdown path shared by `stop` and the startup rollback. Listeners go
    /// first so nothing new is admitted, then the clients drain, then the
    /// observers are notified; observers may hold resources clients still use
    /// while draining, so they must outlive that phase.
    async fn shutdown_inner(&self, timeout: Duration) -> Vec<BoxError> {
        let (listeners, tick) = {
            let mut lifecycle = self.lifecycle();
            lifecycle.state = ServerState::Stopping;
            (std::mem::take(&mut lifecycle.listeners), lifecycle.tick.take())
        };

        for listener in listeners {
            listener.shutdown().await;
        }

        let clients: Vec<Arc<dyn Client>> = self.shared().registry.clients().cloned().collect();
        if !clients.is_empty() {
            debug!(clients = clients.len(), "draining clients");
        }
        join_all(clients.iter().map(|client| client.stop(timeout))).await;

        let observers = self.observer_set().snapshot();
        let failures = self.notify_stop(&observers).await;

        if let Some(tick) = tick {
            tick.shutdown().await;
        }

        self.lifecycle().state = ServerState::Stopped;
        info!("server stopped");
        failures
    }

    /// Observer list for one start/stop cycle: the user-attached observers in
    /// attach order, then whichever collaborators expose the observer
    /// capability, deduplicated by identity.
    fn observers_for_cycle(&self) -> Vec<Arc<dyn ServerObserver>> {
        let (driver_factory, client_factory, handler, error_handler) = {
            let collaborators = self.collaborators();
            (
                collaborators.driver_factory.clone(),
                collaborators.client_factory.clone(),
                collaborators.handler.clone(),
                collaborators.error_handler.clone(),
            )
        };
        let auto = [
            driver_factory.as_observer(),
            client_factory.as_observer(),
            handler.as_observer(),
            error_handler.as_observer(),
        ];

        let mut observers = self.observer_set();
        for candidate in auto.into_iter().flatten() {
            observers.insert(candidate);
        }
        observers.snapshot()
    }

    async fn notify_start(&self, observers: &[Arc<dyn ServerObserver>]) -> Vec<BoxError> {
        let results = join_all(observers.iter().map(|observer| observer.on_start(self))).await;
        results.into_iter().filter_map(Result::err).collect()
    }

    async fn notify_stop(&self, observers: &[Arc<dyn ServerObserver>]) -> Vec<BoxError> {
        let results = join_all(observers.iter().map(|observer| observer.on_stop(self))).await;
        results.into_iter().filter_map(Result::err).collect()
    }

    /// Admits or rejects one accepted connection.
    ///
    /// Everything from the limit checks to the registry insertion happens in
    /// a single lock scope; nothing in here suspends. Work that may suspend,
    /// like a TLS handshake, belongs to `Client::start`.
    fn accept_client(&self, connection: AcceptedConnection) {
        let (client_factory, driver_factory, context) = {
            let collaborators = self.collaborators();
            (
                collaborators.client_factory.clone(),
                collaborators.driver_factory.clone(),
                ClientContext {
                    handler: collaborators.handler.clone(),
                    error_handler: collaborators.error_handler.clone(),
                    options: self.inner.options.clone(),
                    timeouts: TimeoutHandle::new(self.inner.shared.clone()),
                },
            )
        };

        let remote_addr = connection.remote_addr.clone();
        let network = network_key(&remote_addr);

        let client = match client_factory.create(connection, &context) {
            Ok(client) => client,
            Err(cause) => {
                debug!(remote = %remote_addr, cause = %cause, "failed to create client");
                return;
            }
        };

        let id = client.id();
        self.shared().registry.track(id);

        // The callback releases exactly what admission counted, so it is safe
        // to register it before the checks run and to fire it for a client
        // that never made it in.
        let shared = Arc::downgrade(&self.inner.shared);
        client.on_close(Box::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.lock().unwrap_or_else(PoisonError::into_inner).release(id);
            }
        }));

        let outcome = self.shared().registry.admit(
            client.clone(),
            network,
            self.inner.options.connection_limit,
            self.inner.options.connections_per_ip_limit,
        );

        match outcome {
            AdmissionOutcome::Admitted => {
                debug!(client = %id, remote = %remote_addr, "client accepted");
                client.start(driver_factory);
            }
            AdmissionOutcome::GlobalLimit => {
                debug!(
                    client = %id,
                    remote = %remote_addr,
                    limit = self.inner.options.connection_limit,
                    "connection limit reached, closing client"
                );
                client.close();
            }
            AdmissionOutcome::PerIpLimit => {
                debug!(
                    client = %id,
                    remote = %remote_addr,
                    limit = self.inner.options.connections_per_ip_limit,
                    "per-network connection limit reached, closing client"
                );
                client.close();
            }
            AdmissionOutcome::AlreadyClosed => {
                debug!(client = %id, remote = %remote_addr, "client closed before admission");
            }
        }
    }

    /// One pass of the idle-timeout sweep.
    fn sweep_timeouts(&self, now: u64) {
        let expired: Vec<(ClientId, Option<Arc<dyn Client>>)> = {
            let mut shared = self.shared();
            let ids = shared.wheel.extract(now);
            ids.into_iter().map(|id| (id, shared.registry.get(id).cloned())).collect()
        };

        for (id, client) in expired {
            let Some(client) = client else {
                debug_assert!(false, "expired deadline for a client missing from the registry");
                continue;
            };
            if client.is_waiting_on_response() {
                // Stay eligible on the next tick instead of closing a client
                // whose slow response is the server's own fault.
                self.shared().wheel.insert(id, now + 1);
            } else {
                debug!(client = %id, "client exceeded its idle timeout, closing");
                client.close();
            }
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn collaborators(&self) -> MutexGuard<'_, Collaborators> {
        self.inner.collaborators.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observer_set(&self) -> MutexGuard<'_, ObserverSet> {
        self.inner.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shared(&self) -> MutexGuard<'_, SharedState> {
        self.inner.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Accepts connections on one endpoint until cancelled. The endpoint and its
/// socket drop when the loop ends, releasing the port.
async fn accept_loop(
    server: HttpServer,
    endpoint: BoundEndpoint,
    mut cancelled: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut cancelled => {
                debug!(address = %endpoint.display_address(), "listener closed");
                break;
            }
            accepted = endpoint.accept() => match accepted {
                Ok(connection) => server.accept_client(connection),
                // Transient; the listener stays registered.
                Err(cause) => debug!(cause = %cause, "failed to accept connection"),
            }
        }
    }
}

async fn timeout_loop(server: HttpServer, mut cancelled: oneshot::Receiver<()>) {
    let mut tick = tokio::time::interval(server.inner.options.timeout_tick_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = &mut cancelled => break,
            _ = tick.tick() => server.sweep_timeouts(now_seconds()),
        }
    }
}
