use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

use crate::server::ServerObserver;
use crate::BoxError;

/// Application entry point: turns one parsed request into a response.
///
/// Bodies are opaque byte buffers at this layer; streaming is the protocol
/// driver's concern. A handler error becomes an error response produced by
/// the [`ErrorHandler`](crate::handler::ErrorHandler), never a closed socket.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: Request<Bytes>) -> Result<Response<Bytes>, BoxError>;

    /// Lets the handler take part in the server lifecycle.
    fn as_observer(self: Arc<Self>) -> Option<Arc<dyn ServerObserver>> {
        None
    }
}
