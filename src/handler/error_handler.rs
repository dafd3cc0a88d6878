use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};

use crate::server::ServerObserver;

/// Produces the response for protocol-level failures, for example a malformed
/// request or an overloaded server, when no application response exists.
///
/// `request` is present when the failure occurred after a request line was
/// parsed.
#[async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    async fn handle_error(
        &self,
        status: StatusCode,
        request: Option<&Request<Bytes>>,
    ) -> Response<Bytes>;

    /// Lets the error handler take part in the server lifecycle.
    fn as_observer(self: Arc<Self>) -> Option<Arc<dyn ServerObserver>> {
        None
    }
}

/// Minimal error responder: the status line and an empty body.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorHandler;

#[async_trait]
impl ErrorHandler for DefaultErrorHandler {
    async fn handle_error(
        &self,
        status: StatusCode,
        _request: Option<&Request<Bytes>>,
    ) -> Response<Bytes> {
        let mut response = Response::new(Bytes::new());
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_handler_builds_an_empty_response() {
        let response = DefaultErrorHandler
            .handle_error(StatusCode::SERVICE_UNAVAILABLE, None)
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.body().is_empty());
    }
}
