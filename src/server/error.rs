use std::fmt::{self, Display, Formatter};

use thiserror::Error;

use crate::BoxError;

use super::server::ServerState;

/// A server could not be built because a required ingredient was missing.
#[derive(Debug, Error)]
pub enum ServerBuildError {
    #[error("at least one bound endpoint must be provided")]
    MissingEndpoints,

    #[error("request handler must be set")]
    MissingHandler,

    #[error("client factory must be set")]
    MissingClientFactory,

    #[error("driver factory must be set")]
    MissingDriverFactory,
}

#[derive(Debug, Error)]
pub enum ServerError {
    /// The operation is only legal in `expected` but the server was in
    /// `actual`. Not retryable; the caller holds a stale view of the server.
    #[error("server must be {expected} for this operation, but is {actual}")]
    InvalidState { expected: ServerState, actual: ServerState },

    #[error("observer is already attached")]
    DuplicateObserver,

    /// Stopping released the listening sockets, so the same server cannot
    /// listen again; build a new one.
    #[error("a stopped server cannot be restarted, its sockets were released")]
    CannotRestart,

    #[error("server startup failed: {0}")]
    StartupFailed(AggregateError),

    #[error("server shutdown failed: {0}")]
    ShutdownFailed(AggregateError),
}

/// Observer failures collected from one lifecycle fan-out. Every error is
/// kept; none are dropped in favor of the first.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<BoxError>,
}

impl AggregateError {
    pub(crate) fn new(errors: Vec<BoxError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[BoxError] {
        &self.errors
    }
}

impl Display for AggregateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} observer error(s)", self.errors.len())?;
        for error in &self.errors {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
