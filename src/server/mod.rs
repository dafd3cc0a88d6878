mod admission;
mod endpoint;
mod error;
mod observer;
mod registry;
mod server;
mod timeout;

pub use endpoint::{BoundEndpoint, BoundSocket, Scheme};
pub use error::{AggregateError, ServerBuildError, ServerError};
pub use observer::{ObserverSet, ServerObserver};
pub use server::{HttpServer, HttpServerBuilder, ServerOptions, ServerState};
pub use timeout::TimeoutHandle;
