mod error_handler;
mod handler;

pub use error_handler::{DefaultErrorHandler, ErrorHandler};
pub use handler::Handler;
