pub mod client;
pub mod driver;
pub mod handler;
pub mod server;

/// Boxed error type shared by the handler and observer contracts.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
