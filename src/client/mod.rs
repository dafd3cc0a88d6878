mod addr;
mod client;

pub use addr::{AcceptedConnection, AcceptedStream, ClientAddr};
pub use client::{Client, ClientContext, ClientFactory, ClientId, CloseCallback};
