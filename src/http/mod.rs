//! HTTP transport for the admission service.

mod server;
mod service;
mod wire;

pub use server::HttpServer;
pub use service::router;
pub use wire::{ErrorResponse, WaitRequest, WaitResponse, DEFAULT_WAIT};
