//! Request handlers for different server endpoints

pub mod api;
pub mod polling;
pub mod routes;
pub mod websocket;

// Re-export the entry points used by the binary
pub use polling::{PollingTransport, SharedPollingTransport};
pub use routes::routes;
pub use websocket::handle_ws_client;
