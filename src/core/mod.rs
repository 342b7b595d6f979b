//! Matchmaking and session engine

pub mod block_list;
pub mod connection;
pub mod ip_extractor;
pub mod matchmaker;
pub mod message;
pub mod message_types;
pub mod moderation;
pub mod queue;
pub mod rate_limiter;
pub mod registry;
pub mod server;
pub mod session;
pub mod session_manager;
pub mod user;

// Re-export main components for convenience
pub use connection::{Connection, ConnectionState, TransportKind};
pub use message::{Message, Report};
pub use message_types::{ClientMessage, ServerMessage};
pub use registry::ConnectionRegistry;
pub use server::{ServerManager, SharedServerManager};
pub use session::Session;
pub use session_manager::SessionManager;
pub use user::User;
