//! StudyMate - anonymous study partner matchmaking
//!
//! Pairs users by shared interest tags, then relays chat and call
//! signaling between the two participants of each session. The engine is
//! transport-agnostic; WebSocket and long-polling front ends are provided.

pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod security_logger;
pub mod storage;

// Re-export main components
pub use config::*;
pub use constants::*;
pub use error::{Result, StudyMateError};
