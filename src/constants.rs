// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3030;
pub const WS_PATH: &str = "ws";
pub const POLL_PATH: &str = "poll";

// Session and queue timing
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_BLOCK_TTL_SECS: u64 = 30 * 24 * 60 * 60;
pub const DEFAULT_NO_MATCH_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REDIS_CONNECT_TIMEOUT_SECS: u64 = 5;

// Input limits
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 1000;
pub const DEFAULT_MAX_TAGS: usize = 20;
pub const MAX_TAG_LENGTH: usize = 50;
pub const MAX_USER_ID_LENGTH: usize = 128;
/// Envelopes carry SDP offers, which can run to several kilobytes
pub const MAX_ENVELOPE_SIZE: usize = 64 * 1024;

// Shared store keys
pub const WAIT_QUEUE_KEY: &str = "waiting_queue";
pub const REPORTS_KEY: &str = "reports";
pub const SESSION_KEY_PREFIX: &str = "session:";
pub const BLOCK_KEY_PREFIX: &str = "blocked:";

/// Sender id used for synthetic messages
pub const SYSTEM_SENDER: &str = "system";

pub fn session_key(session_id: &str) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, session_id)
}

pub fn block_key(blocker_id: &str, blocked_id: &str) -> String {
    format!("{}{}:{}", BLOCK_KEY_PREFIX, blocker_id, blocked_id)
}
