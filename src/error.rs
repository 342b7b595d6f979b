use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum StudyMateError {
    // Inbound payload errors
    MalformedInput(String),
    ValidationError(String),

    // Session and connection errors
    UnknownSession(String),
    InvalidState(String),
    AlreadyInSession(String),
    NotInSession,
    ConnectionNotFound(String),

    // Abuse prevention
    RateLimited {
        class: &'static str,
        retry_after_secs: u64,
    },

    // Storage errors
    BackendUnavailable(String),
    StorageError(String),
    SerializationError(String),

    // Configuration errors
    ConfigError(String),
}

impl StudyMateError {
    /// Stable machine-readable code sent to clients alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "MALFORMED_INPUT",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::UnknownSession(_) => "UNKNOWN_SESSION",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::AlreadyInSession(_) => "ALREADY_IN_SESSION",
            Self::NotInSession => "NOT_IN_SESSION",
            Self::ConnectionNotFound(_) => "UNKNOWN_CONNECTION",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            Self::StorageError(_) => "STORAGE_ERROR",
            Self::SerializationError(_) => "SERIALIZATION_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }
}

impl fmt::Display for StudyMateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedInput(msg) => write!(f, "Malformed input: {}", msg),
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Self::UnknownSession(id) => write!(f, "Session not found: {}", id),
            Self::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Self::AlreadyInSession(id) => write!(f, "Already in session {}", id),
            Self::NotInSession => write!(f, "Not in a session"),
            Self::ConnectionNotFound(id) => write!(f, "Connection not found: {}", id),
            Self::RateLimited {
                class,
                retry_after_secs,
            } => write!(
                f,
                "Too many {} requests, retry in {} seconds",
                class, retry_after_secs
            ),
            Self::BackendUnavailable(msg) => write!(f, "Storage backend unavailable: {}", msg),
            Self::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Self::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for StudyMateError {}

impl From<serde_json::Error> for StudyMateError {
    fn from(err: serde_json::Error) -> Self {
        StudyMateError::SerializationError(err.to_string())
    }
}

impl From<redis::RedisError> for StudyMateError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            StudyMateError::BackendUnavailable(err.to_string())
        } else {
            StudyMateError::StorageError(err.to_string())
        }
    }
}

impl From<regex::Error> for StudyMateError {
    fn from(err: regex::Error) -> Self {
        StudyMateError::ConfigError(format!("Invalid moderation pattern: {}", err))
    }
}

// Generic result type for StudyMate
pub type Result<T> = std::result::Result<T, StudyMateError>;
