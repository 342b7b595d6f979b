//! Server configuration module
//! Handles dynamic configuration parameters for the matchmaking server

use crate::constants::{
    DEFAULT_BLOCK_TTL_SECS, DEFAULT_HOST, DEFAULT_MAX_MESSAGE_LENGTH, DEFAULT_MAX_TAGS,
    DEFAULT_NO_MATCH_TIMEOUT_SECS, DEFAULT_POLL_TIMEOUT_SECS, DEFAULT_PORT,
    DEFAULT_REDIS_CONNECT_TIMEOUT_SECS, DEFAULT_SESSION_TTL_SECS,
};
use crate::error::{Result, StudyMateError};
use std::env;
use std::net::IpAddr;
use std::time::Duration;

/// Server configuration parameters
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Durable backend location; `None` selects the process-local store
    pub redis_url: Option<String>,
    pub redis_connect_timeout: Duration,
    /// Session TTL, re-applied on every session write
    pub session_ttl: Duration,
    pub block_ttl: Duration,
    /// Delay before a queued user is told no partner was found
    pub no_match_timeout: Duration,
    pub max_message_length: usize,
    pub max_tags: usize,
    /// Idle polling connections are reaped after this long
    pub poll_timeout: Duration,
    pub trust_proxy_headers: bool,
    pub trusted_proxies: Vec<IpAddr>,
    pub allowed_origins: Vec<String>,
    /// Words added to the built-in profanity list
    pub blocked_words: Vec<String>,
}

impl ServerConfig {
    /// In-memory configuration with short timers, for tests and local runs
    pub fn for_testing() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            redis_url: None,
            redis_connect_timeout: Duration::from_secs(1),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            block_ttl: Duration::from_secs(DEFAULT_BLOCK_TTL_SECS),
            no_match_timeout: Duration::from_millis(200),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            max_tags: DEFAULT_MAX_TAGS,
            poll_timeout: Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
            trust_proxy_headers: false,
            trusted_proxies: Vec::new(),
            allowed_origins: Vec::new(),
            blocked_words: Vec::new(),
        }
    }

    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let host = env::var("STUDYMATE_HOST").unwrap_or(DEFAULT_HOST.to_string());
        let port = parse_var("STUDYMATE_PORT", DEFAULT_PORT);

        let redis_url = env::var("STUDYMATE_REDIS_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        if let Some(ref url) = redis_url {
            Self::validate_redis_url(url)?;
        }

        let redis_connect_timeout = Duration::from_secs(parse_var(
            "STUDYMATE_REDIS_CONNECT_TIMEOUT_SECS",
            DEFAULT_REDIS_CONNECT_TIMEOUT_SECS,
        ));
        let session_ttl = Duration::from_secs(parse_var(
            "STUDYMATE_SESSION_TTL_SECS",
            DEFAULT_SESSION_TTL_SECS,
        ));
        let block_ttl = Duration::from_secs(parse_var(
            "STUDYMATE_BLOCK_TTL_SECS",
            DEFAULT_BLOCK_TTL_SECS,
        ));
        let no_match_timeout = Duration::from_secs(parse_var(
            "STUDYMATE_NO_MATCH_TIMEOUT_SECS",
            DEFAULT_NO_MATCH_TIMEOUT_SECS,
        ));
        let poll_timeout = Duration::from_secs(parse_var(
            "STUDYMATE_POLL_TIMEOUT_SECS",
            DEFAULT_POLL_TIMEOUT_SECS,
        ));

        let max_message_length =
            parse_var("STUDYMATE_MAX_MESSAGE_LENGTH", DEFAULT_MAX_MESSAGE_LENGTH);
        let max_tags = parse_var("STUDYMATE_MAX_TAGS", DEFAULT_MAX_TAGS);

        let trust_proxy_headers = env::var("STUDYMATE_TRUST_PROXY_HEADERS")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        let trusted_proxies = split_list(&env::var("STUDYMATE_TRUSTED_PROXIES").unwrap_or_default())
            .into_iter()
            .map(|raw| {
                raw.parse::<IpAddr>().map_err(|_| {
                    StudyMateError::ConfigError(format!(
                        "STUDYMATE_TRUSTED_PROXIES contains an invalid IP address: {}",
                        raw
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let allowed_origins = split_list(&env::var("STUDYMATE_ALLOWED_ORIGINS").unwrap_or_default());
        let blocked_words = split_list(&env::var("STUDYMATE_BLOCKED_WORDS").unwrap_or_default());

        let config = Self {
            host,
            port,
            redis_url,
            redis_connect_timeout,
            session_ttl,
            block_ttl,
            no_match_timeout,
            max_message_length,
            max_tags,
            poll_timeout,
            trust_proxy_headers,
            trusted_proxies,
            allowed_origins,
            blocked_words,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject zero durations and limits that would make the server unusable
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("STUDYMATE_REDIS_CONNECT_TIMEOUT_SECS", self.redis_connect_timeout),
            ("STUDYMATE_SESSION_TTL_SECS", self.session_ttl),
            ("STUDYMATE_BLOCK_TTL_SECS", self.block_ttl),
            ("STUDYMATE_NO_MATCH_TIMEOUT_SECS", self.no_match_timeout),
            ("STUDYMATE_POLL_TIMEOUT_SECS", self.poll_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(StudyMateError::ConfigError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.max_message_length == 0 {
            return Err(StudyMateError::ConfigError(
                "STUDYMATE_MAX_MESSAGE_LENGTH must be greater than zero".to_string(),
            ));
        }
        if self.max_tags == 0 {
            return Err(StudyMateError::ConfigError(
                "STUDYMATE_MAX_TAGS must be greater than zero".to_string(),
            ));
        }

        for origin in &self.allowed_origins {
            Self::validate_origin(origin)?;
        }

        if self.trust_proxy_headers && self.trusted_proxies.is_empty() {
            log::warn!("Proxy headers are trusted but no trusted proxies are configured; headers will be ignored");
        }
        Ok(())
    }

    fn validate_redis_url(raw: &str) -> Result<()> {
        let parsed = url::Url::parse(raw).map_err(|e| {
            StudyMateError::ConfigError(format!("STUDYMATE_REDIS_URL is not a valid URL: {}", e))
        })?;

        match parsed.scheme() {
            "redis" | "rediss" => Ok(()),
            other => Err(StudyMateError::ConfigError(format!(
                "STUDYMATE_REDIS_URL must use the redis:// or rediss:// scheme, got {}://",
                other
            ))),
        }
    }

    /// CORS origins must be bare `scheme://host[:port]`
    fn validate_origin(raw: &str) -> Result<()> {
        let parsed = url::Url::parse(raw).map_err(|e| {
            StudyMateError::ConfigError(format!("Invalid origin {} in STUDYMATE_ALLOWED_ORIGINS: {}", raw, e))
        })?;

        let bare = matches!(parsed.scheme(), "http" | "https")
            && parsed.host_str().is_some()
            && parsed.path() == "/"
            && !raw.trim_end().ends_with('/');
        if bare {
            Ok(())
        } else {
            Err(StudyMateError::ConfigError(format!(
                "Origin {} in STUDYMATE_ALLOWED_ORIGINS must look like https://host[:port]",
                raw
            )))
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| item.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_testing_uses_local_store() {
        let config = ServerConfig::for_testing();
        assert!(config.redis_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redis_url_scheme_is_checked() {
        assert!(ServerConfig::validate_redis_url("redis://127.0.0.1:6379").is_ok());
        assert!(ServerConfig::validate_redis_url("rediss://cache.internal:6380/1").is_ok());
        assert!(ServerConfig::validate_redis_url("http://127.0.0.1:6379").is_err());
        assert!(ServerConfig::validate_redis_url("not a url").is_err());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = ServerConfig::for_testing();
        config.session_ttl = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("STUDYMATE_SESSION_TTL_SECS"));
    }

    #[test]
    fn test_origins_are_checked() {
        assert!(ServerConfig::validate_origin("https://study.example.com").is_ok());
        assert!(ServerConfig::validate_origin("http://localhost:5173").is_ok());
        assert!(ServerConfig::validate_origin("https://study.example.com/app").is_err());
        assert!(ServerConfig::validate_origin("localhost").is_err());
    }

    #[test]
    fn test_split_list_drops_blanks() {
        assert_eq!(
            split_list(" a, ,b ,, c"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(split_list("").is_empty());
    }
}
