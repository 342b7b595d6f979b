//! Durable networked backend on Redis
//!
//! The wait queue is a Redis list used as a stack (`RPUSH` / `RPOP`), so a
//! pop is a single atomic server-side operation even with several server
//! processes sharing the list.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use super::traits::SharedStore;
use crate::constants::{REPORTS_KEY, WAIT_QUEUE_KEY};
use crate::core::message::Report;
use crate::core::user::WaitEntry;
use crate::error::{Result, StudyMateError};

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect and probe the server, giving up after `timeout`
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let attempt = async {
            let client = redis::Client::open(url)?;
            let conn = ConnectionManager::new(client).await?;
            let store = Self { conn };
            store.health_check().await?;
            Ok::<_, StudyMateError>(store)
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result.map_err(|e| StudyMateError::BackendUnavailable(e.to_string())),
            Err(_) => Err(StudyMateError::BackendUnavailable(format!(
                "no response from {} within {:?}",
                redact(url),
                timeout
            ))),
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            // PX rejects zero
            cmd.arg("PX").arg((ttl.as_millis() as u64).max(1));
        }
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists::<_, bool>(key).await?)
    }

    async fn push_waiting(&self, entry: &WaitEntry) -> Result<()> {
        let raw = serde_json::to_string(entry)?;
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(WAIT_QUEUE_KEY, raw).await?;
        Ok(())
    }

    async fn pop_waiting(&self) -> Result<Option<WaitEntry>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.rpop(WAIT_QUEUE_KEY, None).await?;

        match raw {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(entry) => Ok(Some(entry)),
                Err(e) => {
                    log::error!("Dropping unreadable wait queue entry: {}", e);
                    Err(e.into())
                }
            },
            None => Ok(None),
        }
    }

    async fn remove_waiting(&self, user_id: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let raw_entries: Vec<String> = conn.lrange(WAIT_QUEUE_KEY, 0, -1).await?;

        let mut removed = 0;
        for raw in raw_entries {
            let belongs = serde_json::from_str::<WaitEntry>(&raw)
                .map(|entry| entry.user.id == user_id)
                .unwrap_or(false);
            if belongs {
                removed += conn.lrem::<_, _, usize>(WAIT_QUEUE_KEY, 1, raw).await?;
            }
        }
        Ok(removed)
    }

    async fn queue_length(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.llen::<_, usize>(WAIT_QUEUE_KEY).await?)
    }

    async fn append_report(&self, report: &Report) -> Result<()> {
        let raw = serde_json::to_string(report)?;
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(REPORTS_KEY, raw).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StudyMateError::BackendUnavailable(format!(
                "unexpected PING reply: {}",
                reply
            )))
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Hide credentials before a URL reaches the logs
pub(crate) fn redact(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}
