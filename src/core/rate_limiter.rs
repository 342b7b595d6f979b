//! Rate limiting module to prevent abuse
//!
//! Per-address sliding windows, one independent window per route class.
//! A rejected request is not recorded, so hammering a closed window does
//! not extend it.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::{Result, StudyMateError};

/// Route classes with independent limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Any request/response API call
    General,
    /// Asking to be paired
    MatchInitiation,
    /// Filing an abuse report
    Report,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::General => "api",
            RouteClass::MatchInitiation => "match",
            RouteClass::Report => "report",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub max_requests: usize,
    pub window: Duration,
}

impl RateLimitPolicy {
    /// 100 requests per 15 minutes
    pub fn general() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(15 * 60),
        }
    }

    /// 10 requests per 5 minutes
    pub fn match_initiation() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(5 * 60),
        }
    }

    /// 5 requests per hour
    pub fn report() -> Self {
        Self {
            max_requests: 5,
            window: Duration::from_secs(60 * 60),
        }
    }
}

/// Sliding window of request times per address, with memory protection
struct SlidingWindow {
    policy: RateLimitPolicy,
    hits: RwLock<HashMap<IpAddr, Vec<Instant>>>,
    /// Maximum number of addresses to track to prevent memory exhaustion
    max_tracked: usize,
}

impl SlidingWindow {
    fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            hits: RwLock::new(HashMap::new()),
            max_tracked: 10000,
        }
    }

    /// Record a hit if under the limit; otherwise report how long until
    /// the oldest hit leaves the window
    async fn try_acquire(&self, ip: IpAddr) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        let mut hits = self.hits.write().await;

        if hits.len() >= self.max_tracked && !hits.contains_key(&ip) {
            // Evict the address that has been quiet longest
            let oldest = hits
                .iter()
                .min_by_key(|(_, times)| times.last().copied().unwrap_or(now))
                .map(|(addr, _)| *addr);
            if let Some(oldest) = oldest {
                hits.remove(&oldest);
                log::debug!("Evicted {} from rate limiter to bound memory", oldest);
            }
        }

        let times = hits.entry(ip).or_default();
        times.retain(|&time| now.duration_since(time) < self.policy.window);

        if times.len() < self.policy.max_requests {
            times.push(now);
            Ok(())
        } else {
            let oldest = times.first().copied().unwrap_or(now);
            Err(self.policy.window.saturating_sub(now.duration_since(oldest)))
        }
    }

    async fn count(&self, ip: IpAddr) -> usize {
        let now = Instant::now();
        self.hits.read().await.get(&ip).map_or(0, |times| {
            times
                .iter()
                .filter(|&&time| now.duration_since(time) < self.policy.window)
                .count()
        })
    }

    async fn cleanup(&self) {
        let now = Instant::now();
        let mut hits = self.hits.write().await;
        hits.retain(|_, times| {
            times.retain(|&time| now.duration_since(time) < self.policy.window);
            !times.is_empty()
        });
    }
}

/// Combined rate limiter for all route classes
pub struct RateLimiter {
    general: SlidingWindow,
    matching: SlidingWindow,
    reports: SlidingWindow,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_policies(
            RateLimitPolicy::general(),
            RateLimitPolicy::match_initiation(),
            RateLimitPolicy::report(),
        )
    }

    pub fn with_policies(
        general: RateLimitPolicy,
        matching: RateLimitPolicy,
        reports: RateLimitPolicy,
    ) -> Self {
        Self {
            general: SlidingWindow::new(general),
            matching: SlidingWindow::new(matching),
            reports: SlidingWindow::new(reports),
        }
    }

    fn window(&self, class: RouteClass) -> &SlidingWindow {
        match class {
            RouteClass::General => &self.general,
            RouteClass::MatchInitiation => &self.matching,
            RouteClass::Report => &self.reports,
        }
    }

    /// Admit or reject one request of `class` from `ip`
    pub async fn check(&self, class: RouteClass, ip: IpAddr) -> Result<()> {
        self.window(class).try_acquire(ip).await.map_err(|wait| {
            StudyMateError::RateLimited {
                class: class.as_str(),
                retry_after_secs: wait.as_secs().max(1),
            }
        })
    }

    /// Requests from `ip` currently inside the window
    pub async fn recent_requests(&self, class: RouteClass, ip: IpAddr) -> usize {
        self.window(class).count(ip).await
    }

    /// Clean up old entries to prevent memory leaks
    pub async fn cleanup_old_entries(&self) {
        self.general.cleanup().await;
        self.matching.cleanup().await;
        self.reports.cleanup().await;
    }

    /// Start cleanup task for rate limiters
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300)); // Cleanup every 5 minutes
            loop {
                interval.tick().await;
                self.cleanup_old_entries().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, last))
    }

    #[tokio::test]
    async fn test_eleventh_match_request_rejected() {
        let limiter = RateLimiter::new();
        for _ in 0..10 {
            assert!(limiter.check(RouteClass::MatchInitiation, ip(1)).await.is_ok());
        }

        match limiter.check(RouteClass::MatchInitiation, ip(1)).await {
            Err(StudyMateError::RateLimited { class, retry_after_secs }) => {
                assert_eq!(class, "match");
                assert!(retry_after_secs > 0);
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_classes_and_addresses_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.check(RouteClass::Report, ip(1)).await.unwrap();
        }
        assert!(limiter.check(RouteClass::Report, ip(1)).await.is_err());
        assert!(limiter.check(RouteClass::Report, ip(2)).await.is_ok());
        assert!(limiter.check(RouteClass::General, ip(1)).await.is_ok());
        assert!(limiter.check(RouteClass::MatchInitiation, ip(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejections_are_not_recorded() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            limiter.check(RouteClass::Report, ip(3)).await.unwrap();
        }
        for _ in 0..3 {
            assert!(limiter.check(RouteClass::Report, ip(3)).await.is_err());
        }
        assert_eq!(limiter.recent_requests(RouteClass::Report, ip(3)).await, 5);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let short = RateLimitPolicy {
            max_requests: 2,
            window: Duration::from_millis(50),
        };
        let limiter = RateLimiter::with_policies(short, short, short);

        limiter.check(RouteClass::General, ip(4)).await.unwrap();
        limiter.check(RouteClass::General, ip(4)).await.unwrap();
        assert!(limiter.check(RouteClass::General, ip(4)).await.is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check(RouteClass::General, ip(4)).await.is_ok());

        limiter.cleanup_old_entries().await;
        assert_eq!(limiter.recent_requests(RouteClass::General, ip(4)).await, 1);
    }
}
