//! Per-client fixed-window rate limiting.
//!
//! Each client address gets a counter and a window reset time. Both are
//! updated under a single lock so concurrent requests cannot interleave a
//! read-modify-write. Expired entries are removed by a background sweeper.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counter state for one client address.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_at: Instant,
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    #[cfg(test)]
    pub(crate) fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

/// Shared fixed-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

struct RateLimiterInner {
    max_requests: u32,
    window: Duration,
    entries: Mutex<HashMap<IpAddr, RateLimitEntry>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window`. Zero disables it.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            inner: Arc::new(RateLimiterInner {
                max_requests,
                window,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.max_requests > 0
    }

    /// Record a request from `ip` now.
    pub async fn check(&self, ip: IpAddr) -> RateLimitDecision {
        self.check_at(ip, Instant::now()).await
    }

    /// Record a request from `ip` at `now`.
    pub async fn check_at(&self, ip: IpAddr, now: Instant) -> RateLimitDecision {
        let max = self.inner.max_requests;
        if max == 0 {
            return RateLimitDecision::Allowed { remaining: u32::MAX };
        }

        let mut entries = self.inner.entries.lock().await;
        let entry = entries.entry(ip).or_insert(RateLimitEntry {
            count: 0,
            reset_at: now + self.inner.window,
        });

        if now >= entry.reset_at {
            entry.count = 1;
            entry.reset_at = now + self.inner.window;
        } else {
            entry.count = entry.count.saturating_add(1);
        }

        if entry.count > max {
            RateLimitDecision::Limited {
                retry_after: entry.reset_at.saturating_duration_since(now),
            }
        } else {
            RateLimitDecision::Allowed {
                remaining: max - entry.count,
            }
        }
    }

    /// Remove entries whose window has expired. Returns the number removed.
    pub async fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.inner.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.reset_at > now);
        before - entries.len()
    }

    /// Number of tracked client addresses.
    #[cfg(test)]
    pub(crate) async fn tracked(&self) -> usize {
        self.inner.entries.lock().await.len()
    }

    /// Start the background sweeper.
    ///
    /// The returned handle must be shut down to stop the task.
    pub fn spawn_sweeper(&self, interval: Duration) -> SweeperHandle {
        let limiter = self.clone();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = limiter.sweep_at(Instant::now()).await;
                        if removed > 0 {
                            debug!(removed_entries = removed, "rate_limit_sweep_completed");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("rate_limit_sweeper_stopped");
        });

        info!(interval_secs = interval.as_secs(), "rate_limit_sweeper_started");

        SweeperHandle { stop_tx, task }
    }
}

/// Lifecycle handle for the background sweeper task.
pub struct SweeperHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "rate_limit_sweeper_join_failed");
        }
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
    async fn test_31st_request_is_limited() {
        let limiter = RateLimiter::new(30, Duration::from_secs(60));
        let start = Instant::now();

        for i in 0..30 {
            let decision = limiter.check_at(ip(1), start + Duration::from_millis(i)).await;
            assert!(decision.is_allowed(), "request {} should pass", i + 1);
        }

        let decision = limiter.check_at(ip(1), start + Duration::from_secs(1)).await;
        assert_eq!(
            decision,
            RateLimitDecision::Limited {
                retry_after: Duration::from_secs(59)
            }
        );
    }

    #[tokio::test]
    async fn test_window_elapsed_resets_count() {
        let limiter = RateLimiter::new(30, Duration::from_secs(60));
        let start = Instant::now();

        for _ in 0..31 {
            limiter.check_at(ip(1), start).await;
        }
        assert!(!limiter.check_at(ip(1), start).await.is_allowed());

        let later = start + Duration::from_secs(61);
        assert_eq!(
            limiter.check_at(ip(1), later).await,
            RateLimitDecision::Allowed { remaining: 29 }
        );
    }

    #[tokio::test]
    async fn test_clients_are_counted_separately() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.check_at(ip(1), now).await.is_allowed());
        assert!(!limiter.check_at(ip(1), now).await.is_allowed());
        assert!(limiter.check_at(ip(2), now).await.is_allowed());
    }

    #[tokio::test]
    async fn test_disabled_limiter_allows_everything() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        assert!(!limiter.is_enabled());
        for _ in 0..100 {
            assert!(limiter.check(ip(1)).await.is_allowed());
        }
        assert_eq!(limiter.tracked().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_entries() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();

        limiter.check_at(ip(1), start).await;
        limiter.check_at(ip(2), start + Duration::from_secs(30)).await;
        assert_eq!(limiter.tracked().await, 2);

        assert_eq!(limiter.sweep_at(start + Duration::from_secs(59)).await, 0);
        assert_eq!(limiter.sweep_at(start + Duration::from_secs(60)).await, 1);
        assert_eq!(limiter.tracked().await, 1);
        assert_eq!(limiter.sweep_at(start + Duration::from_secs(90)).await, 1);
        assert_eq!(limiter.tracked().await, 0);
    }

    #[tokio::test]
    async fn test_sweeper_task_runs_and_stops() {
        let limiter = RateLimiter::new(5, Duration::from_millis(10));
        limiter.check(ip(1)).await;
        assert_eq!(limiter.tracked().await, 1);

        let handle = limiter.spawn_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(limiter.tracked().await, 0);

        handle.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_admit_exactly_max() {
        let limiter = RateLimiter::new(30, Duration::from_secs(60));

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check(ip(9)).await })
            })
            .collect();

        let mut allowed = 0;
        for task in tasks {
            if task.await.unwrap().is_allowed() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 30);
        assert_eq!(limiter.tracked().await, 1);
    }
}
