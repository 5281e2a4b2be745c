//! Application state and rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use vnf_ledger_engine::LifecycleEngine;
use vnf_ledger_storage::MemoryStorage;

use super::RATE_LIMIT_WINDOW_SECS;

/// Request counts per client, each with the start of its own window.
#[derive(Default)]
struct Windows {
    clients: HashMap<IpAddr, (u64, Instant)>,
    last_sweep: Option<Instant>,
}

impl Windows {
    /// Forget clients whose window has lapsed, at most once per window.
    fn sweep(&mut self, now: Instant, window: Duration) {
        if self
            .last_sweep
            .is_some_and(|at| now.duration_since(at) < window)
        {
            return;
        }
        self.clients
            .retain(|_, (_, start)| now.duration_since(*start) < window);
        self.last_sweep = Some(now);
    }
}

/// Fixed-window request limiter keyed by client address.
pub(crate) struct RateLimiter {
    windows: Mutex<Windows>,
    max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u64) -> Self {
        Self {
            windows: Mutex::new(Windows::default()),
            max_requests,
            window: Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
        }
    }

    /// Ok(()) if allowed, Err(retry_after_secs) if rate limited.
    pub(crate) async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        self.check_at(ip, Instant::now()).await
    }

    async fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), u64> {
        let mut windows = self.windows.lock().await;
        windows.sweep(now, self.window);

        let (count, start) = windows.clients.entry(ip).or_insert((0, now));
        if now.duration_since(*start) >= self.window {
            *count = 0;
            *start = now;
        }
        *count += 1;
        if *count <= self.max_requests {
            return Ok(());
        }
        let remaining = self.window.saturating_sub(now.duration_since(*start));
        Err(remaining.as_secs().max(1))
    }

    #[cfg(test)]
    async fn tracked_clients(&self) -> usize {
        self.windows.lock().await.clients.len()
    }
}

/// Application state shared across request handlers.
pub(crate) struct AppState {
    /// Ledger operations take the read guard; only backend rotation writes.
    pub(crate) engine: RwLock<LifecycleEngine<MemoryStorage>>,
    pub(crate) rate_limiter: RateLimiter,
    /// Optional API key for authentication. None = no auth required.
    pub(crate) api_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn client(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    #[tokio::test]
    async fn limiter_counts_per_ip() {
        let limiter = RateLimiter::new(2);

        assert!(limiter.check(client(1)).await.is_ok());
        assert!(limiter.check(client(1)).await.is_ok());
        let retry_after = limiter.check(client(1)).await.unwrap_err();
        assert!((1..=RATE_LIMIT_WINDOW_SECS).contains(&retry_after));

        assert!(limiter.check(client(2)).await.is_ok());
    }

    #[tokio::test]
    async fn window_reset_allows_again() {
        let limiter = RateLimiter::new(1);
        let t0 = Instant::now();
        assert!(limiter.check_at(client(1), t0).await.is_ok());
        assert!(limiter.check_at(client(1), t0).await.is_err());

        let later = t0 + limiter.window;
        assert!(limiter.check_at(client(1), later).await.is_ok());
    }

    #[tokio::test]
    async fn lapsed_clients_are_forgotten() {
        let limiter = RateLimiter::new(10);
        let t0 = Instant::now();
        for n in 1..=50 {
            limiter.check_at(client(n), t0).await.unwrap();
        }
        assert_eq!(limiter.tracked_clients().await, 50);

        // Still inside the first window: nothing is dropped.
        let mid = t0 + limiter.window / 2;
        limiter.check_at(client(200), mid).await.unwrap();
        assert_eq!(limiter.tracked_clients().await, 51);

        let after = t0 + limiter.window + Duration::from_secs(1);
        limiter.check_at(client(201), after).await.unwrap();
        // Only the client seen mid-window and the new one remain.
        assert_eq!(limiter.tracked_clients().await, 2);
    }
}
