//! Rate Limiter - caps sends per rolling minute
//!
//! The scheduler asks for an allowance before it claims work, so it never
//! locks entries it is not allowed to send yet.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::debug;

/// Sliding one-minute window of send reservations
pub struct RateLimiter {
    per_minute: Option<u32>,
    window: Mutex<VecDeque<DateTime<Utc>>>,
}

impl RateLimiter {
    /// `None` disables limiting
    pub fn new(per_minute: Option<u32>) -> Self {
        Self {
            per_minute,
            window: Mutex::new(VecDeque::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    fn window_length() -> Duration {
        Duration::minutes(1)
    }

    fn evict(window: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        let cutoff = now - Self::window_length();
        while window.front().map(|at| *at <= cutoff).unwrap_or(false) {
            window.pop_front();
        }
    }

    /// Reserve up to `wanted` sends at `now`; returns how many were granted
    pub async fn acquire(&self, wanted: usize, now: DateTime<Utc>) -> usize {
        let Some(limit) = self.per_minute else {
            return wanted;
        };

        let mut window = self.window.lock().await;
        Self::evict(&mut window, now);

        let available = (limit as usize).saturating_sub(window.len());
        let granted = wanted.min(available);
        window.extend(std::iter::repeat(now).take(granted));

        if granted < wanted {
            debug!(wanted, granted, limit, "Send rate limit reached");
        }
        granted
    }

    /// Hand back reservations that were not used
    pub async fn release(&self, unused: usize) {
        if self.per_minute.is_none() || unused == 0 {
            return;
        }
        let mut window = self.window.lock().await;
        for _ in 0..unused {
            if window.pop_back().is_none() {
                break;
            }
        }
    }

    /// Sends still allowed in the current window
    pub async fn remaining(&self, now: DateTime<Utc>) -> RemainingQuota {
        let Some(limit) = self.per_minute else {
            return RemainingQuota { per_minute: None };
        };

        let mut window = self.window.lock().await;
        Self::evict(&mut window, now);
        RemainingQuota {
            per_minute: Some((limit as usize).saturating_sub(window.len())),
        }
    }
}

/// Remaining send quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingQuota {
    /// `None` when unlimited
    pub per_minute: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_unlimited() {
        let limiter = RateLimiter::unlimited();
        assert_eq!(limiter.acquire(500, t0()).await, 500);
        assert_eq!(limiter.remaining(t0()).await.per_minute, None);
    }

    #[tokio::test]
    async fn test_allowance_within_window() {
        let limiter = RateLimiter::new(Some(10));

        assert_eq!(limiter.acquire(6, t0()).await, 6);
        assert_eq!(limiter.acquire(6, t0() + Duration::seconds(20)).await, 4);
        assert_eq!(limiter.acquire(1, t0() + Duration::seconds(59)).await, 0);

        // First six age out at t0 + 60s
        assert_eq!(limiter.acquire(8, t0() + Duration::seconds(60)).await, 6);
    }

    #[tokio::test]
    async fn test_release_returns_unused() {
        let limiter = RateLimiter::new(Some(5));

        assert_eq!(limiter.acquire(5, t0()).await, 5);
        limiter.release(3).await;
        assert_eq!(limiter.remaining(t0()).await.per_minute, Some(3));
        assert_eq!(limiter.acquire(5, t0()).await, 3);
    }
}
