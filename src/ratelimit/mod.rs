//! Per-source admission control
//!
//! Each source gets three gates:
//! - a pacing gate: one `governor` limiter spacing admissions evenly at the
//!   effective rate, with a burst of one,
//! - a window gate: per-second, per-minute and per-hour counters; a full
//!   window holds admissions until it rolls over,
//! - a concurrency gate sized from the effective requests/second.
//!
//! The hourly window doubles as the reporting window of [`RateLimiter::status`].
//! Admission is first-come-first-served per source: callers queue on a fair
//! ticket lock and every wait happens while holding it.

use crate::error::SourceError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// Length of the reporting window
pub const REPORTING_WINDOW: Duration = Duration::from_secs(3600);

/// Request ceilings for one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitBudget {
    pub requests_per_second: u32,
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

impl Default for RateLimitBudget {
    fn default() -> Self {
        Self::new(5, 120, 3600)
    }
}

impl RateLimitBudget {
    /// Create a budget; every ceiling is clamped to at least one request
    pub fn new(per_second: u32, per_minute: u32, per_hour: u32) -> Self {
        Self {
            requests_per_second: per_second.max(1),
            requests_per_minute: per_minute.max(1),
            requests_per_hour: per_hour.max(1),
        }
    }

    /// Effective admission rate in requests per second
    pub fn effective_rate(&self) -> f64 {
        let per_second = self.requests_per_second.max(1) as f64;
        let per_minute = self.requests_per_minute.max(1) as f64 / 60.0;
        let per_hour = self.requests_per_hour.max(1) as f64 / 3600.0;
        per_second.min(per_minute).min(per_hour)
    }

    /// Maximum simultaneous in-flight admissions
    pub fn concurrency(&self) -> usize {
        (self.effective_rate().floor() as usize).max(1)
    }

    /// Minimum spacing between two admissions
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.effective_rate())
    }
}

/// Admissions counted in one fixed window
#[derive(Debug, Clone)]
struct RateLimitCounter {
    ceiling: u32,
    length: chrono::Duration,
    count: u32,
    window_reset_at: DateTime<Utc>,
}

impl RateLimitCounter {
    fn new(ceiling: u32, length: Duration, now: DateTime<Utc>) -> Self {
        let length = chrono::Duration::from_std(length).unwrap_or(chrono::Duration::hours(1));
        Self {
            ceiling: ceiling.max(1),
            length,
            count: 0,
            window_reset_at: now + length,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        if now >= self.window_reset_at {
            self.count = 0;
            self.window_reset_at = now + self.length;
        }
    }

    fn is_full(&self) -> bool {
        self.count >= self.ceiling
    }
}

/// The per-second, per-minute and per-hour windows of one source
#[derive(Debug, Clone)]
struct Windows {
    second: RateLimitCounter,
    minute: RateLimitCounter,
    hour: RateLimitCounter,
}

impl Windows {
    fn new(budget: &RateLimitBudget, now: DateTime<Utc>) -> Self {
        Self {
            second: RateLimitCounter::new(budget.requests_per_second, Duration::from_secs(1), now),
            minute: RateLimitCounter::new(budget.requests_per_minute, Duration::from_secs(60), now),
            hour: RateLimitCounter::new(budget.requests_per_hour, REPORTING_WINDOW, now),
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        self.second.roll(now);
        self.minute.roll(now);
        self.hour.roll(now);
    }

    /// Count one admission, or report how long until a full window rolls over
    fn reserve(&mut self, now: DateTime<Utc>) -> Result<(), Duration> {
        self.roll(now);
        let wait = [&self.second, &self.minute, &self.hour]
            .into_iter()
            .filter(|w| w.is_full())
            .map(|w| (w.window_reset_at - now).to_std().unwrap_or(Duration::ZERO))
            .max();

        match wait {
            Some(wait) => Err(wait),
            None => {
                self.second.count += 1;
                self.minute.count += 1;
                self.hour.count += 1;
                Ok(())
            }
        }
    }
}

fn pacing(budget: &RateLimitBudget) -> DefaultDirectRateLimiter {
    let quota = Quota::with_period(budget.period())
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(NonZeroU32::MIN);
    DefaultDirectRateLimiter::direct(quota)
}

/// State for a single source
struct SourceLimiter {
    budget: RateLimitBudget,
    ticket: tokio::sync::Mutex<()>,
    pacing: Mutex<Arc<DefaultDirectRateLimiter>>,
    in_flight: Arc<Semaphore>,
    windows: Mutex<Windows>,
}

impl SourceLimiter {
    fn new(budget: RateLimitBudget) -> Self {
        let concurrency = budget.concurrency();
        Self {
            pacing: Mutex::new(Arc::new(pacing(&budget))),
            in_flight: Arc::new(Semaphore::new(concurrency)),
            windows: Mutex::new(Windows::new(&budget, Utc::now())),
            ticket: tokio::sync::Mutex::new(()),
            budget,
        }
    }

    /// Wait for the pacing gate, then for room in every window
    async fn admit(&self, source: &str) -> DateTime<Utc> {
        let pacing = self.pacing.lock().clone();
        pacing.until_ready().await;

        loop {
            let now = Utc::now();
            let reserved = self.windows.lock().reserve(now);
            match reserved {
                Ok(()) => return now,
                Err(wait) => {
                    debug!("{} window full, waiting {:?}", source, wait);
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }
}

/// Permission to issue one call to a source.
///
/// Holds one concurrency slot until dropped.
#[derive(Debug)]
pub struct Admission {
    source: String,
    admitted_at: DateTime<Utc>,
    _permit: OwnedSemaphorePermit,
}

impl Admission {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn admitted_at(&self) -> DateTime<Utc> {
        self.admitted_at
    }
}

/// Snapshot of a source's limiter state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    /// Admissions left in the current reporting window
    pub remaining: u32,
    /// Ceiling for the reporting window
    pub limit: u32,
    /// When the reporting window rolls over
    pub reset_at: DateTime<Utc>,
    /// Admissions currently holding a concurrency slot
    pub in_flight: usize,
    /// Concurrency cap
    pub concurrency: usize,
}

/// Admission control for every source in the process
pub struct RateLimiter {
    default_budget: RateLimitBudget,
    budgets: DashMap<String, RateLimitBudget>,
    sources: DashMap<String, Arc<SourceLimiter>>,
}

impl RateLimiter {
    /// Create a limiter; unknown sources get `default_budget`
    pub fn new(default_budget: RateLimitBudget) -> Self {
        Self {
            default_budget,
            budgets: DashMap::new(),
            sources: DashMap::new(),
        }
    }

    /// Register a source's budget (startup time)
    pub fn set_budget(&self, source: &str, budget: RateLimitBudget) {
        info!(
            "Rate budget for {}: {}/s, {}/min, {}/h (concurrency {})",
            source,
            budget.requests_per_second,
            budget.requests_per_minute,
            budget.requests_per_hour,
            budget.concurrency()
        );
        self.budgets.insert(source.to_string(), budget.clone());
        self.sources
            .insert(source.to_string(), Arc::new(SourceLimiter::new(budget)));
    }

    /// Budget in force for a source
    pub fn budget(&self, source: &str) -> RateLimitBudget {
        self.budgets
            .get(source)
            .map(|b| b.clone())
            .unwrap_or_else(|| self.default_budget.clone())
    }

    fn limiter(&self, source: &str) -> Arc<SourceLimiter> {
        if let Some(limiter) = self.sources.get(source) {
            return limiter.clone();
        }
        let budget = self.budget(source);
        self.sources
            .entry(source.to_string())
            .or_insert_with(|| {
                debug!("Lazily initialising rate limiter for {}", source);
                Arc::new(SourceLimiter::new(budget))
            })
            .clone()
    }

    /// Wait until the source admits one more call.
    ///
    /// Fails only after [`RateLimiter::shutdown`].
    pub async fn acquire(&self, source: &str) -> Result<Admission, SourceError> {
        let limiter = self.limiter(source);

        let _ticket = limiter.ticket.lock().await;
        let now = limiter.admit(source).await;

        let permit = limiter
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| {
                SourceError::NetworkOrTimeout(format!("{} limiter is shut down", source))
            })?;

        debug!("Admitted call to {}", source);
        Ok(Admission {
            source: source.to_string(),
            admitted_at: now,
            _permit: permit,
        })
    }

    /// Consume budget for an auxiliary call without taking a concurrency slot.
    ///
    /// Used for logins on providers that count them against the data quota.
    /// Does not queue behind data admissions, so it cannot deadlock with a
    /// caller that already holds an [`Admission`].
    pub async fn charge(&self, source: &str) {
        let limiter = self.limiter(source);
        limiter.admit(source).await;
    }

    /// Read the current counters without consuming budget
    pub fn status(&self, source: &str) -> RateLimitStatus {
        let limiter = self.limiter(source);
        let limit = limiter.budget.requests_per_hour;
        let concurrency = limiter.budget.concurrency();

        let mut windows = limiter.windows.lock();
        windows.roll(Utc::now());

        RateLimitStatus {
            remaining: limit.saturating_sub(windows.hour.count),
            limit,
            reset_at: windows.hour.window_reset_at,
            in_flight: concurrency.saturating_sub(limiter.in_flight.available_permits()),
            concurrency,
        }
    }

    /// Forcibly reopen a source's window
    pub fn reset(&self, source: &str) {
        let limiter = self.limiter(source);
        *limiter.windows.lock() = Windows::new(&limiter.budget, Utc::now());
        *limiter.pacing.lock() = Arc::new(pacing(&limiter.budget));
        info!("Rate limiter reset for {}", source);
    }

    /// Refuse every further admission
    pub fn shutdown(&self) {
        for entry in self.sources.iter() {
            entry.value().in_flight.close();
        }
    }

    /// Names of sources with limiter state
    pub fn sources(&self) -> Vec<String> {
        self.sources.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitBudget::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::time::timeout;

    fn fast_budget(per_second: u32) -> RateLimitBudget {
        RateLimitBudget::new(per_second, 100_000, 1_000_000)
    }

    #[test]
    fn test_effective_rate_is_minimum() {
        let budget = RateLimitBudget::new(10, 60, 36_000);
        assert_eq!(budget.effective_rate(), 1.0);
        assert_eq!(budget.concurrency(), 1);

        let budget = RateLimitBudget::new(4, 6000, 360_000);
        assert_eq!(budget.effective_rate(), 4.0);
        assert_eq!(budget.concurrency(), 4);
    }

    #[test]
    fn test_budget_never_zero() {
        let budget = RateLimitBudget::new(0, 0, 0);
        assert_eq!(budget.requests_per_second, 1);
        assert!(budget.effective_rate() > 0.0);
        assert_eq!(budget.concurrency(), 1);
    }

    #[tokio::test]
    async fn test_admission_is_throttled() {
        let limiter = RateLimiter::new(fast_budget(10));
        let start = Instant::now();

        for _ in 0..25 {
            let admission = limiter.acquire("a").await.unwrap();
            drop(admission);
        }

        // evenly spaced at 100ms
        assert!(start.elapsed() >= Duration::from_millis(2300));
    }

    #[tokio::test]
    async fn test_one_second_window_never_exceeds_budget() {
        let limiter = RateLimiter::new(fast_budget(10));
        let start = Instant::now();
        let mut admitted = 0;

        while start.elapsed() < Duration::from_secs(1) {
            let _admission = limiter.acquire("a").await.unwrap();
            if start.elapsed() < Duration::from_secs(1) {
                admitted += 1;
            }
        }

        assert!(admitted <= 10, "admitted {} in one second", admitted);
        assert!(admitted >= 5);
    }

    #[tokio::test]
    async fn test_minute_budget_holds_admissions() {
        let limiter = RateLimiter::new(RateLimitBudget::new(100, 3, 1_000_000));
        let _first = limiter.acquire("a").await.unwrap();

        let second = timeout(Duration::from_secs(1), limiter.acquire("a")).await;
        assert!(second.is_err());
        assert_eq!(limiter.status("a").remaining, 1_000_000 - 1);
    }

    #[test]
    fn test_windows_refuse_past_ceiling() {
        let now = Utc::now();
        let mut windows = Windows::new(&RateLimitBudget::new(100, 3, 1_000_000), now);

        for _ in 0..3 {
            assert!(windows.reserve(now).is_ok());
        }
        let wait = windows.reserve(now).unwrap_err();
        assert!(wait <= Duration::from_secs(60));
        assert!(wait > Duration::from_secs(59));
        assert_eq!(windows.minute.count, 3);

        let later = now + chrono::Duration::seconds(60);
        assert!(windows.reserve(later).is_ok());
        assert_eq!(windows.minute.count, 1);
        assert_eq!(windows.hour.count, 4);
    }

    #[test]
    fn test_hourly_window_matches_status() {
        let now = Utc::now();
        let mut windows = Windows::new(&RateLimitBudget::new(100, 10_000, 2), now);
        assert!(windows.reserve(now).is_ok());
        assert!(windows.reserve(now + chrono::Duration::seconds(2)).is_ok());
        assert!(windows.reserve(now + chrono::Duration::seconds(4)).is_err());
        assert!(windows.reserve(now + chrono::Duration::seconds(3600)).is_ok());
    }

    #[tokio::test]
    async fn test_status_does_not_consume() {
        let limiter = RateLimiter::new(fast_budget(10));
        let before = limiter.status("a");
        for _ in 0..50 {
            limiter.status("a");
        }
        assert_eq!(limiter.status("a").remaining, before.remaining);

        let _admission = limiter.acquire("a").await.unwrap();
        let after = limiter.status("a");
        assert_eq!(after.remaining, before.remaining - 1);
        assert_eq!(after.in_flight, 1);
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let limiter = RateLimiter::new(fast_budget(2));
        let first = limiter.acquire("a").await.unwrap();
        let _second = limiter.acquire("a").await.unwrap();

        let blocked = timeout(Duration::from_millis(900), limiter.acquire("a")).await;
        assert!(blocked.is_err());

        drop(first);
        let third = timeout(Duration::from_secs(2), limiter.acquire("a")).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_fifo_admission() {
        let limiter = Arc::new(RateLimiter::new(fast_budget(2)));
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();

        for i in 0..6 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _admission = limiter.acquire("a").await.unwrap();
                order.lock().push(i);
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_sources_are_independent() {
        let limiter = RateLimiter::new(fast_budget(1));
        let _a = limiter.acquire("a").await.unwrap();

        let b = timeout(Duration::from_millis(200), limiter.acquire("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_reset_reopens_window() {
        let limiter = RateLimiter::new(fast_budget(10));
        for _ in 0..3 {
            limiter.acquire("a").await.unwrap();
        }
        assert_eq!(limiter.status("a").remaining, 1_000_000 - 3);

        limiter.reset("a");
        assert_eq!(limiter.status("a").remaining, 1_000_000);
    }

    #[tokio::test]
    async fn test_configured_budget_and_lazy_default() {
        let limiter = RateLimiter::new(fast_budget(3));
        limiter.set_budget("insee", RateLimitBudget::new(2, 30, 1800));

        assert_eq!(limiter.status("insee").limit, 1800);
        assert_eq!(limiter.status("unknown").limit, 1_000_000);
        assert!(limiter.sources().contains(&"unknown".to_string()));
    }

    #[tokio::test]
    async fn test_charge_counts_without_slot() {
        let limiter = RateLimiter::new(fast_budget(1));
        let _held = limiter.acquire("a").await.unwrap();

        let charged = timeout(Duration::from_secs(3), limiter.charge("a")).await;
        assert!(charged.is_ok());
        assert_eq!(limiter.status("a").remaining, 1_000_000 - 2);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_admission() {
        let limiter = RateLimiter::new(fast_budget(10));
        limiter.status("a");
        limiter.shutdown();
        assert!(limiter.acquire("a").await.is_err());
    }
}
