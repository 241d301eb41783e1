//! Self-imposed call budget per throttling window.
//!
//! Neither provider reports a "slow down" signal before it starts rejecting
//! requests, so every call goes through [`RateLimiter::acquire`]. When the
//! budget for the current window is used up the caller sleeps out the window
//! and the counter starts again from zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default throttling window.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(60);

/// Default ceiling when symbols are fetched one after another.
pub const SEQUENTIAL_RATE_CEILING: u32 = 50;

/// Default ceiling when symbols are fetched by a worker pool.
pub const CONCURRENT_RATE_CEILING: u32 = 500;

/// Blocking pause, swappable so tests don't sleep for real.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested pauses without blocking.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    pauses: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pauses(&self) -> Vec<Duration> {
        lock(&self.pauses).clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        lock(&self.pauses).push(duration);
    }
}

#[derive(Debug)]
struct Budget {
    count: u32,
    window_started: Instant,
}

/// Call counter with a ceiling per window.
pub struct RateLimiter {
    ceiling: u32,
    window: Duration,
    budget: Mutex<Budget>,
    sleeper: Arc<dyn Sleeper>,
    calls: AtomicU64,
    pauses: AtomicU64,
}

impl RateLimiter {
    pub fn new(ceiling: u32, window: Duration) -> Self {
        Self::with_sleeper(ceiling, window, Arc::new(ThreadSleeper))
    }

    pub fn with_sleeper(ceiling: u32, window: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            ceiling: ceiling.max(1),
            window,
            budget: Mutex::new(Budget {
                count: 0,
                window_started: Instant::now(),
            }),
            sleeper,
            calls: AtomicU64::new(0),
            pauses: AtomicU64::new(0),
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait for budget if the ceiling is already reached, then record one call.
    ///
    /// The whole check-pause-increment sequence runs under one lock, so
    /// concurrent workers queue behind a pausing worker instead of
    /// overshooting the ceiling. A batch that uses exactly the ceiling never
    /// pauses; the pause falls on the next call.
    pub fn acquire(&self) {
        let mut budget = lock(&self.budget);

        if budget.window_started.elapsed() >= self.window {
            budget.count = 0;
            budget.window_started = Instant::now();
        }

        if budget.count >= self.ceiling {
            tracing::info!(
                ceiling = self.ceiling,
                pause_secs = self.window.as_secs(),
                "API call budget reached, pausing"
            );
            self.pauses.fetch_add(1, Ordering::Relaxed);
            self.sleeper.sleep(self.window);
            budget.count = 0;
            budget.window_started = Instant::now();
        }

        budget.count += 1;
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// True when the next [`acquire`](Self::acquire) would pause.
    pub fn is_exhausted(&self) -> bool {
        let budget = lock(&self.budget);
        budget.count >= self.ceiling && budget.window_started.elapsed() < self.window
    }

    /// Start a fresh window with an empty counter.
    pub fn reset(&self) {
        let mut budget = lock(&self.budget);
        budget.count = 0;
        budget.window_started = Instant::now();
    }

    /// Calls recorded in the current window.
    pub fn current_count(&self) -> u32 {
        lock(&self.budget).count
    }

    /// Calls recorded since construction.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Pauses taken since construction.
    pub fn pauses(&self) -> u64 {
        self.pauses.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("ceiling", &self.ceiling)
            .field("window", &self.window)
            .field("calls", &self.calls())
            .field("pauses", &self.pauses())
            .finish()
    }
}

// A panic while holding the budget lock leaves the counter usable.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
