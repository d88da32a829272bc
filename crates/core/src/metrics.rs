use std::sync::atomic::{AtomicU64, Ordering};

/// Relaxed monotonic counter.
///
/// # Example
/// ```rust
/// use mediaflow_core::metrics::Counter;
///
/// let counter = Counter::default();
/// counter.incr();
/// counter.add(2);
/// assert_eq!(counter.get(), 3);
/// ```
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Buffer pool hit/miss counters.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub(crate) hits: Counter,
    pub(crate) misses: Counter,
    pub(crate) allocations: Counter,
}

impl PoolMetrics {
    pub fn hits(&self) -> u64 {
        self.hits.get()
    }

    pub fn misses(&self) -> u64 {
        self.misses.get()
    }

    pub fn allocations(&self) -> u64 {
        self.allocations.get()
    }
}

/// Per-session job and delivery counters, shared between the caller and the worker.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// Jobs accepted by `submit`/`flush`.
    pub submitted: Counter,
    /// Jobs the worker finished processing.
    pub completed: Counter,
    /// Jobs dropped from the queue by reset or close.
    pub discarded: Counter,
    /// Results handed to the caller's callbacks.
    pub delivered: Counter,
    /// Errors raised by jobs.
    pub errors: Counter,
    /// Times the worker waited for the caller to drain results.
    pub backpressure: Counter,
}

impl SessionMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.get(),
            completed: self.completed.get(),
            discarded: self.discarded.get(),
            delivered: self.delivered.get(),
            errors: self.errors.get(),
            backpressure: self.backpressure.get(),
        }
    }
}

/// Point-in-time copy of [`SessionMetrics`].
///
/// # Example
/// ```rust
/// use mediaflow_core::metrics::SessionMetrics;
///
/// let metrics = SessionMetrics::default();
/// metrics.submitted.incr();
/// assert_eq!(metrics.snapshot().submitted, 1);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub discarded: u64,
    pub delivered: u64,
    pub errors: u64,
    pub backpressure: u64,
}
