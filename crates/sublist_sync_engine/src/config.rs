//! Configuration for the sync engine.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sublist_sync_protocol::{SubscriptionSpec, EVENT_RECORD_TYPE};

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote record type holding events.
    pub record_type: String,
    /// Records requested per page during a full fetch.
    pub page_size: usize,
    /// Upper bound on pages fetched by one refresh.
    pub max_pages: usize,
    /// Upper bound on the wall time of one full fetch.
    pub fetch_deadline: Duration,
    /// Timeout for a single page request.
    pub page_timeout: Duration,
    /// Timeout for single-record requests and writes.
    pub record_timeout: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Change-notification subscription to keep registered.
    pub subscription: SubscriptionSpec,
}

impl SyncConfig {
    /// Creates a configuration syncing `record_type`.
    pub fn new(record_type: impl Into<String>) -> Self {
        let record_type = record_type.into();
        Self {
            subscription: SubscriptionSpec::new(record_type.clone()),
            record_type,
            page_size: 100,
            max_pages: 50,
            fetch_deadline: Duration::from_secs(120),
            page_timeout: Duration::from_secs(30),
            record_timeout: Duration::from_secs(15),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the page limit of a full fetch.
    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages;
        self
    }

    /// Sets the deadline of a full fetch.
    pub fn with_fetch_deadline(mut self, deadline: Duration) -> Self {
        self.fetch_deadline = deadline;
        self
    }

    /// Sets the per-page timeout.
    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    /// Sets the per-record timeout.
    pub fn with_record_timeout(mut self, timeout: Duration) -> Self {
        self.record_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the subscription spec.
    pub fn with_subscription(mut self, subscription: SubscriptionSpec) -> Self {
        self.subscription = subscription;
        self
    }

    /// Budget for a full fetch under this configuration.
    pub fn fetch_budget(&self) -> FetchBudget {
        FetchBudget {
            max_pages: self.max_pages,
            deadline: self.fetch_deadline,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(EVENT_RECORD_TYPE)
    }
}

/// Bound on the work of one paginated fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchBudget {
    /// Maximum pages to request.
    pub max_pages: usize,
    /// Maximum elapsed time before no further page is requested.
    pub deadline: Duration,
}

impl FetchBudget {
    /// A budget that never runs out in practice.
    pub fn unbounded() -> Self {
        Self {
            max_pages: usize::MAX,
            deadline: Duration::MAX,
        }
    }
}

/// How `trigger_with_retry` retries failed runs.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Runs per trigger, the first one included. 1 disables retrying.
    pub max_attempts: u32,
    /// Delay schedule between runs.
    pub backoff: Backoff,
}

impl RetryConfig {
    /// Allows up to `max_attempts` runs with the default backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::default(),
        }
    }

    /// A single run, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff {
                base: Duration::ZERO,
                cap: Duration::ZERO,
                factor: 1,
                jitter: false,
            },
        }
    }

    /// Sets the delay before the first retry.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.backoff.base = delay;
        self
    }

    /// Sets the longest delay between runs, before jitter.
    pub fn with_delay_cap(mut self, cap: Duration) -> Self {
        self.backoff.cap = cap;
        self
    }

    /// Sets how much the delay grows per retry.
    pub fn with_factor(mut self, factor: u32) -> Self {
        self.backoff.factor = factor;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.backoff.jitter = jitter;
        self
    }

    /// Delay before retry number `retry`. Zero for the initial run.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        self.backoff.delay(retry)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Capped exponential delay schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound before jitter.
    pub cap: Duration,
    /// Growth per retry.
    pub factor: u32,
    /// Adds up to a quarter of the delay on top.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            factor: 2,
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let Some(exponent) = retry.checked_sub(1) else {
            return Duration::ZERO;
        };
        let growth = self.factor.checked_pow(exponent).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(growth).min(self.cap);

        if self.jitter {
            delay + delay.mul_f64(0.25 * clock_fraction())
        } else {
            delay
        }
    }
}

/// A value in `[0, 1)` taken from the clock's sub-second part.
fn clock_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}
