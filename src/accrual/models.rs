use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::orders::models::OrderStatus;

/// Fallback wait when a 429 carries no usable `Retry-After` header
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Order status in the accrual service vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl fmt::Display for AccrualStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AccrualStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccrualStatus::Registered => "REGISTERED",
            AccrualStatus::Processing => "PROCESSING",
            AccrualStatus::Invalid => "INVALID",
            AccrualStatus::Processed => "PROCESSED",
        }
    }

    /// Internal order status recorded for this provider status
    pub fn order_status(&self) -> OrderStatus {
        match self {
            AccrualStatus::Registered | AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
        }
    }
}

/// One order's state as reported by the accrual service
///
/// Wire format: `{"order": "...", "status": "...", "accrual": 500.0}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualOutcome {
    #[serde(rename = "order")]
    pub order_id: String,
    pub status: AccrualStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
}

impl AccrualOutcome {
    pub fn new(order_id: impl Into<String>, status: AccrualStatus, accrual: Option<Decimal>) -> Self {
        Self {
            order_id: order_id.into(),
            status,
            accrual,
        }
    }
}

/// Backpressure signal from the accrual service (HTTP 429)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDirective {
    pub retry_after_secs: u64,
}

impl fmt::Display for RetryDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "retry after {}s", self.retry_after_secs)
    }
}

impl RetryDirective {
    pub fn new(retry_after_secs: u64) -> Self {
        Self { retry_after_secs }
    }

    /// Parse a `Retry-After` header value given in whole seconds.
    /// Missing or unparsable values fall back to `default_secs`.
    pub fn from_header(value: Option<&str>, default_secs: u64) -> Self {
        let retry_after_secs = value
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(default_secs);

        Self { retry_after_secs }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }
}

/// What a finished tick asks of the scheduler for the next fire time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickDirective {
    pub next_interval_override: Option<Duration>,
}

impl From<Option<RetryDirective>> for TickDirective {
    fn from(directive: Option<RetryDirective>) -> Self {
        Self {
            next_interval_override: directive.map(|d| d.delay()),
        }
    }
}

/// Counters for one polling tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Unresolved orders returned by the store
    pub discovered: usize,
    /// Lookups actually issued by workers
    pub looked_up: usize,
    /// Outcomes handed to the aggregator
    pub delivered: usize,
    pub not_registered: usize,
    pub failed: usize,
    pub retry: Option<RetryDirective>,
}

impl TickReport {
    /// Fold another worker's counters into this report.
    /// When several workers were rate limited the longest wait wins.
    pub fn merge(&mut self, other: TickReport) {
        self.discovered += other.discovered;
        self.looked_up += other.looked_up;
        self.delivered += other.delivered;
        self.not_registered += other.not_registered;
        self.failed += other.failed;
        self.retry = match (self.retry, other.retry) {
            (Some(a), Some(b)) if b.retry_after_secs > a.retry_after_secs => Some(b),
            (Some(a), _) => Some(a),
            (None, b) => b,
        };
    }

    pub fn directive(&self) -> TickDirective {
        TickDirective::from(self.retry)
    }
}
