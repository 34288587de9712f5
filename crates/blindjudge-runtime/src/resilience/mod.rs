//! Resilience patterns for blindjudge-runtime.
//!
//! - Bounded retry with fixed or exponential backoff
//! - Usage accounting across concurrent workers

mod retry;
mod usage;

pub use retry::{Backoff, BackoffKind, RetryPolicy};
pub use usage::{JudgeUsage, UsageLedger, UsageSummary};
