//! Utility modules for catfix-enrich

pub mod retry;

pub use retry::{BackoffConfig, RetryExecutor, RetryPolicy};
