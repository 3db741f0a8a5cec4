//! catfix-enrich library interface
//!
//! Resilient part-catalog enrichment: every input record is searched in the
//! catalog, reconciled or classified, and decided as create, update, skip,
//! conflict or error.
//!
//! Exposes public APIs for the binary and for integration testing.

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod services;
pub mod tabular;
pub mod types;
pub mod utils;
pub mod validators;
pub mod workflow;

pub use crate::cache::{CacheOperation, CacheStats, ResultCache};
pub use crate::error::{EnrichError, EnrichResult, RecordFailure, RetryError, ServiceError};
pub use crate::metrics::{MetricsAggregator, MetricsSummary};
pub use crate::services::{build_context, ServiceContext};
pub use crate::types::{Action, Decision, Item, Lookup, Reason, Record};
pub use crate::utils::{BackoffConfig, RetryExecutor, RetryPolicy};
pub use crate::workflow::{run_import, BatchRunner, EnrichmentPipeline, ImportOutcome};
