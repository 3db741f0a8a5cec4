//! Import workflow
//!
//! `run_import`: validate → batch-run valid records through the enrichment
//! pipeline → reassemble every row in input order → aggregate metrics.

pub mod batch_runner;
pub mod pipeline;

pub use batch_runner::{BatchRunner, DEFAULT_CONCURRENCY};
pub use pipeline::{build_patch, EnrichmentPipeline};

use crate::error::EnrichResult;
use crate::metrics::{MetricsAggregator, MetricsSummary};
use crate::services::ServiceContext;
use crate::tabular::{RecordSource, ReportSink};
use crate::types::Record;
use crate::validators::{InputValidator, ValidatedBatch};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

/// Annotated records (one per input row, input order) and run metrics
#[derive(Debug)]
pub struct ImportOutcome {
    pub records: Vec<Record>,
    pub summary: MetricsSummary,
}

/// Validate, enrich and measure one batch of records
pub async fn run_import(
    ctx: Arc<ServiceContext>,
    records: Vec<Record>,
    concurrency: usize,
) -> EnrichResult<ImportOutcome> {
    let started = Instant::now();
    let total = records.len();

    let mut validator = InputValidator::new()?;
    let ValidatedBatch { valid, rejected } = validator.validate_batch(records);

    info!(
        total,
        valid = valid.len(),
        rejected = rejected.len(),
        "Import started"
    );

    let (positions, to_process): (Vec<usize>, Vec<Record>) = valid.into_iter().unzip();
    let runner = BatchRunner::new(EnrichmentPipeline::new(ctx), concurrency);
    let processed = runner.run_batch(to_process).await;

    let mut slots: Vec<Option<Record>> = vec![None; total];
    for (position, record) in positions.into_iter().zip(processed) {
        slots[position] = Some(record);
    }
    for (position, record) in rejected {
        slots[position] = Some(record);
    }
    let records: Vec<Record> = slots.into_iter().flatten().collect();
    debug_assert_eq!(records.len(), total);

    let mut metrics = MetricsAggregator::new();
    metrics.set_total(total);
    metrics.add_results(&records);
    metrics.finalize(started.elapsed());
    metrics.log_summary();

    Ok(ImportOutcome {
        records,
        summary: metrics.summary(),
    })
}

/// Load from `source`, run the import, write the report to `sink`
///
/// # Returns
/// Report path and run metrics
pub async fn run_import_file(
    ctx: Arc<ServiceContext>,
    source: &dyn RecordSource,
    sink: &dyn ReportSink,
    concurrency: usize,
) -> EnrichResult<(PathBuf, MetricsSummary)> {
    let records = source.load()?;
    let outcome = run_import(ctx, records, concurrency).await?;
    let path = sink.write(&outcome.records, Some(&outcome.summary))?;
    Ok((path, outcome.summary))
}
