//! Batch Runner
//!
//! Drives a batch of records through the [`EnrichmentPipeline`] with bounded
//! concurrency.
//!
//! # Guarantees
//! - One output record per input record, in input order (each result is
//!   written into the slot of its input index)
//! - At most `concurrency` records in flight via `buffer_unordered`
//! - Per-record isolation: an error or panic while processing one record
//!   becomes an `error/row_failed:<kind>` terminal for that record only. An
//!   error keeps the annotations gathered so far; a panic restarts from the
//!   input record
//! - After cancellation, records not yet started become
//!   `error/row_failed:Cancelled` without touching any service

use super::pipeline::EnrichmentPipeline;
use crate::types::Record;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Default number of records processed concurrently
pub const DEFAULT_CONCURRENCY: usize = 4;

pub const PANIC_KIND: &str = "Panic";
pub const CANCELLED_KIND: &str = "Cancelled";

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub struct BatchRunner {
    pipeline: EnrichmentPipeline,
    concurrency: usize,
}

impl BatchRunner {
    /// `concurrency` below 1 is raised to 1
    pub fn new(pipeline: EnrichmentPipeline, concurrency: usize) -> Self {
        Self {
            pipeline,
            concurrency: concurrency.max(1),
        }
    }

    /// Process every record; never fails as a whole
    pub async fn run_batch(&self, records: Vec<Record>) -> Vec<Record> {
        let total = records.len();
        if total == 0 {
            return Vec::new();
        }

        info!(records = total, concurrency = self.concurrency, "Batch started");

        let cancel = self.pipeline.context().cancel_token().clone();
        let processed = Arc::new(AtomicUsize::new(0));
        let mut slots: Vec<Option<Record>> = vec![None; total];

        let mut results = stream::iter(records.into_iter().enumerate())
            .map(|(index, record)| {
                let pipeline = self.pipeline.clone();
                let cancel = cancel.clone();
                let processed = processed.clone();

                async move {
                    if cancel.is_cancelled() {
                        let mut record = record;
                        record.mark_failed(CANCELLED_KIND);
                        return (index, record);
                    }

                    let original = record.clone();
                    let outcome = AssertUnwindSafe(pipeline.process(record)).catch_unwind().await;

                    let result = match outcome {
                        Ok(Ok(record)) => record,
                        Ok(Err(failure)) => {
                            let kind = failure.kind();
                            if kind == CANCELLED_KIND {
                                debug!(
                                    index,
                                    partnumber = %original.partnumber,
                                    "Record cancelled mid-flight"
                                );
                            } else {
                                error!(
                                    index,
                                    partnumber = %original.partnumber,
                                    error = %failure,
                                    "Record processing failed"
                                );
                            }
                            let mut failed = *failure.record;
                            failed.mark_failed(kind);
                            failed
                        }
                        Err(payload) => {
                            error!(
                                index,
                                partnumber = %original.partnumber,
                                panic = %panic_message(payload.as_ref()),
                                "Record processing panicked"
                            );
                            let mut failed = original;
                            failed.mark_failed(PANIC_KIND);
                            failed
                        }
                    };

                    let current = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if current % 10 == 0 || current == total {
                        info!(progress = format!("{}/{}", current, total), "Batch progress");
                    }

                    (index, result)
                }
            })
            .buffer_unordered(self.concurrency);

        while let Some((index, record)) = results.next().await {
            slots[index] = Some(record);
        }

        if cancel.is_cancelled() {
            info!(
                processed = processed.load(Ordering::Relaxed),
                records = total,
                "Batch cancelled"
            );
        }

        let output: Vec<Record> = slots.into_iter().flatten().collect();
        debug_assert_eq!(output.len(), total);
        output
    }
}
