//! Tabular input and report output
//!
//! The import flow only sees the [`RecordSource`] and [`ReportSink`] traits;
//! CSV is the bundled format.

pub mod loader;
pub mod reporter;

pub use loader::CsvLoader;
pub use reporter::{metrics_path, report_file_name, CsvReporter, PREFERRED_COLUMNS};

use crate::error::EnrichResult;
use crate::metrics::MetricsSummary;
use crate::types::Record;
use std::path::PathBuf;

/// Ordered input records
pub trait RecordSource: Send + Sync {
    fn load(&self) -> EnrichResult<Vec<Record>>;
}

/// Destination for annotated records
pub trait ReportSink: Send + Sync {
    /// Write the report (and the optional metrics summary); returns the report path
    fn write(&self, records: &[Record], summary: Option<&MetricsSummary>) -> EnrichResult<PathBuf>;
}
