//! CSV report sink
//!
//! Writes one row per record in the preferred column order, followed by any
//! extra input columns in first-seen order. Lists (`errors`, `warnings`) are
//! joined with `;`. When a metrics summary is given it is written next to the
//! report as `<report>.metrics.json`.

use super::ReportSink;
use crate::error::EnrichResult;
use crate::metrics::MetricsSummary;
use crate::types::Record;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Leading report columns, in order
pub const PREFERRED_COLUMNS: &[&str] = &[
    "external_id",
    "partnumber",
    "brand",
    "gn",
    "vn",
    "found_in_catalog",
    "action",
    "status",
    "reason",
    "confidence",
    "attrs_norm",
    "errors",
    "warnings",
];

/// `report_<YYYYmmdd_HHMMSS>_<id8>.csv`
pub fn report_file_name(now: chrono::DateTime<chrono::Local>, run_id: &uuid::Uuid) -> String {
    let id = run_id.simple().to_string();
    format!("report_{}_{}.csv", now.format("%Y%m%d_%H%M%S"), &id[..8])
}

/// Path of the metrics summary written alongside `report`
pub fn metrics_path(report: &Path) -> PathBuf {
    let mut name = report.file_stem().map(|s| s.to_os_string()).unwrap_or_default();
    name.push(".metrics.json");
    report.with_file_name(name)
}

/// All report columns for `records`
pub fn report_columns(records: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = PREFERRED_COLUMNS.iter().map(|c| c.to_string()).collect();
    for record in records {
        for (name, _) in &record.extra {
            if !columns.iter().any(|c| c == name) {
                columns.push(name.clone());
            }
        }
    }
    columns
}

fn cell(record: &Record, column: &str) -> String {
    match column {
        "found_in_catalog" => record
            .found_in_catalog
            .map(|found| found.to_string())
            .unwrap_or_default(),
        "action" | "status" => record.action().map(|a| a.to_string()).unwrap_or_default(),
        "reason" => record.reason().map(|r| r.to_string()).unwrap_or_default(),
        "confidence" => record.confidence.map(|c| c.to_string()).unwrap_or_default(),
        "attrs_norm" => record.attrs_norm_json(),
        "errors" => record.errors.join(";"),
        "warnings" => record.warnings.join(";"),
        other => record.get(other).unwrap_or("").to_string(),
    }
}

pub struct CsvReporter {
    output_dir: PathBuf,
    file_name: Option<String>,
}

impl CsvReporter {
    /// Reports get a timestamped name under `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_name: None,
        }
    }

    /// Use a fixed file name instead of the timestamped one
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Render records as CSV into any writer
    pub fn write_to<W: std::io::Write>(writer: W, records: &[Record]) -> EnrichResult<()> {
        let columns = report_columns(records);
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&columns)?;
        for record in records {
            csv_writer.write_record(columns.iter().map(|c| cell(record, c)))?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

impl ReportSink for CsvReporter {
    fn write(&self, records: &[Record], summary: Option<&MetricsSummary>) -> EnrichResult<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;

        let name = self
            .file_name
            .clone()
            .unwrap_or_else(|| report_file_name(chrono::Local::now(), &uuid::Uuid::new_v4()));
        let path = self.output_dir.join(name);

        let file = fs::File::create(&path)?;
        Self::write_to(std::io::BufWriter::new(file), records)?;

        if let Some(summary) = summary {
            fs::write(metrics_path(&path), serde_json::to_vec_pretty(summary)?)?;
        }

        info!(path = %path.display(), rows = records.len(), "Report saved");
        Ok(path)
    }
}
