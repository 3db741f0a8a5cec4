//! Import Run Metrics
//!
//! Passive observer of terminal records. Accumulates per-action counters,
//! reason frequencies, confidence samples and per-service error counts, and
//! renders them as a serializable [`MetricsSummary`].

use crate::types::{Action, Record};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Number of reasons listed in the summary
pub const TOP_REASONS: usize = 5;

/// Service name fragments matched against error tags
const SERVICE_TAGS: [&str; 3] = ["catalog", "secondary", "llm"];

/// Records per terminal action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub conflicts: usize,
    pub errors: usize,
}

/// Records with at least one error tag mentioning each service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceErrorCounts {
    pub catalog: usize,
    pub secondary: usize,
    pub llm: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSummary {
    pub average: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonCount {
    pub reason: String,
    pub count: usize,
}

/// Snapshot of an import run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_rows: usize,
    pub processed_rows: usize,
    pub failed_rows: usize,
    /// `(processed - failed) / max(total, 1)` as a percentage
    pub success_rate: f64,
    pub processing_time_secs: Option<f64>,
    pub avg_row_time_secs: Option<f64>,
    pub actions: ActionCounts,
    pub service_errors: ServiceErrorCounts,
    pub confidence: ConfidenceSummary,
    /// Most frequent reasons: count descending, then name ascending
    pub top_reasons: Vec<ReasonCount>,
}

impl MetricsSummary {
    pub fn display_string(&self) -> String {
        format!(
            "{} rows: {} created, {} updated, {} skipped, {} conflicts, {} errors ({:.1}% success)",
            self.total_rows,
            self.actions.created,
            self.actions.updated,
            self.actions.skipped,
            self.actions.conflicts,
            self.actions.errors,
            self.success_rate
        )
    }
}

#[derive(Debug, Default)]
pub struct MetricsAggregator {
    total_rows: usize,
    processed_rows: usize,
    actions: ActionCounts,
    service_errors: ServiceErrorCounts,
    reasons: HashMap<String, usize>,
    confidences: Vec<f64>,
    elapsed: Option<Duration>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of input rows, including rows that never reached the pipeline
    pub fn set_total(&mut self, total: usize) {
        self.total_rows = total;
    }

    pub fn add_result(&mut self, record: &Record) {
        self.processed_rows += 1;

        match record.action() {
            Some(Action::Create) => self.actions.created += 1,
            Some(Action::Update) => self.actions.updated += 1,
            Some(Action::Skip) => self.actions.skipped += 1,
            Some(Action::Conflict) => self.actions.conflicts += 1,
            Some(Action::Error) | None => self.actions.errors += 1,
        }

        let reason = record
            .reason()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        *self.reasons.entry(reason).or_insert(0) += 1;

        if let Some(confidence) = record.confidence.filter(|c| c.is_finite()) {
            self.confidences.push(confidence);
        }

        for service in SERVICE_TAGS {
            if record.errors.iter().any(|e| e.contains(service)) {
                match service {
                    "catalog" => self.service_errors.catalog += 1,
                    "secondary" => self.service_errors.secondary += 1,
                    _ => self.service_errors.llm += 1,
                }
            }
        }
    }

    pub fn add_results<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) {
        for record in records {
            self.add_result(record);
        }
    }

    /// Record the run's wall-clock time; enables the per-row average
    pub fn finalize(&mut self, elapsed: Duration) {
        self.elapsed = Some(elapsed);
    }

    pub fn summary(&self) -> MetricsSummary {
        let failed_rows = self.actions.errors;
        let success_rate = self.processed_rows.saturating_sub(failed_rows) as f64
            / self.total_rows.max(1) as f64
            * 100.0;

        let processing_time_secs = self.elapsed.map(|d| d.as_secs_f64());
        let avg_row_time_secs = processing_time_secs
            .filter(|_| self.processed_rows > 0)
            .map(|secs| secs / self.processed_rows as f64);

        MetricsSummary {
            total_rows: self.total_rows,
            processed_rows: self.processed_rows,
            failed_rows,
            success_rate: round_to(success_rate, 2),
            processing_time_secs,
            avg_row_time_secs,
            actions: self.actions.clone(),
            service_errors: self.service_errors.clone(),
            confidence: self.confidence_summary(),
            top_reasons: self.top_reasons(TOP_REASONS),
        }
    }

    fn confidence_summary(&self) -> ConfidenceSummary {
        if self.confidences.is_empty() {
            return ConfidenceSummary::default();
        }
        let sum: f64 = self.confidences.iter().sum();
        ConfidenceSummary {
            average: Some(round_to(sum / self.confidences.len() as f64, 3)),
            min: self.confidences.iter().copied().reduce(f64::min),
            max: self.confidences.iter().copied().reduce(f64::max),
            count: self.confidences.len(),
        }
    }

    fn top_reasons(&self, k: usize) -> Vec<ReasonCount> {
        let mut reasons: Vec<ReasonCount> = self
            .reasons
            .iter()
            .map(|(reason, count)| ReasonCount {
                reason: reason.clone(),
                count: *count,
            })
            .collect();
        reasons.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.reason.cmp(&b.reason)));
        reasons.truncate(k);
        reasons
    }

    pub fn log_summary(&self) {
        let summary = self.summary();

        info!(
            total = summary.total_rows,
            processed = summary.processed_rows,
            success_rate = summary.success_rate,
            "Import completed"
        );
        if let (Some(total), Some(avg)) =
            (summary.processing_time_secs, summary.avg_row_time_secs)
        {
            info!(elapsed_secs = total, avg_row_secs = avg, "Import timing");
        }
        info!(
            created = summary.actions.created,
            updated = summary.actions.updated,
            skipped = summary.actions.skipped,
            conflicts = summary.actions.conflicts,
            errors = summary.actions.errors,
            "Import actions"
        );
        if let Some(average) = summary.confidence.average {
            info!(average, samples = summary.confidence.count, "Classification confidence");
        }

        let errors = &summary.service_errors;
        if errors.catalog + errors.secondary + errors.llm > 0 {
            warn!(
                catalog = errors.catalog,
                secondary = errors.secondary,
                llm = errors.llm,
                "Service errors during import"
            );
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Decision, Reason};

    fn decided(action: Action, reason: Reason) -> Record {
        let mut record = Record::new("P", "B");
        record.decision = Some(Decision::new(action, reason));
        record
    }

    #[test]
    fn test_counts_and_success_rate() {
        let mut metrics = MetricsAggregator::new();
        metrics.set_total(4);
        metrics.add_result(&decided(Action::Create, Reason::NotFound));
        metrics.add_result(&decided(Action::Skip, Reason::AlreadyPresent));
        metrics.add_result(&decided(Action::Error, Reason::RowFailed("Panic".into())));
        metrics.add_result(&decided(Action::Conflict, Reason::CreateFailed));

        let summary = metrics.summary();

        assert_eq!(summary.actions.created, 1);
        assert_eq!(summary.actions.errors, 1);
        assert_eq!(summary.failed_rows, 1);
        assert_eq!(summary.success_rate, 75.0);
        assert_eq!(summary.avg_row_time_secs, None);
    }

    #[test]
    fn test_empty_run_has_zero_success_rate() {
        let summary = MetricsAggregator::new().summary();
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.confidence.count, 0);
        assert!(summary.top_reasons.is_empty());
    }

    #[test]
    fn test_top_reasons_order() {
        let mut metrics = MetricsAggregator::new();
        for reason in [
            Reason::NotFound,
            Reason::NotFound,
            Reason::AlreadyPresent,
            Reason::AlreadyPresent,
            Reason::LowConfidence,
            Reason::BrandMismatch,
            Reason::CreateFailed,
            Reason::UpdateFailed,
        ] {
            metrics.add_result(&decided(Action::Skip, reason));
        }

        let top: Vec<String> =
            metrics.summary().top_reasons.into_iter().map(|r| r.reason).collect();

        assert_eq!(
            top,
            vec![
                "already_present",
                "not_found",
                "brand_mismatch",
                "create_failed",
                "low_confidence",
            ]
        );
    }

    #[test]
    fn test_confidence_and_service_errors() {
        let mut metrics = MetricsAggregator::new();
        let mut a = decided(Action::Create, Reason::NotFound);
        a.confidence = Some(0.9);
        a.errors = vec![
            "catalog_create:Timeout:attempt1".into(),
            "catalog_create:Timeout:attempt2".into(),
        ];
        let mut b = decided(Action::Skip, Reason::LowConfidence);
        b.confidence = Some(0.3);
        b.errors = vec!["llm:RetryExhausted".into(), "secondary_search:Timeout:attempt1".into()];

        metrics.add_results([&a, &b]);
        metrics.finalize(Duration::from_secs(2));
        let summary = metrics.summary();

        assert_eq!(summary.confidence.count, 2);
        assert_eq!(summary.confidence.average, Some(0.6));
        assert_eq!(summary.confidence.min, Some(0.3));
        assert_eq!(summary.confidence.max, Some(0.9));
        assert_eq!(summary.service_errors, ServiceErrorCounts { catalog: 1, secondary: 1, llm: 1 });
        assert_eq!(summary.avg_row_time_secs, Some(1.0));
    }

    #[test]
    fn test_aggregator_does_not_mutate_records() {
        let record = decided(Action::Update, Reason::BrandMismatch);
        let before = record.clone();
        let mut metrics = MetricsAggregator::new();
        metrics.add_result(&record);
        assert_eq!(record, before);
    }
}
