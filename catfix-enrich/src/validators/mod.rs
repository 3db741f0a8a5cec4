//! Input validation
//!
//! Runs once over a loaded batch before any record reaches the pipeline:
//! - [`SchemaValidator`] checks the header (a `partnumber` column is required)
//! - [`InputValidator`] trims and normalizes each record, attaches
//!   `validation:*` warnings and rejects case-insensitive duplicate partnumbers
//!
//! Rejected records are terminal (`skip/invalid_input:<code>`) and never
//! reach the pipeline. Records with an empty partnumber pass through so the
//! pipeline can decide them as `skip/no_partnumber`.

use crate::error::EnrichError;
use crate::types::{Decision, Reason, Record, KNOWN_COLUMNS};
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};

pub const MAX_PARTNUMBER_LEN: usize = 50;
pub const MAX_EXTERNAL_ID_LEN: usize = 100;

const PARTNUMBER_PATTERN: &str = r"^[A-Za-z0-9\-_.]+$";

/// Lowercase alias → canonical brand name
const BRAND_ALIASES: &[(&str, &str)] = &[
    ("ti", "Texas Instruments"),
    ("st", "STMicroelectronics"),
    ("nxp", "NXP"),
    ("infineon", "Infineon"),
    ("analog", "Analog Devices"),
    ("maxim", "Maxim Integrated"),
];

pub const DUPLICATE_PARTNUMBER: &str = "duplicate_partnumber";

/// Canonical brand for a known alias
pub fn canonical_brand(brand: &str) -> Option<&'static str> {
    let lower = brand.trim().to_lowercase();
    BRAND_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, canonical)| *canonical)
}

/// Result of validating a batch; indexes refer to input positions
#[derive(Debug, Default)]
pub struct ValidatedBatch {
    pub valid: Vec<(usize, Record)>,
    pub rejected: Vec<(usize, Record)>,
}

pub struct InputValidator {
    partnumber_pattern: Regex,
    seen: HashSet<String>,
}

impl InputValidator {
    pub fn new() -> Result<Self, EnrichError> {
        let partnumber_pattern = Regex::new(PARTNUMBER_PATTERN)
            .map_err(|e| EnrichError::Validation(format!("Invalid partnumber pattern: {}", e)))?;
        Ok(Self {
            partnumber_pattern,
            seen: HashSet::new(),
        })
    }

    /// Normalize one record; `Err` carries the rejected, terminal record
    pub fn validate_record(&mut self, mut record: Record) -> Result<Record, Record> {
        record.partnumber = record.partnumber.trim().to_string();
        record.brand = record.brand.trim().to_string();
        record.external_id = record.external_id.trim().to_string();
        record.gn = record.gn.trim().to_string();
        record.vn = record.vn.trim().to_string();

        let mut warnings = Vec::new();

        if !record.partnumber.is_empty() {
            if !self.partnumber_pattern.is_match(&record.partnumber) {
                warnings.push("invalid_partnumber_format");
            }
            if record.partnumber.chars().count() > MAX_PARTNUMBER_LEN {
                warnings.push("partnumber_too_long");
            }
        }

        if record.brand.is_empty() {
            warnings.push("missing_brand");
        } else if let Some(canonical) = canonical_brand(&record.brand) {
            if canonical != record.brand {
                record.brand = canonical.to_string();
                warnings.push("brand_normalized");
            }
        }

        if record.external_id.chars().count() > MAX_EXTERNAL_ID_LEN {
            warnings.push("external_id_too_long");
        }

        record
            .warnings
            .extend(warnings.into_iter().map(|w| format!("validation:{}", w)));

        if !record.partnumber.is_empty() && !self.seen.insert(record.partnumber.to_lowercase()) {
            debug!(partnumber = %record.partnumber, "Duplicate partnumber rejected");
            record.errors.push(format!("validation:{}", DUPLICATE_PARTNUMBER));
            let reason = Reason::InvalidInput(DUPLICATE_PARTNUMBER.to_string());
            record.decision = Some(Decision::skip(reason));
            record.found_in_catalog = Some(false);
            return Err(record);
        }

        Ok(record)
    }

    /// Validate a whole batch, keeping input positions
    pub fn validate_batch(&mut self, records: Vec<Record>) -> ValidatedBatch {
        let mut batch = ValidatedBatch::default();
        for (index, record) in records.into_iter().enumerate() {
            match self.validate_record(record) {
                Ok(record) => batch.valid.push((index, record)),
                Err(record) => batch.rejected.push((index, record)),
            }
        }

        if !batch.rejected.is_empty() {
            warn!(
                rejected = batch.rejected.len(),
                valid = batch.valid.len(),
                "Input rows rejected by validation"
            );
        }
        batch
    }
}

/// Header check outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    pub warnings: Vec<String>,
}

pub struct SchemaValidator;

impl SchemaValidator {
    /// Columns without a dedicated record field that are still expected
    /// in catalog exports
    const OPTIONAL_COLUMNS: &'static [&'static str] = &["quantity", "price", "description"];

    /// # Errors
    /// `Validation` when no `partnumber` column is present
    pub fn validate_columns<S: AsRef<str>>(columns: &[S]) -> Result<SchemaReport, EnrichError> {
        let lower: Vec<String> = columns.iter().map(|c| c.as_ref().trim().to_lowercase()).collect();

        if !lower.iter().any(|c| c == "partnumber") {
            return Err(EnrichError::Validation("missing_column_partnumber".to_string()));
        }

        let mut warnings = Vec::new();
        if !lower.iter().any(|c| c == "brand") {
            warnings.push("missing_recommended_column_brand".to_string());
        }
        for column in &lower {
            let known = KNOWN_COLUMNS.contains(&column.as_str())
                || Self::OPTIONAL_COLUMNS.contains(&column.as_str());
            if !known {
                warnings.push(format!("unknown_column_{}", column));
            }
        }

        if !warnings.is_empty() {
            debug!(warnings = ?warnings, "Input schema warnings");
        }
        Ok(SchemaReport { warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Action;

    impl ValidatedBatch {
        /// Test-only: total records in the batch (valid + rejected)
        fn len(&self) -> usize {
            self.valid.len() + self.rejected.len()
        }
    }

    fn validator() -> InputValidator {
        InputValidator::new().unwrap()
    }

    #[test]
    fn test_trims_and_normalizes_brand() {
        let record = validator().validate_record(Record::new("  LM317 ", " ti ")).unwrap();
        assert_eq!(record.partnumber, "LM317");
        assert_eq!(record.brand, "Texas Instruments");
        assert_eq!(record.warnings, vec!["validation:brand_normalized"]);
    }

    #[test]
    fn test_duplicate_is_case_insensitive() {
        let mut v = validator();
        assert!(v.validate_record(Record::new("lm317", "TI")).is_ok());

        let rejected = v.validate_record(Record::new("LM317", "TI")).unwrap_err();

        assert_eq!(rejected.action(), Some(Action::Skip));
        assert_eq!(
            rejected.reason().map(|r| r.to_string()).as_deref(),
            Some("invalid_input:duplicate_partnumber")
        );
        assert_eq!(rejected.errors, vec!["validation:duplicate_partnumber"]);
    }

    #[test]
    fn test_empty_partnumber_passes_through() {
        let mut v = validator();
        let first = v.validate_record(Record::new("", "TI")).unwrap();
        let second = v.validate_record(Record::new("  ", "TI")).unwrap();
        assert!(first.decision.is_none());
        assert!(second.decision.is_none());
    }

    #[test]
    fn test_format_and_length_warnings() {
        let long = "A".repeat(51);
        let record = validator()
            .validate_record(Record::new("LM 317/X", "").with_field("external_id", "E".repeat(101)))
            .unwrap();
        assert_eq!(
            record.warnings,
            vec![
                "validation:invalid_partnumber_format",
                "validation:missing_brand",
                "validation:external_id_too_long"
            ]
        );

        let record = validator().validate_record(Record::new(long, "NXP")).unwrap();
        assert_eq!(record.warnings, vec!["validation:partnumber_too_long"]);
    }

    #[test]
    fn test_batch_keeps_positions() {
        let batch = validator().validate_batch(vec![
            Record::new("A1", "TI"),
            Record::new("B2", "TI"),
            Record::new("a1", "TI"),
        ]);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.valid.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(batch.rejected[0].0, 2);
    }

    #[test]
    fn test_schema_requires_partnumber() {
        assert!(SchemaValidator::validate_columns(&["brand", "gn"]).is_err());

        let report = SchemaValidator::validate_columns(&["PartNumber", "qty"]).unwrap();
        assert_eq!(
            report.warnings,
            vec!["missing_recommended_column_brand", "unknown_column_qty"]
        );
    }
}
