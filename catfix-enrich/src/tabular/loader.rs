//! CSV record source
//!
//! Header names are matched case-insensitively against the known record
//! fields; any other column is carried through in input order. Missing cells
//! are empty strings.

use super::RecordSource;
use crate::error::{EnrichError, EnrichResult};
use crate::types::{Record, KNOWN_COLUMNS};
use crate::validators::SchemaValidator;
use std::path::PathBuf;
use tracing::{info, warn};

pub struct CsvLoader {
    path: PathBuf,
}

impl CsvLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse records from any reader (exposed for in-memory input)
    pub fn read_from<R: std::io::Read>(reader: R) -> EnrichResult<Vec<Record>> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let report = SchemaValidator::validate_columns(&headers.iter().collect::<Vec<_>>())?;
        for warning in &report.warnings {
            warn!(warning = %warning, "Input schema");
        }

        let columns: Vec<String> = headers
            .iter()
            .map(|h| {
                let lower = h.trim().to_lowercase();
                if KNOWN_COLUMNS.contains(&lower.as_str()) {
                    lower
                } else {
                    h.trim().to_string()
                }
            })
            .collect();

        let mut records = Vec::new();
        for (idx, row) in reader.records().enumerate() {
            let row = row.map_err(|e| {
                EnrichError::Validation(format!("Malformed CSV row {}: {}", idx + 2, e))
            })?;

            let mut record = Record::default();
            for (i, column) in columns.iter().enumerate() {
                if column.is_empty() {
                    continue;
                }
                record.set(column, row.get(i).unwrap_or(""));
            }
            records.push(record);
        }

        Ok(records)
    }
}

impl RecordSource for CsvLoader {
    fn load(&self) -> EnrichResult<Vec<Record>> {
        let file = std::fs::File::open(&self.path).map_err(|e| {
            EnrichError::Validation(format!("Cannot open input {}: {}", self.path.display(), e))
        })?;
        let records = Self::read_from(file)?;
        info!(path = %self.path.display(), records = records.len(), "Input loaded");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_columns_are_case_insensitive() {
        let data = "PartNumber,Brand,qty,GN\nLM317,TI,10,GN1\nNE555,,5,\n";
        let records = CsvLoader::read_from(data.as_bytes()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].partnumber, "LM317");
        assert_eq!(records[0].gn, "GN1");
        assert_eq!(records[0].get("qty"), Some("10"));
        assert_eq!(records[1].brand, "");
    }

    #[test]
    fn test_short_rows_are_padded() {
        let data = "partnumber,brand,note\nLM317\n";
        let records = CsvLoader::read_from(data.as_bytes()).unwrap();
        assert_eq!(records[0].partnumber, "LM317");
        assert_eq!(records[0].get("note"), Some(""));
    }

    #[test]
    fn test_missing_partnumber_column_is_rejected() {
        let data = "brand,gn\nTI,GN1\n";
        assert!(matches!(
            CsvLoader::read_from(data.as_bytes()),
            Err(EnrichError::Validation(_))
        ));
    }
}
