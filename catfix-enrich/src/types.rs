//! Core Types for catfix-enrich
//!
//! Defines the data that flows through the enrichment pipeline:
//! - **Record**: one input row plus the annotations written by the pipeline
//! - **Decision**: the `{action, reason}` outcome of the state machine
//! - **Item**: a catalog or secondary-database entry as returned by a service
//! - **Lookup**: explicit found / not-found / failed outcome of a read path
//! - Classification service payloads (`NormalizedText`, `Classification`)

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

// ============================================================================
// Decision taxonomy
// ============================================================================

/// Terminal action assigned to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Skip,
    Conflict,
    Error,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Skip => "skip",
            Action::Conflict => "conflict",
            Action::Error => "error",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code explaining a decision
///
/// Rendered as the stable taxonomy strings written to reports
/// (`already_present`, `invalid_input:duplicate_partnumber`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reason {
    NoPartnumber,
    AlreadyPresent,
    BrandMismatch,
    FieldsMismatch,
    NotFound,
    LowConfidence,
    UpdateFailed,
    UpdateNotSupported,
    CreateFailed,
    /// Rejected by input validation (payload: validation code)
    InvalidInput(String),
    /// Unexpected failure at the record boundary (payload: error kind)
    RowFailed(String),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::NoPartnumber => f.write_str("no_partnumber"),
            Reason::AlreadyPresent => f.write_str("already_present"),
            Reason::BrandMismatch => f.write_str("brand_mismatch"),
            Reason::FieldsMismatch => f.write_str("fields_mismatch"),
            Reason::NotFound => f.write_str("not_found"),
            Reason::LowConfidence => f.write_str("low_confidence"),
            Reason::UpdateFailed => f.write_str("update_failed"),
            Reason::UpdateNotSupported => f.write_str("update_not_supported"),
            Reason::CreateFailed => f.write_str("create_failed"),
            Reason::InvalidInput(code) => write!(f, "invalid_input:{}", code),
            Reason::RowFailed(kind) => write!(f, "row_failed:{}", kind),
        }
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of the enrichment state machine for one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub action: Action,
    pub reason: Reason,
}

impl Decision {
    pub fn new(action: Action, reason: Reason) -> Self {
        Self { action, reason }
    }

    pub fn skip(reason: Reason) -> Self {
        Self::new(Action::Skip, reason)
    }

    pub fn conflict(reason: Reason) -> Self {
        Self::new(Action::Conflict, reason)
    }

    pub fn row_failed(kind: impl Into<String>) -> Self {
        Self::new(Action::Error, Reason::RowFailed(kind.into()))
    }
}

// ============================================================================
// Record
// ============================================================================

/// Input columns with a dedicated field on [`Record`]
pub const KNOWN_COLUMNS: &[&str] = &["partnumber", "brand", "external_id", "gn", "vn"];

/// One part row being reconciled against the catalog
///
/// Input fields are plain strings (empty when absent). Annotation fields are
/// `None` until the record reaches a terminal decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub partnumber: String,
    pub brand: String,
    pub external_id: String,
    /// Group code
    pub gn: String,
    /// Subgroup code
    pub vn: String,
    /// Remaining input columns in input order
    pub extra: Vec<(String, String)>,

    pub decision: Option<Decision>,
    pub found_in_catalog: Option<bool>,
    pub confidence: Option<f64>,
    pub attrs_norm: Option<Map<String, Value>>,
    /// Ordered error tags (`tag:ErrorKind:attemptN`, `validation:...`)
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Record {
    pub fn new(partnumber: impl Into<String>, brand: impl Into<String>) -> Self {
        Self {
            partnumber: partnumber.into(),
            brand: brand.into(),
            ..Self::default()
        }
    }

    /// Builder-style [`Record::set`]
    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Set an input column; unknown names go to `extra` (replacing an existing value)
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match name {
            "partnumber" => self.partnumber = value,
            "brand" => self.brand = value,
            "external_id" => self.external_id = value,
            "gn" => self.gn = value,
            "vn" => self.vn = value,
            _ => match self.extra.iter_mut().find(|(k, _)| k == name) {
                Some(entry) => entry.1 = value,
                None => self.extra.push((name.to_string(), value)),
            },
        }
    }

    /// Read an input column by name
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            "partnumber" => Some(&self.partnumber),
            "brand" => Some(&self.brand),
            "external_id" => Some(&self.external_id),
            "gn" => Some(&self.gn),
            "vn" => Some(&self.vn),
            _ => self
                .extra
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
        }
    }

    pub fn action(&self) -> Option<Action> {
        self.decision.as_ref().map(|d| d.action)
    }

    pub fn reason(&self) -> Option<&Reason> {
        self.decision.as_ref().map(|d| &d.reason)
    }

    /// Status column; always mirrors the action
    pub fn status(&self) -> Option<Action> {
        self.action()
    }

    pub fn is_terminal(&self) -> bool {
        self.decision.is_some()
    }

    /// `attrs_norm` serialized as compact JSON (empty when absent or empty)
    pub fn attrs_norm_json(&self) -> String {
        match &self.attrs_norm {
            Some(map) if !map.is_empty() => Value::Object(map.clone()).to_string(),
            _ => String::new(),
        }
    }

    /// Terminal `error/row_failed:<kind>` annotation for a record whose processing
    /// failed unexpectedly
    pub fn mark_failed(&mut self, kind: &str) {
        self.decision = Some(Decision::row_failed(kind));
        self.found_in_catalog.get_or_insert(false);
        self.errors.push(format!("pipeline:{}", kind));
    }
}

// ============================================================================
// Service payloads
// ============================================================================

/// Catalog or secondary-database entry
///
/// Services differ in which fields they fill, so everything is optional and
/// unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub partnumber: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub brand: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub external_id: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub gn: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub vn: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "object_or_empty")]
    pub attrs: Map<String, Value>,
}

impl Item {
    pub fn brand(&self) -> &str {
        self.brand.as_deref().unwrap_or("")
    }

    pub fn external_id(&self) -> &str {
        self.external_id.as_deref().unwrap_or("")
    }

    pub fn gn(&self) -> &str {
        self.gn.as_deref().unwrap_or("")
    }

    pub fn vn(&self) -> &str {
        self.vn.as_deref().unwrap_or("")
    }
}

fn object_or_empty<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Map<String, Value>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        _ => Map::new(),
    })
}

/// Numbers and booleans become their text form; arrays and objects count as absent
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        None | Some(Value::Null) | Some(Value::Array(_)) | Some(Value::Object(_)) => None,
    })
}

/// Payload sent to the catalog when creating an item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatePayload {
    pub partnumber: String,
    pub name: String,
    pub brand: String,
    pub attrs: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vn: Option<String>,
}

/// Field-level patch for an existing catalog item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vn: Option<String>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// True when brand is the only patched field
    pub fn only_brand(&self) -> bool {
        self.fields() == ["brand"]
    }

    /// Names of patched fields, in a fixed order
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.brand.is_some() {
            fields.push("brand");
        }
        if self.external_id.is_some() {
            fields.push("external_id");
        }
        if self.gn.is_some() {
            fields.push("gn");
        }
        if self.vn.is_some() {
            fields.push("vn");
        }
        fields
    }
}

/// Result of `ClassificationService::normalize`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedText {
    /// Human-readable name derived from the text
    #[serde(default, rename = "local_name")]
    pub derived_name: Option<String>,
    /// Normalized attribute mapping
    #[serde(default, rename = "attrs")]
    pub attributes: Map<String, Value>,
}

/// Result of `ClassificationService::classify`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default, rename = "gn")]
    pub group: Option<String>,
    #[serde(default, rename = "vn")]
    pub subgroup: Option<String>,
    /// Confidence score (0.0-1.0); absent when the classifier did not report one
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl Classification {
    /// Confidence clamped to 0.0-1.0
    pub fn clamped_confidence(&self) -> Option<f64> {
        self.confidence
            .filter(|c| !c.is_nan())
            .map(|c| c.clamp(0.0, 1.0))
    }
}

// ============================================================================
// Read-path outcome
// ============================================================================

/// Outcome of a read call after retries
///
/// Keeps "nothing there" and "could not ask" apart so that every call site
/// decides visibly whether a failure degrades or propagates.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    /// Retries exhausted (payload: error kind of the last attempt)
    Failed(String),
}
