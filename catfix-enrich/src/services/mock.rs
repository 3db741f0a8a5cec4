//! Deterministic mock services
//!
//! Every value is derived from `SHA-256(seed, salt, text)`, so a given seed and
//! input always produce the same catalog hits, brands, classifications and
//! confidences. Profiles shape the catalog and secondary behavior:
//!
//! | profile       | catalog search              | secondary search   |
//! |---------------|-----------------------------|--------------------|
//! | `happy`       | hit for about 1 in 3 parts  | one candidate      |
//! | `missing`     | never a hit                 | empty              |
//! | `conflict`    | two items, differing brands | two candidates     |
//! | `errorrate10` | as `happy`, 10% of calls fail | as `happy`, 10% fail |
//! | `timeout`     | every call times out        | every call times out |
//!
//! The classification mock ignores the profile.

use super::{
    CatalogCreator, CatalogService, CatalogUpdater, ClassificationService, SecondaryLookupService,
};
use crate::error::ServiceError;
use crate::types::{Classification, CreatePayload, Item, ItemPatch, NormalizedText};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

const BRANDS: &[&str] = &[
    "Texas Instruments",
    "STMicroelectronics",
    "NXP",
    "Infineon",
    "Analog Devices",
    "Maxim Integrated",
];

const CATEGORIES: &[&str] = &["Resistors", "Capacitors", "ICs", "Connectors", "Diodes"];

/// Mock behavior profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockProfile {
    Happy,
    Missing,
    Conflict,
    ErrorRate10,
    Timeout,
}

impl FromStr for MockProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "happy" => Ok(MockProfile::Happy),
            "missing" => Ok(MockProfile::Missing),
            "conflict" => Ok(MockProfile::Conflict),
            "errorrate10" => Ok(MockProfile::ErrorRate10),
            "timeout" => Ok(MockProfile::Timeout),
            other => Err(format!("unknown mock profile: {}", other)),
        }
    }
}

/// Seeded hash source shared by the mocks
#[derive(Debug)]
struct Dice {
    seed: u64,
    calls: AtomicU64,
}

impl Dice {
    fn new(seed: u64) -> Self {
        Self {
            seed,
            calls: AtomicU64::new(0),
        }
    }

    fn roll(&self, salt: &str, text: &str) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(salt.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }

    fn pick<'a>(&self, options: &'a [&'a str], salt: &str, text: &str) -> &'a str {
        options[(self.roll(salt, text) % options.len() as u64) as usize]
    }

    /// One in ten calls fails, in a seeded sequence
    fn next_call_fails(&self, salt: &str) -> bool {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        self.roll(salt, &n.to_string()) % 10 == 0
    }

    fn hex_id(&self, salt: &str, text: &str) -> String {
        format!("{:08x}", self.roll(salt, text) & 0xffff_ffff)
    }
}

fn gate(profile: MockProfile, dice: &Dice, salt: &str) -> Result<(), ServiceError> {
    match profile {
        MockProfile::Timeout => Err(ServiceError::Timeout(format!("{}: mock timeout", salt))),
        MockProfile::ErrorRate10 if dice.next_call_fails(salt) => {
            Err(ServiceError::Simulated(format!("{}: mock error", salt)))
        }
        _ => Ok(()),
    }
}

fn mock_attrs(dice: &Dice, partnumber: &str) -> Map<String, Value> {
    let mut attrs = Map::new();
    let package = dice.pick(&["SMD 0603", "SMD 0402", "DIP", "SOT-23"], "package", partnumber);
    attrs.insert("package".into(), Value::from(package));
    attrs
}

/// Catalog mock with search, create and update capabilities
#[derive(Debug)]
pub struct MockCatalog {
    profile: MockProfile,
    dice: Dice,
}

impl MockCatalog {
    pub fn new(profile: MockProfile, seed: u64) -> Self {
        Self {
            profile,
            dice: Dice::new(seed),
        }
    }

    fn item(&self, partnumber: &str, variant: &str) -> Item {
        let key = format!("{}:{}", partnumber, variant);
        Item {
            id: Some(self.dice.hex_id("catalog_id", &key)),
            partnumber: Some(partnumber.to_string()),
            name: Some(partnumber.to_string()),
            brand: Some(self.dice.pick(BRANDS, "catalog_brand", &key).to_string()),
            category: Some(self.dice.pick(CATEGORIES, "category", partnumber).to_string()),
            attrs: mock_attrs(&self.dice, partnumber),
            ..Item::default()
        }
    }
}

#[async_trait]
impl CatalogService for MockCatalog {
    async fn search(&self, partnumber: &str) -> Result<Vec<Item>, ServiceError> {
        gate(self.profile, &self.dice, "catalog_search")?;
        let found = match self.profile {
            MockProfile::Missing => Vec::new(),
            MockProfile::Conflict => vec![self.item(partnumber, "a"), self.item(partnumber, "b")],
            _ if self.dice.roll("catalog_hit", partnumber) % 3 == 0 => {
                vec![self.item(partnumber, "a")]
            }
            _ => Vec::new(),
        };
        Ok(found)
    }
}

#[async_trait]
impl CatalogCreator for MockCatalog {
    async fn create(&self, payload: &CreatePayload) -> Result<Option<Item>, ServiceError> {
        gate(self.profile, &self.dice, "catalog_create")?;
        Ok(Some(Item {
            id: Some(self.dice.hex_id("catalog_id", &payload.partnumber)),
            partnumber: Some(payload.partnumber.clone()),
            name: Some(payload.name.clone()),
            brand: Some(payload.brand.clone()),
            external_id: payload.external_id.clone(),
            gn: payload.gn.clone(),
            vn: payload.vn.clone(),
            category: None,
            attrs: payload.attrs.clone(),
        }))
    }
}

#[async_trait]
impl CatalogUpdater for MockCatalog {
    async fn update(&self, _id: &str, _patch: &ItemPatch) -> Result<bool, ServiceError> {
        gate(self.profile, &self.dice, "catalog_update")?;
        Ok(true)
    }
}

/// Secondary parts database mock
#[derive(Debug)]
pub struct MockSecondary {
    profile: MockProfile,
    dice: Dice,
}

impl MockSecondary {
    pub fn new(profile: MockProfile, seed: u64) -> Self {
        Self {
            profile,
            dice: Dice::new(seed),
        }
    }

    fn candidate(&self, partnumber: &str, variant: &str) -> Item {
        let key = format!("{}:{}", partnumber, variant);
        Item {
            partnumber: Some(partnumber.to_string()),
            brand: Some(self.dice.pick(BRANDS, "secondary_brand", &key).to_string()),
            category: Some(self.dice.pick(CATEGORIES, "category", partnumber).to_string()),
            attrs: mock_attrs(&self.dice, partnumber),
            ..Item::default()
        }
    }
}

#[async_trait]
impl SecondaryLookupService for MockSecondary {
    async fn search(&self, partnumber: &str) -> Result<Vec<Item>, ServiceError> {
        gate(self.profile, &self.dice, "secondary_search")?;
        let candidates = match self.profile {
            MockProfile::Missing => Vec::new(),
            MockProfile::Conflict => {
                vec![self.candidate(partnumber, "a"), self.candidate(partnumber, "b")]
            }
            _ => vec![self.candidate(partnumber, "a")],
        };
        Ok(candidates)
    }
}

/// Classification model mock
#[derive(Debug)]
pub struct MockClassifier {
    dice: Dice,
}

impl MockClassifier {
    pub fn new(seed: u64) -> Self {
        Self { dice: Dice::new(seed) }
    }

    /// Seeded confidence in [0.5, 0.99]
    fn confidence(&self, text: &str) -> f64 {
        0.5 + (self.dice.roll("confidence", text) % 50) as f64 / 100.0
    }
}

#[async_trait]
impl ClassificationService for MockClassifier {
    async fn normalize(&self, text: &str) -> Result<NormalizedText, ServiceError> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut attrs = Map::new();
        attrs.insert(
            "category".into(),
            Value::from(self.dice.pick(CATEGORIES, "category", text)),
        );
        attrs.insert("tokens".into(), Value::from(words.len()));
        attrs.insert("confidence".into(), Value::from(self.confidence(text)));

        Ok(NormalizedText {
            derived_name: Some(words.join(" ")).filter(|name| !name.is_empty()),
            attributes: attrs,
        })
    }

    async fn classify(
        &self,
        group_candidates: &[String],
        subgroup_candidates: &[String],
        text: &str,
    ) -> Result<Classification, ServiceError> {
        let pick = |candidates: &[String], salt: &str| {
            if candidates.is_empty() {
                None
            } else {
                let idx = (self.dice.roll(salt, text) % candidates.len() as u64) as usize;
                Some(candidates[idx].clone())
            }
        };

        Ok(Classification {
            group: pick(group_candidates, "gn"),
            subgroup: pick(subgroup_candidates, "vn"),
            confidence: Some(self.confidence(text)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_parsing() {
        assert_eq!("errorrate10".parse::<MockProfile>(), Ok(MockProfile::ErrorRate10));
        assert_eq!(" Happy ".parse::<MockProfile>(), Ok(MockProfile::Happy));
        assert!("chaos".parse::<MockProfile>().is_err());
    }

    #[tokio::test]
    async fn test_catalog_is_deterministic_per_seed() {
        let a = MockCatalog::new(MockProfile::Happy, 7);
        let b = MockCatalog::new(MockProfile::Happy, 7);
        for pn in ["LM317", "NE555", "ATMEGA328P", "BC547", "1N4148", "STM32F103"] {
            assert_eq!(a.search(pn).await.unwrap(), b.search(pn).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_missing_profile_never_hits() {
        let catalog = MockCatalog::new(MockProfile::Missing, 1);
        let secondary = MockSecondary::new(MockProfile::Missing, 1);
        assert!(catalog.search("LM317").await.unwrap().is_empty());
        assert!(secondary.search("LM317").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_profile_returns_two_items() {
        let catalog = MockCatalog::new(MockProfile::Conflict, 1);
        let found = catalog.search("ABC123").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|item| item.partnumber.as_deref() == Some("ABC123")));
        assert!(found.iter().all(|item| item.id.is_some()));
    }

    #[tokio::test]
    async fn test_timeout_profile_always_fails() {
        let secondary = MockSecondary::new(MockProfile::Timeout, 1);
        let err = secondary.search("ABC123").await.unwrap_err();
        assert_eq!(err.kind(), "Timeout");
    }

    #[tokio::test]
    async fn test_error_rate_profile_fails_some_calls() {
        let catalog = MockCatalog::new(MockProfile::ErrorRate10, 42);
        let mut failures = 0;
        for _ in 0..200 {
            if catalog.search("ABC123").await.is_err() {
                failures += 1;
            }
        }
        assert!(failures > 0 && failures < 60, "failures = {}", failures);
    }

    #[tokio::test]
    async fn test_classifier_is_deterministic_and_bounded() {
        let llm = MockClassifier::new(42);
        let gn = vec!["GN1".to_string(), "GN2".to_string()];
        let vn = vec!["VN1".to_string()];

        let first = llm.classify(&gn, &vn, "10k resistor 0603").await.unwrap();
        let second = llm.classify(&gn, &vn, "10k resistor 0603").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.subgroup.as_deref(), Some("VN1"));
        let confidence = first.confidence.unwrap();
        assert!((0.5..1.0).contains(&confidence));

        let norm = llm.normalize("10k  resistor").await.unwrap();
        assert_eq!(norm.derived_name.as_deref(), Some("10k resistor"));
    }
}
