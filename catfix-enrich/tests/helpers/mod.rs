//! Test Helper Utilities
//!
//! Scriptable fake services that count their calls and record what they were
//! sent, plus context builders with fast retry policies.

#![allow(dead_code)]

use async_trait::async_trait;
use catfix_enrich::error::ServiceError;
use catfix_enrich::services::{
    CatalogCreator, CatalogHandle, CatalogService, CatalogUpdater, ClassificationService,
    ClassifierHandle, SecondaryHandle, SecondaryLookupService, ServiceContext,
};
use catfix_enrich::types::{Classification, CreatePayload, Item, ItemPatch, NormalizedText};
use catfix_enrich::{BackoffConfig, RetryPolicy};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 3 attempts, delays 10 ms then 20 ms, no jitter
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, BackoffConfig::new(10, 40, 0))
}

pub fn catalog_item(id: &str, partnumber: &str, brand: &str) -> Item {
    Item {
        id: Some(id.to_string()),
        partnumber: Some(partnumber.to_string()),
        brand: Some(brand.to_string()),
        ..Item::default()
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// What `update` answers
#[derive(Debug, Clone, Copy)]
pub enum UpdateBehavior {
    Applied,
    UnknownId,
    Fails,
}

pub struct FakeCatalog {
    items: HashMap<String, Vec<Item>>,
    search_fails: bool,
    create_failures_left: AtomicU32,
    update_behavior: UpdateBehavior,
    panic_on: Option<String>,
    delays: HashMap<String, Duration>,
    cancel_on_search: Option<(usize, CancellationToken)>,

    pub search_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub created: Mutex<Vec<CreatePayload>>,
    pub patches: Mutex<Vec<(String, ItemPatch)>>,

    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Default for FakeCatalog {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            search_fails: false,
            create_failures_left: AtomicU32::new(0),
            update_behavior: UpdateBehavior::Applied,
            panic_on: None,
            delays: HashMap::new(),
            cancel_on_search: None,
            search_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
            patches: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, item: Item) -> Self {
        let key = item.partnumber.clone().unwrap_or_default();
        self.items.entry(key).or_default().push(item);
        self
    }

    pub fn with_failing_search(mut self) -> Self {
        self.search_fails = true;
        self
    }

    /// The first `count` create calls fail with a connection error
    pub fn with_create_failures(self, count: u32) -> Self {
        self.create_failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_update(mut self, behavior: UpdateBehavior) -> Self {
        self.update_behavior = behavior;
        self
    }

    /// Searching `partnumber` panics
    pub fn with_panic_on(mut self, partnumber: &str) -> Self {
        self.panic_on = Some(partnumber.to_string());
        self
    }

    /// Searching `partnumber` takes `delay`
    pub fn with_delay(mut self, partnumber: &str, delay: Duration) -> Self {
        self.delays.insert(partnumber.to_string(), delay);
        self
    }

    /// The `nth` search call (1-based) cancels `token` before answering
    pub fn cancelling_on_search(mut self, nth: usize, token: CancellationToken) -> Self {
        self.cancel_on_search = Some((nth, token));
        self
    }

    pub fn searches(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogService for FakeCatalog {
    async fn search(&self, partnumber: &str) -> Result<Vec<Item>, ServiceError> {
        let call = self.search_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(partnumber) {
            tokio::time::sleep(*delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panic_on.as_deref() == Some(partnumber) {
            panic!("fake catalog exploded on {}", partnumber);
        }
        if let Some((nth, token)) = &self.cancel_on_search {
            if call == *nth {
                token.cancel();
            }
        }
        if self.search_fails {
            return Err(ServiceError::Timeout("fake search timeout".into()));
        }
        Ok(self.items.get(partnumber).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl CatalogCreator for FakeCatalog {
    async fn create(&self, payload: &CreatePayload) -> Result<Option<Item>, ServiceError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .create_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ServiceError::Connection("fake create refused".into()));
        }

        self.created.lock().unwrap().push(payload.clone());
        Ok(Some(Item {
            id: Some(format!("new-{}", payload.partnumber)),
            partnumber: Some(payload.partnumber.clone()),
            brand: Some(payload.brand.clone()),
            ..Item::default()
        }))
    }
}

#[async_trait]
impl CatalogUpdater for FakeCatalog {
    async fn update(&self, id: &str, patch: &ItemPatch) -> Result<bool, ServiceError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        match self.update_behavior {
            UpdateBehavior::Applied => {
                self.patches.lock().unwrap().push((id.to_string(), patch.clone()));
                Ok(true)
            }
            UpdateBehavior::UnknownId => Ok(false),
            UpdateBehavior::Fails => Err(ServiceError::Status {
                status: 503,
                body: "unavailable".into(),
            }),
        }
    }
}

// ============================================================================
// Secondary lookup
// ============================================================================

#[derive(Default)]
pub struct FakeSecondary {
    items: Vec<Item>,
    pub calls: AtomicUsize,
}

impl FakeSecondary {
    pub fn with_brands(brands: &[&str]) -> Self {
        Self {
            items: brands
                .iter()
                .map(|brand| Item {
                    brand: Some(brand.to_string()),
                    ..Item::default()
                })
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SecondaryLookupService for FakeSecondary {
    async fn search(&self, _partnumber: &str) -> Result<Vec<Item>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.items.clone())
    }
}

// ============================================================================
// Classification
// ============================================================================

pub struct FakeClassifier {
    confidence: Option<f64>,
    fails: bool,
    pub normalize_calls: AtomicUsize,
    pub classify_calls: AtomicUsize,
    pub texts: Mutex<Vec<String>>,
}

impl FakeClassifier {
    /// Classifies every text as `GN-1`/`VN-1` with `confidence`
    pub fn with_confidence(confidence: Option<f64>) -> Self {
        Self {
            confidence,
            fails: false,
            normalize_calls: AtomicUsize::new(0),
            classify_calls: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with a 500
    pub fn failing() -> Self {
        Self {
            fails: true,
            ..Self::with_confidence(None)
        }
    }

    pub fn normalizations(&self) -> usize {
        self.normalize_calls.load(Ordering::SeqCst)
    }

    pub fn classifications(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }
}

fn fake_attrs() -> Map<String, Value> {
    match json!({"package": "TO-220"}) {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl ClassificationService for FakeClassifier {
    async fn normalize(&self, text: &str) -> Result<NormalizedText, ServiceError> {
        self.normalize_calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().push(text.to_string());
        if self.fails {
            return Err(ServiceError::Status {
                status: 500,
                body: "model down".into(),
            });
        }
        Ok(NormalizedText {
            derived_name: Some(format!("Regulator {}", text)),
            attributes: fake_attrs(),
        })
    }

    async fn classify(
        &self,
        _group_candidates: &[String],
        _subgroup_candidates: &[String],
        _text: &str,
    ) -> Result<Classification, ServiceError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        if self.fails {
            return Err(ServiceError::Status {
                status: 500,
                body: "model down".into(),
            });
        }
        Ok(Classification {
            group: Some("GN-1".into()),
            subgroup: Some("VN-1".into()),
            confidence: self.confidence,
        })
    }
}

// ============================================================================
// Context builders
// ============================================================================

/// Catalog with every capability, no secondary, no classifier
pub fn catalog_context(catalog: &Arc<FakeCatalog>) -> ServiceContext {
    ServiceContext::new(CatalogHandle::full(catalog.clone(), fast_retry()))
}

/// Catalog plus classifier
pub fn classified_context(
    catalog: &Arc<FakeCatalog>,
    classifier: &Arc<FakeClassifier>,
) -> ServiceContext {
    catalog_context(catalog)
        .with_classifier(ClassifierHandle::new(classifier.clone(), fast_retry()))
}

pub fn secondary_handle(secondary: &Arc<FakeSecondary>) -> SecondaryHandle {
    SecondaryHandle::new(secondary.clone(), fast_retry())
}
