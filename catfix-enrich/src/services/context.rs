//! Per-invocation service wiring
//!
//! A [`ServiceContext`] is built once per run and shared (behind an `Arc`) by
//! every pipeline task. It owns the service handles, their retry policies, the
//! classification cache and the retry executor carrying the batch
//! cancellation token.
//!
//! Handle methods are the retrying call sites: each wraps one raw service call
//! in [`RetryExecutor::execute`] under the service's own policy and tag.

use super::{
    CatalogClient, CatalogCreator, CatalogService, CatalogUpdater, ClassificationClient,
    ClassificationService, MockCatalog, MockClassifier, MockProfile, MockSecondary,
    SecondaryClient, SecondaryLookupService,
};
use crate::cache::{CacheOperation, ResultCache};
use crate::error::{EnrichError, RetryError};
use crate::types::{Classification, CreatePayload, Item, ItemPatch, NormalizedText};
use crate::utils::{RetryExecutor, RetryPolicy};
use catfix_common::AppConfig;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const TAG_CATALOG_SEARCH: &str = "catalog_search";
pub const TAG_CATALOG_UPDATE: &str = "catalog_update";
pub const TAG_CATALOG_CREATE: &str = "catalog_create";
pub const TAG_SECONDARY_SEARCH: &str = "secondary_search";
pub const TAG_LLM_NORMALIZE: &str = "llm_normalize";
pub const TAG_LLM_CLASSIFY: &str = "llm_classify";

/// Default minimum classification confidence for creating an item
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Catalog search plus optional create/update capabilities
#[derive(Clone)]
pub struct CatalogHandle {
    pub search: Arc<dyn CatalogService>,
    pub creator: Option<Arc<dyn CatalogCreator>>,
    pub updater: Option<Arc<dyn CatalogUpdater>>,
    pub retry: RetryPolicy,
}

impl CatalogHandle {
    /// Read-only catalog (no create, no update)
    pub fn read_only(search: Arc<dyn CatalogService>, retry: RetryPolicy) -> Self {
        Self {
            search,
            creator: None,
            updater: None,
            retry,
        }
    }

    /// Catalog implementing every capability
    pub fn full<C>(catalog: Arc<C>, retry: RetryPolicy) -> Self
    where
        C: CatalogService + CatalogCreator + CatalogUpdater + 'static,
    {
        Self {
            search: catalog.clone(),
            creator: Some(catalog.clone()),
            updater: Some(catalog),
            retry,
        }
    }

    pub fn with_creator(mut self, creator: Arc<dyn CatalogCreator>) -> Self {
        self.creator = Some(creator);
        self
    }

    pub fn with_updater(mut self, updater: Arc<dyn CatalogUpdater>) -> Self {
        self.updater = Some(updater);
        self
    }

    pub async fn search(
        &self,
        executor: &RetryExecutor,
        partnumber: &str,
        errors: &mut Vec<String>,
    ) -> Result<Vec<Item>, RetryError> {
        let service = &self.search;
        executor
            .execute(TAG_CATALOG_SEARCH, &self.retry, Some(errors), move || {
                service.search(partnumber)
            })
            .await
    }

    pub async fn update(
        &self,
        executor: &RetryExecutor,
        updater: &Arc<dyn CatalogUpdater>,
        id: &str,
        patch: &ItemPatch,
        errors: &mut Vec<String>,
    ) -> Result<bool, RetryError> {
        executor
            .execute(TAG_CATALOG_UPDATE, &self.retry, Some(errors), move || {
                updater.update(id, patch)
            })
            .await
    }

    pub async fn create(
        &self,
        executor: &RetryExecutor,
        creator: &Arc<dyn CatalogCreator>,
        payload: &CreatePayload,
        errors: &mut Vec<String>,
    ) -> Result<Option<Item>, RetryError> {
        executor
            .execute(TAG_CATALOG_CREATE, &self.retry, Some(errors), move || creator.create(payload))
            .await
    }
}

/// Secondary parts database
#[derive(Clone)]
pub struct SecondaryHandle {
    pub service: Arc<dyn SecondaryLookupService>,
    pub retry: RetryPolicy,
}

impl SecondaryHandle {
    pub fn new(service: Arc<dyn SecondaryLookupService>, retry: RetryPolicy) -> Self {
        Self { service, retry }
    }

    pub async fn search(
        &self,
        executor: &RetryExecutor,
        partnumber: &str,
        errors: &mut Vec<String>,
    ) -> Result<Vec<Item>, RetryError> {
        let service = &self.service;
        executor
            .execute(TAG_SECONDARY_SEARCH, &self.retry, Some(errors), move || {
                service.search(partnumber)
            })
            .await
    }
}

/// Classification model with its candidate lists and optional result cache
#[derive(Clone)]
pub struct ClassifierHandle {
    pub service: Arc<dyn ClassificationService>,
    pub retry: RetryPolicy,
    pub cache: Option<Arc<ResultCache>>,
    pub group_candidates: Vec<String>,
    pub subgroup_candidates: Vec<String>,
}

impl ClassifierHandle {
    pub fn new(service: Arc<dyn ClassificationService>, retry: RetryPolicy) -> Self {
        Self {
            service,
            retry,
            cache: None,
            group_candidates: Vec::new(),
            subgroup_candidates: Vec::new(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_candidates(mut self, groups: Vec<String>, subgroups: Vec<String>) -> Self {
        self.group_candidates = groups;
        self.subgroup_candidates = subgroups;
        self
    }

    /// Cached, retried `normalize`
    pub async fn normalize(
        &self,
        executor: &RetryExecutor,
        text: &str,
        errors: &mut Vec<String>,
    ) -> Result<NormalizedText, RetryError> {
        if let Some(hit) = self.cached(CacheOperation::Normalize, text) {
            return Ok(hit);
        }

        let service = &self.service;
        let normalized = executor
            .execute(TAG_LLM_NORMALIZE, &self.retry, Some(errors), move || service.normalize(text))
            .await?;

        self.store(CacheOperation::Normalize, text, &normalized);
        Ok(normalized)
    }

    /// Cached, retried `classify` against the configured candidate lists
    ///
    /// The cache entry is keyed on the text and a digest of both lists.
    pub async fn classify(
        &self,
        executor: &RetryExecutor,
        text: &str,
        errors: &mut Vec<String>,
    ) -> Result<Classification, RetryError> {
        let cache_text = format!("{} {}", self.candidates_digest(), text);
        if let Some(hit) = self.cached(CacheOperation::Classify, &cache_text) {
            return Ok(hit);
        }

        let service = &self.service;
        let groups = self.group_candidates.as_slice();
        let subgroups = self.subgroup_candidates.as_slice();
        let classification = executor
            .execute(TAG_LLM_CLASSIFY, &self.retry, Some(errors), move || {
                service.classify(groups, subgroups, text)
            })
            .await?;

        self.store(CacheOperation::Classify, &cache_text, &classification);
        Ok(classification)
    }

    fn candidates_digest(&self) -> String {
        let mut hasher = Sha256::new();
        for group in &self.group_candidates {
            hasher.update(group.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([0xffu8]);
        for subgroup in &self.subgroup_candidates {
            hasher.update(subgroup.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())[..16].to_string()
    }

    fn cached<T: serde::de::DeserializeOwned>(
        &self,
        operation: CacheOperation,
        text: &str,
    ) -> Option<T> {
        self.cache.as_ref()?.get_as(operation, text)
    }

    fn store<T: serde::Serialize>(&self, operation: CacheOperation, text: &str, value: &T) {
        if let Some(cache) = &self.cache {
            cache.put_as(operation, text, value);
        }
    }
}

/// Everything the enrichment pipeline needs to reach external services
#[derive(Clone)]
pub struct ServiceContext {
    pub catalog: CatalogHandle,
    pub secondary: Option<SecondaryHandle>,
    pub classifier: Option<ClassifierHandle>,
    pub confidence_threshold: f64,
    pub executor: RetryExecutor,
}

impl ServiceContext {
    pub fn new(catalog: CatalogHandle) -> Self {
        Self {
            catalog,
            secondary: None,
            classifier: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            executor: RetryExecutor::default(),
        }
    }

    pub fn with_secondary(mut self, secondary: SecondaryHandle) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_classifier(mut self, classifier: ClassifierHandle) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.executor = RetryExecutor::new(cancel);
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        self.executor.cancel_token()
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.classifier.as_ref().and_then(|c| c.cache.as_ref())
    }
}

/// Wire services from configuration: deterministic mocks when `use_mocks`,
/// otherwise HTTP adapters for every configured endpoint
///
/// # Errors
/// `Validation` for an unknown mock profile or a missing catalog endpoint;
/// `Service` when an HTTP client cannot be built
pub fn build_context(
    config: &AppConfig,
    cancel: CancellationToken,
) -> Result<ServiceContext, EnrichError> {
    let catalog_retry = RetryPolicy::from(config.catalog.retry());
    let secondary_retry = RetryPolicy::from(config.secondary.retry());
    let classifier_retry = RetryPolicy::from(config.classification.retry());

    let (catalog, secondary, classifier) = if config.use_mocks {
        let profile: MockProfile = config.mock_profile.parse().map_err(EnrichError::Validation)?;
        info!(profile = %config.mock_profile, seed = config.seed, "Using mock services");

        let catalog =
            CatalogHandle::full(Arc::new(MockCatalog::new(profile, config.seed)), catalog_retry);
        let secondary = SecondaryHandle::new(
            Arc::new(MockSecondary::new(profile, config.seed)),
            secondary_retry,
        );
        let classifier =
            ClassifierHandle::new(Arc::new(MockClassifier::new(config.seed)), classifier_retry);
        (catalog, Some(secondary), Some(classifier))
    } else {
        let catalog =
            CatalogHandle::full(Arc::new(CatalogClient::new(&config.catalog)?), catalog_retry);

        let secondary = if config.secondary.is_configured() {
            Some(SecondaryHandle::new(
                Arc::new(SecondaryClient::new(&config.secondary)?),
                secondary_retry,
            ))
        } else {
            info!("Secondary lookup not configured, fallback brand disabled");
            None
        };

        let classifier = if config.classification.is_configured() {
            Some(ClassifierHandle::new(
                Arc::new(ClassificationClient::new(&config.classification)?),
                classifier_retry,
            ))
        } else {
            info!("Classification service not configured, records will be created unclassified");
            None
        };

        (catalog, secondary, classifier)
    };

    let classifier = classifier.map(|handle| {
        let handle = handle.with_candidates(
            config.group_candidates.clone(),
            config.subgroup_candidates.clone(),
        );
        match ResultCache::from_config(&config.cache) {
            Some(cache) => handle.with_cache(Arc::new(cache)),
            None => handle,
        }
    });

    let mut context = ServiceContext::new(catalog)
        .with_confidence_threshold(config.confidence_threshold)
        .with_cancellation(cancel);
    context.secondary = secondary;
    context.classifier = classifier;

    Ok(context)
}
