//! Enrichment Pipeline
//!
//! Per-record state machine deciding whether a part is created, updated or
//! skipped in the catalog.
//!
//! # States
//! ```text
//! Start → CatalogSearch ─┬─ found ─────→ Reconcile ──────────────────────┐
//!                        └─ not found ─→ SecondaryLookup → Classify → Create ─┤
//!                                                                            ↓
//!                                    Terminal{create, update, skip, conflict, error}
//! ```
//!
//! # Error Handling
//! - Read paths (catalog search, secondary lookup) degrade on retry exhaustion
//! - Classification exhaustion appends `llm:RetryExhausted` and continues unclassified
//! - Write paths (update, create) surface exhaustion as a `conflict` decision
//! - Cancellation is the only error that escapes [`EnrichmentPipeline::process`];
//!   it carries the partially annotated record, which the batch runner turns
//!   into `error/row_failed:Cancelled`

use crate::error::{EnrichError, RecordFailure, RetryError};
use crate::services::ServiceContext;
use crate::types::{Action, CreatePayload, Decision, Item, ItemPatch, Lookup, Reason, Record};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pipeline position of a record
#[derive(Debug)]
enum Stage {
    Start,
    CatalogSearch,
    Reconcile(Item),
    SecondaryLookup,
    Classify { fallback_brand: Option<String> },
    Create {
        fallback_brand: Option<String>,
        enrichment: Enrichment,
    },
    Terminal(Decision),
}

/// Classification output carried into the create step
#[derive(Debug, Default)]
struct Enrichment {
    derived_name: Option<String>,
    attributes: Map<String, Value>,
    group: Option<String>,
    subgroup: Option<String>,
}

enum ClassifyOutcome {
    Proceed(Enrichment),
    LowConfidence,
}

/// Map a retried list read onto [`Lookup`]; only cancellation stays an error
fn into_lookup<T>(result: Result<Vec<T>, RetryError>) -> Result<Lookup<Vec<T>>, RetryError> {
    match result {
        Ok(items) if items.is_empty() => Ok(Lookup::NotFound),
        Ok(items) => Ok(Lookup::Found(items)),
        Err(RetryError::Exhausted { last_error, .. }) => {
            Ok(Lookup::Failed(last_error.kind().to_string()))
        }
        Err(err) => Err(err),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Field-level differences between an input record and a catalog item
///
/// Brand is patched only when both sides carry one and they differ; the other
/// fields whenever the input has a value that differs from the catalog.
pub fn build_patch(record: &Record, item: &Item) -> ItemPatch {
    let differs = |input: &str, existing: &str| {
        let input = input.trim();
        (!input.is_empty() && input != existing.trim()).then(|| input.to_string())
    };

    let brand = record.brand.trim();
    ItemPatch {
        brand: if !item.brand().trim().is_empty() {
            differs(brand, item.brand())
        } else {
            None
        },
        external_id: differs(&record.external_id, item.external_id()),
        gn: differs(&record.gn, item.gn()),
        vn: differs(&record.vn, item.vn()),
    }
}

/// Per-record enrichment state machine
#[derive(Clone)]
pub struct EnrichmentPipeline {
    ctx: Arc<ServiceContext>,
}

impl EnrichmentPipeline {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.ctx
    }

    /// Drive one record to a terminal decision
    ///
    /// # Errors
    /// Only batch cancellation escapes; every service failure is resolved into
    /// a decision or an `errors` annotation
    pub async fn process(&self, mut record: Record) -> Result<Record, RecordFailure> {
        match self.drive(&mut record).await {
            Ok(()) => Ok(record),
            Err(error) => Err(RecordFailure {
                record: Box::new(record),
                error,
            }),
        }
    }

    async fn drive(&self, record: &mut Record) -> Result<(), EnrichError> {
        let mut stage = Stage::Start;

        loop {
            stage = match stage {
                Stage::Start => {
                    record.partnumber = record.partnumber.trim().to_string();
                    if record.partnumber.is_empty() {
                        Stage::Terminal(Decision::skip(Reason::NoPartnumber))
                    } else {
                        Stage::CatalogSearch
                    }
                }

                Stage::CatalogSearch => {
                    let lookup = self.search_catalog(record).await?;
                    match lookup {
                        Lookup::Found(mut items) => {
                            record.found_in_catalog = Some(true);
                            if items.len() > 1 {
                                debug!(
                                    partnumber = %record.partnumber,
                                    matches = items.len(),
                                    "Multiple catalog matches, reconciling against the first"
                                );
                            }
                            Stage::Reconcile(items.swap_remove(0))
                        }
                        Lookup::NotFound | Lookup::Failed(_) => {
                            record.found_in_catalog = Some(false);
                            Stage::SecondaryLookup
                        }
                    }
                }

                Stage::Reconcile(item) => Stage::Terminal(self.reconcile(record, &item).await?),

                Stage::SecondaryLookup => Stage::Classify {
                    fallback_brand: self.fallback_brand(record).await?,
                },

                Stage::Classify { fallback_brand } => match self.classify(record).await? {
                    ClassifyOutcome::LowConfidence => {
                        Stage::Terminal(Decision::skip(Reason::LowConfidence))
                    }
                    ClassifyOutcome::Proceed(enrichment) => Stage::Create {
                        fallback_brand,
                        enrichment,
                    },
                },

                Stage::Create {
                    fallback_brand,
                    enrichment,
                } => Stage::Terminal(self.create(record, fallback_brand, enrichment).await?),

                Stage::Terminal(decision) => {
                    record.found_in_catalog.get_or_insert(false);
                    info!(
                        partnumber = %record.partnumber,
                        action = %decision.action,
                        reason = %decision.reason,
                        "Record decided"
                    );
                    record.decision = Some(decision);
                    return Ok(());
                }
            };
        }
    }

    async fn search_catalog(&self, record: &mut Record) -> Result<Lookup<Vec<Item>>, RetryError> {
        let partnumber = record.partnumber.clone();
        let result = self
            .ctx
            .catalog
            .search(&self.ctx.executor, &partnumber, &mut record.errors)
            .await;

        let lookup = into_lookup(result)?;
        if let Lookup::Failed(kind) = &lookup {
            warn!(
                partnumber = %partnumber,
                error_kind = %kind,
                "Catalog search exhausted retries, treating part as not found"
            );
        }
        Ok(lookup)
    }

    async fn reconcile(&self, record: &mut Record, item: &Item) -> Result<Decision, RetryError> {
        let patch = build_patch(record, item);
        if patch.is_empty() {
            return Ok(Decision::skip(Reason::AlreadyPresent));
        }

        let Some(updater) = &self.ctx.catalog.updater else {
            debug!(partnumber = %record.partnumber, "Catalog has no update capability");
            return Ok(Decision::conflict(Reason::UpdateNotSupported));
        };

        let Some(id) = item.id.as_deref() else {
            warn!(partnumber = %record.partnumber, "Catalog item has no id, cannot update");
            return Ok(Decision::conflict(Reason::UpdateFailed));
        };

        let result = self
            .ctx
            .catalog
            .update(&self.ctx.executor, updater, id, &patch, &mut record.errors)
            .await;

        match result {
            Ok(true) => {
                info!(
                    partnumber = %record.partnumber,
                    id,
                    fields = ?patch.fields(),
                    "Catalog item updated"
                );
                let reason = if patch.only_brand() {
                    Reason::BrandMismatch
                } else {
                    Reason::FieldsMismatch
                };
                Ok(Decision::new(Action::Update, reason))
            }
            Ok(false) => {
                warn!(
                    partnumber = %record.partnumber,
                    id,
                    "Catalog rejected update for unknown id"
                );
                Ok(Decision::conflict(Reason::UpdateFailed))
            }
            Err(RetryError::Exhausted { .. }) => Ok(Decision::conflict(Reason::UpdateFailed)),
            Err(err) => Err(err),
        }
    }

    /// Brand of the first secondary candidate, if any
    async fn fallback_brand(&self, record: &mut Record) -> Result<Option<String>, RetryError> {
        let Some(secondary) = &self.ctx.secondary else {
            return Ok(None);
        };

        let partnumber = record.partnumber.clone();
        let result = secondary
            .search(&self.ctx.executor, &partnumber, &mut record.errors)
            .await;

        match into_lookup(result)? {
            Lookup::Found(candidates) => {
                debug!(
                    partnumber = %partnumber,
                    candidates = candidates.len(),
                    "Secondary candidates"
                );
                Ok(candidates.first().and_then(|c| non_empty(c.brand())))
            }
            Lookup::NotFound => Ok(None),
            Lookup::Failed(kind) => {
                warn!(
                    partnumber = %partnumber,
                    error_kind = %kind,
                    "Secondary lookup exhausted retries"
                );
                Ok(None)
            }
        }
    }

    async fn classify(&self, record: &mut Record) -> Result<ClassifyOutcome, RetryError> {
        let Some(classifier) = &self.ctx.classifier else {
            return Ok(ClassifyOutcome::Proceed(Enrichment::default()));
        };

        let text = format!("{} {}", record.partnumber, record.brand.trim())
            .trim()
            .to_string();

        let result = classifier.normalize(&self.ctx.executor, &text, &mut record.errors).await;
        let normalized = match result {
            Ok(normalized) => normalized,
            Err(RetryError::Exhausted { .. }) => {
                return Ok(self.unclassified(record, Enrichment::default()))
            }
            Err(err) => return Err(err),
        };

        let mut enrichment = Enrichment {
            derived_name: normalized.derived_name.as_deref().and_then(non_empty),
            attributes: normalized.attributes,
            ..Enrichment::default()
        };
        if !enrichment.attributes.is_empty() {
            record.attrs_norm = Some(enrichment.attributes.clone());
        }

        let result = classifier.classify(&self.ctx.executor, &text, &mut record.errors).await;
        let classification = match result {
            Ok(classification) => classification,
            Err(RetryError::Exhausted { .. }) => return Ok(self.unclassified(record, enrichment)),
            Err(err) => return Err(err),
        };

        let Some(confidence) = classification.clamped_confidence() else {
            debug!(
                partnumber = %record.partnumber,
                "Classifier reported no confidence, creating unclassified"
            );
            return Ok(ClassifyOutcome::Proceed(enrichment));
        };
        record.confidence = Some(confidence);

        if confidence < self.ctx.confidence_threshold {
            info!(
                partnumber = %record.partnumber,
                confidence,
                threshold = self.ctx.confidence_threshold,
                "Classification below confidence threshold"
            );
            return Ok(ClassifyOutcome::LowConfidence);
        }

        enrichment.group = classification.group.as_deref().and_then(non_empty);
        enrichment.subgroup = classification.subgroup.as_deref().and_then(non_empty);
        if let Some(group) = &enrichment.group {
            record.gn = group.clone();
        }
        if let Some(subgroup) = &enrichment.subgroup {
            record.vn = subgroup.clone();
        }

        debug!(
            partnumber = %record.partnumber,
            gn = ?enrichment.group,
            vn = ?enrichment.subgroup,
            confidence,
            "Classified"
        );
        Ok(ClassifyOutcome::Proceed(enrichment))
    }

    fn unclassified(&self, record: &mut Record, enrichment: Enrichment) -> ClassifyOutcome {
        warn!(
            partnumber = %record.partnumber,
            "Classification exhausted retries, continuing unclassified"
        );
        record.errors.push("llm:RetryExhausted".to_string());
        record.confidence = None;
        ClassifyOutcome::Proceed(enrichment)
    }

    async fn create(
        &self,
        record: &mut Record,
        fallback_brand: Option<String>,
        enrichment: Enrichment,
    ) -> Result<Decision, RetryError> {
        let Some(creator) = &self.ctx.catalog.creator else {
            debug!(partnumber = %record.partnumber, "Catalog has no create capability");
            return Ok(Decision::skip(Reason::NotFound));
        };

        let brand = non_empty(&record.brand).or(fallback_brand).unwrap_or_default();
        let payload = CreatePayload {
            partnumber: record.partnumber.clone(),
            name: enrichment
                .derived_name
                .unwrap_or_else(|| record.partnumber.clone()),
            brand,
            attrs: enrichment.attributes,
            external_id: non_empty(&record.external_id),
            gn: enrichment.group,
            vn: enrichment.subgroup,
        };

        let result = self
            .ctx
            .catalog
            .create(&self.ctx.executor, creator, &payload, &mut record.errors)
            .await;

        match result {
            Ok(created) => {
                info!(
                    partnumber = %payload.partnumber,
                    brand = %payload.brand,
                    id = created.as_ref().and_then(|item| item.id.as_deref()).unwrap_or(""),
                    "Catalog item created"
                );
                Ok(Decision::new(Action::Create, Reason::NotFound))
            }
            Err(RetryError::Exhausted { .. }) => Ok(Decision::conflict(Reason::CreateFailed)),
            Err(err) => Err(err),
        }
    }
}
