//! External service interfaces
//!
//! Each trait method is a single raw attempt returning [`ServiceError`] on
//! failure. Retrying, caching and degrade-or-propagate decisions happen at the
//! call sites through [`ServiceContext`].
//!
//! Catalog create and update are separate optional capabilities; whether a
//! run has them is decided once when the context is built.

pub mod catalog_client;
pub mod classification_client;
pub mod context;
mod http;
pub mod mock;
pub mod secondary_client;

pub use catalog_client::CatalogClient;
pub use classification_client::ClassificationClient;
pub use context::{build_context, CatalogHandle, ClassifierHandle, SecondaryHandle, ServiceContext};
pub use mock::{MockCatalog, MockClassifier, MockProfile, MockSecondary};
pub use secondary_client::SecondaryClient;

use crate::error::ServiceError;
use crate::types::{Classification, CreatePayload, Item, ItemPatch, NormalizedText};
use async_trait::async_trait;

/// Catalog read path
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Items matching `partnumber`; empty when nothing matches
    async fn search(&self, partnumber: &str) -> Result<Vec<Item>, ServiceError>;
}

/// Optional catalog capability: create items
#[async_trait]
pub trait CatalogCreator: Send + Sync {
    /// Created item, or `None` when the catalog acknowledged without a body
    async fn create(&self, payload: &CreatePayload) -> Result<Option<Item>, ServiceError>;
}

/// Optional catalog capability: patch existing items
#[async_trait]
pub trait CatalogUpdater: Send + Sync {
    /// `false` when the catalog does not know `id`
    async fn update(&self, id: &str, patch: &ItemPatch) -> Result<bool, ServiceError>;
}

/// Secondary parts database (fallback brand source)
#[async_trait]
pub trait SecondaryLookupService: Send + Sync {
    async fn search(&self, partnumber: &str) -> Result<Vec<Item>, ServiceError>;
}

/// Classification model
#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn normalize(&self, text: &str) -> Result<NormalizedText, ServiceError>;

    async fn classify(
        &self,
        group_candidates: &[String],
        subgroup_candidates: &[String],
        text: &str,
    ) -> Result<Classification, ServiceError>;
}
