//! HTTP catalog adapter
//!
//! Wire contract:
//! - `GET {base}/products?partnumber=` → 200 with a JSON list of items; any other
//!   status is an empty result
//! - `POST {base}/products` → 200/201 with the created item (or an empty body)
//! - `PATCH {base}/products/{id}` → 2xx applied, 404 unknown id; the id is
//!   percent-encoded as a single path segment
//!
//! Transport failures (timeout, connection) are errors on every path so that
//! the retry executor can retry them.

use super::http::{status_error, HttpEndpoint};
use super::{CatalogCreator, CatalogService, CatalogUpdater};
use crate::error::{EnrichError, ServiceError};
use crate::types::{CreatePayload, Item, ItemPatch};
use async_trait::async_trait;
use catfix_common::ServiceConfig;
use reqwest::{Method, StatusCode};
use tracing::debug;

pub struct CatalogClient {
    endpoint: HttpEndpoint,
}

impl CatalogClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, EnrichError> {
        let endpoint = HttpEndpoint::from_config("catalog", config)?;
        debug!(base_url = endpoint.base_url(), "Catalog client configured");
        Ok(Self { endpoint })
    }
}

#[async_trait]
impl CatalogService for CatalogClient {
    async fn search(&self, partnumber: &str) -> Result<Vec<Item>, ServiceError> {
        let response = self
            .endpoint
            .request(Method::GET, &["products"])
            .await?
            .query(&[("partnumber", partnumber)])
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            debug!(
                partnumber,
                status = response.status().as_u16(),
                "Catalog search returned no results"
            );
            return Ok(Vec::new());
        }

        Ok(response.json::<Vec<Item>>().await?)
    }
}

#[async_trait]
impl CatalogCreator for CatalogClient {
    async fn create(&self, payload: &CreatePayload) -> Result<Option<Item>, ServiceError> {
        let response = self
            .endpoint
            .request(Method::POST, &["products"])
            .await?
            .json(payload)
            .send()
            .await?;

        if !matches!(response.status(), StatusCode::OK | StatusCode::CREATED) {
            return Err(status_error(response).await);
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice::<Item>(&body)
            .map(Some)
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CatalogUpdater for CatalogClient {
    async fn update(&self, id: &str, patch: &ItemPatch) -> Result<bool, ServiceError> {
        let response = self
            .endpoint
            .request(Method::PATCH, &["products", id])
            .await?
            .json(patch)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(response).await),
        }
    }
}
