//! HTTP adapter for the secondary parts database
//!
//! `GET {base}/search?q={partnumber}` → 200 with a JSON list of candidates.
//! Any other status, or a 200 whose body is not a list, is an empty result.

use super::http::HttpEndpoint;
use super::SecondaryLookupService;
use crate::error::{EnrichError, ServiceError};
use crate::types::Item;
use async_trait::async_trait;
use catfix_common::ServiceConfig;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::debug;

pub struct SecondaryClient {
    endpoint: HttpEndpoint,
}

impl SecondaryClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, EnrichError> {
        let endpoint = HttpEndpoint::from_config("secondary", config)?;
        debug!(base_url = endpoint.base_url(), "Secondary lookup client configured");
        Ok(Self { endpoint })
    }
}

#[async_trait]
impl SecondaryLookupService for SecondaryClient {
    async fn search(&self, partnumber: &str) -> Result<Vec<Item>, ServiceError> {
        let response = self
            .endpoint
            .request(Method::GET, &["search"])
            .await?
            .query(&[("q", partnumber)])
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Ok(Vec::new());
        }

        match response.json::<Value>().await? {
            Value::Array(entries) => Ok(entries
                .into_iter()
                .filter_map(|entry| serde_json::from_value::<Item>(entry).ok())
                .collect()),
            _ => Ok(Vec::new()),
        }
    }
}
