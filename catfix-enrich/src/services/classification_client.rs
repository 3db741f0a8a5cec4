//! HTTP adapter for the classification model
//!
//! - `POST {base}/normalize {"text"}` → `{"local_name", "attrs"}`
//! - `POST {base}/classify {"text", "gn_candidates", "vn_candidates"}` →
//!   `{"gn", "vn", "confidence"}`
//!
//! Unlike the read paths, a non-success status here is an error and is retried.

use super::http::{status_error, HttpEndpoint};
use super::ClassificationService;
use crate::error::{EnrichError, ServiceError};
use crate::types::{Classification, NormalizedText};
use async_trait::async_trait;
use catfix_common::ServiceConfig;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[derive(Serialize)]
struct NormalizeRequest<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
    gn_candidates: &'a [String],
    vn_candidates: &'a [String],
}

pub struct ClassificationClient {
    endpoint: HttpEndpoint,
}

impl ClassificationClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, EnrichError> {
        let endpoint = HttpEndpoint::from_config("classification", config)?;
        debug!(base_url = endpoint.base_url(), "Classification client configured");
        Ok(Self { endpoint })
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        segment: &str,
        body: &B,
    ) -> Result<T, ServiceError> {
        let response = self
            .endpoint
            .request(Method::POST, &[segment])
            .await?
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ClassificationService for ClassificationClient {
    async fn normalize(&self, text: &str) -> Result<NormalizedText, ServiceError> {
        self.post("normalize", &NormalizeRequest { text }).await
    }

    async fn classify(
        &self,
        group_candidates: &[String],
        subgroup_candidates: &[String],
        text: &str,
    ) -> Result<Classification, ServiceError> {
        let request = ClassifyRequest {
            text,
            gn_candidates: group_candidates,
            vn_candidates: subgroup_candidates,
        };
        self.post("classify", &request).await
    }
}
