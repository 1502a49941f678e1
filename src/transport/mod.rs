//! Collaborator boundaries: the inference endpoint and the pricing catalog
//!
//! The orchestration layer only ever sees two abstract capabilities: invoke a
//! model with a JSON body, and fetch raw pricing records for a model name.
//! The reqwest-backed implementations here are the production defaults; tests
//! substitute in-memory fakes.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("inference endpoint returned {status}: {message}")]
    Endpoint { status: u16, message: String },

    #[error("pricing lookup failed: {0}")]
    Pricing(String),
}

/// Invoke a model on the inference endpoint.
///
/// The model identifier is passed through unmodified; the body is the
/// family-specific payload an adapter built. Implementations return the
/// parsed JSON response body.
#[async_trait]
pub trait InferenceTransport: Send + Sync {
    async fn invoke(&self, model_id: &str, body: &Value) -> Result<Value, TransportError>;
}

/// Fetch raw pricing records for a model name in a region.
///
/// Records come back unparsed; the pricing service owns the interpretation.
#[async_trait]
pub trait PricingSource: Send + Sync {
    async fn fetch_products(
        &self,
        service_code: &str,
        model_name: &str,
        region: &str,
    ) -> Result<Vec<Value>, TransportError>;
}

/// HTTP transport against a Bedrock-style runtime endpoint.
pub struct HttpInferenceTransport {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpInferenceTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl InferenceTransport for HttpInferenceTransport {
    async fn invoke(&self, model_id: &str, body: &Value) -> Result<Value, TransportError> {
        let url = format!(
            "{}/model/{}/invoke",
            self.base_url.trim_end_matches('/'),
            model_id
        );

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);

        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            Err(TransportError::Endpoint { status, message })
        }
    }
}

/// HTTP pricing source against a price-list query endpoint.
///
/// Sends a `GetProducts`-shaped request and returns the `PriceList` entries
/// verbatim for the pricing service to parse.
pub struct HttpPricingSource {
    client: Client,
    endpoint: String,
}

impl HttpPricingSource {
    /// Pricing catalogs are only published from us-east-1.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.pricing.us-east-1.amazonaws.com";

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Default for HttpPricingSource {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ENDPOINT)
    }
}

#[async_trait]
impl PricingSource for HttpPricingSource {
    async fn fetch_products(
        &self,
        service_code: &str,
        model_name: &str,
        region: &str,
    ) -> Result<Vec<Value>, TransportError> {
        let body = json!({
            "ServiceCode": service_code,
            "Filters": [
                {"Type": "TERM_MATCH", "Field": "model", "Value": model_name},
                {"Type": "TERM_MATCH", "Field": "regionCode", "Value": region},
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/x-amz-json-1.1")
            .header("X-Amz-Target", "AWSPriceListService.GetProducts")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Pricing(format!("{status}: {message}")));
        }

        let payload: Value = response.json().await?;
        let entries = payload["PriceList"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(entries)
    }
}
