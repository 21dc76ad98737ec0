use super::{build_client, check_status, retry_after, GeocodingProvider, ProviderDescriptor, ProviderHit, QueryKind};
use super::{DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};
use crate::errors::AppError;
use crate::models::{AccuracyTier, GeocodeQuery};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

pub const OPENCAGE_BASE_URL: &str = "https://api.opencagedata.com";

#[derive(Debug, Deserialize)]
struct OpenCageResponse {
    #[serde(default)]
    results: Vec<OpenCageResult>,
}

#[derive(Debug, Deserialize)]
struct OpenCageResult {
    /// 1 (worst) to 10 (best), 0 when unknown.
    #[serde(default)]
    confidence: u8,
    formatted: Option<String>,
    geometry: OpenCageGeometry,
}

#[derive(Debug, Deserialize)]
struct OpenCageGeometry {
    lat: f64,
    lng: f64,
}

/// OpenCage forward geocoding.
pub struct OpenCageProvider {
    client: Client,
    base_url: String,
    api_key: String,
    descriptor: ProviderDescriptor,
}

impl OpenCageProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, AppError> {
        let descriptor = ProviderDescriptor {
            id: "opencage".to_string(),
            priority: 2,
            accuracy: AccuracyTier::Address,
            region_affinity: None,
            requires_credential: true,
            query_kind: QueryKind::Address,
            min_interval: Duration::from_millis(1000),
            max_concurrency: 1,
            timeout: DEFAULT_TIMEOUT,
            min_confidence: Some(0.5),
        };

        Ok(Self {
            client: build_client(descriptor.timeout, DEFAULT_USER_AGENT)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            descriptor,
        })
    }
}

#[async_trait]
impl GeocodingProvider for OpenCageProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn geocode(&self, query: &GeocodeQuery) -> Result<Option<ProviderHit>, AppError> {
        let text = match query.valid_cep() {
            Some(cep) => format!("{}, {}", query.address, cep),
            None => query.address.clone(),
        };

        let url = reqwest::Url::parse_with_params(
            &format!("{}/geocode/v1/json", self.base_url),
            &[
                ("q", text.as_str()),
                ("key", self.api_key.as_str()),
                ("countrycode", "br"),
                ("language", "pt-BR"),
                ("limit", "1"),
                ("no_annotations", "1"),
            ],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        tracing::debug!("OpenCage geocode request for '{}' (key=[REDACTED])", text);

        let response = self.client.get(url).send().await?;
        // 402 is OpenCage's "daily quota exhausted".
        if response.status() == StatusCode::PAYMENT_REQUIRED {
            return Err(AppError::RateLimited {
                provider: self.id().to_string(),
                retry_after: retry_after(&response),
            });
        }
        let response = check_status(self.id(), response).await?;
        let body: OpenCageResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse OpenCage response: {}", e))
        })?;

        Ok(body.results.into_iter().next().map(|result| ProviderHit {
            lat: result.geometry.lat,
            lng: result.geometry.lng,
            display_text: result.formatted,
            confidence: Some(f64::from(result.confidence) / 10.0),
            approximate: result.confidence < 5,
        }))
    }
}
