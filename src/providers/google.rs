use super::{build_client, check_status, GeocodingProvider, ProviderDescriptor, ProviderHit, QueryKind};
use super::{DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};
use crate::errors::AppError;
use crate::models::{AccuracyTier, GeocodeQuery};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const GOOGLE_BASE_URL: &str = "https://maps.googleapis.com";

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    status: String,
    #[serde(default)]
    results: Vec<GoogleResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleResult {
    formatted_address: Option<String>,
    geometry: GoogleGeometry,
    #[serde(default)]
    partial_match: bool,
}

#[derive(Debug, Deserialize)]
struct GoogleGeometry {
    location: GoogleLocation,
    location_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleLocation {
    lat: f64,
    lng: f64,
}

/// Google Maps Geocoding API.
pub struct GoogleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    descriptor: ProviderDescriptor,
}

impl GoogleProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, AppError> {
        let descriptor = ProviderDescriptor {
            id: "google".to_string(),
            priority: 1,
            accuracy: AccuracyTier::Address,
            region_affinity: None,
            requires_credential: true,
            query_kind: QueryKind::Both,
            min_interval: Duration::from_millis(50),
            max_concurrency: 5,
            timeout: DEFAULT_TIMEOUT,
            min_confidence: None,
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
impl GeocodingProvider for GoogleProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn geocode(&self, query: &GeocodeQuery) -> Result<Option<ProviderHit>, AppError> {
        let cep = query.valid_cep();
        let address = if query.has_address() {
            query.address.clone()
        } else {
            match &cep {
                Some(cep) => cep.clone(),
                None => return Ok(None),
            }
        };

        let mut components = "country:BR".to_string();
        if let Some(cep) = &cep {
            components.push_str(&format!("|postal_code:{}", cep));
        }

        let url = reqwest::Url::parse_with_params(
            &format!("{}/maps/api/geocode/json", self.base_url),
            &[
                ("address", address.as_str()),
                ("components", components.as_str()),
                ("region", "br"),
                ("language", "pt-BR"),
                ("key", self.api_key.as_str()),
            ],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        tracing::debug!("Google geocode request for '{}' (key=[REDACTED])", address);

        let response = self.client.get(url).send().await?;
        let response = check_status(self.id(), response).await?;
        let body: GoogleResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Google response: {}", e))
        })?;

        let detail = body.error_message.unwrap_or_default();
        match body.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" => return Ok(None),
            "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" => {
                return Err(AppError::RateLimited {
                    provider: self.id().to_string(),
                    retry_after: None,
                })
            }
            "REQUEST_DENIED" => {
                return Err(AppError::Blocked(format!("google denied request: {}", detail)))
            }
            "UNKNOWN_ERROR" => {
                return Err(AppError::TransientProvider(format!("google: {}", detail)))
            }
            other => {
                return Err(AppError::ExternalApiError(format!(
                    "google returned status {}: {}",
                    other, detail
                )))
            }
        }

        Ok(body.results.into_iter().next().map(|result| {
            let approximate = result.partial_match
                || result.geometry.location_type.as_deref() == Some("APPROXIMATE");
            ProviderHit {
                lat: result.geometry.location.lat,
                lng: result.geometry.location.lng,
                display_text: result.formatted_address,
                confidence: None,
                approximate,
            }
        }))
    }
}
