use super::{build_client, check_status, parse_coordinate, GeocodingProvider, ProviderDescriptor, ProviderHit, QueryKind};
use super::{DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};
use crate::errors::AppError;
use crate::models::{AccuracyTier, GeocodeQuery};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

pub const AWESOMEAPI_BASE_URL: &str = "https://cep.awesomeapi.com.br";

#[derive(Debug, Deserialize)]
struct AwesomeCep {
    #[serde(default)]
    lat: serde_json::Value,
    #[serde(default)]
    lng: serde_json::Value,
    address: Option<String>,
    district: Option<String>,
    city: Option<String>,
    state: Option<String>,
}

/// AwesomeAPI CEP lookup. Coordinates come back as strings.
pub struct AwesomeApiProvider {
    client: Client,
    base_url: String,
    descriptor: ProviderDescriptor,
}

impl AwesomeApiProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        let descriptor = ProviderDescriptor {
            id: "awesomeapi".to_string(),
            priority: 4,
            accuracy: AccuracyTier::Street,
            region_affinity: Some("BR".to_string()),
            requires_credential: false,
            query_kind: QueryKind::PostalCode,
            min_interval: Duration::from_millis(200),
            max_concurrency: 3,
            timeout: DEFAULT_TIMEOUT,
            min_confidence: None,
        };

        Ok(Self {
            client: build_client(descriptor.timeout, DEFAULT_USER_AGENT)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            descriptor,
        })
    }
}

#[async_trait]
impl GeocodingProvider for AwesomeApiProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn geocode(&self, query: &GeocodeQuery) -> Result<Option<ProviderHit>, AppError> {
        let Some(cep) = query.valid_cep() else {
            return Ok(None);
        };

        let response = self
            .client
            .get(format!("{}/json/{}", self.base_url, cep))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(self.id(), response).await?;
        let body: AwesomeCep = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse AwesomeAPI response: {}", e))
        })?;

        let (Some(lat), Some(lng)) = (parse_coordinate(&body.lat), parse_coordinate(&body.lng)) else {
            return Ok(None);
        };

        let display_text = [body.address, body.district, body.city, body.state]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        Ok(Some(ProviderHit {
            lat,
            lng,
            display_text: Some(display_text).filter(|t| !t.is_empty()),
            confidence: None,
            approximate: false,
        }))
    }
}
