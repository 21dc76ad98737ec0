use super::{build_client, check_status, parse_coordinate, GeocodingProvider, ProviderDescriptor, ProviderHit, QueryKind};
use super::{DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};
use crate::errors::AppError;
use crate::models::{AccuracyTier, GeocodeQuery};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

pub const BRASILAPI_BASE_URL: &str = "https://brasilapi.com.br";

#[derive(Debug, Deserialize)]
struct CepResponse {
    street: Option<String>,
    neighborhood: Option<String>,
    city: Option<String>,
    state: Option<String>,
    location: Option<CepLocation>,
}

#[derive(Debug, Deserialize)]
struct CepLocation {
    #[serde(default)]
    coordinates: serde_json::Value,
}

/// BrasilAPI CEP v2 lookup. Only some CEPs carry coordinates.
pub struct BrasilApiProvider {
    client: Client,
    base_url: String,
    descriptor: ProviderDescriptor,
}

impl BrasilApiProvider {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        let descriptor = ProviderDescriptor {
            id: "brasilapi".to_string(),
            priority: 3,
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
impl GeocodingProvider for BrasilApiProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn geocode(&self, query: &GeocodeQuery) -> Result<Option<ProviderHit>, AppError> {
        let Some(cep) = query.valid_cep() else {
            return Ok(None);
        };

        let url = format!("{}/api/cep/v2/{}", self.base_url, cep);
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("brasilapi: CEP {} not found", cep);
            return Ok(None);
        }
        let response = check_status(self.id(), response).await?;
        let body: CepResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse BrasilAPI response: {}", e))
        })?;

        let coordinates = body.location.as_ref().map(|l| &l.coordinates);
        let lat = coordinates.and_then(|c| c.get("latitude")).and_then(parse_coordinate);
        let lng = coordinates.and_then(|c| c.get("longitude")).and_then(parse_coordinate);
        let (Some(lat), Some(lng)) = (lat, lng) else {
            tracing::debug!("brasilapi: CEP {} has no coordinates", cep);
            return Ok(None);
        };

        let display_text = [body.street, body.neighborhood, body.city, body.state]
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
