use super::{build_client, check_status, parse_coordinate, GeocodingProvider, ProviderDescriptor, ProviderHit, QueryKind};
use super::DEFAULT_TIMEOUT;
use crate::errors::AppError;
use crate::models::{AccuracyTier, GeocodeQuery};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const NOMINATIM_BASE_URL: &str = "https://nominatim.openstreetmap.org";

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: serde_json::Value,
    lon: serde_json::Value,
    display_name: Option<String>,
    #[serde(default)]
    addresstype: Option<String>,
}

/// OpenStreetMap Nominatim. The usage policy allows one request per second
/// and requires an identifying User-Agent.
pub struct NominatimProvider {
    client: Client,
    base_url: String,
    descriptor: ProviderDescriptor,
}

impl NominatimProvider {
    pub fn new(base_url: impl Into<String>, user_agent: &str) -> Result<Self, AppError> {
        if user_agent.trim().is_empty() {
            return Err(AppError::Configuration(
                "Nominatim requires a non-empty User-Agent".to_string(),
            ));
        }

        let descriptor = ProviderDescriptor {
            id: "nominatim".to_string(),
            priority: 5,
            accuracy: AccuracyTier::Locality,
            region_affinity: None,
            requires_credential: false,
            query_kind: QueryKind::Address,
            min_interval: Duration::from_secs(1),
            max_concurrency: 1,
            timeout: DEFAULT_TIMEOUT,
            min_confidence: None,
        };

        Ok(Self {
            client: build_client(descriptor.timeout, user_agent)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            descriptor,
        })
    }
}

#[async_trait]
impl GeocodingProvider for NominatimProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn geocode(&self, query: &GeocodeQuery) -> Result<Option<ProviderHit>, AppError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/search", self.base_url),
            &[
                ("q", query.address.as_str()),
                ("format", "jsonv2"),
                ("countrycodes", "br"),
                ("limit", "1"),
            ],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        let response = self.client.get(url).send().await?;
        let response = check_status(self.id(), response).await?;
        let places: Vec<NominatimPlace> = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Nominatim response: {}", e))
        })?;

        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };
        let (Some(lat), Some(lng)) = (parse_coordinate(&place.lat), parse_coordinate(&place.lon))
        else {
            tracing::warn!("Nominatim returned a place without usable coordinates");
            return Ok(None);
        };

        let approximate = matches!(
            place.addresstype.as_deref(),
            Some("city" | "town" | "municipality" | "state" | "county")
        );

        Ok(Some(ProviderHit {
            lat,
            lng,
            display_text: place.display_name,
            confidence: None,
            approximate,
        }))
    }
}
