//! Geocoding provider contract and the concrete HTTP clients.
//!
//! Every provider is a black box behind [`GeocodingProvider`]: it turns a
//! [`GeocodeQuery`] into an optional [`ProviderHit`]. Quota, blocking and
//! transient failures are reported through [`AppError`] variants so the
//! rate limiter can react to them; a plain "nothing found" is `Ok(None)`.

pub mod awesomeapi;
pub mod brasilapi;
pub mod google;
pub mod nominatim;
pub mod opencage;

use crate::errors::AppError;
use crate::models::{AccuracyTier, GeocodeQuery};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use std::time::Duration;

pub use awesomeapi::AwesomeApiProvider;
pub use brasilapi::BrasilApiProvider;
pub use google::GoogleProvider;
pub use nominatim::NominatimProvider;
pub use opencage::OpenCageProvider;

pub const DEFAULT_USER_AGENT: &str = concat!("cep-geocoder/", env!("CARGO_PKG_VERSION"));

/// Per-call timeout used when a provider is built without an explicit one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which inputs a provider can work from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Free-text address only.
    Address,
    /// CEP only (CEP lookup services).
    PostalCode,
    /// Either; a CEP is used as an extra filter when present.
    Both,
}

/// Static metadata the registry orders providers by.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub id: String,
    /// Execution order within a tier group; lower runs first.
    pub priority: u32,
    pub accuracy: AccuracyTier,
    /// Country/region the provider specializes in (e.g. `"BR"`), if any.
    pub region_affinity: Option<String>,
    pub requires_credential: bool,
    pub query_kind: QueryKind,
    /// Minimum delay between two calls to this provider.
    pub min_interval: Duration,
    /// Maximum in-flight calls to this provider.
    pub max_concurrency: usize,
    /// Per-call timeout applied by the HTTP client.
    pub timeout: Duration,
    /// Results with a confidence below this are rejected (0.0–1.0).
    pub min_confidence: Option<f64>,
}

impl ProviderDescriptor {
    pub fn is_cep_specific(&self) -> bool {
        self.query_kind == QueryKind::PostalCode
    }

    /// Whether this provider has something to work with for the query.
    pub fn accepts(&self, query: &GeocodeQuery) -> bool {
        match self.query_kind {
            QueryKind::PostalCode => query.valid_cep().is_some(),
            QueryKind::Address => query.has_address(),
            QueryKind::Both => query.has_address() || query.valid_cep().is_some(),
        }
    }
}

/// Raw provider answer, before geographic validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderHit {
    pub lat: f64,
    pub lng: f64,
    pub display_text: Option<String>,
    /// Normalized 0.0–1.0 confidence when the provider exposes one.
    pub confidence: Option<f64>,
    pub approximate: bool,
}

#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// Geocodes the query. `Ok(None)` means the provider found nothing.
    async fn geocode(&self, query: &GeocodeQuery) -> Result<Option<ProviderHit>, AppError>;
}

/// Builds the HTTP client shared by a provider, with its per-call timeout.
pub(crate) fn build_client(timeout: Duration, user_agent: &str) -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// Parses a `Retry-After` header given in seconds.
pub(crate) fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Maps a non-success response to the error taxonomy.
///
/// Returns the response untouched when it is a success, `Ok(None)`-worthy
/// 404s are left to the caller.
pub(crate) async fn check_status(provider: &str, response: Response) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let wait = retry_after(&response);
        tracing::warn!("{} returned 429 (retry after {:?})", provider, wait);
        return Err(AppError::RateLimited {
            provider: provider.to_string(),
            retry_after: wait,
        });
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
        return Err(AppError::Blocked(format!(
            "{} returned {}: {}",
            provider, status, body
        )));
    }
    if status.is_server_error() {
        return Err(AppError::TransientProvider(format!(
            "{} returned {}: {}",
            provider, status, body
        )));
    }
    Err(AppError::ExternalApiError(format!(
        "{} returned {}: {}",
        provider, status, body
    )))
}

/// Parses a coordinate that providers send either as a JSON number or a string.
pub(crate) fn parse_coordinate(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}
