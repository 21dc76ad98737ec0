use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

// ============ Geocoding Models ============

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// How precise a provider's answer usually is.
///
/// Ordered from least to most precise so `max()` picks the best tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyTier {
    /// City or state centroid.
    Locality,
    /// Street segment or CEP centroid.
    Street,
    /// Rooftop / interpolated address.
    Address,
}

/// A single geocoding attempt. Transient: built per resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeQuery {
    /// Normalized address text (see `normalizer::build_address_line`).
    pub address: String,
    /// Postal code as given by the caller; only used when it is 8 digits.
    pub postal_code: Option<String>,
    /// Two-letter state (UF) used for state-bound validation.
    pub state_hint: Option<String>,
    /// City name, used by the city-level fallback.
    pub city: Option<String>,
}

impl GeocodeQuery {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            postal_code: None,
            state_hint: None,
            city: None,
        }
    }

    pub fn with_postal_code(mut self, cep: impl Into<String>) -> Self {
        self.postal_code = Some(cep.into());
        self
    }

    pub fn with_state(mut self, uf: impl Into<String>) -> Self {
        self.state_hint = Some(uf.into());
        self
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    /// The postal code cleaned to 8 digits, or `None` when malformed.
    pub fn valid_cep(&self) -> Option<String> {
        self.postal_code
            .as_deref()
            .and_then(crate::normalizer::clean_cep)
    }

    pub fn has_address(&self) -> bool {
        !self.address.trim().is_empty()
    }
}

/// A validated geocoding answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub lat: f64,
    pub lng: f64,
    /// Id of the provider (or `cache` / `static_table`) that produced it.
    pub provider: String,
    pub accuracy: AccuracyTier,
    /// True for city/state-level fallbacks and provider-flagged partial matches.
    pub approximate: bool,
    pub display_text: Option<String>,
}

impl GeocodeResult {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lng)
    }
}

/// Geocoding state of a customer record.
///
/// Transitions only from `Pending` to one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodeStatus {
    Pending,
    Completed,
    Failed,
    Error,
    InvalidCep,
}

impl GeocodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeocodeStatus::Pending => "pending",
            GeocodeStatus::Completed => "completed",
            GeocodeStatus::Failed => "failed",
            GeocodeStatus::Error => "error",
            GeocodeStatus::InvalidCep => "invalid_cep",
        }
    }

    /// Parses a stored status; anything unknown is treated as pending.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" => GeocodeStatus::Completed,
            "failed" => GeocodeStatus::Failed,
            "error" => GeocodeStatus::Error,
            "invalid_cep" => GeocodeStatus::InvalidCep,
            _ => GeocodeStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, GeocodeStatus::Pending)
    }
}

impl fmt::Display for GeocodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A customer record as seen by the geocoding pipeline.
///
/// Owned by the external record store; the pipeline only changes
/// coordinates and status through `CustomerRecordStore::update_coordinates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerGeocodeRecord {
    pub id: String,
    pub name: String,
    pub street: Option<String>,
    pub district: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub status: GeocodeStatus,
    pub region_code: Option<String>,
}

impl CustomerGeocodeRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            street: None,
            district: None,
            city: None,
            state: None,
            postal_code: None,
            coordinates: None,
            status: GeocodeStatus::Pending,
            region_code: None,
        }
    }
}

/// Row shape of the `customers` table.
#[derive(Debug, Clone, FromRow)]
pub struct CustomerRow {
    pub id: String,
    pub name: Option<String>,
    pub street: Option<String>,
    pub district: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub cep: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub geocode_status: Option<String>,
    pub region_code: Option<String>,
}

impl From<CustomerRow> for CustomerGeocodeRecord {
    fn from(row: CustomerRow) -> Self {
        let coordinates = match (row.latitude, row.longitude) {
            (Some(lat), Some(lng)) => Some(Coordinates::new(lat, lng)),
            _ => None,
        };

        Self {
            id: row.id,
            name: row.name.unwrap_or_default(),
            street: row.street,
            district: row.district,
            city: row.city,
            state: row.state,
            postal_code: row.cep,
            coordinates,
            status: row
                .geocode_status
                .as_deref()
                .map(GeocodeStatus::parse)
                .unwrap_or(GeocodeStatus::Pending),
            region_code: row.region_code,
        }
    }
}

/// Aggregate counts reported by the record store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct GeocodeStats {
    pub total: i64,
    pub with_coordinates: i64,
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
    pub invalid_cep: i64,
}

/// A cached resolution. Never mutated: a re-resolution writes a new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CacheEntry {
    pub key: String,
    pub lat: f64,
    pub lng: f64,
    pub provider: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_storage_text() {
        for status in [
            GeocodeStatus::Pending,
            GeocodeStatus::Completed,
            GeocodeStatus::Failed,
            GeocodeStatus::Error,
            GeocodeStatus::InvalidCep,
        ] {
            assert_eq!(GeocodeStatus::parse(status.as_str()), status);
        }
        assert_eq!(GeocodeStatus::parse("???"), GeocodeStatus::Pending);
    }

    #[test]
    fn test_valid_cep_requires_eight_digits() {
        let query = GeocodeQuery::new("RUA AUGUSTA").with_postal_code("01305-100");
        assert_eq!(query.valid_cep().as_deref(), Some("01305100"));

        let query = GeocodeQuery::new("RUA AUGUSTA").with_postal_code("123");
        assert_eq!(query.valid_cep(), None);

        let query = GeocodeQuery::new("RUA AUGUSTA").with_postal_code("0130A100");
        assert_eq!(query.valid_cep(), None);
    }

    #[test]
    fn test_row_without_longitude_has_no_coordinates() {
        let row = CustomerRow {
            id: "c-1".to_string(),
            name: Some("Ana".to_string()),
            street: None,
            district: None,
            city: Some("Santos".to_string()),
            state: Some("SP".to_string()),
            cep: None,
            latitude: Some(-23.9),
            longitude: None,
            geocode_status: Some("failed".to_string()),
            region_code: None,
        };
        let record = CustomerGeocodeRecord::from(row);
        assert_eq!(record.coordinates, None);
        assert_eq!(record.status, GeocodeStatus::Failed);
    }
}
