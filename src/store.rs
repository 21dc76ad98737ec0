//! Customer record store: where records to geocode come from and where
//! results go.

use crate::errors::{AppError, ResultExt};
use crate::models::{Coordinates, CustomerGeocodeRecord, CustomerRow, GeocodeStats, GeocodeStatus};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;

#[async_trait]
pub trait CustomerRecordStore: Send + Sync {
    /// Pending records, up to `limit`. Terminal statuses are never listed.
    async fn list_geocodable(&self, limit: i64) -> Result<Vec<CustomerGeocodeRecord>, AppError>;

    /// Current state of the given records. Missing ids are omitted.
    async fn fetch_records(&self, ids: &[String]) -> Result<Vec<CustomerGeocodeRecord>, AppError>;

    /// Stores the outcome for one record. `None` keeps the stored coordinates.
    /// Safe to call concurrently for distinct ids.
    async fn update_coordinates(
        &self,
        id: &str,
        coordinates: Option<Coordinates>,
        status: GeocodeStatus,
    ) -> Result<(), AppError>;

    async fn get_stats(&self) -> Result<GeocodeStats, AppError>;
}

const CUSTOMER_COLUMNS: &str =
    "id, name, street, district, city, state, cep, latitude, longitude, geocode_status, region_code";

/// Store over the `customers` table.
#[derive(Clone)]
pub struct PgCustomerStore {
    pool: PgPool,
}

impl PgCustomerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerRecordStore for PgCustomerStore {
    async fn list_geocodable(&self, limit: i64) -> Result<Vec<CustomerGeocodeRecord>, AppError> {
        let rows = sqlx::query_as::<_, CustomerRow>(&format!(
            r#"
            SELECT {}
            FROM customers
            WHERE COALESCE(geocode_status, 'pending') = 'pending'
            ORDER BY id
            LIMIT $1
            "#,
            CUSTOMER_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("listing geocodable customers")?;

        tracing::info!("Found {} customers to geocode", rows.len());
        Ok(rows.into_iter().map(CustomerGeocodeRecord::from).collect())
    }

    async fn fetch_records(&self, ids: &[String]) -> Result<Vec<CustomerGeocodeRecord>, AppError> {
        let rows = sqlx::query_as::<_, CustomerRow>(&format!(
            "SELECT {} FROM customers WHERE id = ANY($1)",
            CUSTOMER_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("fetching batch of {} customers", ids.len()))?;

        Ok(rows.into_iter().map(CustomerGeocodeRecord::from).collect())
    }

    async fn update_coordinates(
        &self,
        id: &str,
        coordinates: Option<Coordinates>,
        status: GeocodeStatus,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE customers
            SET latitude = COALESCE($2, latitude),
                longitude = COALESCE($3, longitude),
                geocode_status = $4,
                geocoded_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(coordinates.map(|c| c.lat))
        .bind(coordinates.map(|c| c.lng))
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("updating coordinates of customer {}", id))?;
        Ok(())
    }

    async fn get_stats(&self) -> Result<GeocodeStats, AppError> {
        let stats = sqlx::query_as::<_, GeocodeStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE latitude IS NOT NULL AND longitude IS NOT NULL) AS with_coordinates,
                COUNT(*) FILTER (WHERE COALESCE(geocode_status, 'pending') = 'pending') AS pending,
                COUNT(*) FILTER (WHERE geocode_status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE geocode_status IN ('failed', 'error')) AS failed,
                COUNT(*) FILTER (WHERE geocode_status = 'invalid_cep') AS invalid_cep
            FROM customers
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("reading geocode stats")?;
        Ok(stats)
    }
}

/// In-memory store keyed by record id.
#[derive(Debug, Default)]
pub struct MemoryCustomerStore {
    records: std::sync::Mutex<HashMap<String, CustomerGeocodeRecord>>,
}

impl MemoryCustomerStore {
    pub fn new(records: impl IntoIterator<Item = CustomerGeocodeRecord>) -> Self {
        Self {
            records: std::sync::Mutex::new(
                records.into_iter().map(|r| (r.id.clone(), r)).collect(),
            ),
        }
    }

    pub fn get(&self, id: &str) -> Option<CustomerGeocodeRecord> {
        self.lock().ok()?.get(id).cloned()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, CustomerGeocodeRecord>>, AppError> {
        self.records
            .lock()
            .map_err(|_| AppError::InternalError("record store poisoned".to_string()))
    }
}

#[async_trait]
impl CustomerRecordStore for MemoryCustomerStore {
    async fn list_geocodable(&self, limit: i64) -> Result<Vec<CustomerGeocodeRecord>, AppError> {
        let records = self.lock()?;
        let mut pending: Vec<CustomerGeocodeRecord> = records
            .values()
            .filter(|r| r.status == GeocodeStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.id.cmp(&b.id));
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }

    async fn fetch_records(&self, ids: &[String]) -> Result<Vec<CustomerGeocodeRecord>, AppError> {
        let records = self.lock()?;
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn update_coordinates(
        &self,
        id: &str,
        coordinates: Option<Coordinates>,
        status: GeocodeStatus,
    ) -> Result<(), AppError> {
        let mut records = self.lock()?;
        let record = records
            .get_mut(id)
            .ok_or_else(|| AppError::InternalError(format!("unknown customer {}", id)))?;
        if coordinates.is_some() {
            record.coordinates = coordinates;
        }
        record.status = status;
        Ok(())
    }

    async fn get_stats(&self) -> Result<GeocodeStats, AppError> {
        let records = self.lock()?;
        let mut stats = GeocodeStats::default();
        for record in records.values() {
            stats.total += 1;
            if record.coordinates.is_some() {
                stats.with_coordinates += 1;
            }
            match record.status {
                GeocodeStatus::Pending => stats.pending += 1,
                GeocodeStatus::Completed => stats.completed += 1,
                GeocodeStatus::Failed | GeocodeStatus::Error => stats.failed += 1,
                GeocodeStatus::InvalidCep => stats.invalid_cep += 1,
            }
        }
        Ok(stats)
    }
}
