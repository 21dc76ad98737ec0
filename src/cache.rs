//! Cache of resolved coordinates, keyed by `normalizer::cache_key`.
//!
//! Entries are written only after geographic validation. Readers still
//! re-validate every hit: the bounds may have been tightened since the entry
//! was written, and a persistent backend may hold rows from older runs.

use crate::errors::{AppError, ResultExt};
use crate::models::CacheEntry;
use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache;
use sqlx::PgPool;
use std::time::Duration;

#[async_trait]
pub trait GeocodeCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, AppError>;

    /// Stores a validated result, replacing any previous entry for the key.
    async fn set(&self, key: &str, lat: f64, lng: f64, provider: &str) -> Result<(), AppError>;

    /// Drops an entry that failed re-validation.
    async fn invalidate(&self, key: &str) -> Result<(), AppError>;
}

/// In-process cache with a TTL and a capacity bound.
#[derive(Clone)]
pub struct MemoryGeocodeCache {
    entries: Cache<String, CacheEntry>,
}

impl MemoryGeocodeCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            entries: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

impl Default for MemoryGeocodeCache {
    fn default() -> Self {
        // 30 days, 100k addresses
        Self::new(Duration::from_secs(2_592_000), 100_000)
    }
}

#[async_trait]
impl GeocodeCache for MemoryGeocodeCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, AppError> {
        Ok(self.entries.get(key).await)
    }

    async fn set(&self, key: &str, lat: f64, lng: f64, provider: &str) -> Result<(), AppError> {
        let entry = CacheEntry {
            key: key.to_string(),
            lat,
            lng,
            provider: provider.to_string(),
            created_at: Utc::now(),
        };
        self.entries.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), AppError> {
        self.entries.invalidate(key).await;
        Ok(())
    }
}

/// Cache persisted in the `geocode_cache` table so results survive runs.
#[derive(Clone)]
pub struct PgGeocodeCache {
    pool: PgPool,
    ttl: Duration,
}

impl PgGeocodeCache {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS geocode_cache (
                key TEXT PRIMARY KEY,
                lat DOUBLE PRECISION NOT NULL,
                lng DOUBLE PRECISION NOT NULL,
                provider TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating geocode_cache table")?;
        Ok(())
    }
}

#[async_trait]
impl GeocodeCache for PgGeocodeCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, AppError> {
        let max_age = self.ttl.as_secs_f64();
        let entry = sqlx::query_as::<_, CacheEntry>(
            r#"
            SELECT key, lat, lng, provider, created_at
            FROM geocode_cache
            WHERE key = $1
              AND created_at > now() - make_interval(secs => $2)
            "#,
        )
        .bind(key)
        .bind(max_age)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("reading geocode cache for '{}'", key))?;
        Ok(entry)
    }

    async fn set(&self, key: &str, lat: f64, lng: f64, provider: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO geocode_cache (key, lat, lng, provider, created_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (key) DO UPDATE
            SET lat = EXCLUDED.lat,
                lng = EXCLUDED.lng,
                provider = EXCLUDED.provider,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(key)
        .bind(lat)
        .bind(lng)
        .bind(provider)
        .execute(&self.pool)
        .await
        .with_context(|| format!("writing geocode cache for '{}'", key))?;
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM geocode_cache WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("invalidating geocode cache entry")?;
        Ok(())
    }
}
