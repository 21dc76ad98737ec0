use crate::errors::AppError;
use crate::providers::awesomeapi::AWESOMEAPI_BASE_URL;
use crate::providers::brasilapi::BRASILAPI_BASE_URL;
use crate::providers::google::GOOGLE_BASE_URL;
use crate::providers::nominatim::NOMINATIM_BASE_URL;
use crate::providers::opencage::OPENCAGE_BASE_URL;
use crate::providers::DEFAULT_USER_AGENT;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PRIORITY_REGIONS: &[&str] = &[
    "sp_capital",
    "sp_metro",
    "sp_litoral",
    "sp_interior",
    "rj",
    "mg",
    "pr",
];

/// Provider endpoints and credentials.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub google_api_key: Option<String>,
    pub opencage_api_key: Option<String>,
    pub google_base_url: String,
    pub opencage_base_url: String,
    pub nominatim_base_url: String,
    pub brasilapi_base_url: String,
    pub awesomeapi_base_url: String,
    pub nominatim_user_agent: String,
    /// Provider ids turned off explicitly.
    pub disabled: Vec<String>,
    /// Refuse to run without at least one credentialed provider.
    pub require_credentialed: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            google_api_key: None,
            opencage_api_key: None,
            google_base_url: GOOGLE_BASE_URL.to_string(),
            opencage_base_url: OPENCAGE_BASE_URL.to_string(),
            nominatim_base_url: NOMINATIM_BASE_URL.to_string(),
            brasilapi_base_url: BRASILAPI_BASE_URL.to_string(),
            awesomeapi_base_url: AWESOMEAPI_BASE_URL.to_string(),
            nominatim_user_agent: DEFAULT_USER_AGENT.to_string(),
            disabled: Vec::new(),
            require_credentialed: false,
        }
    }
}

impl ProviderConfig {
    pub fn is_disabled(&self, id: &str) -> bool {
        self.disabled.iter().any(|d| d.eq_ignore_ascii_case(id))
    }
}

/// Batch tunables. Snapshotted into every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// In-flight resolutions per sub-batch.
    pub max_concurrency: usize,
    pub batch_size: usize,
    pub sub_batch_size: usize,
    pub batch_delay: Duration,
    pub sub_batch_delay: Duration,
    /// Retries after the first failed call. Applies to record listing,
    /// batch fetches and provider calls alike, so `3` means up to four calls.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Save a checkpoint every this many successes.
    pub checkpoint_interval: u64,
    /// Region codes, home region first.
    pub priority_regions: Vec<String>,
    pub record_limit: i64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            batch_size: 100,
            sub_batch_size: 10,
            batch_delay: Duration::from_millis(2000),
            sub_batch_delay: Duration::from_millis(500),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1000),
            checkpoint_interval: 50,
            priority_regions: DEFAULT_PRIORITY_REGIONS.iter().map(|r| r.to_string()).collect(),
            record_limit: 10_000,
        }
    }
}

/// Admission settings shared by every provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Sliding 60-second cap, kept below the documented quota.
    pub requests_per_minute: usize,
    /// Minimum gap between two admitted calls.
    pub request_delay: Duration,
    /// Consecutive quota/forbidden responses that open a backoff window.
    pub block_threshold: u32,
    pub backoff_duration: Duration,
    /// Retries after the first call, for transient failures and for
    /// explicit retry-after waits. Same meaning as `BatchConfig::max_retries`.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 40,
            request_delay: Duration::from_millis(200),
            block_threshold: 3,
            backoff_duration: Duration::from_secs(300),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1000),
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub providers: ProviderConfig,
    pub batch: BatchConfig,
    pub rate_limit: RateLimitConfig,
    pub checkpoint_path: PathBuf,
    pub cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DB_URL")
            .or_else(|| get("DATABASE_URL"))
            .ok_or_else(|| {
                AppError::Configuration(
                    "DB_URL or DATABASE_URL environment variable required".to_string(),
                )
            })?;
        if !database_url.starts_with("postgresql://") && !database_url.starts_with("postgres://") {
            return Err(AppError::Configuration(
                "DB_URL must start with postgresql:// or postgres://".to_string(),
            ));
        }

        let defaults = ProviderConfig::default();
        let providers = ProviderConfig {
            google_api_key: get("GOOGLE_MAPS_API_KEY"),
            opencage_api_key: get("OPENCAGE_API_KEY"),
            google_base_url: url_or(&get, "GOOGLE_MAPS_BASE_URL", defaults.google_base_url)?,
            opencage_base_url: url_or(&get, "OPENCAGE_BASE_URL", defaults.opencage_base_url)?,
            nominatim_base_url: url_or(&get, "NOMINATIM_BASE_URL", defaults.nominatim_base_url)?,
            brasilapi_base_url: url_or(&get, "BRASILAPI_BASE_URL", defaults.brasilapi_base_url)?,
            awesomeapi_base_url: url_or(&get, "AWESOMEAPI_BASE_URL", defaults.awesomeapi_base_url)?,
            nominatim_user_agent: get("NOMINATIM_USER_AGENT").unwrap_or(defaults.nominatim_user_agent),
            disabled: get("GEOCODE_DISABLED_PROVIDERS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            require_credentialed: parse_or(&get, "GEOCODE_REQUIRE_CREDENTIALED", false)?,
        };

        let batch_defaults = BatchConfig::default();
        let batch = BatchConfig {
            max_concurrency: positive(&get, "GEOCODE_MAX_CONCURRENCY", batch_defaults.max_concurrency)?,
            batch_size: positive(&get, "GEOCODE_BATCH_SIZE", batch_defaults.batch_size)?,
            sub_batch_size: positive(&get, "GEOCODE_SUB_BATCH_SIZE", batch_defaults.sub_batch_size)?,
            batch_delay: millis_or(&get, "GEOCODE_BATCH_DELAY_MS", batch_defaults.batch_delay)?,
            sub_batch_delay: millis_or(&get, "GEOCODE_SUB_BATCH_DELAY_MS", batch_defaults.sub_batch_delay)?,
            max_retries: parse_or(&get, "GEOCODE_MAX_RETRIES", batch_defaults.max_retries)?,
            retry_base_delay: millis_or(&get, "GEOCODE_RETRY_BASE_DELAY_MS", batch_defaults.retry_base_delay)?,
            checkpoint_interval: positive(&get, "GEOCODE_CHECKPOINT_INTERVAL", batch_defaults.checkpoint_interval)?,
            priority_regions: get("GEOCODE_PRIORITY_REGIONS")
                .map(|v| split_list(&v))
                .filter(|list| !list.is_empty())
                .unwrap_or(batch_defaults.priority_regions),
            record_limit: positive(&get, "GEOCODE_RECORD_LIMIT", batch_defaults.record_limit)?,
        };

        let limit_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            requests_per_minute: positive(
                &get,
                "GEOCODE_REQUESTS_PER_MINUTE",
                limit_defaults.requests_per_minute,
            )?,
            request_delay: millis_or(&get, "GEOCODE_REQUEST_DELAY_MS", limit_defaults.request_delay)?,
            backoff_duration: Duration::from_secs(parse_or(
                &get,
                "GEOCODE_BACKOFF_SECS",
                limit_defaults.backoff_duration.as_secs(),
            )?),
            max_retries: batch.max_retries,
            retry_base_delay: batch.retry_base_delay,
            ..limit_defaults
        };

        Ok(Self {
            database_url,
            providers,
            batch,
            rate_limit,
            checkpoint_path: get("GEOCODE_CHECKPOINT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("geocode_checkpoint.json")),
            cache_ttl: Duration::from_secs(parse_or(&get, "GEOCODE_CACHE_TTL_SECS", 2_592_000)?),
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Configuration(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}

fn positive<T, G>(get: &G, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr + PartialOrd + Default,
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, key, default)?;
    if value <= T::default() {
        return Err(AppError::Configuration(format!("{} must be greater than zero", key)));
    }
    Ok(value)
}

fn millis_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration, AppError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_millis() as u64).map(Duration::from_millis)
}

fn url_or<G>(get: &G, key: &str, default: String) -> Result<String, AppError>
where
    G: Fn(&str) -> Option<String>,
{
    let url = get(key).unwrap_or(default);
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(AppError::Configuration(format!(
            "{} must start with http:// or https://",
            key
        )));
    }
    Ok(url)
}
