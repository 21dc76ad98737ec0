//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use cep_geocoder::cache::MemoryGeocodeCache;
use cep_geocoder::config::RateLimitConfig;
use cep_geocoder::errors::AppError;
use cep_geocoder::models::{AccuracyTier, GeocodeQuery};
use cep_geocoder::providers::{GeocodingProvider, ProviderDescriptor, ProviderHit, QueryKind};
use cep_geocoder::rate_limiter::RateLimiter;
use cep_geocoder::registry::ProviderRegistry;
use cep_geocoder::resolver::GeocodeResolver;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Answer = Box<dyn Fn(&GeocodeQuery) -> Result<Option<ProviderHit>, AppError> + Send + Sync>;

/// Provider answering from a closure and recording every query it sees.
pub struct ScriptedProvider {
    descriptor: ProviderDescriptor,
    answer: Answer,
    calls: AtomicUsize,
    seen: Mutex<Vec<GeocodeQuery>>,
}

impl ScriptedProvider {
    pub fn new<F>(id: &str, kind: QueryKind, priority: u32, answer: F) -> Arc<Self>
    where
        F: Fn(&GeocodeQuery) -> Result<Option<ProviderHit>, AppError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            descriptor: ProviderDescriptor {
                id: id.to_string(),
                priority,
                accuracy: if kind == QueryKind::PostalCode {
                    AccuracyTier::Street
                } else {
                    AccuracyTier::Address
                },
                region_affinity: Some("BR".to_string()),
                requires_credential: false,
                query_kind: kind,
                min_interval: Duration::ZERO,
                max_concurrency: 8,
                timeout: Duration::from_secs(5),
                min_confidence: None,
            },
            answer: Box::new(answer),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<GeocodeQuery> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl GeocodingProvider for ScriptedProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn geocode(&self, query: &GeocodeQuery) -> Result<Option<ProviderHit>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(query.clone());
        (self.answer)(query)
    }
}

pub fn hit(lat: f64, lng: f64) -> Result<Option<ProviderHit>, AppError> {
    Ok(Some(ProviderHit {
        lat,
        lng,
        display_text: None,
        confidence: None,
        approximate: false,
    }))
}

/// Plausible coordinates for the state in the query, `None` elsewhere.
pub fn by_state(query: &GeocodeQuery) -> Result<Option<ProviderHit>, AppError> {
    match query.state_hint.as_deref() {
        Some("SP") => hit(-23.5505, -46.6333),
        Some("RJ") => hit(-22.9068, -43.1729),
        Some("MG") => hit(-19.9167, -43.9345),
        _ => Ok(None),
    }
}

/// Limiter with no spacing and a generous window.
pub fn fast_limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(RateLimitConfig {
        requests_per_minute: 100_000,
        request_delay: Duration::ZERO,
        block_threshold: 3,
        backoff_duration: Duration::from_secs(300),
        max_retries: 1,
        retry_base_delay: Duration::from_millis(1),
        max_retry_delay: Duration::from_millis(5),
    }))
}

pub fn resolver_with(providers: Vec<Arc<ScriptedProvider>>) -> Arc<GeocodeResolver> {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(provider);
    }
    Arc::new(GeocodeResolver::new(
        registry,
        fast_limiter(),
        Arc::new(MemoryGeocodeCache::default()),
    ))
}
