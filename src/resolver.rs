//! Per-record resolution: cache, provider cascade, fallbacks.
//!
//! [`GeocodeResolver::resolve`] never fails. Provider errors, quota
//! signals, open circuits and validation rejections are all misses; the
//! cascade moves on to the next provider. When every provider misses, the
//! resolver tries a city-level query and finally the static city table.

use crate::cache::GeocodeCache;
use crate::circuit_breaker::ProviderBreakers;
use crate::city_table::{self, STATIC_TABLE_PROVIDER};
use crate::errors::AppError;
use crate::models::{AccuracyTier, GeocodeQuery, GeocodeResult};
use crate::normalizer::{cache_key, normalize_state, normalize_text};
use crate::providers::{GeocodingProvider, ProviderDescriptor, ProviderHit};
use crate::rate_limiter::RateLimiter;
use crate::registry::ProviderRegistry;
use crate::validator::GeographicValidator;
use failsafe::futures::CircuitBreaker;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What happened when one provider was tried.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success,
    /// Provider answered but found nothing.
    Miss,
    /// Provider answered with coordinates that failed validation.
    Rejected(String),
    /// Provider failed; carries the error kind.
    Error(&'static str),
    /// Circuit open, provider not called.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct ProviderAttempt {
    pub provider: String,
    pub latency: Duration,
    pub outcome: AttemptOutcome,
}

/// Result of one resolution with the trail of provider attempts.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub result: Option<GeocodeResult>,
    pub from_cache: bool,
    pub attempts: Vec<ProviderAttempt>,
}

pub struct GeocodeResolver {
    registry: ProviderRegistry,
    limiter: Arc<RateLimiter>,
    cache: Arc<dyn GeocodeCache>,
    validator: GeographicValidator,
    breakers: ProviderBreakers,
}

impl GeocodeResolver {
    pub fn new(
        registry: ProviderRegistry,
        limiter: Arc<RateLimiter>,
        cache: Arc<dyn GeocodeCache>,
    ) -> Self {
        let breakers = ProviderBreakers::new(registry.ids());
        Self {
            registry,
            limiter,
            cache,
            validator: GeographicValidator::new(),
            breakers,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn resolve(&self, query: &GeocodeQuery) -> Option<GeocodeResult> {
        self.resolve_detailed(query).await.result
    }

    pub async fn resolve_detailed(&self, query: &GeocodeQuery) -> Resolution {
        let mut resolution = Resolution::default();
        let state_hint = query.state_hint.as_deref();
        let key = cache_key(query);

        if !key.is_empty() {
            if let Some(result) = self.cached(&key, state_hint).await {
                resolution.result = Some(result);
                resolution.from_cache = true;
                return resolution;
            }
        }

        let providers = self.registry.ordered_for(query);
        if let Some((hit, descriptor)) = self
            .cascade(&providers, query, &mut resolution.attempts)
            .await
        {
            let result = GeocodeResult {
                lat: hit.lat,
                lng: hit.lng,
                provider: descriptor.id.clone(),
                accuracy: descriptor.accuracy,
                approximate: hit.approximate,
                display_text: hit.display_text,
            };
            self.remember(&key, &result).await;
            resolution.result = Some(result);
            return resolution;
        }

        if let Some(result) = self.fallback(query, &mut resolution.attempts).await {
            self.remember(&key, &result).await;
            resolution.result = Some(result);
        }
        resolution
    }

    /// Writes a validated result through to the cache.
    async fn remember(&self, key: &str, result: &GeocodeResult) {
        if key.is_empty() {
            return;
        }
        if let Err(e) = self.cache.set(key, result.lat, result.lng, &result.provider).await {
            tracing::warn!("Failed to write geocode cache: {}", e);
        }
    }

    async fn cached(&self, key: &str, state_hint: Option<&str>) -> Option<GeocodeResult> {
        let entry = match self.cache.get(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!("Geocode cache read failed, treating as miss: {}", e);
                return None;
            }
        };

        if !self.validator.validate(entry.lat, entry.lng, state_hint) {
            tracing::warn!(
                "Cached coordinates for '{}' no longer valid, re-resolving: {}",
                key,
                self.validator
                    .rejection_reason(entry.lat, entry.lng, state_hint)
                    .unwrap_or_default()
            );
            if let Err(e) = self.cache.invalidate(key).await {
                tracing::warn!("Failed to invalidate cache entry: {}", e);
            }
            return None;
        }

        tracing::debug!("Cache hit for '{}' ({})", key, entry.provider);
        let accuracy = self
            .registry
            .descriptors()
            .find(|d| d.id == entry.provider)
            .map(|d| d.accuracy)
            .unwrap_or(AccuracyTier::Locality);

        Some(GeocodeResult {
            lat: entry.lat,
            lng: entry.lng,
            approximate: entry.provider == STATIC_TABLE_PROVIDER,
            provider: entry.provider,
            accuracy,
            display_text: None,
        })
    }

    /// Tries providers in order; the first validated hit wins.
    async fn cascade(
        &self,
        providers: &[Arc<dyn GeocodingProvider>],
        query: &GeocodeQuery,
        attempts: &mut Vec<ProviderAttempt>,
    ) -> Option<(ProviderHit, ProviderDescriptor)> {
        let state_hint = query.state_hint.as_deref();

        for provider in providers {
            let descriptor = provider.descriptor();
            let started = Instant::now();
            let outcome = self.call(provider.as_ref(), query).await;
            let latency = started.elapsed();

            let outcome = match outcome {
                Ok(Some(hit)) => match self.check_hit(&hit, descriptor, state_hint) {
                    Ok(()) => {
                        tracing::debug!("{} resolved '{}' in {:?}", descriptor.id, query.address, latency);
                        attempts.push(ProviderAttempt {
                            provider: descriptor.id.clone(),
                            latency,
                            outcome: AttemptOutcome::Success,
                        });
                        return Some((hit, descriptor.clone()));
                    }
                    Err(reason) => {
                        tracing::warn!("{} result rejected: {}", descriptor.id, reason);
                        AttemptOutcome::Rejected(reason)
                    }
                },
                Ok(None) => {
                    tracing::debug!("{} found nothing for '{}'", descriptor.id, query.address);
                    AttemptOutcome::Miss
                }
                Err(AppError::CircuitOpen(_)) => {
                    tracing::debug!("{} circuit open, skipping", descriptor.id);
                    AttemptOutcome::Skipped
                }
                Err(e) => {
                    tracing::warn!("{} failed, continuing cascade: {}", descriptor.id, e);
                    AttemptOutcome::Error(e.kind())
                }
            };

            attempts.push(ProviderAttempt {
                provider: descriptor.id.clone(),
                latency,
                outcome,
            });
        }

        None
    }

    /// One provider call under its circuit breaker and the rate limiter.
    async fn call(
        &self,
        provider: &dyn GeocodingProvider,
        query: &GeocodeQuery,
    ) -> Result<Option<ProviderHit>, AppError> {
        let descriptor = provider.descriptor();
        let guarded = self
            .limiter
            .execute(descriptor, || provider.geocode(query));

        let Some(breaker) = self.breakers.get(&descriptor.id) else {
            return guarded.await;
        };
        // An open breaker must not consume a limiter slot.
        if !breaker.is_call_permitted() {
            return Err(AppError::CircuitOpen(descriptor.id.clone()));
        }
        match breaker.call(guarded).await {
            Ok(hit) => Ok(hit),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => Err(AppError::CircuitOpen(descriptor.id.clone())),
        }
    }

    fn check_hit(
        &self,
        hit: &ProviderHit,
        descriptor: &ProviderDescriptor,
        state_hint: Option<&str>,
    ) -> Result<(), String> {
        if let (Some(min), Some(confidence)) = (descriptor.min_confidence, hit.confidence) {
            if confidence < min {
                return Err(format!("confidence {:.2} below {:.2}", confidence, min));
            }
        }
        match self.validator.rejection_reason(hit.lat, hit.lng, state_hint) {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    /// City-level query through address providers, then the static table.
    async fn fallback(
        &self,
        query: &GeocodeQuery,
        attempts: &mut Vec<ProviderAttempt>,
    ) -> Option<GeocodeResult> {
        let city = query.city.as_deref().filter(|c| !c.trim().is_empty())?;
        let state = query.state_hint.as_deref();

        let mut line = normalize_text(city);
        if let Some(uf) = state.and_then(normalize_state) {
            line = format!("{}, {}", line, uf);
        }
        let mut city_query = GeocodeQuery::new(line);
        city_query.state_hint = query.state_hint.clone();

        tracing::debug!("Cascade exhausted, trying city-level query '{}'", city_query.address);
        let providers = self.registry.address_capable();
        if let Some((hit, descriptor)) = self.cascade(&providers, &city_query, attempts).await {
            return Some(GeocodeResult {
                lat: hit.lat,
                lng: hit.lng,
                provider: descriptor.id,
                accuracy: AccuracyTier::Locality,
                approximate: true,
                display_text: hit.display_text,
            });
        }

        let result = city_table::lookup(city, state?)?;
        if !self.validator.validate(result.lat, result.lng, state) {
            return None;
        }
        tracing::info!("Using {} coordinates for {}", STATIC_TABLE_PROVIDER, city);
        Some(result)
    }
}
