//! Global and per-provider admission control for provider calls.
//!
//! Every provider call goes through [`RateLimiter::execute`], which:
//! - admits at most `requests_per_minute` calls in any sliding 60s window,
//!   halved while a backoff window is active,
//! - keeps `request_delay` between two admitted calls,
//! - caps in-flight calls per provider and spaces them by the provider's
//!   `min_interval` (a `governor` direct limiter per provider),
//! - opens a backoff window after `block_threshold` consecutive
//!   quota/forbidden responses,
//! - sleeps exactly the requested `Retry-After` and re-issues the same call
//!   on its original admission,
//! - retries transient failures with exponential backoff.
//!
//! The admission state (request log, backoff flag, consecutive block count)
//! sits behind one async mutex that is only held while deciding; calls
//! themselves run concurrently.

use crate::config::RateLimitConfig;
use crate::errors::AppError;
use crate::providers::ProviderDescriptor;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, Instant};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct AdmissionState {
    request_log: VecDeque<Instant>,
    last_request: Option<Instant>,
    consecutive_blocks: u32,
    backoff_until: Option<Instant>,
}

impl AdmissionState {
    /// Drops expired log entries and an elapsed backoff window.
    fn refresh(&mut self, now: Instant) {
        while let Some(oldest) = self.request_log.front() {
            if now.duration_since(*oldest) >= WINDOW {
                self.request_log.pop_front();
            } else {
                break;
            }
        }
        if let Some(until) = self.backoff_until {
            if now >= until {
                tracing::info!("Rate limiter backoff window elapsed, restoring full cap");
                self.backoff_until = None;
                self.consecutive_blocks = 0;
            }
        }
    }

    fn cap(&self, requests_per_minute: usize) -> usize {
        if self.backoff_until.is_some() {
            (requests_per_minute / 2).max(1)
        } else {
            requests_per_minute
        }
    }
}

type SpacingLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

struct ProviderGate {
    in_flight: Arc<Semaphore>,
    /// `None` when the provider has no minimum interval.
    spacing: Option<SpacingLimiter>,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<AdmissionState>,
    gates: std::sync::Mutex<HashMap<String, Arc<ProviderGate>>>,
    quota_events: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AdmissionState::default()),
            gates: std::sync::Mutex::new(HashMap::new()),
            quota_events: AtomicU64::new(0),
        }
    }

    /// Runs a provider call under admission control.
    ///
    /// `operation` is invoked again for every retry, so it must build a
    /// fresh future each time. Quota errors without an explicit wait, and
    /// errors that survive their retries, are returned to the caller.
    pub async fn execute<T, F, Fut>(
        &self,
        provider: &ProviderDescriptor,
        mut operation: F,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let gate = self.gate(provider)?;
        let _permit = gate
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::InternalError("provider gate closed".to_string()))?;

        let mut transient_retries = 0;
        let mut quota_retries = 0;
        let mut admitted = false;

        loop {
            if !admitted {
                self.admit().await;
                if let Some(spacing) = &gate.spacing {
                    spacing.until_ready().await;
                }
            }
            admitted = false;

            let err = match operation().await {
                Ok(value) => {
                    self.record_success().await;
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.is_quota_signal() {
                self.quota_events.fetch_add(1, Ordering::Relaxed);
                self.record_block(&provider.id).await;

                match err.retry_after() {
                    Some(wait) if quota_retries < self.config.max_retries => {
                        quota_retries += 1;
                        tracing::warn!(
                            "{} asked to retry after {:?} (attempt {}/{})",
                            provider.id,
                            wait,
                            quota_retries,
                            self.config.max_retries
                        );
                        sleep(wait).await;
                        // re-issued on the same admission
                        admitted = true;
                        continue;
                    }
                    _ => return Err(err),
                }
            }

            if err.is_transient() && transient_retries < self.config.max_retries {
                let delay = self.retry_delay(transient_retries);
                transient_retries += 1;
                tracing::warn!(
                    "{} transient failure, retrying in {:?} (attempt {}/{}): {}",
                    provider.id,
                    delay,
                    transient_retries,
                    self.config.max_retries,
                    err
                );
                sleep(delay).await;
                continue;
            }

            return Err(err);
        }
    }

    /// Cap currently enforced over the sliding window.
    pub async fn effective_cap(&self) -> usize {
        let mut state = self.state.lock().await;
        state.refresh(Instant::now());
        state.cap(self.config.requests_per_minute)
    }

    pub async fn is_backing_off(&self) -> bool {
        let mut state = self.state.lock().await;
        state.refresh(Instant::now());
        state.backoff_until.is_some()
    }

    /// Quota-exceeded and forbidden responses seen since construction.
    pub fn quota_events(&self) -> u64 {
        self.quota_events.load(Ordering::Relaxed)
    }

    fn gate(&self, provider: &ProviderDescriptor) -> Result<Arc<ProviderGate>, AppError> {
        let mut gates = self
            .gates
            .lock()
            .map_err(|_| AppError::InternalError("rate limiter gate map poisoned".to_string()))?;
        let gate = gates.entry(provider.id.clone()).or_insert_with(|| {
            Arc::new(ProviderGate {
                in_flight: Arc::new(Semaphore::new(provider.max_concurrency.max(1))),
                spacing: Quota::with_period(provider.min_interval).map(governor::RateLimiter::direct),
            })
        });
        Ok(gate.clone())
    }

    /// Waits until the global window and the inter-request delay admit a call,
    /// then records it. The decision and the log update happen under one lock.
    async fn admit(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.refresh(now);

                let cap = state.cap(self.config.requests_per_minute);
                let window_wait = if state.request_log.len() >= cap {
                    state
                        .request_log
                        .front()
                        .map(|oldest| (*oldest + WINDOW).saturating_duration_since(now))
                } else {
                    None
                };
                let delay_wait = state
                    .last_request
                    .map(|last| (last + self.config.request_delay).saturating_duration_since(now))
                    .filter(|wait| !wait.is_zero());

                match window_wait.or(delay_wait) {
                    Some(wait) => wait,
                    None => {
                        state.request_log.push_back(now);
                        state.last_request = Some(now);
                        return;
                    }
                }
            };

            tracing::debug!("Rate limiter holding request for {:?}", wait);
            sleep(wait).await;
        }
    }

    async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_blocks = 0;
    }

    async fn record_block(&self, provider: &str) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.refresh(now);
        state.consecutive_blocks += 1;

        if state.consecutive_blocks >= self.config.block_threshold && state.backoff_until.is_none() {
            state.backoff_until = Some(now + self.config.backoff_duration);
            tracing::warn!(
                "{} consecutive quota/blocked responses (last from {}), backing off for {:?} at half cap",
                state.consecutive_blocks,
                provider,
                self.config.backoff_duration
            );
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.config
            .retry_base_delay
            .saturating_mul(factor)
            .min(self.config.max_retry_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccuracyTier;
    use crate::providers::QueryKind;
    use std::sync::atomic::AtomicUsize;

    fn descriptor(max_concurrency: usize) -> ProviderDescriptor {
        ProviderDescriptor {
            id: "mock".to_string(),
            priority: 1,
            accuracy: AccuracyTier::Street,
            region_affinity: None,
            requires_credential: false,
            query_kind: QueryKind::Both,
            min_interval: Duration::ZERO,
            max_concurrency,
            timeout: Duration::from_secs(5),
            min_confidence: None,
        }
    }

    fn config(requests_per_minute: usize) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute,
            request_delay: Duration::ZERO,
            ..RateLimitConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_delays_calls_over_cap() {
        let limiter = RateLimiter::new(config(3));
        let provider = descriptor(5);
        let start = Instant::now();

        let mut admitted = Vec::new();
        for _ in 0..4 {
            let at = limiter
                .execute(&provider, || async { Ok::<_, AppError>(Instant::now()) })
                .await
                .unwrap();
            admitted.push(at.duration_since(start));
        }

        assert!(admitted[2] < Duration::from_secs(1));
        assert!(admitted[3] >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_delay_spaces_calls() {
        let limiter = RateLimiter::new(RateLimitConfig {
            request_delay: Duration::from_millis(200),
            ..RateLimitConfig::default()
        });
        let provider = descriptor(5);
        let start = Instant::now();

        for _ in 0..3 {
            limiter
                .execute(&provider, || async { Ok::<_, AppError>(()) })
                .await
                .unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_blocks_open_backoff_at_half_cap() {
        let limiter = RateLimiter::new(config(40));
        let provider = descriptor(5);

        for _ in 0..3 {
            let result: Result<(), AppError> = limiter
                .execute(&provider, || async { Err(AppError::Blocked("403".to_string())) })
                .await;
            assert!(result.is_err());
        }

        assert!(limiter.is_backing_off().await);
        assert_eq!(limiter.effective_cap().await, 20);
        assert_eq!(limiter.quota_events(), 3);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(!limiter.is_backing_off().await);
        assert_eq!(limiter.effective_cap().await, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_blocks() {
        let limiter = RateLimiter::new(config(40));
        let provider = descriptor(5);
        let blocked = || async { Err::<(), _>(AppError::Blocked("403".to_string())) };

        let _ = limiter.execute(&provider, blocked).await;
        let _ = limiter.execute(&provider, blocked).await;
        limiter
            .execute(&provider, || async { Ok::<_, AppError>(()) })
            .await
            .unwrap();
        let _ = limiter.execute(&provider, blocked).await;

        assert!(!limiter.is_backing_off().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_sleeps_then_repeats_same_call() {
        let limiter = RateLimiter::new(config(40));
        let provider = descriptor(5);
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let value = limiter
            .execute(&provider, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(AppError::RateLimited {
                            provider: "mock".to_string(),
                            retry_after: Some(Duration::from_secs(5)),
                        })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_reissue_skips_admission_wait() {
        // A one-call window would otherwise hold the re-issue for a minute.
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 1,
            request_delay: Duration::from_secs(10),
            ..RateLimitConfig::default()
        });
        let provider = descriptor(5);
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        limiter
            .execute(&provider, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(AppError::RateLimited {
                            provider: "mock".to_string(),
                            retry_after: Some(Duration::from_secs(5)),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_min_interval_spaces_calls_per_provider() {
        let limiter = RateLimiter::new(config(1000));
        let provider = ProviderDescriptor {
            min_interval: Duration::from_millis(100),
            ..descriptor(5)
        };
        let other = ProviderDescriptor {
            id: "other".to_string(),
            ..descriptor(5)
        };
        let start = std::time::Instant::now();

        for _ in 0..3 {
            limiter
                .execute(&provider, || async { Ok::<_, AppError>(()) })
                .await
                .unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(180));

        let other_start = std::time::Instant::now();
        for _ in 0..3 {
            limiter
                .execute(&other, || async { Ok::<_, AppError>(()) })
                .await
                .unwrap();
        }
        assert!(other_start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_then_surface() {
        let limiter = RateLimiter::new(config(40));
        let provider = descriptor(5);
        let calls = AtomicUsize::new(0);

        let result: Result<(), AppError> = limiter
            .execute(&provider, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::TransientProvider("502".to_string())) }
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let limiter = RateLimiter::new(config(40));
        let provider = descriptor(5);
        let calls = AtomicUsize::new(0);

        let result: Result<(), AppError> = limiter
            .execute(&provider, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::ExternalApiError("400".to_string())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_concurrency_ceiling() {
        let limiter = Arc::new(RateLimiter::new(config(40)));
        let provider = descriptor(1);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let calls = (0..3).map(|_| {
            let limiter = limiter.clone();
            let provider = provider.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                limiter
                    .execute(&provider, || {
                        let in_flight = in_flight.clone();
                        let peak = peak.clone();
                        async move {
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            sleep(Duration::from_secs(1)).await;
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, AppError>(())
                        }
                    })
                    .await
            }
        });
        futures::future::join_all(calls).await;

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
