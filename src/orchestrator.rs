//! Batch geocoding over the full record set.
//!
//! A run:
//! 1. loads the last checkpoint and resumes its counters unless it was final,
//! 2. sorts records once by priority and groups them by region,
//! 3. walks each region in fixed-size batches, refreshing every batch from
//!    the record store (retried with exponential backoff; a batch that never
//!    loads is marked failed and the run moves on),
//! 4. resolves each sub-batch with bounded concurrency, persisting every
//!    outcome as it completes,
//! 5. saves checkpoints every `checkpoint_interval` successes and at the end.
//!
//! Outcomes are folded into [`BatchProgress`] one at a time on the run's own
//! task, so out-of-order completion needs no locking.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::BatchConfig;
use crate::errors::AppError;
use crate::models::{Coordinates, CustomerGeocodeRecord, GeocodeQuery, GeocodeStatus};
use crate::normalizer::{build_address_line, clean_cep, is_usable_street, normalize_state};
use crate::progress::{BatchProgress, ProgressObserver};
use crate::regions::{group_by_region, prioritize, record_region};
use crate::resolver::{GeocodeResolver, ProviderAttempt};
use crate::store::CustomerRecordStore;
use crate::validator::GeographicValidator;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Stops a running batch from admitting more work.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RecordOutcome {
    Success { improved: bool },
    Failed { kind: &'static str },
    Skipped,
}

struct ProcessedRecord {
    id: String,
    region: String,
    outcome: RecordOutcome,
    attempts: Vec<ProviderAttempt>,
}

/// Mutable state of one run, owned by the run's task.
struct RunState {
    progress: BatchProgress,
    processed_ids: BTreeSet<String>,
    last_processed_id: Option<String>,
    successes_since_save: u64,
    quota_baseline: u64,
    limiter_baseline: u64,
}

pub struct BatchOrchestrator {
    resolver: Arc<GeocodeResolver>,
    store: Arc<dyn CustomerRecordStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: BatchConfig,
    observers: Vec<Arc<dyn ProgressObserver>>,
    cancel: CancelHandle,
    validator: GeographicValidator,
}

impl BatchOrchestrator {
    pub fn new(
        resolver: Arc<GeocodeResolver>,
        store: Arc<dyn CustomerRecordStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: BatchConfig,
    ) -> Self {
        Self {
            resolver,
            store,
            checkpoints,
            config,
            observers: Vec::new(),
            cancel: CancelHandle::default(),
            validator: GeographicValidator::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Lists geocodable records from the store and runs them.
    ///
    /// A listing that keeps failing ends the run with nothing processed and
    /// a `batch_failure` in the summary; only configuration errors are
    /// returned.
    pub async fn run_from_store(&self) -> Result<BatchProgress, AppError> {
        self.check_config()?;
        let limit = self.config.record_limit;
        match self
            .with_retries("listing geocodable records", || self.store.list_geocodable(limit))
            .await
        {
            Ok(records) => self.run(records).await,
            Err(e) => {
                tracing::error!("Could not list records, nothing to geocode: {}", e);
                let mut progress = BatchProgress::new(0);
                progress.record_error("batch_failure");
                progress.finished_at = Some(Utc::now());
                for observer in &self.observers {
                    observer.on_complete(&progress);
                }
                Ok(progress)
            }
        }
    }

    pub async fn run(&self, records: Vec<CustomerGeocodeRecord>) -> Result<BatchProgress, AppError> {
        self.check_config()?;

        let checkpoint = match self.checkpoints.load().await {
            Ok(checkpoint) => checkpoint.filter(|c| !c.completed),
            Err(e) => {
                tracing::warn!("Could not load checkpoint, starting fresh: {}", e);
                None
            }
        };

        let done: HashSet<String> = checkpoint
            .as_ref()
            .map(|c| c.processed_ids.iter().cloned().collect())
            .unwrap_or_default();
        let pending = records.iter().filter(|r| !done.contains(&r.id)).count() as u64;

        let mut state = match checkpoint {
            Some(checkpoint) => {
                tracing::info!(
                    "Resuming from checkpoint saved {}: {} already processed, {} pending",
                    checkpoint.saved_at,
                    checkpoint.progress.processed,
                    pending
                );
                RunState {
                    quota_baseline: checkpoint.progress.quota_events,
                    progress: BatchProgress::resume(checkpoint.progress, pending),
                    processed_ids: checkpoint.processed_ids,
                    last_processed_id: checkpoint.last_processed_id,
                    successes_since_save: 0,
                    limiter_baseline: self.resolver.limiter().quota_events(),
                }
            }
            None => RunState {
                progress: BatchProgress::new(pending),
                processed_ids: BTreeSet::new(),
                last_processed_id: None,
                successes_since_save: 0,
                quota_baseline: 0,
                limiter_baseline: self.resolver.limiter().quota_events(),
            },
        };

        tracing::info!(
            "Starting geocoding run: {} records (batch {}, sub-batch {}, concurrency {})",
            pending,
            self.config.batch_size,
            self.config.sub_batch_size,
            self.config.max_concurrency
        );

        let ordered = prioritize(records, &self.config.priority_regions, &done);
        let to_run: Vec<CustomerGeocodeRecord> =
            ordered.into_iter().filter(|r| !done.contains(&r.id)).collect();
        let groups = group_by_region(to_run, &self.config.priority_regions);

        let mut cancelled = false;
        let mut first_batch = true;
        'regions: for (region, members) in &groups {
            tracing::info!("Region {}: {} records", region, members.len());

            for (index, batch) in members.chunks(self.config.batch_size).enumerate() {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break 'regions;
                }
                if !first_batch && !self.config.batch_delay.is_zero() {
                    sleep(self.config.batch_delay).await;
                }
                first_batch = false;

                tracing::debug!("Region {} batch {} ({} records)", region, index + 1, batch.len());
                match self.load_batch(batch).await {
                    Ok(fresh) => {
                        if !self.process_batch(&fresh, &mut state).await {
                            cancelled = true;
                            break 'regions;
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            "Region {} batch {} failed after retries, marking {} records failed: {}",
                            region,
                            index + 1,
                            batch.len(),
                            e
                        );
                        self.fail_batch(batch, &mut state).await;
                    }
                }
            }
        }

        if cancelled {
            tracing::warn!(
                "Run cancelled after {} records; checkpoint kept for resume",
                state.progress.processed
            );
        } else {
            state.progress.finished_at = Some(Utc::now());
        }
        self.sync_quota_events(&mut state);
        self.save_checkpoint(&state, !cancelled).await;

        for observer in &self.observers {
            observer.on_complete(&state.progress);
        }
        Ok(state.progress)
    }

    fn check_config(&self) -> Result<(), AppError> {
        let c = &self.config;
        if c.batch_size == 0 || c.sub_batch_size == 0 || c.max_concurrency == 0 {
            return Err(AppError::Configuration(
                "batch size, sub-batch size and concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Refreshes a batch from the store. Records the store no longer
    /// returns keep their listed state.
    async fn load_batch(
        &self,
        batch: &[CustomerGeocodeRecord],
    ) -> Result<Vec<CustomerGeocodeRecord>, AppError> {
        let ids: Vec<String> = batch.iter().map(|r| r.id.clone()).collect();
        let fresh = self
            .with_retries("fetching batch", || self.store.fetch_records(&ids))
            .await?;

        let mut by_id: HashMap<String, CustomerGeocodeRecord> =
            fresh.into_iter().map(|r| (r.id.clone(), r)).collect();
        Ok(batch
            .iter()
            .map(|listed| match by_id.remove(&listed.id) {
                Some(mut record) => {
                    record.region_code = listed.region_code.clone();
                    record
                }
                None => listed.clone(),
            })
            .collect())
    }

    /// Runs `operation` once plus up to `max_retries` retries with
    /// exponential backoff.
    async fn with_retries<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt > self.config.max_retries => {
                    return Err(AppError::BatchFailure(format!(
                        "{} failed after {} attempts: {}",
                        what, attempt, e
                    )));
                }
                Err(e) => {
                    let delay = self.retry_delay(attempt - 1);
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt,
                        self.config.max_retries + 1,
                        delay,
                        e
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        self.config
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Processes a batch sub-batch by sub-batch. Returns false when the run
    /// was cancelled before the batch finished.
    async fn process_batch(&self, batch: &[CustomerGeocodeRecord], state: &mut RunState) -> bool {
        for (index, sub_batch) in batch.chunks(self.config.sub_batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                return false;
            }
            if index > 0 && !self.config.sub_batch_delay.is_zero() {
                sleep(self.config.sub_batch_delay).await;
            }

            let mut outcomes = stream::iter(sub_batch)
                .map(|record| self.process_record(record))
                .buffer_unordered(self.config.max_concurrency);

            while let Some(processed) = outcomes.next().await {
                self.apply(processed, state).await;
            }

            self.sync_quota_events(state);
            for observer in &self.observers {
                observer.on_progress(&state.progress);
            }
        }
        true
    }

    async fn apply(&self, processed: ProcessedRecord, state: &mut RunState) {
        state.progress.record_attempts(&processed.attempts);
        match processed.outcome {
            RecordOutcome::Success { improved } => {
                state.progress.record_success(&processed.region, improved);
                state.successes_since_save += 1;
            }
            RecordOutcome::Failed { kind } => state.progress.record_failure(&processed.region, kind),
            RecordOutcome::Skipped => state.progress.record_skip(&processed.region),
        }
        state.processed_ids.insert(processed.id.clone());
        state.last_processed_id = Some(processed.id);

        if state.successes_since_save >= self.config.checkpoint_interval {
            state.successes_since_save = 0;
            self.sync_quota_events(state);
            self.save_checkpoint(state, false).await;
        }
    }

    async fn fail_batch(&self, batch: &[CustomerGeocodeRecord], state: &mut RunState) {
        for record in batch {
            if let Err(e) = self
                .store
                .update_coordinates(&record.id, None, GeocodeStatus::Failed)
                .await
            {
                tracing::error!("Failed to mark customer {} failed: {}", record.id, e);
            }
            let region = region_of(record);
            state.progress.record_failure(&region, "batch_failure");
            state.processed_ids.insert(record.id.clone());
            state.last_processed_id = Some(record.id.clone());
        }
        for observer in &self.observers {
            observer.on_progress(&state.progress);
        }
    }

    async fn process_record(&self, record: &CustomerGeocodeRecord) -> ProcessedRecord {
        let region = region_of(record);
        let mut processed = ProcessedRecord {
            id: record.id.clone(),
            region,
            outcome: RecordOutcome::Skipped,
            attempts: Vec::new(),
        };

        let state_hint = record.state.as_deref().and_then(normalize_state);
        let prior_valid = record
            .coordinates
            .is_some_and(|c| self.validator.validate(c.lat, c.lng, state_hint.as_deref()));

        if record.status == GeocodeStatus::Completed && prior_valid {
            tracing::debug!("Customer {} already geocoded, skipping", record.id);
            return processed;
        }
        if record.status.is_terminal() && record.status != GeocodeStatus::Completed {
            tracing::debug!("Customer {} is {}, skipping", record.id, record.status);
            return processed;
        }

        let Some(query) = build_query(record) else {
            tracing::debug!("Customer {} has no usable CEP or address", record.id);
            processed.outcome = self
                .persist(&record.id, None, GeocodeStatus::InvalidCep)
                .await
                .map(|_| RecordOutcome::Failed { kind: "invalid_cep" })
                .unwrap_or_else(|kind| RecordOutcome::Failed { kind });
            return processed;
        };

        let resolution = self.resolver.resolve_detailed(&query).await;
        processed.attempts = resolution.attempts;

        processed.outcome = match resolution.result {
            Some(result) => {
                let improved = record.coordinates.is_some() && !prior_valid;
                match self
                    .persist(&record.id, Some(result.coordinates()), GeocodeStatus::Completed)
                    .await
                {
                    Ok(()) => RecordOutcome::Success { improved },
                    Err(kind) => RecordOutcome::Failed { kind },
                }
            }
            None => {
                tracing::warn!("No provider could geocode customer {}", record.id);
                match self.persist(&record.id, None, GeocodeStatus::Failed).await {
                    Ok(()) => RecordOutcome::Failed { kind: "no_result" },
                    Err(kind) => RecordOutcome::Failed { kind },
                }
            }
        };
        processed
    }

    /// Writes an outcome; a write failure is reported as its error kind.
    async fn persist(
        &self,
        id: &str,
        coordinates: Option<Coordinates>,
        status: GeocodeStatus,
    ) -> Result<(), &'static str> {
        self.store
            .update_coordinates(id, coordinates, status)
            .await
            .map_err(|e| {
                tracing::error!("Failed to store {} for customer {}: {}", status, id, e);
                e.kind()
            })
    }

    fn sync_quota_events(&self, state: &mut RunState) {
        let seen = self
            .resolver
            .limiter()
            .quota_events()
            .saturating_sub(state.limiter_baseline);
        state.progress.quota_events = state.quota_baseline + seen;
    }

    async fn save_checkpoint(&self, state: &RunState, completed: bool) {
        let checkpoint = Checkpoint {
            progress: state.progress.clone(),
            config: self.config.clone(),
            last_processed_id: state.last_processed_id.clone(),
            processed_ids: state.processed_ids.clone(),
            saved_at: Utc::now(),
            completed,
        };
        match self.checkpoints.save(&checkpoint).await {
            Ok(()) => tracing::debug!(
                "Checkpoint saved ({} processed, final={})",
                state.progress.processed,
                completed
            ),
            Err(e) => tracing::error!("Failed to save checkpoint: {}", e),
        }
    }
}

fn region_of(record: &CustomerGeocodeRecord) -> String {
    record
        .region_code
        .clone()
        .unwrap_or_else(|| record_region(record).to_string())
}

/// Builds the resolver query, or `None` when the record cannot be geocoded:
/// a CEP that is present but malformed, or no CEP and no street or city.
pub fn build_query(record: &CustomerGeocodeRecord) -> Option<GeocodeQuery> {
    let raw_cep = record
        .postal_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let cep = match raw_cep {
        Some(raw) => Some(clean_cep(raw)?),
        None => None,
    };

    let has_street = record.street.as_deref().is_some_and(is_usable_street);
    let city = record
        .city
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    if cep.is_none() && !has_street && city.is_none() {
        return None;
    }

    let address = build_address_line(
        record.street.as_deref().filter(|_| has_street),
        record.district.as_deref(),
        city,
        record.state.as_deref(),
    );
    let mut query = GeocodeQuery::new(address);
    query.postal_code = cep;
    query.state_hint = record.state.as_deref().and_then(normalize_state);
    query.city = city.map(str::to_string);
    Some(query)
}
