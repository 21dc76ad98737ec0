//! Batch progress counters, breakdowns and observers.

use crate::resolver::{AttemptOutcome, ProviderAttempt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub calls: u64,
    pub successes: u64,
    pub misses: u64,
    pub rejections: u64,
    pub errors: u64,
    pub total_latency_ms: u64,
}

impl ProviderStats {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.calls as f64
        }
    }
}

/// Counters of a batch run. Monotonic within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Records whose invalid prior coordinates were replaced by valid ones.
    pub improved: u64,
    pub regions: BTreeMap<String, RegionStats>,
    pub providers: BTreeMap<String, ProviderStats>,
    /// Error kind to occurrences.
    pub errors: BTreeMap<String, u64>,
    /// Quota-exceeded and forbidden responses seen by the rate limiter.
    pub quota_events: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// `processed` when this run started; ETA only counts this run's pace.
    #[serde(skip)]
    pub resumed_from: u64,
}

impl BatchProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            processed: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            improved: 0,
            regions: BTreeMap::new(),
            providers: BTreeMap::new(),
            errors: BTreeMap::new(),
            quota_events: 0,
            started_at: Utc::now(),
            finished_at: None,
            resumed_from: 0,
        }
    }

    /// Continues counters from a previous run. Timing restarts now.
    pub fn resume(previous: BatchProgress, pending: u64) -> Self {
        let processed = previous.processed;
        Self {
            total: processed + pending,
            started_at: Utc::now(),
            finished_at: None,
            resumed_from: processed,
            ..previous
        }
    }

    fn region(&mut self, region: &str) -> &mut RegionStats {
        self.regions.entry(region.to_string()).or_default()
    }

    pub fn record_success(&mut self, region: &str, improved: bool) {
        self.processed += 1;
        self.successful += 1;
        if improved {
            self.improved += 1;
        }
        let stats = self.region(region);
        stats.total += 1;
        stats.successful += 1;
    }

    pub fn record_failure(&mut self, region: &str, kind: &str) {
        self.processed += 1;
        self.failed += 1;
        *self.errors.entry(kind.to_string()).or_insert(0) += 1;
        let stats = self.region(region);
        stats.total += 1;
        stats.failed += 1;
    }

    pub fn record_skip(&mut self, region: &str) {
        self.processed += 1;
        self.skipped += 1;
        let stats = self.region(region);
        stats.total += 1;
        stats.skipped += 1;
    }

    pub fn record_error(&mut self, kind: &str) {
        *self.errors.entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn record_attempts(&mut self, attempts: &[ProviderAttempt]) {
        for attempt in attempts {
            if attempt.outcome == AttemptOutcome::Skipped {
                continue;
            }
            let stats = self.providers.entry(attempt.provider.clone()).or_default();
            stats.calls += 1;
            stats.total_latency_ms += attempt.latency.as_millis() as u64;
            match &attempt.outcome {
                AttemptOutcome::Success => stats.successes += 1,
                AttemptOutcome::Miss => stats.misses += 1,
                AttemptOutcome::Rejected(_) => {
                    stats.rejections += 1;
                    *self.errors.entry("validation".to_string()).or_insert(0) += 1;
                }
                AttemptOutcome::Error(kind) => {
                    stats.errors += 1;
                    *self.errors.entry(kind.to_string()).or_insert(0) += 1;
                }
                AttemptOutcome::Skipped => {}
            }
        }
    }

    /// Successful records as a percentage of processed ones.
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.successful as f64 / self.processed as f64 * 100.0
        }
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.processed)
    }

    /// Estimated time left at this run's pace.
    pub fn eta(&self) -> Option<Duration> {
        let done = self.processed.saturating_sub(self.resumed_from);
        if done == 0 {
            return None;
        }
        let elapsed = (Utc::now() - self.started_at).to_std().ok()?;
        let per_record = elapsed.as_secs_f64() / done as f64;
        Some(Duration::from_secs_f64(per_record * self.remaining() as f64))
    }

    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }

    /// Final report text.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Geocoding summary");
        let _ = writeln!(
            out,
            "  total={} processed={} successful={} failed={} skipped={} improved={}",
            self.total, self.processed, self.successful, self.failed, self.skipped, self.improved
        );
        let _ = writeln!(out, "  success rate: {:.1}%", self.success_rate());
        if let Some(finished) = self.finished_at {
            let elapsed = (finished - self.started_at).num_seconds();
            let _ = writeln!(out, "  duration: {}s", elapsed);
        }

        let _ = writeln!(out, "  by region:");
        for (region, stats) in &self.regions {
            let _ = writeln!(
                out,
                "    {:<12} total={} ok={} failed={} skipped={}",
                region, stats.total, stats.successful, stats.failed, stats.skipped
            );
        }

        let _ = writeln!(out, "  by provider:");
        for (provider, stats) in &self.providers {
            let _ = writeln!(
                out,
                "    {:<12} calls={} ok={} miss={} rejected={} errors={} avg={:.0}ms",
                provider,
                stats.calls,
                stats.successes,
                stats.misses,
                stats.rejections,
                stats.errors,
                stats.avg_latency_ms()
            );
        }

        let _ = writeln!(out, "  errors:");
        for (kind, count) in &self.errors {
            let _ = writeln!(out, "    {:<16} {}", kind, count);
        }
        let _ = write!(out, "  quota exceeded events: {}", self.quota_events);
        out
    }
}

/// Receives progress snapshots from a batch run.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &BatchProgress);

    fn on_complete(&self, progress: &BatchProgress) {
        self.on_progress(progress);
    }
}

/// Logs snapshots through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl ProgressObserver for LoggingObserver {
    fn on_progress(&self, progress: &BatchProgress) {
        tracing::info!(
            "Progress: {}/{} processed ({} ok, {} failed, {} skipped, {:.1}% success, eta {:?})",
            progress.processed,
            progress.total,
            progress.successful,
            progress.failed,
            progress.skipped,
            progress.success_rate(),
            progress.eta().map(|d| Duration::from_secs(d.as_secs()))
        );
    }

    fn on_complete(&self, progress: &BatchProgress) {
        tracing::info!("{}", progress.summary());
    }
}

/// Forwards snapshots to a channel.
pub struct ChannelObserver {
    tx: UnboundedSender<BatchProgress>,
}

impl ChannelObserver {
    pub fn new(tx: UnboundedSender<BatchProgress>) -> Self {
        Self { tx }
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, progress: &BatchProgress) {
        if self.tx.send(progress.clone()).is_err() {
            tracing::debug!("Progress receiver dropped");
        }
    }
}
