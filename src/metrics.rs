//! Observability metrics for backfill jobs
//!
//! Counters are always recorded through the `metrics` facade; they only
//! become visible when a Prometheus exporter is installed with
//! [`init_metrics`] (the `--metrics-addr` option). Without an exporter every
//! call is a no-op.

use crate::checkpoint::Phase;
use crate::index::UpdateOutcome;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Metrics setup errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be installed or bound
    #[error("failed to install Prometheus exporter: {0}")]
    InstallError(String),
}

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls return `Ok(())` without rebinding.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::InstallError(e.to_string()))?;

    describe_counter!(
        "backfill_batches_total",
        Unit::Count,
        "Batches or pages committed, by phase"
    );
    describe_counter!(
        "backfill_index_updates_total",
        Unit::Count,
        "Index document updates, by outcome"
    );
    describe_counter!(
        "backfill_source_rows_updated_total",
        Unit::Count,
        "Source rows changed by the null backfill step"
    );
    describe_counter!(
        "backfill_retries_total",
        Unit::Count,
        "Retries after transient failures, by operation"
    );
    describe_histogram!(
        "backfill_retry_delay_seconds",
        Unit::Seconds,
        "Delay slept before each retry"
    );
    describe_counter!(
        "backfill_checkpoint_saves_total",
        Unit::Count,
        "Checkpoint documents persisted"
    );
    describe_counter!(
        "backfill_jobs_total",
        Unit::Count,
        "Job runs, by job and result"
    );

    *initialized = true;
    info!(%addr, "Metrics endpoint listening");
    Ok(())
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Record a committed batch (scan) or page (reconcile)
pub fn record_batch(phase: Phase) {
    counter!("backfill_batches_total", "phase" => phase.to_string()).increment(1);
}

/// Record the outcome of one index update
pub fn record_index_outcome(outcome: &UpdateOutcome) {
    let label = match outcome {
        UpdateOutcome::Updated => "updated",
        UpdateOutcome::NotFound => "not_found",
        UpdateOutcome::Failed(_) => "failed",
    };
    counter!("backfill_index_updates_total", "outcome" => label).increment(1);
}

/// Record rows changed by the source backfill step
pub fn record_source_rows_updated(rows: u64) {
    counter!("backfill_source_rows_updated_total").increment(rows);
}

/// Record a retry of `operation` after `delay`
pub fn record_retry(operation: &'static str, delay: Duration) {
    counter!("backfill_retries_total", "operation" => operation).increment(1);
    histogram!("backfill_retry_delay_seconds", "operation" => operation)
        .record(delay.as_secs_f64());
}

/// Record a checkpoint save
pub fn record_checkpoint_save() {
    counter!("backfill_checkpoint_saves_total").increment(1);
}

/// Job-level metrics
pub struct JobMetrics {
    job: String,
    start_time: Instant,
}

impl JobMetrics {
    /// Start tracking a job run
    pub fn start(job: impl Into<String>) -> Self {
        let job = job.into();
        info!(job = %job, "Backfill job started");
        Self {
            job,
            start_time: Instant::now(),
        }
    }

    fn finish(&self, result: &'static str) {
        counter!(
            "backfill_jobs_total",
            "job" => self.job.clone(),
            "result" => result,
        )
        .increment(1);
    }

    /// Record a run that finished every phase
    pub fn record_completed(&self, total_processed: u64) {
        self.finish("completed");
        info!(
            job = %self.job,
            total_processed,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Backfill job completed"
        );
    }

    /// Record a run stopped by a shutdown signal
    pub fn record_interrupted(&self) {
        self.finish("interrupted");
        info!(
            job = %self.job,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Backfill job interrupted, checkpoint saved"
        );
    }

    /// Record a failed run
    pub fn record_failure(&self, error: &str) {
        self.finish("failed");
        error!(
            job = %self.job,
            error = %error,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Backfill job failed"
        );
    }
}
