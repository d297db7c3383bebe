//! Phase loops for one backfill job
//!
//! The engine owns no job state: the [`Checkpoint`] is loaded once and passed
//! down as `&mut`, and the only shared state is the shutdown flag. Every loop
//! iteration follows the same order: check for shutdown, fetch, write, commit
//! the checkpoint, sleep.

use super::config::EngineSettings;
use super::plan::FieldPlan;
use super::progress::ProgressState;
use super::{PhaseOutcome, SyncError};
use crate::checkpoint::{Checkpoint, CheckpointStore, Counters, Phase};
use crate::index::{IndexWriter, UpdateOutcome};
use crate::metrics;
use crate::shutdown::SharedShutdown;
use crate::source::SourceReader;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Final state of a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// How the last phase ended, never [`PhaseOutcome::ReconcileReady`]
    pub outcome: PhaseOutcome,
    /// Checkpoint as last held in memory
    pub checkpoint: Checkpoint,
}

/// Runs one job's phases against its collaborators
pub struct SyncEngine {
    source: Arc<dyn SourceReader>,
    index: Arc<dyn IndexWriter>,
    store: Arc<dyn CheckpointStore>,
    plan: FieldPlan,
    settings: EngineSettings,
    shutdown: SharedShutdown,
}

impl SyncEngine {
    /// Create an engine for `plan`.
    pub fn new(
        source: Arc<dyn SourceReader>,
        index: Arc<dyn IndexWriter>,
        store: Arc<dyn CheckpointStore>,
        plan: FieldPlan,
        settings: EngineSettings,
        shutdown: SharedShutdown,
    ) -> Self {
        Self {
            source,
            index,
            store,
            plan,
            settings: settings.normalized(),
            shutdown,
        }
    }

    /// The plan this engine runs
    pub fn plan(&self) -> &FieldPlan {
        &self.plan
    }

    /// Ensure the index schema, load the checkpoint and run the remaining
    /// phases.
    pub async fn run(&self) -> Result<RunReport, SyncError> {
        self.index
            .ensure_schema_fields(&FieldPlan::schema_fields())
            .await?;

        let mut checkpoint = self.store.load(self.plan.job_id).await?;
        if checkpoint.has_progress() {
            info!(
                job_id = self.plan.job_id,
                phase = %checkpoint.phase,
                last_id = %checkpoint.cursor,
                page = checkpoint.page,
                batch_no = checkpoint.batch_number,
                total_processed = checkpoint.counters.total_processed,
                "Resuming from checkpoint"
            );
        }

        let mut outcome = match checkpoint.phase {
            Phase::Scanning => self.run_scanning_phase(&mut checkpoint).await?,
            Phase::Reconciling => PhaseOutcome::ReconcileReady,
        };
        if outcome == PhaseOutcome::ReconcileReady {
            outcome = self.run_reconciliation_phase(&mut checkpoint).await?;
        }

        Ok(RunReport {
            outcome,
            checkpoint,
        })
    }

    /// Seek-paginate the source and push each record's fields to the index.
    pub async fn run_scanning_phase(
        &self,
        checkpoint: &mut Checkpoint,
    ) -> Result<PhaseOutcome, SyncError> {
        let columns = self.plan.source_columns();
        let mut progress = ProgressState::new(Phase::Scanning);
        info!(
            job_id = self.plan.job_id,
            last_id = %checkpoint.cursor,
            batch_size = self.settings.batch_size,
            "Scanning source"
        );

        loop {
            if self.shutdown_requested() {
                return self.interrupt(checkpoint, &Counters::default()).await;
            }

            let batch = match self
                .source
                .fetch_batch(&checkpoint.cursor, self.settings.batch_size, &columns)
                .await
            {
                Ok(batch) => batch,
                Err(e) if e.is_transient() => {
                    self.wait_before_retry("fetch_batch", e).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let Some(last_id) = batch.last().map(|record| record.id.clone()) else {
                return self.finish_scanning(checkpoint).await;
            };
            if self.shutdown_requested() {
                return self.interrupt(checkpoint, &Counters::default()).await;
            }

            let mut batch_counters = Counters::default();

            if let Some(backfill) = &self.plan.source_backfill {
                let null_ids = self.plan.null_source_ids(&batch);
                if !null_ids.is_empty() {
                    match self
                        .source
                        .update_field(&null_ids, backfill.column, backfill.value)
                        .await
                    {
                        Ok(rows) => {
                            debug!(column = backfill.column, rows, "Source nulls backfilled");
                            metrics::record_source_rows_updated(rows);
                            batch_counters.updated_source = rows;
                        }
                        // Rolled back: skip the index writes and refetch the same batch
                        Err(e) if e.is_transient() => {
                            self.wait_before_retry("update_field", e).await;
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }

            for record in &batch {
                if self.shutdown_requested() {
                    return self.interrupt(checkpoint, &batch_counters).await;
                }
                let fields = self.plan.transform(record);
                if !fields.is_empty() {
                    let outcome = self.index.update_document(&record.id, &fields).await;
                    if tally(&mut batch_counters, &outcome, &record.id) {
                        batch_counters.updated_index += 1;
                    }
                }
                batch_counters.total_processed += 1;
            }

            checkpoint.cursor = last_id;
            checkpoint.batch_number += 1;
            checkpoint.counters.accumulate(&batch_counters);
            self.save(checkpoint).await?;
            metrics::record_batch(Phase::Scanning);

            progress.update(batch.len() as u64);
            info!(
                job_id = self.plan.job_id,
                "{}",
                progress.format_line(checkpoint, batch.len())
            );

            self.pause(self.settings.batch_delay).await;
        }
    }

    /// Page through the index and default documents missing from the source.
    pub async fn run_reconciliation_phase(
        &self,
        checkpoint: &mut Checkpoint,
    ) -> Result<PhaseOutcome, SyncError> {
        if !self.plan.has_reconciliation() {
            return Ok(PhaseOutcome::Completed);
        }
        let defaults = self.plan.reconcile_fields();
        let mut progress = ProgressState::new(Phase::Reconciling);
        info!(
            job_id = self.plan.job_id,
            page = checkpoint.page,
            page_size = self.settings.page_size,
            "Reconciling index-only documents"
        );

        loop {
            if self.shutdown_requested() {
                return self.interrupt(checkpoint, &Counters::default()).await;
            }

            let documents = match self
                .index
                .list_page(checkpoint.page, self.settings.page_size)
                .await
            {
                Ok(documents) => documents,
                Err(e) if e.is_transient() => {
                    self.wait_before_retry("list_page", e).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if documents.is_empty() {
                info!(
                    job_id = self.plan.job_id,
                    default_set = checkpoint.counters.default_set_count,
                    "Reconciliation complete, no more pages"
                );
                return Ok(PhaseOutcome::Completed);
            }

            let ids: Vec<String> = documents.iter().map(|doc| doc.id.clone()).collect();
            let present = match self.source.exists_among(&ids).await {
                Ok(present) => present,
                Err(e) if e.is_transient() => {
                    self.wait_before_retry("exists_among", e).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let mut page_counters = Counters::default();
            for document in &documents {
                if self.shutdown_requested() {
                    return self.interrupt(checkpoint, &page_counters).await;
                }
                if present.contains(&document.id) || !self.plan.needs_reconcile(document) {
                    continue;
                }
                let outcome = self.index.update_document(&document.id, &defaults).await;
                if tally(&mut page_counters, &outcome, &document.id) {
                    page_counters.default_set_count += 1;
                }
            }

            checkpoint.page += 1;
            checkpoint.batch_number += 1;
            checkpoint.counters.accumulate(&page_counters);
            self.save(checkpoint).await?;
            metrics::record_batch(Phase::Reconciling);

            progress.update(documents.len() as u64);
            info!(
                job_id = self.plan.job_id,
                "{}",
                progress.format_line(checkpoint, documents.len())
            );

            self.pause(self.settings.batch_delay).await;
        }
    }

    async fn finish_scanning(&self, checkpoint: &mut Checkpoint) -> Result<PhaseOutcome, SyncError> {
        if !self.plan.has_reconciliation() {
            info!(
                job_id = self.plan.job_id,
                total_processed = checkpoint.counters.total_processed,
                "Scan complete, no more rows"
            );
            return Ok(PhaseOutcome::Completed);
        }
        checkpoint.phase = Phase::Reconciling;
        checkpoint.page = 0;
        self.save(checkpoint).await?;
        info!(
            job_id = self.plan.job_id,
            total_processed = checkpoint.counters.total_processed,
            "Scan complete, switching to reconciliation"
        );
        Ok(PhaseOutcome::ReconcileReady)
    }

    /// Fold in the writes completed so far and persist once.
    async fn interrupt(
        &self,
        checkpoint: &mut Checkpoint,
        partial: &Counters,
    ) -> Result<PhaseOutcome, SyncError> {
        checkpoint.counters.accumulate(partial);
        self.save(checkpoint).await?;
        warn!(
            job_id = self.plan.job_id,
            phase = %checkpoint.phase,
            last_id = %checkpoint.cursor,
            page = checkpoint.page,
            batch_no = checkpoint.batch_number,
            "Shutdown requested, progress saved"
        );
        Ok(PhaseOutcome::Interrupted)
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), SyncError> {
        self.store.save(checkpoint).await?;
        metrics::record_checkpoint_save();
        Ok(())
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.is_shutdown_requested()
    }

    async fn wait_before_retry(&self, operation: &'static str, error: impl std::fmt::Display) {
        warn!(
            operation,
            error = %error,
            retry_in_secs = self.settings.retry_delay.as_secs_f64(),
            "Transient failure, retrying"
        );
        metrics::record_retry(operation, self.settings.retry_delay);
        self.pause(self.settings.retry_delay).await;
    }

    /// Sleep, cut short by a shutdown request.
    async fn pause(&self, delay: Duration) {
        if delay.is_zero() || self.shutdown_requested() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = self.shutdown.wait_for_shutdown() => {},
        }
    }
}

/// Count a non-success outcome and log it. Returns true on success.
fn tally(counters: &mut Counters, outcome: &UpdateOutcome, id: &str) -> bool {
    metrics::record_index_outcome(outcome);
    match outcome {
        UpdateOutcome::Updated => true,
        UpdateOutcome::NotFound => {
            debug!(id, "Document not in index, skipped");
            counters.not_found_index += 1;
            false
        }
        UpdateOutcome::Failed(reason) => {
            warn!(id, reason = %reason, "Index update failed");
            counters.failed_index += 1;
            false
        }
    }
}
