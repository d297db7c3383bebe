//! `run` command: wire collaborators together and drive one job

use super::checkpoint::open_store;
use super::{Cli, CliError, OutputFormat};
use crate::config::{CheckpointArgs, ConnectionArgs};
use crate::index::{IndexWriter, TypesenseClient};
use crate::metrics::{self, JobMetrics};
use crate::shutdown::SharedShutdown;
use crate::source::{PgSourceReader, SourceReader};
use crate::sync::{Job, PhaseOutcome, RunReport, SyncEngine};
use clap::Args;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Run (or resume) a backfill job
#[derive(Args, Debug)]
pub struct RunCommand {
    /// Job to run
    #[arg(value_enum)]
    pub job: Job,

    /// Source, index and tuning settings
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Where checkpoints are kept
    #[command(flatten)]
    pub checkpoint: CheckpointArgs,
}

impl RunCommand {
    /// Run the job to completion or until shutdown is requested.
    ///
    /// Both outcomes return `Ok`; connections are closed before returning on
    /// every path past connection setup.
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<PhaseOutcome, CliError> {
        let settings = self.connection.resolve(&self.checkpoint)?;

        if let Some(addr) = cli.metrics_addr {
            metrics::init_metrics(addr).await?;
        }

        let store = open_store(&settings.checkpoint).await?;
        let source: Arc<dyn SourceReader> = match PgSourceReader::connect(&settings.source).await {
            Ok(reader) => Arc::new(reader),
            Err(e) => {
                store.close().await;
                return Err(e.into());
            }
        };
        let index: Arc<dyn IndexWriter> = match TypesenseClient::new(&settings.index) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                source.close().await;
                store.close().await;
                return Err(e.into());
            }
        };

        let job_metrics = JobMetrics::start(self.job.to_string());
        let engine = SyncEngine::new(
            source.clone(),
            index,
            store.clone(),
            self.job.plan(),
            settings.engine,
            shutdown,
        );
        let result = engine.run().await;

        source.close().await;
        store.close().await;
        info!("Connections closed");

        match result {
            Ok(report) => {
                match report.outcome {
                    PhaseOutcome::Interrupted => job_metrics.record_interrupted(),
                    _ => job_metrics.record_completed(report.checkpoint.counters.total_processed),
                }
                print_summary(self.job, &report, cli.output_format);
                Ok(report.outcome)
            }
            Err(e) => {
                job_metrics.record_failure(&e.to_string());
                Err(e.into())
            }
        }
    }
}

fn print_summary(job: Job, report: &RunReport, format: OutputFormat) {
    let cp = &report.checkpoint;
    let status = match report.outcome {
        PhaseOutcome::Interrupted => "interrupted",
        _ => "completed",
    };
    match format {
        OutputFormat::Json => {
            let mut summary = json!({ "job": job.to_string(), "status": status });
            if let Some(map) = summary.as_object_mut() {
                map.extend(cp.to_document());
            }
            println!("{summary}");
        }
        OutputFormat::Human => {
            let c = &cp.counters;
            println!(
                "Backfill {job} {status} | total_processed={} | updated_source={} | \
                 updated_index={} | not_found={} | failed={} | default_set={}",
                c.total_processed,
                c.updated_source,
                c.updated_index,
                c.not_found_index,
                c.failed_index,
                c.default_set_count
            );
        }
    }
}
