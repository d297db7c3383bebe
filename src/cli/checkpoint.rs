//! `status` and `reset` commands, plus checkpoint store construction

use super::{Cli, CliError, OutputFormat};
use crate::checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MongoCheckpointStore};
use crate::config::{CheckpointArgs, CheckpointSettings};
use crate::sync::Job;
use clap::Args;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Open the configured checkpoint store.
pub async fn open_store(
    settings: &CheckpointSettings,
) -> Result<Arc<dyn CheckpointStore>, CliError> {
    let store: Arc<dyn CheckpointStore> = match settings {
        CheckpointSettings::Mongo {
            uri,
            database,
            collection,
        } => Arc::new(MongoCheckpointStore::connect(uri, database, collection).await?),
        CheckpointSettings::File { dir } => {
            info!(dir = %dir.display(), "Using file checkpoint store");
            Arc::new(FileCheckpointStore::new(dir))
        }
    };
    Ok(store)
}

/// Show the stored checkpoint of a job
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// Job whose checkpoint to show
    #[arg(value_enum)]
    pub job: Job,

    /// Where checkpoints are kept
    #[command(flatten)]
    pub checkpoint: CheckpointArgs,
}

impl StatusCommand {
    /// Print the checkpoint, or a notice when none is stored.
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let store = open_store(&self.checkpoint.resolve()?).await?;
        let result = store.get(self.job.checkpoint_id()).await;
        store.close().await;
        let checkpoint = result?;
        println!("{}", render_status(self.job, checkpoint.as_ref(), cli.output_format)?);
        Ok(())
    }
}

/// Delete the stored checkpoint of a job
#[derive(Args, Debug)]
pub struct ResetCommand {
    /// Job whose checkpoint to delete
    #[arg(value_enum)]
    pub job: Job,

    /// Where checkpoints are kept
    #[command(flatten)]
    pub checkpoint: CheckpointArgs,
}

impl ResetCommand {
    /// Delete the checkpoint so the next run starts from the beginning.
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let store = open_store(&self.checkpoint.resolve()?).await?;
        let job_id = self.job.checkpoint_id();
        let result = store.delete(job_id).await;
        store.close().await;
        let removed = result?;

        match cli.output_format {
            OutputFormat::Json => println!(
                "{}",
                json!({ "job": self.job.to_string(), "checkpoint_id": job_id, "removed": removed })
            ),
            OutputFormat::Human if removed => {
                println!("Checkpoint {job_id} removed; the next run of {} starts over", self.job)
            }
            OutputFormat::Human => println!("No checkpoint stored for {job_id}"),
        }
        Ok(())
    }
}

/// Render a checkpoint for `status`.
pub fn render_status(
    job: Job,
    checkpoint: Option<&Checkpoint>,
    format: OutputFormat,
) -> Result<String, CliError> {
    match (format, checkpoint) {
        (OutputFormat::Json, Some(cp)) => {
            let mut doc = json!({ "job": job.to_string() });
            if let Value::Object(map) = &mut doc {
                map.extend(cp.to_document());
            }
            serde_json::to_string_pretty(&doc).map_err(|e| CliError::OutputError(e.to_string()))
        }
        (OutputFormat::Json, None) => Ok(json!({
            "job": job.to_string(),
            "_id": job.checkpoint_id(),
            "stored": false,
        })
        .to_string()),
        (OutputFormat::Human, None) => {
            Ok(format!("No checkpoint stored for {} ({job})", job.checkpoint_id()))
        }
        (OutputFormat::Human, Some(cp)) => {
            let c = &cp.counters;
            Ok(format!(
                "Job:              {job} ({})\n\
                 Phase:            {}\n\
                 Last id:          {}\n\
                 Last page:        {}\n\
                 Batch no:         {}\n\
                 Total processed:  {}\n\
                 Source updated:   {}\n\
                 Index updated:    {}\n\
                 Index not found:  {}\n\
                 Index failed:     {}\n\
                 Defaults set:     {}",
                cp.job_id,
                cp.phase,
                if cp.cursor.is_empty() { "-" } else { &cp.cursor },
                cp.page,
                cp.batch_number,
                c.total_processed,
                c.updated_source,
                c.updated_index,
                c.not_found_index,
                c.failed_index,
                c.default_set_count,
            ))
        }
    }
}
