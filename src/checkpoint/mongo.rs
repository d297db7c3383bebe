//! MongoDB checkpoint store
//!
//! Documents live in one collection keyed by `_id = job_id`. A missing
//! document is inserted with defaults on first load; saves are
//! `replace_one(..., upsert)` so the document is always replaced wholesale.

use super::{last_updated_now, Checkpoint, CheckpointError, CheckpointStore};
use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, ReplaceOptions};
use mongodb::{Client, Collection};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Server selection timeout, so a dead store fails startup quickly
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Checkpoint store backed by a MongoDB collection
pub struct MongoCheckpointStore {
    client: Client,
    collection: Collection<Document>,
}

impl std::fmt::Debug for MongoCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoCheckpointStore")
            .field("collection", &self.collection.name())
            .finish()
    }
}

impl MongoCheckpointStore {
    /// Connect and verify the deployment answers a ping.
    pub async fn connect(
        uri: &str,
        database: &str,
        collection: &str,
    ) -> Result<Self, CheckpointError> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| CheckpointError::ConnectionError(format!("invalid MongoDB URI: {e}")))?;
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        options.app_name = Some("index-backfill".to_string());

        let client = Client::with_options(options)
            .map_err(|e| CheckpointError::ConnectionError(e.to_string()))?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| CheckpointError::ConnectionError(format!("ping failed: {e}")))?;

        info!(database, collection, "Connected to checkpoint store");
        Ok(Self {
            collection: db.collection::<Document>(collection),
            client,
        })
    }

    fn to_bson_document(checkpoint: &Checkpoint) -> Result<Document, CheckpointError> {
        let mut document = mongodb::bson::to_document(checkpoint)
            .map_err(|e| CheckpointError::SerializationError(e.to_string()))?;
        document.insert("last_updated", last_updated_now());
        Ok(document)
    }
}

#[async_trait]
impl CheckpointStore for MongoCheckpointStore {
    async fn get(&self, job_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let found = self
            .collection
            .find_one(doc! { "_id": job_id }, None)
            .await
            .map_err(|e| CheckpointError::StoreError(format!("find checkpoint: {e}")))?;

        match found {
            Some(document) => match Bson::Document(document).into_relaxed_extjson() {
                Value::Object(map) => Ok(Some(Checkpoint::from_document(job_id, &map))),
                _ => Err(CheckpointError::DeserializationError(
                    "checkpoint document is not an object".to_string(),
                )),
            },
            None => Ok(None),
        }
    }

    async fn load(&self, job_id: &str) -> Result<Checkpoint, CheckpointError> {
        if let Some(checkpoint) = self.get(job_id).await? {
            debug!(job_id, batch_no = checkpoint.batch_number, "Checkpoint loaded");
            return Ok(checkpoint);
        }
        let checkpoint = Checkpoint::new(job_id);
        self.collection
            .insert_one(Self::to_bson_document(&checkpoint)?, None)
            .await
            .map_err(|e| CheckpointError::StoreError(format!("insert checkpoint: {e}")))?;
        debug!(job_id, "Created checkpoint with defaults");
        Ok(checkpoint)
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let document = Self::to_bson_document(checkpoint)?;
        let options = ReplaceOptions::builder().upsert(true).build();
        self.collection
            .replace_one(doc! { "_id": checkpoint.job_id.as_str() }, document, options)
            .await
            .map_err(|e| CheckpointError::StoreError(format!("replace checkpoint: {e}")))?;
        debug!(
            job_id = %checkpoint.job_id,
            batch_no = checkpoint.batch_number,
            "Checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, job_id: &str) -> Result<bool, CheckpointError> {
        let result = self
            .collection
            .delete_one(doc! { "_id": job_id }, None)
            .await
            .map_err(|e| CheckpointError::StoreError(format!("delete checkpoint: {e}")))?;
        Ok(result.deleted_count > 0)
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
        debug!("Checkpoint store connection closed");
    }
}
