//! Typesense HTTP client
//!
//! One `reqwest::Client` per process with explicit connect and request
//! timeouts, the API key carried as a default header. Document ids and the
//! collection name are always added as encoded path segments.

use super::{
    FieldSpec, IndexDocument, IndexError, IndexResult, IndexWriter, UpdateOutcome, MAX_PAGE_SIZE,
};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Header carrying the API key
const API_KEY_HEADER: &str = "x-typesense-api-key";
/// Longest response body kept in error messages
const MAX_ERROR_BODY: usize = 200;
/// Request timeout multiplier over the connect timeout
const REQUEST_TIMEOUT_FACTOR: u32 = 3;

/// Connection settings for [`TypesenseClient`]
#[derive(Debug, Clone)]
pub struct TypesenseConfig {
    /// `http` or `https`
    pub protocol: String,
    /// Host name
    pub host: String,
    /// Port
    pub port: u16,
    /// Admin API key
    pub api_key: String,
    /// Collection name
    pub collection: String,
    /// Field named in `query_by` for match-all listings
    pub query_by: String,
    /// TCP connect timeout; the whole request may take three times as long
    pub connect_timeout: Duration,
}

/// Client for one Typesense collection
#[derive(Debug, Clone)]
pub struct TypesenseClient {
    client: Client,
    base_url: Url,
    collection: String,
    query_by: String,
}

#[derive(Debug, Deserialize)]
struct CollectionSchema {
    #[serde(default)]
    fields: Vec<SchemaField>,
}

#[derive(Debug, Deserialize)]
struct SchemaField {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    document: Map<String, Value>,
}

impl TypesenseClient {
    /// Build the HTTP client. No request is made.
    pub fn new(config: &TypesenseConfig) -> IndexResult<Self> {
        let base_url = Url::parse(&format!(
            "{}://{}:{}",
            config.protocol, config.host, config.port
        ))
        .map_err(|e| IndexError::InvalidConfig(format!("index URL: {e}")))?;

        let mut api_key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| IndexError::InvalidConfig("API key is not a valid header".to_string()))?;
        api_key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, api_key);

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .timeout(config.connect_timeout * REQUEST_TIMEOUT_FACTOR)
            .build()
            .map_err(|e| IndexError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            collection: config.collection.clone(),
            query_by: config.query_by.clone(),
        })
    }

    /// Base URL the client talks to
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL for `/collections/<collection>/<segments...>`
    pub fn collection_url(&self, segments: &[&str]) -> IndexResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IndexError::InvalidConfig(format!("bad base URL: {}", self.base_url)))?
            .pop_if_empty()
            .push("collections")
            .push(&self.collection)
            .extend(segments);
        Ok(url)
    }

    async fn error_from(response: reqwest::Response) -> IndexError {
        let status = response.status().as_u16();
        let mut message = response.text().await.unwrap_or_default();
        if message.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        IndexError::HttpError { status, message }
    }

    async fn existing_field_names(&self) -> IndexResult<HashSet<String>> {
        let url = self.collection_url(&[])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IndexError::NetworkError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let schema: CollectionSchema = response
            .json()
            .await
            .map_err(|e| IndexError::ParseError(format!("collection schema: {e}")))?;
        Ok(schema.fields.into_iter().map(|f| f.name).collect())
    }
}

#[async_trait]
impl IndexWriter for TypesenseClient {
    async fn update_document(&self, id: &str, fields: &Map<String, Value>) -> UpdateOutcome {
        let url = match self.collection_url(&["documents", id]) {
            Ok(url) => url,
            Err(e) => return UpdateOutcome::Failed(e.to_string()),
        };
        let response = match self.client.patch(url).json(fields).send().await {
            Ok(response) => response,
            Err(e) => return UpdateOutcome::Failed(e.to_string()),
        };
        match response.status() {
            status if status.is_success() => UpdateOutcome::Updated,
            StatusCode::NOT_FOUND => UpdateOutcome::NotFound,
            _ => UpdateOutcome::Failed(Self::error_from(response).await.to_string()),
        }
    }

    async fn ensure_schema_fields(&self, fields: &[FieldSpec]) -> IndexResult<Vec<String>> {
        let existing = self.existing_field_names().await?;
        let missing: Vec<&FieldSpec> = fields
            .iter()
            .filter(|field| !existing.contains(&field.name))
            .collect();
        if missing.is_empty() {
            debug!(collection = %self.collection, "Schema already has all fields");
            return Ok(Vec::new());
        }

        let url = self.collection_url(&[])?;
        let response = self
            .client
            .patch(url)
            .json(&json!({ "fields": missing }))
            .send()
            .await
            .map_err(|e| IndexError::NetworkError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let added: Vec<String> = missing.into_iter().map(|f| f.name.clone()).collect();
        info!(collection = %self.collection, fields = ?added, "Added fields to index schema");
        Ok(added)
    }

    async fn list_page(&self, page: u64, page_size: usize) -> IndexResult<Vec<IndexDocument>> {
        let url = self.collection_url(&["documents", "search"])?;
        let per_page = page_size.clamp(1, MAX_PAGE_SIZE);
        let params = [
            ("q", "*".to_string()),
            ("query_by", self.query_by.clone()),
            ("per_page", per_page.to_string()),
            // The service numbers pages from 1
            ("page", (page + 1).to_string()),
        ];

        let response = self
            .client
            .get(url)
            .query(&params)
            .send()
            .await
            .map_err(|e| IndexError::NetworkError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| IndexError::ParseError(format!("search response: {e}")))?;

        let mut documents = Vec::with_capacity(body.hits.len());
        for hit in body.hits {
            let id = match hit.document.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => {
                    warn!(page, "Skipping search hit without an id");
                    continue;
                }
            };
            documents.push(IndexDocument {
                id,
                fields: hit.document,
            });
        }
        Ok(documents)
    }
}
