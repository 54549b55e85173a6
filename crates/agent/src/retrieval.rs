use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use frontdesk_core::config::RetrieverConfig;

/// One knowledge-base hit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: String,
    pub text: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Snippet {
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f32) -> Self {
        Self { id: id.into(), text: text.into(), score, metadata: BTreeMap::new() }
    }
}

#[derive(Debug, Error)]
pub enum RetrieverError {
    #[error("retriever unavailable: {0}")]
    Unavailable(String),
    #[error("retriever timed out")]
    Timeout,
    #[error("retriever response could not be decoded: {0}")]
    Decode(String),
}

/// Top-K retrieval scoped to one tenant knowledge base.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn query(
        &self,
        kb_handle: &str,
        text: &str,
        k: usize,
    ) -> Result<Vec<Snippet>, RetrieverError>;
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Snippet>,
}

/// Calls an external retrieval service with `POST {base_url}/query`.
pub struct HttpRetriever {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    timeout_secs: u64,
}

impl HttpRetriever {
    pub fn new(base_url: impl Into<String>, api_key: Option<SecretString>, timeout_secs: u64) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout_secs,
        }
    }

    /// `None` when no retrieval service is configured.
    pub fn from_config(config: &RetrieverConfig) -> Option<Self> {
        let base_url = config.base_url.as_deref().map(str::trim).filter(|url| !url.is_empty())?;
        Some(Self::new(base_url, config.api_key.clone(), config.timeout_secs))
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn query(
        &self,
        kb_handle: &str,
        text: &str,
        k: usize,
    ) -> Result<Vec<Snippet>, RetrieverError> {
        let mut builder = self
            .client
            .post(format!("{}/query", self.base_url))
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&json!({"kb_handle": kb_handle, "text": text, "k": k}));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                RetrieverError::Timeout
            } else {
                RetrieverError::Unavailable(error.to_string())
            }
        })?;
        if !response.status().is_success() {
            return Err(RetrieverError::Unavailable(format!("status {}", response.status())));
        }

        let body: QueryResponse =
            response.json().await.map_err(|error| RetrieverError::Decode(error.to_string()))?;
        Ok(body.results.into_iter().take(k).collect())
    }
}
