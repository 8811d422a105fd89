//! Adapter for the hosted RAG search capability.
//!
//! Everything the rest of the crate knows about the managed service goes
//! through [`RagCapability`]. The upstream reply is narrowed here into either
//! the buffered result object, kept as raw JSON text, or a raw byte stream.
//! [`RagAnswer`] is the typed view consumers decode that text into.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

use crate::config::{Config, DEFAULT_MAX_NUM_RESULTS, DEFAULT_SCORE_THRESHOLD};

/// Upstream rejects malformed or missing queries with a message containing this.
pub const INVALID_QUERY_MARKER: &str = "Query parameter";

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RagError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("{0}")]
    InvalidQuery(String),

    #[error("{message}")]
    Upstream { status: Option<u16>, message: String },

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode search response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("search service is not configured: {0}")]
    NotConfigured(String),
}

impl RagError {
    /// Classify an upstream failure message.
    pub fn from_message(status: Option<u16>, message: impl Into<String>) -> RagError {
        let message = message.into();
        if message.contains(INVALID_QUERY_MARKER) {
            RagError::InvalidQuery(message)
        } else {
            RagError::Upstream { status, message }
        }
    }

    pub fn is_invalid_query(&self) -> bool {
        matches!(self, RagError::InvalidQuery(_))
    }
}

/// Fixed knobs sent with every query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    pub max_num_results: u32,
    pub score_threshold: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_num_results: DEFAULT_MAX_NUM_RESULTS,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

impl SearchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_num_results: config.max_num_results,
            score_threshold: config.score_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RagQuery {
    pub query: String,
    pub stream: bool,
    pub max_num_results: u32,
    pub ranking_options: RankingOptions,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct RankingOptions {
    pub score_threshold: f64,
}

impl RagQuery {
    pub fn new(query: impl Into<String>, stream: bool, options: &SearchOptions) -> RagQuery {
        RagQuery {
            query: query.into(),
            stream,
            max_num_results: options.max_num_results,
            ranking_options: RankingOptions {
                score_threshold: options.score_threshold,
            },
        }
    }
}

/// One retrieved document, as the widget reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagHit {
    pub filename: String,
    pub score: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagAnswer {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub data: Vec<RagHit>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub enum RagOutput {
    /// The result object exactly as the service sent it.
    Buffered(Box<RawValue>),
    Stream(ByteStream),
}

impl fmt::Debug for RagOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RagOutput::Buffered(raw) => f.debug_tuple("Buffered").field(raw).finish(),
            RagOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[async_trait]
pub trait RagCapability: Send + Sync {
    async fn search(&self, request: &RagQuery) -> Result<RagOutput, RagError>;
}

/// REST client for a managed AutoRAG instance.
pub struct AutoRagClient {
    http: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    result: Option<Box<RawValue>>,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

impl AutoRagClient {
    pub fn new(
        api_base: &str,
        account_id: &str,
        rag_name: &str,
        api_token: Option<String>,
    ) -> AutoRagClient {
        let endpoint = format!(
            "{}/accounts/{}/autorag/rags/{}/ai-search",
            api_base.trim_end_matches('/'),
            account_id,
            rag_name
        );
        AutoRagClient {
            http: reqwest::Client::new(),
            endpoint,
            api_token,
        }
    }

    pub fn from_config(config: &Config) -> Result<AutoRagClient, RagError> {
        let account_id = config
            .rag_account_id
            .as_deref()
            .ok_or_else(|| RagError::NotConfigured("RAG_ACCOUNT_ID is not set".to_string()))?;
        if config.rag_api_token.is_none() {
            log::warn!("RAG_API_TOKEN is not set, requests will be sent without credentials");
        }
        Ok(Self::new(
            &config.rag_api_base,
            account_id,
            &config.rag_name,
            config.rag_api_token.clone(),
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RagCapability for AutoRagClient {
    async fn search(&self, request: &RagQuery) -> Result<RagOutput, RagError> {
        let mut req = self.http.post(&self.endpoint).json(request);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }

        let response = req.send().await?;
        let status = response.status();
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if status.is_success() && is_event_stream {
            let stream = response.bytes_stream().map_err(RagError::from);
            return Ok(RagOutput::Stream(Box::pin(stream)));
        }

        let body = response.bytes().await?;
        let envelope: Envelope = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                let text = String::from_utf8_lossy(&body).trim().to_string();
                let message = if text.is_empty() {
                    format!("search service responded with {status}")
                } else {
                    text
                };
                return Err(RagError::from_message(Some(status.as_u16()), message));
            }
            Err(e) => return Err(e.into()),
        };

        if !status.is_success() || envelope.success == Some(false) {
            return Err(RagError::from_message(
                Some(status.as_u16()),
                envelope_message(&envelope.errors, status),
            ));
        }

        envelope
            .result
            .map(RagOutput::Buffered)
            .ok_or_else(|| RagError::Upstream {
                status: Some(status.as_u16()),
                message: "search service returned no result".to_string(),
            })
    }
}

fn envelope_message(errors: &[ApiMessage], status: reqwest::StatusCode) -> String {
    let messages: Vec<String> = errors
        .iter()
        .filter(|e| !e.message.is_empty())
        .map(|e| match e.code {
            Some(code) => format!("{} (code {code})", e.message),
            None => e.message.clone(),
        })
        .collect();
    if messages.is_empty() {
        format!("search service responded with {status}")
    } else {
        messages.join("; ")
    }
}
