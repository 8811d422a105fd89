//! Client side of the search feature.
//!
//! [`ProxyClient`] talks to `POST /api/search`; [`SearchWidget`] owns the
//! query text and search mode, and publishes the current [`SearchState`] on a
//! watch channel so a renderer can redraw as streamed text arrives.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::GENERIC_ERROR_MESSAGE;
use crate::api::models::ErrorResponse;
use crate::data_models::SearchResult;
use crate::rag::RagAnswer;
use crate::stream::StreamAccumulator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    Buffered,
    /// Live answer text, but the service sends no sources on this path.
    Streaming,
}

impl SearchMode {
    pub fn is_streaming(self) -> bool {
        matches!(self, SearchMode::Streaming)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SearchState {
    #[default]
    Idle,
    Searching {
        partial: Option<SearchResult>,
    },
    Succeeded(SearchResult),
    /// `partial` is whatever had streamed in before the failure.
    Failed {
        message: String,
        partial: Option<SearchResult>,
    },
}

impl SearchState {
    pub fn is_loading(&self) -> bool {
        matches!(self, SearchState::Searching { .. })
    }

    pub fn failed(message: impl Into<String>) -> SearchState {
        SearchState::Failed {
            message: message.into(),
            partial: None,
        }
    }

    /// The result to display, including a partially streamed one.
    pub fn result(&self) -> Option<&SearchResult> {
        match self {
            SearchState::Searching { partial } | SearchState::Failed { partial, .. } => {
                partial.as_ref()
            }
            SearchState::Succeeded(result) => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SearchState::Failed { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WidgetError {
    /// The endpoint answered with a non-2xx status.
    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Decode(#[from] serde_json::Error),
}

impl WidgetError {
    pub fn user_message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            GENERIC_ERROR_MESSAGE.to_string()
        } else {
            message
        }
    }
}

#[derive(Serialize)]
struct SearchRequestBody<'a> {
    query: &'a str,
    stream: bool,
}

#[derive(Debug, Clone)]
pub struct ProxyClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ProxyClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, query: &str, stream: bool) -> Result<reqwest::Response, WidgetError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&SearchRequestBody { query, stream })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .ok()
                .map(|e| e.error)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("Error: {}", status.as_u16()));
            return Err(WidgetError::Rejected(message));
        }
        Ok(response)
    }

    /// Buffered search: answer plus normalized sources.
    pub async fn search(&self, query: &str) -> Result<SearchResult, WidgetError> {
        let response = self.post(query, false).await?;
        let body = response.bytes().await?;
        let answer: RagAnswer = serde_json::from_slice(&body)?;
        Ok(SearchResult::from_answer(&answer))
    }

    /// Streaming search. `on_update` sees the answer every time it grows.
    pub async fn search_streaming<F>(
        &self,
        query: &str,
        mut on_update: F,
    ) -> Result<SearchResult, WidgetError>
    where
        F: FnMut(&SearchResult),
    {
        let response = self.post(query, true).await?;
        let mut chunks = response.bytes_stream();
        let mut acc = StreamAccumulator::new();
        let mut partial = SearchResult::default();

        while let Some(chunk) = chunks.next().await {
            let progress = acc.push(&chunk?);
            if progress.changed {
                partial.answer = acc.answer().to_string();
                on_update(&partial);
            }
            if progress.done {
                break;
            }
        }
        if acc.finish().changed {
            partial.answer = acc.answer().to_string();
            on_update(&partial);
        }

        Ok(SearchResult {
            answer: acc.into_answer(),
            sources: Vec::new(),
        })
    }
}

/// State tagged with the submission that produced it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub generation: u64,
    pub state: SearchState,
}

/// Writes state on behalf of one submission; writes from a superseded
/// submission are dropped.
struct Publisher {
    state: Arc<watch::Sender<Snapshot>>,
    generation: u64,
}

impl Publisher {
    fn publish(&self, next: SearchState) -> bool {
        self.state.send_if_modified(|snapshot| {
            if snapshot.generation != self.generation {
                return false;
            }
            snapshot.state = next;
            true
        })
    }

    /// Switch to `Failed`, keeping any answer text already shown.
    fn fail(&self, message: String) -> bool {
        self.state.send_if_modified(|snapshot| {
            if snapshot.generation != self.generation {
                return false;
            }
            let partial = match &mut snapshot.state {
                SearchState::Searching { partial } => partial.take(),
                _ => None,
            };
            snapshot.state = SearchState::Failed { message, partial };
            true
        })
    }
}

pub struct SearchWidget {
    client: ProxyClient,
    query: String,
    mode: SearchMode,
    state: Arc<watch::Sender<Snapshot>>,
    in_flight: Option<CancellationToken>,
    generation: u64,
}

impl SearchWidget {
    pub fn new(client: ProxyClient) -> Self {
        let (state, _) = watch::channel(Snapshot::default());
        Self {
            client,
            query: String::new(),
            mode: SearchMode::default(),
            state: Arc::new(state),
            in_flight: None,
            generation: 0,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Editing the query leaves the displayed result alone.
    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SearchMode) {
        self.mode = mode;
    }

    pub fn state(&self) -> SearchState {
        self.state.borrow().state.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.state.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().state.is_loading()
    }

    pub fn can_submit(&self) -> bool {
        !self.is_loading() && !self.query.trim().is_empty()
    }

    /// Start a search for the current query, superseding any search in flight.
    ///
    /// A blank query issues no request and resets the state to `Idle`.
    pub fn submit(&mut self) -> Option<JoinHandle<()>> {
        let generation = self.begin(SearchState::Idle);
        if self.query.trim().is_empty() {
            return None;
        }

        let token = CancellationToken::new();
        self.in_flight = Some(token.clone());
        self.state.send_modify(|s| s.state = SearchState::Searching { partial: None });

        let publisher = Publisher {
            state: self.state.clone(),
            generation,
        };
        let client = self.client.clone();
        let query = self.query.clone();
        let mode = self.mode;

        Some(tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    log::debug!("search #{generation} cancelled");
                    return;
                }
                outcome = run_search(&client, &query, mode, &publisher) => outcome,
            };

            match outcome {
                Ok(result) => {
                    publisher.publish(SearchState::Succeeded(result));
                }
                Err(e) => {
                    log::warn!("search #{generation} failed: {:#}", e);
                    publisher.fail(e.user_message());
                }
            }
        }))
    }

    /// Submit and wait for the search to settle.
    pub async fn search(&mut self) -> SearchState {
        if let Some(handle) = self.submit() {
            if let Err(e) = handle.await {
                log::error!("search task panicked: {e}");
            }
        }
        self.state()
    }

    /// Abandon the search in flight, if any, and return to `Idle`.
    pub fn cancel(&mut self) {
        if self.in_flight.is_some() || self.is_loading() {
            self.begin(SearchState::Idle);
        }
    }

    fn begin(&mut self, state: SearchState) -> u64 {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
        self.generation += 1;
        let generation = self.generation;
        self.state.send_modify(|s| *s = Snapshot { generation, state });
        generation
    }
}

impl Drop for SearchWidget {
    fn drop(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
    }
}

async fn run_search(
    client: &ProxyClient,
    query: &str,
    mode: SearchMode,
    publisher: &Publisher,
) -> Result<SearchResult, WidgetError> {
    match mode {
        SearchMode::Buffered => client.search(query).await,
        SearchMode::Streaming => {
            client
                .search_streaming(query, |partial| {
                    publisher.publish(SearchState::Searching {
                        partial: Some(partial.clone()),
                    });
                })
                .await
        }
    }
}
