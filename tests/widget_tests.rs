use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use serde_json::json;

use docsearch::api::create_router;
use docsearch::data_models::{SearchResult, Source};
use docsearch::render::render;
use docsearch::widget::{ProxyClient, SearchMode, SearchState, SearchWidget};

mod test_helpers {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use docsearch::api::AppState;
    use docsearch::rag::{RagCapability, RagError, RagOutput, RagQuery, SearchOptions};
    use serde_json::value::to_raw_value;

    /// Stream chunk that makes the upstream fail at that point.
    pub const FAIL_CHUNK: &str = "!fail";

    /// Answers buffered queries from the query text; `slow:` queries stall first.
    pub struct EchoRag {
        pub calls: AtomicUsize,
        pub stream_chunks: Vec<&'static str>,
    }

    #[async_trait]
    impl RagCapability for EchoRag {
        async fn search(&self, request: &RagQuery) -> Result<RagOutput, RagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(rest) = request.query.strip_prefix("slow:") {
                tokio::time::sleep(Duration::from_millis(300)).await;
                return Ok(RagOutput::Buffered(to_raw_value(&json!({
                    "response": format!("answer for {rest}"),
                    "data": []
                }))?));
            }
            if request.stream {
                let items: Vec<Result<Bytes, RagError>> = self
                    .stream_chunks
                    .iter()
                    .map(|c| match *c {
                        FAIL_CHUNK => Err(RagError::Upstream {
                            status: None,
                            message: "stream reset".into(),
                        }),
                        c => Ok(Bytes::from_static(c.as_bytes())),
                    })
                    .collect();
                // space the chunks out so each one reaches the client on its own
                let paced = futures::stream::iter(items).then(|item| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    item
                });
                return Ok(RagOutput::Stream(Box::pin(paced)));
            }
            Ok(RagOutput::Buffered(to_raw_value(&json!({
                "response": format!("answer for {}", request.query),
                "data": [
                    { "filename": "docs/guide/index.md", "score": 0.9 },
                    { "filename": "docs/faq.md", "score": 0.6 }
                ]
            }))?))
        }
    }

    pub fn echo_rag(stream_chunks: Vec<&'static str>) -> Arc<EchoRag> {
        Arc::new(EchoRag {
            calls: AtomicUsize::new(0),
            stream_chunks,
        })
    }

    /// Serve `router` on an ephemeral port and return the search URL.
    pub async fn spawn_server(router: Router) -> Result<String> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        Ok(format!("http://{addr}/api/search"))
    }

    pub async fn spawn_proxy(rag: Arc<EchoRag>) -> Result<String> {
        let state = AppState::new(rag, SearchOptions::default());
        spawn_server(create_router(state, None)).await
    }

    pub fn widget(endpoint: &str, query: &str, mode: SearchMode) -> SearchWidget {
        let mut widget = SearchWidget::new(ProxyClient::new(endpoint));
        widget.set_query(query);
        widget.set_mode(mode);
        widget
    }
}

use test_helpers::*;

#[tokio::test]
async fn test_buffered_search_normalizes_sources() -> Result<()> {
    let endpoint = spawn_proxy(echo_rag(vec![])).await?;
    let mut widget = widget(&endpoint, "deploy", SearchMode::Buffered);

    let state = widget.search().await;

    assert_eq!(
        state,
        SearchState::Succeeded(SearchResult {
            answer: "answer for deploy".into(),
            sources: vec![
                Source { title: "docs/guide/index.md".into(), url: "guide".into(), score: 0.9 },
                Source { title: "docs/faq.md".into(), url: "faq".into(), score: 0.6 },
            ],
        })
    );
    assert!(!widget.is_loading());
    Ok(())
}

#[tokio::test]
async fn test_streaming_search_builds_answer() -> Result<()> {
    let rag = echo_rag(vec![
        "data: {\"response\":\"Hello\"}\n",
        "data: {\"response\":\" world\"}\n",
        "data: [DONE]\n",
        "data: {\"response\":\" ignored\"}\n",
    ]);
    let endpoint = spawn_proxy(rag).await?;
    let mut widget = widget(&endpoint, "greet", SearchMode::Streaming);

    let mut updates = widget.subscribe();
    let state = widget.search().await;

    assert_eq!(
        state,
        SearchState::Succeeded(SearchResult {
            answer: "Hello world".into(),
            sources: vec![],
        })
    );
    assert!(updates.has_changed()?);
    assert_eq!(updates.borrow_and_update().state, state);
    Ok(())
}

#[tokio::test]
async fn test_streaming_plain_text_fallback() -> Result<()> {
    let rag = echo_rag(vec![
        "data: {\"response\":\"A \"}\n",
        "data: plain text chunk\n",
        "data: [DONE]\n",
    ]);
    let endpoint = spawn_proxy(rag).await?;
    let mut widget = widget(&endpoint, "q", SearchMode::Streaming);

    let state = widget.search().await;

    assert_eq!(state.result().map(|r| r.answer.as_str()), Some("A plain text chunk"));
    Ok(())
}

#[tokio::test]
async fn test_streaming_publishes_partial_answers() -> Result<()> {
    let rag = echo_rag(vec![
        "data: {\"response\":\"one\"}\n",
        "data: {\"response\":\" two\"}\n",
        "data: [DONE]\n",
    ]);
    let endpoint = spawn_proxy(rag).await?;
    let mut widget = widget(&endpoint, "q", SearchMode::Streaming);

    let mut updates = widget.subscribe();
    let handle = widget.submit().expect("non-blank query starts a search");

    let mut seen = Vec::new();
    while updates.changed().await.is_ok() {
        let state = updates.borrow_and_update().state.clone();
        let done = !state.is_loading();
        seen.push(state);
        if done {
            break;
        }
    }
    handle.await?;

    // every intermediate answer is a prefix of the final one
    let last = seen.last().cloned().unwrap();
    let final_answer = last.result().unwrap().answer.clone();
    assert_eq!(final_answer, "one two");
    for state in &seen {
        if let Some(result) = state.result() {
            assert!(final_answer.starts_with(&result.answer));
            assert!(result.sources.is_empty());
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_stream_failing_midway_keeps_partial_answer() -> Result<()> {
    let rag = echo_rag(vec!["data: {\"response\":\"Hel\"}\n", FAIL_CHUNK]);
    let endpoint = spawn_proxy(rag).await?;
    let mut widget = widget(&endpoint, "q", SearchMode::Streaming);

    let state = widget.search().await;

    assert!(matches!(state, SearchState::Failed { .. }), "got {state:?}");
    assert!(!widget.is_loading());
    assert!(!state.error().unwrap_or_default().is_empty());
    assert_eq!(state.result().map(|r| r.answer.as_str()), Some("Hel"));

    let text = render(widget.query(), &state);
    assert!(text.starts_with("⚠️ "));
    assert!(text.contains("Hel"));
    Ok(())
}

#[tokio::test]
async fn test_error_body_message_is_shown() -> Result<()> {
    let router = Router::new().route(
        "/api/search",
        post(|| async { (StatusCode::BAD_REQUEST, axum::Json(json!({ "error": "bad" }))) }),
    );
    let endpoint = spawn_server(router).await?;
    let mut widget = widget(&endpoint, "q", SearchMode::Buffered);

    let state = widget.search().await;

    assert_eq!(state, SearchState::failed("bad"));
    assert!(render(widget.query(), &state).contains("bad"));
    Ok(())
}

#[tokio::test]
async fn test_unparsable_error_body_falls_back_to_status() -> Result<()> {
    let router = Router::new().route(
        "/api/search",
        post(|| async { (StatusCode::BAD_GATEWAY, "<html>gateway</html>") }),
    );
    let endpoint = spawn_server(router).await?;
    let mut widget = widget(&endpoint, "q", SearchMode::Streaming);

    let state = widget.search().await;

    assert_eq!(state, SearchState::failed("Error: 502"));
    Ok(())
}

#[tokio::test]
async fn test_blank_query_clears_result_without_request() -> Result<()> {
    let rag = echo_rag(vec![]);
    let endpoint = spawn_proxy(rag.clone()).await?;
    let mut widget = widget(&endpoint, "deploy", SearchMode::Buffered);

    assert!(matches!(widget.search().await, SearchState::Succeeded(_)));
    assert_eq!(rag.calls.load(Ordering::SeqCst), 1);

    widget.set_query("   ");
    assert!(widget.submit().is_none());
    assert_eq!(widget.state(), SearchState::Idle);
    assert_eq!(rag.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_new_submission_supersedes_stale_search() -> Result<()> {
    let endpoint = spawn_proxy(echo_rag(vec![])).await?;
    let mut widget = widget(&endpoint, "slow:old", SearchMode::Buffered);

    let stale = widget.submit().expect("search started");
    widget.set_query("fresh");
    let current = widget.submit().expect("search started");

    current.await?;
    stale.await?;

    let state = widget.state();
    assert_eq!(
        state.result().map(|r| r.answer.as_str()),
        Some("answer for fresh")
    );
    Ok(())
}

#[tokio::test]
async fn test_cancel_returns_to_idle() -> Result<()> {
    let endpoint = spawn_proxy(echo_rag(vec![])).await?;
    let mut widget = widget(&endpoint, "slow:anything", SearchMode::Buffered);

    let handle = widget.submit().expect("search started");
    assert!(widget.is_loading());
    assert!(!widget.can_submit());

    widget.cancel();
    handle.await?;

    assert_eq!(widget.state(), SearchState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_endpoint_reports_error() -> Result<()> {
    // bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let mut widget = widget(&format!("http://{addr}/api/search"), "q", SearchMode::Buffered);
    let state = widget.search().await;

    let message = state.error().expect("transport failure surfaces as error");
    assert!(!message.is_empty());
    assert!(!widget.is_loading());
    Ok(())
}
