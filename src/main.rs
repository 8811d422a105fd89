use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use once_cell::sync::Lazy;
use docsearch::api::{AppState, create_router};
use docsearch::config::{self, CONFIG};
use docsearch::rag::{AutoRagClient, SearchOptions};
use docsearch::render::{mode_note, render};
use docsearch::widget::{ProxyClient, SearchMode, SearchState, SearchWidget};

#[derive(Parser)]
#[command(name = "docsearch", about = "AI search proxy for the documentation site")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the search endpoint (and serve the built site, if configured)
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        static_dir: Option<PathBuf>,
    },
    /// Ask a question through a running endpoint
    Ask {
        query: String,
        #[arg(long)]
        stream: bool,
        #[arg(long, default_value = "http://127.0.0.1:4321/api/search")]
        endpoint: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The logger goes up before CONFIG loads so its warnings are not lost.
    let level = config::log_level_from_env()
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    // Initialize tracing subscriber (handles both tracing and log crate)
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    Lazy::force(&CONFIG);

    match Cli::parse().command {
        Command::Serve { bind, static_dir } => serve(bind, static_dir).await,
        Command::Ask {
            query,
            stream,
            endpoint,
        } => ask(query, stream, endpoint).await,
    }
}

async fn serve(bind: Option<String>, static_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let rag = AutoRagClient::from_config(&CONFIG).context("Failed to configure search service")?;
    tracing::info!(endpoint = rag.endpoint(), "using search service");

    let state = AppState::new(Arc::new(rag), SearchOptions::from_config(&CONFIG));
    let static_dir = static_dir.or_else(|| CONFIG.static_dir.clone());
    let app = create_router(state, static_dir.as_deref());

    let bind = bind.unwrap_or_else(|| CONFIG.bind_addr.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn ask(query: String, stream: bool, endpoint: String) -> anyhow::Result<()> {
    let mode = if stream {
        SearchMode::Streaming
    } else {
        SearchMode::Buffered
    };
    let mut widget = SearchWidget::new(ProxyClient::new(endpoint));
    widget.set_query(query);
    widget.set_mode(mode);
    println!("{}", mode_note(mode));

    let mut updates = widget.subscribe();
    let handle = widget.submit();

    // live output while the answer streams in
    let mut printed = 0usize;
    if mode.is_streaming() && handle.is_some() {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().state.clone();
            if let SearchState::Searching {
                partial: Some(partial),
            } = &state
            {
                if let Some(delta) = partial.answer.get(printed..) {
                    print!("{delta}");
                    std::io::stdout().flush()?;
                    printed = partial.answer.len();
                }
            }
            if !state.is_loading() {
                break;
            }
        }
        if printed > 0 {
            println!("\n");
        }
    }

    if let Some(handle) = handle {
        handle.await.context("search task failed")?;
    }

    let state = widget.state();
    print!("{}", render(widget.query(), &state));
    if let Some(error) = state.error() {
        anyhow::bail!("search failed: {error}");
    }
    Ok(())
}
