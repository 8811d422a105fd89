use axum::{Router, routing::post};
use std::path::Path;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::rag::{RagCapability, SearchOptions};

pub mod handlers;
pub mod models;

pub const INVALID_REQUEST_MESSAGE: &str = "無効なリクエスト形式、またはクエリが必要です";
pub const GENERIC_ERROR_MESSAGE: &str = "検索中にエラーが発生しました";

#[derive(Clone)]
pub struct AppState {
    pub rag: Arc<dyn RagCapability>,
    pub options: SearchOptions,
}

impl AppState {
    pub fn new(rag: Arc<dyn RagCapability>, options: SearchOptions) -> Self {
        Self { rag, options }
    }
}

pub fn create_router(state: AppState, static_dir: Option<&Path>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/api/search", post(handlers::search_handler))
        .with_state(state);

    // The built documentation site answers everything else.
    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(TraceLayer::new_for_http()).layer(cors)
}
