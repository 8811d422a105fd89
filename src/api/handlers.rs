use axum::{
    Json,
    body::{Body, Bytes},
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::rag::{RagError, RagOutput, RagQuery};

use super::models::{ErrorResponse, SearchRequest};
use super::{AppState, GENERIC_ERROR_MESSAGE, INVALID_REQUEST_MESSAGE};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid search request: {0}")]
    InvalidRequest(String),

    #[error("malformed request body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error(transparent)]
    Upstream(RagError),
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        if err.is_invalid_query() {
            ApiError::InvalidRequest(err.to_string())
        } else {
            ApiError::Upstream(err)
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MalformedBody(_) | ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text shown to the end user.
    pub fn public_message(&self) -> String {
        let message = match self {
            ApiError::InvalidRequest(_) => return INVALID_REQUEST_MESSAGE.to_string(),
            ApiError::MalformedBody(e) => e.to_string(),
            ApiError::Upstream(e) => e.to_string(),
        };
        if message.trim().is_empty() {
            GENERIC_ERROR_MESSAGE.to_string()
        } else {
            message
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

pub async fn search_handler(State(state): State<AppState>, body: Bytes) -> Response {
    match execute_search(&state, &body).await {
        Ok(response) => response,
        Err(e) => {
            log::error!("Search error: {:#}", e);
            e.into_response()
        }
    }
}

/// Query content is not validated here; empty strings go upstream as-is.
fn parse_search_request(body: &[u8]) -> Result<(String, bool), ApiError> {
    let request: SearchRequest = serde_json::from_slice(body)?;
    let query = request
        .query
        .ok_or_else(|| ApiError::InvalidRequest("missing query".to_string()))?;
    Ok((query, request.stream))
}

async fn execute_search(state: &AppState, body: &[u8]) -> Result<Response, ApiError> {
    let (query, stream) = parse_search_request(body)?;
    let query = RagQuery::new(query, stream, &state.options);

    log::debug!("forwarding search, stream={}", query.stream);
    match state.rag.search(&query).await? {
        RagOutput::Stream(stream) => Ok((
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            Body::from_stream(stream),
        )
            .into_response()),
        RagOutput::Buffered(raw) => Ok(Json(raw).into_response()),
    }
}
