//! Axum Handlers for the REST API
//!
//! Thin HTTP adapters over the agent orchestrator: submit a query, read
//! history, reset the agent, and report health.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::error;

use crate::{
    models::{ErrorResponse, HealthResponse, HistoryResponse, QueryPayload, QueryResponse,
        SessionInfo},
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Submit one query to the agent. Always answers 200 with a user-facing
/// string; a busy agent answers with its busy notice rather than an error.
pub async fn post_query(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QueryPayload>,
) -> Result<Json<QueryResponse>, ApiError> {
    if payload.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }
    let response = state
        .orchestrator
        .process_query(&payload.query, payload.voice)
        .await;
    Ok(Json(QueryResponse { response }))
}

/// The persisted conversation history plus the active session, if any.
pub async fn get_history(State(state): State<Arc<AppState>>) -> Json<HistoryResponse> {
    let session = state
        .orchestrator
        .active_session()
        .map(|session| SessionInfo {
            id: session.id,
            started_at: session.started_at,
            kind: session.kind,
        });
    Json(HistoryResponse {
        turns: state.orchestrator.history(),
        session,
    })
}

/// Clears memory and provider sessions.
pub async fn post_reset(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.orchestrator.reset().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        busy: state.orchestrator.is_busy(),
    })
}
