//! REST surface: thin axum handlers, each calling exactly one
//! Session Manager operation.

use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use midterm_proto::rest_dto::{CreateSessionRequest, RenameRequest, ResizeRequest, ResizeResponse};
use midterm_proto::state_dto::SessionSummary;
use midterm_proto::SessionId;

use crate::error::ApiError;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/sessions", post(create_session).get(list_sessions))
        .route("/api/sessions/{id}", delete(delete_session))
        .route("/api/sessions/{id}/resize", post(resize_session))
        .route("/api/sessions/{id}/name", put(rename_session))
        .route("/api/sessions/{id}/buffer", get(session_buffer))
}

fn parse_id(raw: &str) -> Result<SessionId, ApiError> {
    SessionId::parse(raw).map_err(ApiError::from)
}

async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<SessionSummary>, ApiError> {
    let summary = state
        .manager
        .create(body.cols, body.rows, body.shell, body.working_directory)
        .await?;
    Ok(Json(summary))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.manager.list())
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<(), ApiError> {
    let id = parse_id(&id)?;
    state.manager.delete(id).await?;
    Ok(())
}

async fn resize_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResizeRequest>,
) -> Result<Json<ResizeResponse>, ApiError> {
    let id = parse_id(&id)?;
    state.manager.resize(id, body.cols, body.rows)?;
    Ok(Json(ResizeResponse {
        accepted: true,
        cols: body.cols,
        rows: body.rows,
    }))
}

async fn rename_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RenameRequest>,
) -> Result<(), ApiError> {
    let id = parse_id(&id)?;
    state.manager.rename(id, body.name)?;
    Ok(())
}

async fn session_buffer(State(state): State<AppState>, Path(id): Path<String>) -> Result<String, ApiError> {
    let id = parse_id(&id)?;
    state.manager.buffer_text(id).map_err(ApiError::from)
}
