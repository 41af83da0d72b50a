use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use infrapanel_server_manager::{ConsoleTail, OperationOutcome, ServerRecord};
use serde::Deserialize;

use super::AppState;
use super::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConsoleQuery {
    #[serde(default)]
    pub offset: Option<u64>,
}

pub async fn list_servers(State(state): State<AppState>) -> ApiResult<Json<Vec<ServerRecord>>> {
    Ok(Json(state.manager.list_servers().await?))
}

pub async fn start_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<OperationOutcome>> {
    Ok(Json(state.manager.start_server(&name).await?))
}

pub async fn stop_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<OperationOutcome>> {
    Ok(Json(state.manager.stop_server(&name).await?))
}

pub async fn restart_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<OperationOutcome>> {
    Ok(Json(state.manager.restart_server(&name).await?))
}

pub async fn send_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<CommandRequest>, JsonRejection>,
) -> ApiResult<Json<OperationOutcome>> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    Ok(Json(state.manager.send_command(&id, &request.command).await?))
}

pub async fn tail_console(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<ConsoleQuery>, QueryRejection>,
) -> ApiResult<Json<ConsoleTail>> {
    let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let offset = query.offset.unwrap_or(0);
    Ok(Json(state.manager.tail_console(&id, offset).await?))
}

pub async fn full_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let log = state.manager.full_log(&id).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], log))
}
