//! Render check handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use shared::{PaginatedResponse, Pagination};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::render::{Render, RenderFilter, RenderVerdictInput};
use crate::services::RenderService;
use crate::AppState;

/// Claim the next product awaiting a render check
pub async fn start_render_check(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Render>> {
    let service = RenderService::new(state.db.clone());
    Ok(Json(service.start_check(user.user_id).await?))
}

pub async fn finish_render_check(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(render_id): Path<Uuid>,
    Json(input): Json<RenderVerdictInput>,
) -> AppResult<Json<Render>> {
    let service = RenderService::new(state.db.clone());
    Ok(Json(service.finish_check(render_id, input, &user).await?))
}

pub async fn list_renders(
    State(state): State<AppState>,
    Query(filter): Query<RenderFilter>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<Render>>> {
    let service = RenderService::new(state.db.clone());
    Ok(Json(service.list(&filter, &pagination).await?))
}

pub async fn get_render(
    State(state): State<AppState>,
    Path(render_id): Path<Uuid>,
) -> AppResult<Json<Render>> {
    let service = RenderService::new(state.db.clone());
    Ok(Json(service.get(render_id).await?))
}
