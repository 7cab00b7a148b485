//! Marketplace moderation upload handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use shared::{PaginatedResponse, Pagination};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::moderation::{FinishUploadInput, ModerationUpload, UploadFilter};
use crate::services::ModerationService;
use crate::AppState;

/// Claim the next product whose render passed the check
pub async fn start_upload(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<ModerationUpload>> {
    let service = ModerationService::new(state.db.clone());
    Ok(Json(service.upload_start(user.user_id).await?))
}

/// Claim the next product that goes out with studio photos
pub async fn start_studio_upload(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<ModerationUpload>> {
    let service = ModerationService::new(state.db.clone());
    Ok(Json(service.studio_upload_start(user.user_id).await?))
}

pub async fn finish_upload(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(upload_id): Path<Uuid>,
    Json(input): Json<FinishUploadInput>,
) -> AppResult<Json<ModerationUpload>> {
    let service = ModerationService::new(state.db.clone());
    Ok(Json(service.finish_upload(upload_id, input, &user).await?))
}

pub async fn list_uploads(
    State(state): State<AppState>,
    Query(filter): Query<UploadFilter>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<ModerationUpload>>> {
    let service = ModerationService::new(state.db.clone());
    Ok(Json(service.list(&filter, &pagination).await?))
}

pub async fn get_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> AppResult<Json<ModerationUpload>> {
    let service = ModerationService::new(state.db.clone());
    Ok(Json(service.get(upload_id).await?))
}
