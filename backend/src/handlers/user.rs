//! User administration handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use shared::{PaginatedResponse, Pagination};
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::user::{CreateUserInput, UpdateUserInput, User, UserFilter};
use crate::services::UserService;
use crate::AppState;

pub async fn create_user(
    State(state): State<AppState>,
    Json(input): Json<CreateUserInput>,
) -> AppResult<(StatusCode, Json<User>)> {
    let service = UserService::new(state.db.clone());
    let user = service.create_user(input).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(filter): Query<UserFilter>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<User>>> {
    let service = UserService::new(state.db.clone());
    Ok(Json(service.list_users(&filter, &pagination).await?))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<User>> {
    let service = UserService::new(state.db.clone());
    Ok(Json(service.get_user(user_id).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(input): Json<UpdateUserInput>,
) -> AppResult<Json<User>> {
    let service = UserService::new(state.db.clone());
    Ok(Json(service.update_user(user_id, input).await?))
}
