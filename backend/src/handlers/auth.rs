//! Authentication handlers

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::error::AppError;
use crate::external::telegram::TelegramLoginPayload;
use crate::middleware::CurrentUser;
use crate::services::auth::AuthTokens;
use crate::services::user::User;
use crate::services::{AuthService, UserService};
use crate::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Login endpoint handler
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthTokens>, AppError> {
    let auth_service = AuthService::new(state.db.clone(), &state.config);
    let tokens = auth_service.login(&body.email, &body.password).await?;
    Ok(Json(tokens))
}

/// Current user profile
pub async fn me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<User>, AppError> {
    let service = UserService::new(state.db.clone());
    Ok(Json(service.get_user(user.user_id).await?))
}

/// Link the caller's Telegram account from a Login Widget payload
pub async fn link_telegram(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<TelegramLoginPayload>,
) -> Result<Json<User>, AppError> {
    let service = UserService::new(state.db.clone());
    let linked = service
        .link_telegram(user.user_id, payload, &state.config.telegram)
        .await?;
    Ok(Json(linked))
}
