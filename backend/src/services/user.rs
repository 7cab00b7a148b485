//! User management service

use bcrypt::{hash, DEFAULT_COST};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::config::TelegramConfig;
use crate::error::{AppError, AppResult};
use crate::external::telegram::{verify_login_payload, TelegramLoginPayload};
use shared::{validate_password, PaginatedResponse, Pagination, Role};

/// User service
#[derive(Clone)]
pub struct UserService {
    db: PgPool,
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: String,
    role: String,
    telegram_id: Option<i64>,
    telegram_username: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const USER_COLUMNS: &str =
    "id, email, name, role, telegram_id, telegram_username, is_active, created_at, updated_at";

/// User profile
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub telegram_id: Option<i64>,
    pub telegram_username: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = Role::from_str(&row.role)
            .ok_or_else(|| AppError::Internal(format!("Unknown role '{}'", row.role)))?;
        Ok(User {
            id: row.id,
            email: row.email,
            name: row.name,
            role,
            telegram_id: row.telegram_id,
            telegram_username: row.telegram_username,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserInput {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

fn hash_password(password: &str) -> AppResult<String> {
    validate_password(password)
        .map_err(|msg| AppError::validation("password", msg, "Пароль должен быть не короче 8 символов"))?;
    hash(password, DEFAULT_COST).map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

fn map_unique_violation(err: sqlx::Error, field: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::DuplicateEntry(field.to_string()),
        _ => AppError::DatabaseError(err),
    }
}

impl UserService {
    /// Create a new UserService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a worker account
    pub async fn create_user(&self, input: CreateUserInput) -> AppResult<User> {
        input.validate()?;
        let password_hash = hash_password(&input.password)?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (email, name, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(input.email.trim().to_lowercase())
        .bind(input.name.trim())
        .bind(password_hash)
        .bind(input.role.as_str())
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_unique_violation(e, "email"))?;

        tracing::info!(user_id = %row.id, role = %input.role, "User created");
        row.try_into()
    }

    /// Get a user by id
    pub async fn get_user(&self, user_id: Uuid) -> AppResult<User> {
        sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("User".to_string()))?
            .try_into()
    }

    /// List users
    pub async fn list_users(
        &self,
        filter: &UserFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<User>> {
        let role = filter.role.map(|r| r.as_str());
        let where_clause = r#"
            WHERE ($1::text IS NULL OR role = $1)
              AND ($2::boolean IS NULL OR is_active = $2)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM users {}", where_clause))
            .bind(role)
            .bind(filter.is_active)
            .fetch_one(&self.db)
            .await?;

        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users {} ORDER BY name LIMIT $3 OFFSET $4",
            USER_COLUMNS, where_clause
        ))
        .bind(role)
        .bind(filter.is_active)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let data = rows
            .into_iter()
            .map(User::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse::new(data, pagination, total as u64))
    }

    /// Update name, role, active flag or password
    pub async fn update_user(&self, user_id: Uuid, input: UpdateUserInput) -> AppResult<User> {
        input.validate()?;
        let password_hash = input.password.as_deref().map(hash_password).transpose()?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET
                name = COALESCE($2, name),
                role = COALESCE($3, role),
                is_active = COALESCE($4, is_active),
                password_hash = COALESCE($5, password_hash),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(input.name.as_deref().map(str::trim))
        .bind(input.role.map(|r| r.as_str()))
        .bind(input.is_active)
        .bind(password_hash)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        tracing::info!(user_id = %user_id, "User updated");
        row.try_into()
    }

    /// Link a Telegram account after verifying the Login Widget signature
    pub async fn link_telegram(
        &self,
        user_id: Uuid,
        payload: TelegramLoginPayload,
        telegram: &TelegramConfig,
    ) -> AppResult<User> {
        if !telegram.is_enabled() {
            return Err(AppError::Configuration("Telegram bot token is not set".to_string()));
        }

        verify_login_payload(
            &payload,
            &telegram.bot_token,
            Utc::now().timestamp(),
            telegram.login_max_age_secs,
        )
        .map_err(|message| {
            tracing::warn!(user_id = %user_id, telegram_id = payload.id, "Telegram login rejected: {}", message);
            AppError::Unauthorized {
                message,
                message_ru: "Не удалось подтвердить вход через Telegram".to_string(),
            }
        })?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET telegram_id = $2, telegram_username = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(payload.id)
        .bind(&payload.username)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| map_unique_violation(e, "telegram_id"))?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;

        tracing::info!(user_id = %user_id, telegram_id = payload.id, "Telegram account linked");
        row.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_password_is_rejected() {
        let err = hash_password("short").unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn create_input_requires_valid_email() {
        let input = CreateUserInput {
            email: "not-an-email".to_string(),
            name: "Анна".to_string(),
            password: "long-enough".to_string(),
            role: Role::Photographer,
        };
        let err: AppError = input.validate().unwrap_err().into();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "email"));
    }

    #[test]
    fn role_deserializes_from_snake_case() {
        let input: UpdateUserInput =
            serde_json::from_str(r#"{"role": "senior_retoucher", "is_active": false}"#).unwrap();
        assert_eq!(input.role, Some(Role::SeniorRetoucher));
        assert_eq!(input.is_active, Some(false));
    }
}
