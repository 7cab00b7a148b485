//! Error handling for the studio operations backend
//!
//! Provides consistent error responses in Russian and English

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{TransitionError, UnknownStatus};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Unauthorized: {message}")]
    Unauthorized {
        message: String,
        message_ru: String,
    },

    // Validation errors
    #[error("Validation error: {message}")]
    Validation {
        field: String,
        message: String,
        message_ru: String,
    },

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Conflict: {message}")]
    Conflict {
        resource: String,
        message: String,
        message_ru: String,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Workflow errors
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] TransitionError),

    #[error("Nothing to take from queue: {0}")]
    QueueEmpty(String),

    // External service errors
    #[error("Telegram API error: {0}")]
    TelegramApiError(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shorthand for a field-level validation error
    pub fn validation(field: &str, message: impl Into<String>, message_ru: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
            message_ru: message_ru.into(),
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::TokenExpired => "TOKEN_EXPIRED",
            AppError::InvalidToken => "INVALID_TOKEN",
            AppError::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            AppError::Unauthorized { .. } => "UNAUTHORIZED",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::DuplicateEntry(_) => "DUPLICATE_ENTRY",
            AppError::Conflict { .. } => "CONFLICT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            AppError::QueueEmpty(_) => "QUEUE_EMPTY",
            AppError::TelegramApiError(_) => "TELEGRAM_API_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidCredentials
            | AppError::TokenExpired
            | AppError::InvalidToken
            | AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::InsufficientPermissions => StatusCode::FORBIDDEN,
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::DuplicateEntry(_) | AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::NotFound(_) | AppError::QueueEmpty(_) => StatusCode::NOT_FOUND,
            AppError::InvalidStateTransition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::TelegramApiError(_) => StatusCode::BAD_GATEWAY,
            AppError::Configuration(_)
            | AppError::DatabaseError(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> ErrorDetail {
        let (message_en, message_ru, field) = match self {
            AppError::InvalidCredentials => (
                "Invalid email or password".to_string(),
                "Неверный email или пароль".to_string(),
                None,
            ),
            AppError::TokenExpired => (
                "Token has expired".to_string(),
                "Срок действия токена истёк".to_string(),
                None,
            ),
            AppError::InvalidToken => (
                "Invalid token".to_string(),
                "Недействительный токен".to_string(),
                None,
            ),
            AppError::InsufficientPermissions => (
                "You do not have permission to perform this action".to_string(),
                "Недостаточно прав для выполнения действия".to_string(),
                None,
            ),
            AppError::Unauthorized { message, message_ru } => {
                (message.clone(), message_ru.clone(), None)
            }
            AppError::Validation {
                field,
                message,
                message_ru,
            } => (message.clone(), message_ru.clone(), Some(field.clone())),
            AppError::DuplicateEntry(field) => (
                format!("A record with this {} already exists", field),
                format!("Запись с таким значением {} уже существует", field),
                Some(field.clone()),
            ),
            AppError::Conflict {
                resource,
                message,
                message_ru,
            } => (message.clone(), message_ru.clone(), Some(resource.clone())),
            AppError::NotFound(resource) => (
                format!("{} not found", resource),
                format!("{} не найден(а)", resource),
                None,
            ),
            AppError::InvalidStateTransition(err) => (
                err.to_string(),
                format!(
                    "Недопустимая смена статуса ({}): «{}» → «{}»",
                    err.entity, err.from, err.to
                ),
                None,
            ),
            AppError::QueueEmpty(queue) => (
                format!("No available items in queue '{}'", queue),
                format!("Нет доступных элементов в очереди «{}»", queue),
                None,
            ),
            AppError::TelegramApiError(msg) => (
                format!("Telegram API error: {}", msg),
                format!("Ошибка Telegram API: {}", msg),
                None,
            ),
            AppError::Configuration(msg) => (
                format!("Configuration error: {}", msg),
                format!("Ошибка конфигурации: {}", msg),
                None,
            ),
            AppError::DatabaseError(_) => (
                "A database error occurred".to_string(),
                "Ошибка базы данных".to_string(),
                None,
            ),
            AppError::Internal(msg) => (
                msg.clone(),
                "Внутренняя ошибка сервера".to_string(),
                None,
            ),
        };

        ErrorDetail {
            code: self.code().to_string(),
            message_en,
            message_ru,
            field,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_default();
        AppError::Validation {
            message: errors.to_string(),
            message_ru: format!("Некорректное значение поля {}", field),
            field,
        }
    }
}

impl From<UnknownStatus> for AppError {
    fn from(err: UnknownStatus) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message_en: String,
    pub message_ru: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.detail();

        if status.is_server_error() {
            tracing::error!(code = detail.code, "Error: {:?}", self);
        } else {
            tracing::debug!(code = detail.code, "Request rejected: {}", self);
        }

        (status, Json(ErrorResponse { error: detail })).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{check_transition, ProductMoveStatus};

    #[test]
    fn transition_error_maps_to_422() {
        let err: AppError = check_transition(
            Some(ProductMoveStatus::Shipped),
            ProductMoveStatus::Defective,
        )
        .unwrap_err()
        .into();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
    }

    #[test]
    fn empty_queue_is_not_found() {
        let err = AppError::QueueEmpty("render".to_string());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(err.detail().message_ru.contains("render"));
    }

    #[test]
    fn validation_carries_field() {
        let err = AppError::validation("barcode", "Barcode is too short", "Штрихкод слишком короткий");
        let detail = err.detail();
        assert_eq!(detail.field.as_deref(), Some("barcode"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
