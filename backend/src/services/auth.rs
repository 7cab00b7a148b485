//! Authentication service for login and token management

use bcrypt::verify;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shared::Role;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    db: PgPool,
    jwt_secret: String,
    access_token_expiry: i64,
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // User ID
    pub role: String,
    pub exp: i64,
    pub iat: i64,
}

/// Authentication tokens
#[derive(Debug, Serialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub role: Role,
}

/// User info from database
#[derive(Debug, sqlx::FromRow)]
struct LoginRow {
    id: Uuid,
    password_hash: String,
    role: String,
    is_active: bool,
}

impl AuthService {
    /// Create a new AuthService instance
    pub fn new(db: PgPool, config: &Config) -> Self {
        Self {
            db,
            jwt_secret: config.jwt.secret.clone(),
            access_token_expiry: config.jwt.access_token_expiry,
        }
    }

    /// Authenticate user with email and password
    pub async fn login(&self, email: &str, password: &str) -> AppResult<AuthTokens> {
        let user = sqlx::query_as::<_, LoginRow>(
            "SELECT id, password_hash, role, is_active FROM users WHERE email = $1",
        )
        .bind(email.trim().to_lowercase())
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

        if !user.is_active {
            return Err(AppError::Unauthorized {
                message: "Account is disabled".to_string(),
                message_ru: "Учётная запись отключена".to_string(),
            });
        }

        let valid = verify(password, &user.password_hash)
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))?;

        if !valid {
            return Err(AppError::InvalidCredentials);
        }

        let role = Role::from_str(&user.role)
            .ok_or_else(|| AppError::Internal(format!("Unknown role '{}'", user.role)))?;

        tracing::info!(user_id = %user.id, role = %role, "User logged in");

        self.generate_token(user.id, role)
    }

    /// Resolve a bearer token to a user that is still active, with the role
    /// currently stored for them
    pub async fn authenticate(&self, token: &str) -> AppResult<(Uuid, Role)> {
        let claims = self.validate_token(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::InvalidToken)?;

        let user = sqlx::query_as::<_, (String, bool)>("SELECT role, is_active FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;

        match user {
            Some((role, true)) => {
                let role = Role::from_str(&role).ok_or(AppError::InvalidToken)?;
                Ok((user_id, role))
            }
            _ => {
                tracing::debug!(user_id = %user_id, "Token of a missing or disabled user");
                Err(AppError::Unauthorized {
                    message: "Account is disabled".to_string(),
                    message_ru: "Учётная запись отключена".to_string(),
                })
            }
        }
    }

    /// Validate access token and return claims
    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AppError::TokenExpired,
            _ => AppError::InvalidToken,
        })
    }

    /// Generate an access token
    pub fn generate_token(&self, user_id: Uuid, role: Role) -> AppResult<AuthTokens> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.access_token_expiry);

        let claims = Claims {
            sub: user_id.to_string(),
            role: role.as_str().to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        let access_token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;

        Ok(AuthTokens {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_expiry,
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService {
            db: PgPool::connect_lazy("postgres://localhost/unused").unwrap(),
            jwt_secret: "test-secret".to_string(),
            access_token_expiry: 3600,
        }
    }

    #[tokio::test]
    async fn token_round_trip_keeps_role() {
        let service = service();
        let user_id = Uuid::new_v4();
        let tokens = service.generate_token(user_id, Role::Retoucher).unwrap();

        let claims = service.validate_token(&tokens.access_token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.role, "retoucher");
        assert_eq!(tokens.token_type, "Bearer");
    }

    #[tokio::test]
    async fn token_signed_with_other_secret_is_rejected() {
        let tokens = service().generate_token(Uuid::new_v4(), Role::Admin).unwrap();
        let mut other = service();
        other.jwt_secret = "another-secret".to_string();
        assert!(matches!(
            other.validate_token(&tokens.access_token),
            Err(AppError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn expired_token_reports_expiry() {
        let mut service = service();
        service.access_token_expiry = -3600;
        let tokens = service.generate_token(Uuid::new_v4(), Role::Manager).unwrap();

        let err = service.validate_token(&tokens.access_token).unwrap_err();
        assert!(matches!(err, AppError::TokenExpired));
        assert!(matches!(
            service.validate_token("not-a-token"),
            Err(AppError::InvalidToken)
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn deactivated_user_loses_access_immediately(pool: PgPool) {
        let user_id: Uuid = sqlx::query_scalar(
            "INSERT INTO users (email, name, password_hash, role) VALUES ('p@studio.test', 'P', 'x', 'photographer') RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        let mut service = service();
        service.db = pool.clone();
        let token = service.generate_token(user_id, Role::Admin).unwrap().access_token;

        let (id, role) = service.authenticate(&token).await.unwrap();
        assert_eq!(id, user_id);
        assert_eq!(role, Role::Photographer);

        sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1")
            .bind(user_id)
            .execute(&pool)
            .await
            .unwrap();
        assert!(matches!(
            service.authenticate(&token).await,
            Err(AppError::Unauthorized { .. })
        ));
    }
}

