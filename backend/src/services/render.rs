//! Render suitability checks
//!
//! Checkers take products one at a time. A product gets at most one render
//! record; a claim that is never finished is released after the timeout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::product::log_operation;
use shared::{
    check_transition, OperationType, PaginatedResponse, Pagination, ProductMoveStatus,
    RenderStatus, RetouchRequestStatus, Role, SeniorRetouchStatus,
};

/// Render check service
#[derive(Clone)]
pub struct RenderService {
    db: PgPool,
}

#[derive(Debug, Clone, FromRow)]
struct RenderRow {
    id: Uuid,
    product_id: Uuid,
    barcode: String,
    product_name: Option<String>,
    retouch_link: Option<String>,
    checker_id: Uuid,
    status_id: i16,
    comment: Option<String>,
    started_at: DateTime<Utc>,
    checked_at: Option<DateTime<Utc>>,
}

const RENDER_SELECT: &str = r#"
    SELECT rd.id, rd.product_id, pr.barcode, pr.name AS product_name,
           (SELECT rp.retouch_link FROM retouch_request_products rp
             WHERE rp.product_id = rd.product_id ORDER BY rp.created_at DESC LIMIT 1) AS retouch_link,
           rd.checker_id, rd.status_id, rd.comment, rd.started_at, rd.checked_at
    FROM renders rd
    JOIN products pr ON pr.id = rd.product_id
"#;

/// Render check record
#[derive(Debug, Clone, Serialize)]
pub struct Render {
    pub id: Uuid,
    pub product_id: Uuid,
    pub barcode: String,
    pub product_name: Option<String>,
    pub retouch_link: Option<String>,
    pub checker_id: Uuid,
    pub status: RenderStatus,
    pub status_label: &'static str,
    pub comment: Option<String>,
    pub started_at: DateTime<Utc>,
    pub checked_at: Option<DateTime<Utc>>,
}

impl TryFrom<RenderRow> for Render {
    type Error = AppError;

    fn try_from(row: RenderRow) -> Result<Self, Self::Error> {
        let status = RenderStatus::try_from(row.status_id)?;
        Ok(Render {
            id: row.id,
            product_id: row.product_id,
            barcode: row.barcode,
            product_name: row.product_name,
            retouch_link: row.retouch_link,
            checker_id: row.checker_id,
            status,
            status_label: status.label(),
            comment: row.comment,
            started_at: row.started_at,
            checked_at: row.checked_at,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RenderFilter {
    pub status: Option<RenderStatus>,
    pub checker_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RenderVerdictInput {
    pub suitable: bool,
    pub comment: Option<String>,
}

/// Claim timeout as the `int` that `make_interval(mins => ...)` takes
pub(crate) fn interval_minutes(minutes: i64) -> AppResult<i32> {
    i32::try_from(minutes)
        .ok()
        .filter(|m| *m > 0)
        .ok_or_else(|| {
            AppError::Configuration(format!(
                "claim timeout must be between 1 and {} minutes, got {}",
                i32::MAX,
                minutes
            ))
        })
}

impl RenderService {
    /// Create a new RenderService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Hand the caller one product to check; a claim already held is returned again
    pub async fn start_check(&self, user_id: Uuid) -> AppResult<Render> {
        let mut tx = self.db.begin().await?;

        let held = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM renders WHERE checker_id = $1 AND status_id = $2 ORDER BY started_at LIMIT 1 FOR UPDATE",
        )
        .bind(user_id)
        .bind(RenderStatus::Checking.id())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(render_id) = held {
            tx.commit().await?;
            tracing::debug!(render_id = %render_id, user_id = %user_id, "Returning held render claim");
            return self.get(render_id).await;
        }

        let product_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT pr.id
            FROM products pr
            WHERE pr.move_status_id <> $1
              AND EXISTS (
                  SELECT 1 FROM retouch_request_products rp
                  JOIN retouch_requests r ON r.id = rp.request_id
                  WHERE rp.product_id = pr.id AND r.status_id = $2 AND rp.senior_retouch_status_id = $3
              )
              AND NOT EXISTS (SELECT 1 FROM renders rd WHERE rd.product_id = pr.id)
              AND NOT EXISTS (SELECT 1 FROM moderation_uploads mu WHERE mu.product_id = pr.id)
            ORDER BY pr.is_priority DESC, pr.updated_at
            LIMIT 1
            FOR UPDATE OF pr SKIP LOCKED
            "#,
        )
        .bind(ProductMoveStatus::Defective.id())
        .bind(RetouchRequestStatus::Completed.id())
        .bind(SeniorRetouchStatus::Approved.id())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::QueueEmpty("render".to_string()))?;

        check_transition(None, RenderStatus::Checking)?;
        let render_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO renders (product_id, checker_id, status_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (product_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(product_id)
        .bind(user_id)
        .bind(RenderStatus::Checking.id())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::Conflict {
            resource: "render".to_string(),
            message: "Product was claimed by another checker".to_string(),
            message_ru: "Товар уже взят другим сотрудником".to_string(),
        })?;

        tx.commit().await?;

        tracing::info!(render_id = %render_id, product_id = %product_id, user_id = %user_id, "Render check claimed");
        self.get(render_id).await
    }

    /// Record the verdict; only the claimant (or an admin) may finish a check
    pub async fn finish_check(
        &self,
        render_id: Uuid,
        input: RenderVerdictInput,
        actor: &AuthUser,
    ) -> AppResult<Render> {
        let mut tx = self.db.begin().await?;

        let (product_id, checker_id, status_id) = sqlx::query_as::<_, (Uuid, Uuid, i16)>(
            "SELECT product_id, checker_id, status_id FROM renders WHERE id = $1 FOR UPDATE",
        )
        .bind(render_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Render".to_string()))?;

        if checker_id != actor.user_id && actor.role != Role::Admin {
            return Err(AppError::InsufficientPermissions);
        }

        let to = if input.suitable {
            RenderStatus::Suitable
        } else {
            RenderStatus::Unsuitable
        };
        check_transition(Some(RenderStatus::try_from(status_id)?), to)?;

        sqlx::query("UPDATE renders SET status_id = $2, comment = $3, checked_at = NOW() WHERE id = $1")
            .bind(render_id)
            .bind(to.id())
            .bind(&input.comment)
            .execute(&mut *tx)
            .await?;

        log_operation(
            &mut tx,
            product_id,
            OperationType::RenderChecked,
            Some(actor.user_id),
            Some(to.label()),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(render_id = %render_id, verdict = %to, "Render check finished");
        self.get(render_id).await
    }

    /// Drop checks left unfinished for longer than `timeout_minutes`
    pub async fn release_stale(&self, timeout_minutes: i64) -> AppResult<u64> {
        let released = sqlx::query(
            r#"
            DELETE FROM renders
            WHERE status_id = $1 AND started_at < NOW() - make_interval(mins => $2::int)
            "#,
        )
        .bind(RenderStatus::Checking.id())
        .bind(interval_minutes(timeout_minutes)?)
        .execute(&self.db)
        .await?
        .rows_affected();

        if released > 0 {
            tracing::info!(released, timeout_minutes, "Released stale render claims");
        }
        Ok(released)
    }

    pub async fn get(&self, render_id: Uuid) -> AppResult<Render> {
        sqlx::query_as::<_, RenderRow>(&format!("{} WHERE rd.id = $1", RENDER_SELECT))
            .bind(render_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Render".to_string()))?
            .try_into()
    }

    pub async fn list(&self, filter: &RenderFilter, pagination: &Pagination) -> AppResult<PaginatedResponse<Render>> {
        let status = filter.status.map(|s| s.id());
        let where_clause = r#"
            WHERE ($1::smallint IS NULL OR rd.status_id = $1)
              AND ($2::uuid IS NULL OR rd.checker_id = $2)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM renders rd {}", where_clause))
            .bind(status)
            .bind(filter.checker_id)
            .fetch_one(&self.db)
            .await?;

        let rows = sqlx::query_as::<_, RenderRow>(&format!(
            "{} {} ORDER BY rd.started_at DESC LIMIT $3 OFFSET $4",
            RENDER_SELECT, where_clause
        ))
        .bind(status)
        .bind(filter.checker_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let data = rows
            .into_iter()
            .map(Render::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse::new(data, pagination, total as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_candidate(pool: &PgPool, barcode: &str) {
        let product_id: Uuid = sqlx::query_scalar(
            "INSERT INTO products (barcode, move_status_id) VALUES ($1, 3) RETURNING id",
        )
        .bind(barcode)
        .fetch_one(pool)
        .await
        .unwrap();
        let st_id: Uuid = sqlx::query_scalar("INSERT INTO st_requests (status_id) VALUES (5) RETURNING id")
            .fetch_one(pool)
            .await
            .unwrap();
        let line_id: Uuid = sqlx::query_scalar(
            "INSERT INTO st_request_products (request_id, product_id, photo_status_id, senior_photo_status_id) VALUES ($1, $2, 1, 1) RETURNING id",
        )
        .bind(st_id)
        .bind(product_id)
        .fetch_one(pool)
        .await
        .unwrap();
        let rr_id: Uuid = sqlx::query_scalar("INSERT INTO retouch_requests (status_id) VALUES (4) RETURNING id")
            .fetch_one(pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO retouch_request_products (request_id, st_request_product_id, product_id, retouch_status_id, senior_retouch_status_id) VALUES ($1, $2, $3, 1, 1)",
        )
        .bind(rr_id)
        .bind(line_id)
        .bind(product_id)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn seed_checker(pool: &PgPool, email: &str) -> Uuid {
        sqlx::query_scalar(
            "INSERT INTO users (email, name, password_hash, role) VALUES ($1, 'C', 'x', 'render_checker') RETURNING id",
        )
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn concurrent_checkers_get_different_products(pool: PgPool) {
        seed_candidate(&pool, "4600000000001").await;
        seed_candidate(&pool, "4600000000002").await;
        let a = seed_checker(&pool, "a@studio.test").await;
        let b = seed_checker(&pool, "b@studio.test").await;
        let service = RenderService::new(pool.clone());

        let (first, second) = tokio::join!(service.start_check(a), service.start_check(b));
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_ne!(first.product_id, second.product_id);

        let again = service.start_check(a).await.unwrap();
        assert_eq!(again.id, first.id);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn only_claimant_finishes_check(pool: PgPool) {
        seed_candidate(&pool, "4600000000001").await;
        let a = seed_checker(&pool, "a@studio.test").await;
        let b = seed_checker(&pool, "b@studio.test").await;
        let service = RenderService::new(pool.clone());

        let render = service.start_check(a).await.unwrap();
        let stranger = AuthUser { user_id: b, role: Role::RenderChecker };
        let result = service
            .finish_check(render.id, RenderVerdictInput { suitable: true, comment: None }, &stranger)
            .await;
        assert!(matches!(result, Err(AppError::InsufficientPermissions)));

        let owner = AuthUser { user_id: a, role: Role::RenderChecker };
        let done = service
            .finish_check(render.id, RenderVerdictInput { suitable: false, comment: None }, &owner)
            .await
            .unwrap();
        assert_eq!(done.status, RenderStatus::Unsuitable);

        let empty = service.start_check(b).await;
        assert!(matches!(empty, Err(AppError::QueueEmpty(_))));
    }

    #[test]
    fn interval_minutes_rejects_out_of_range_values() {
        assert_eq!(interval_minutes(60).unwrap(), 60);
        assert!(matches!(interval_minutes(0), Err(AppError::Configuration(_))));
        assert!(matches!(interval_minutes(-5), Err(AppError::Configuration(_))));
        assert!(matches!(
            interval_minutes(i64::from(i32::MAX) + 1),
            Err(AppError::Configuration(_))
        ));
    }
}

