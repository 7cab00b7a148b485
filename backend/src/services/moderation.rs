//! Moderation uploads
//!
//! Two queues feed moderators: products whose render was found suitable, and
//! "studio" products that go up with studio photos because the render was
//! unsuitable or never checked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::product::log_operation;
use crate::services::render::interval_minutes;
use shared::{
    check_transition, ModerationUploadStatus, OperationType, PaginatedResponse, Pagination,
    ProductMoveStatus, RenderStatus, RetouchRequestStatus, Role, SeniorRetouchStatus,
};

/// Moderation upload service
#[derive(Clone)]
pub struct ModerationService {
    db: PgPool,
}

#[derive(Debug, Clone, FromRow)]
struct UploadRow {
    id: Uuid,
    product_id: Uuid,
    barcode: String,
    product_name: Option<String>,
    render_id: Option<Uuid>,
    moderator_id: Uuid,
    studio: bool,
    status_id: i16,
    rejection_reason: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

const UPLOAD_SELECT: &str = r#"
    SELECT mu.id, mu.product_id, pr.barcode, pr.name AS product_name, mu.render_id,
           mu.moderator_id, mu.studio, mu.status_id, mu.rejection_reason, mu.started_at, mu.finished_at
    FROM moderation_uploads mu
    JOIN products pr ON pr.id = mu.product_id
"#;

/// Moderation upload record
#[derive(Debug, Clone, Serialize)]
pub struct ModerationUpload {
    pub id: Uuid,
    pub product_id: Uuid,
    pub barcode: String,
    pub product_name: Option<String>,
    pub render_id: Option<Uuid>,
    pub moderator_id: Uuid,
    pub studio: bool,
    pub status: ModerationUploadStatus,
    pub status_label: &'static str,
    pub rejection_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<UploadRow> for ModerationUpload {
    type Error = AppError;

    fn try_from(row: UploadRow) -> Result<Self, Self::Error> {
        let status = ModerationUploadStatus::try_from(row.status_id)?;
        Ok(ModerationUpload {
            id: row.id,
            product_id: row.product_id,
            barcode: row.barcode,
            product_name: row.product_name,
            render_id: row.render_id,
            moderator_id: row.moderator_id,
            studio: row.studio,
            status,
            status_label: status.label(),
            rejection_reason: row.rejection_reason,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadFilter {
    pub status: Option<ModerationUploadStatus>,
    pub studio: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct FinishUploadInput {
    pub uploaded: bool,
    pub rejection_reason: Option<String>,
}

impl ModerationService {
    /// Create a new ModerationService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn held_upload(conn: &mut PgConnection, user_id: Uuid, studio: bool) -> AppResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM moderation_uploads
            WHERE moderator_id = $1 AND status_id = $2 AND studio = $3
            ORDER BY started_at
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(ModerationUploadStatus::Uploading.id())
        .bind(studio)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(id)
    }

    async fn insert_upload(
        conn: &mut PgConnection,
        product_id: Uuid,
        render_id: Option<Uuid>,
        user_id: Uuid,
        studio: bool,
    ) -> AppResult<Uuid> {
        check_transition(None, ModerationUploadStatus::Uploading)?;
        sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO moderation_uploads (product_id, render_id, moderator_id, studio, status_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (product_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(product_id)
        .bind(render_id)
        .bind(user_id)
        .bind(studio)
        .bind(ModerationUploadStatus::Uploading.id())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::Conflict {
            resource: "moderation_upload".to_string(),
            message: "Product was claimed by another moderator".to_string(),
            message_ru: "Товар уже взят другим модератором".to_string(),
        })
    }

    /// Claim one product with a suitable render
    pub async fn upload_start(&self, user_id: Uuid) -> AppResult<ModerationUpload> {
        let mut tx = self.db.begin().await?;

        if let Some(upload_id) = Self::held_upload(&mut tx, user_id, false).await? {
            tx.commit().await?;
            return self.get(upload_id).await;
        }

        let (render_id, product_id) = sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"
            SELECT rd.id, rd.product_id
            FROM renders rd
            JOIN products pr ON pr.id = rd.product_id
            WHERE rd.status_id = $1
              AND pr.move_status_id <> $2
              AND NOT EXISTS (SELECT 1 FROM moderation_uploads mu WHERE mu.product_id = rd.product_id)
            ORDER BY pr.is_priority DESC, rd.checked_at
            LIMIT 1
            FOR UPDATE OF rd SKIP LOCKED
            "#,
        )
        .bind(RenderStatus::Suitable.id())
        .bind(ProductMoveStatus::Defective.id())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::QueueEmpty("moderation".to_string()))?;

        let upload_id = Self::insert_upload(&mut tx, product_id, Some(render_id), user_id, false).await?;
        tx.commit().await?;

        tracing::info!(upload_id = %upload_id, product_id = %product_id, user_id = %user_id, "Moderation upload claimed");
        self.get(upload_id).await
    }

    /// Claim one product to upload with studio photos
    pub async fn studio_upload_start(&self, user_id: Uuid) -> AppResult<ModerationUpload> {
        let mut tx = self.db.begin().await?;

        if let Some(upload_id) = Self::held_upload(&mut tx, user_id, true).await? {
            tx.commit().await?;
            return self.get(upload_id).await;
        }

        let (product_id, render_id) = sqlx::query_as::<_, (Uuid, Option<Uuid>)>(
            r#"
            SELECT pr.id, rd.id
            FROM products pr
            LEFT JOIN renders rd ON rd.product_id = pr.id
            WHERE pr.move_status_id <> $1
              AND EXISTS (
                  SELECT 1 FROM retouch_request_products rp
                  JOIN retouch_requests r ON r.id = rp.request_id
                  WHERE rp.product_id = pr.id AND r.status_id = $2 AND rp.senior_retouch_status_id = $3
              )
              AND (rd.id IS NULL OR rd.status_id = $4)
              AND NOT EXISTS (SELECT 1 FROM moderation_uploads mu WHERE mu.product_id = pr.id)
            ORDER BY pr.is_priority DESC, pr.updated_at
            LIMIT 1
            FOR UPDATE OF pr SKIP LOCKED
            "#,
        )
        .bind(ProductMoveStatus::Defective.id())
        .bind(RetouchRequestStatus::Completed.id())
        .bind(SeniorRetouchStatus::Approved.id())
        .bind(RenderStatus::Unsuitable.id())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::QueueEmpty("studio_moderation".to_string()))?;

        let upload_id = Self::insert_upload(&mut tx, product_id, render_id, user_id, true).await?;
        tx.commit().await?;

        tracing::info!(upload_id = %upload_id, product_id = %product_id, user_id = %user_id, "Studio upload claimed");
        self.get(upload_id).await
    }

    /// Uploading → Uploaded or Rejected; only the claimant (or an admin)
    pub async fn finish_upload(
        &self,
        upload_id: Uuid,
        input: FinishUploadInput,
        actor: &AuthUser,
    ) -> AppResult<ModerationUpload> {
        let reason = input
            .rejection_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        if !input.uploaded && reason.is_none() {
            return Err(AppError::validation(
                "rejection_reason",
                "A rejection needs a reason",
                "Укажите причину отклонения",
            ));
        }

        let mut tx = self.db.begin().await?;

        let (product_id, moderator_id, status_id) = sqlx::query_as::<_, (Uuid, Uuid, i16)>(
            "SELECT product_id, moderator_id, status_id FROM moderation_uploads WHERE id = $1 FOR UPDATE",
        )
        .bind(upload_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Moderation upload".to_string()))?;

        if moderator_id != actor.user_id && actor.role != Role::Admin {
            return Err(AppError::InsufficientPermissions);
        }

        let to = if input.uploaded {
            ModerationUploadStatus::Uploaded
        } else {
            ModerationUploadStatus::Rejected
        };
        check_transition(Some(ModerationUploadStatus::try_from(status_id)?), to)?;

        sqlx::query(
            "UPDATE moderation_uploads SET status_id = $2, rejection_reason = $3, finished_at = NOW() WHERE id = $1",
        )
        .bind(upload_id)
        .bind(to.id())
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        if to == ModerationUploadStatus::Uploaded {
            log_operation(&mut tx, product_id, OperationType::ModerationUploaded, Some(actor.user_id), None)
                .await?;
        }

        tx.commit().await?;

        tracing::info!(upload_id = %upload_id, result = %to, "Moderation upload finished");
        self.get(upload_id).await
    }

    /// Drop uploads left unfinished for longer than `timeout_minutes`
    pub async fn release_stale(&self, timeout_minutes: i64) -> AppResult<u64> {
        let released = sqlx::query(
            r#"
            DELETE FROM moderation_uploads
            WHERE status_id = $1 AND started_at < NOW() - make_interval(mins => $2::int)
            "#,
        )
        .bind(ModerationUploadStatus::Uploading.id())
        .bind(interval_minutes(timeout_minutes)?)
        .execute(&self.db)
        .await?
        .rows_affected();

        if released > 0 {
            tracing::info!(released, timeout_minutes, "Released stale moderation uploads");
        }
        Ok(released)
    }

    pub async fn get(&self, upload_id: Uuid) -> AppResult<ModerationUpload> {
        sqlx::query_as::<_, UploadRow>(&format!("{} WHERE mu.id = $1", UPLOAD_SELECT))
            .bind(upload_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Moderation upload".to_string()))?
            .try_into()
    }

    pub async fn list(
        &self,
        filter: &UploadFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<ModerationUpload>> {
        let status = filter.status.map(|s| s.id());
        let where_clause = r#"
            WHERE ($1::smallint IS NULL OR mu.status_id = $1)
              AND ($2::boolean IS NULL OR mu.studio = $2)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM moderation_uploads mu {}",
            where_clause
        ))
        .bind(status)
        .bind(filter.studio)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            "{} {} ORDER BY mu.started_at DESC LIMIT $3 OFFSET $4",
            UPLOAD_SELECT, where_clause
        ))
        .bind(status)
        .bind(filter.studio)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let data = rows
            .into_iter()
            .map(ModerationUpload::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse::new(data, pagination, total as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejection_without_reason_is_refused_before_touching_the_database() {
        let service = ModerationService::new(PgPool::connect_lazy("postgres://localhost/unused").unwrap());
        let actor = AuthUser {
            user_id: Uuid::new_v4(),
            role: Role::Moderator,
        };
        let result = service
            .finish_upload(
                Uuid::new_v4(),
                FinishUploadInput {
                    uploaded: false,
                    rejection_reason: Some("   ".to_string()),
                },
                &actor,
            )
            .await;
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn suitable_render_is_uploaded_once(pool: PgPool) {
        let checker: Uuid = sqlx::query_scalar(
            "INSERT INTO users (email, name, password_hash, role) VALUES ('c@studio.test', 'C', 'x', 'render_checker') RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        let moderator: Uuid = sqlx::query_scalar(
            "INSERT INTO users (email, name, password_hash, role) VALUES ('m@studio.test', 'M', 'x', 'moderator') RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        let product_id: Uuid = sqlx::query_scalar(
            "INSERT INTO products (barcode, move_status_id) VALUES ('4600000000001', 3) RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO renders (product_id, checker_id, status_id, checked_at) VALUES ($1, $2, 2, NOW())")
            .bind(product_id)
            .bind(checker)
            .execute(&pool)
            .await
            .unwrap();

        let service = ModerationService::new(pool.clone());
        let upload = service.upload_start(moderator).await.unwrap();
        assert_eq!(upload.product_id, product_id);
        assert!(!upload.studio);

        let actor = AuthUser { user_id: moderator, role: Role::Moderator };
        let done = service
            .finish_upload(upload.id, FinishUploadInput { uploaded: true, rejection_reason: None }, &actor)
            .await
            .unwrap();
        assert_eq!(done.status, ModerationUploadStatus::Uploaded);

        let next = service.upload_start(moderator).await;
        assert!(matches!(next, Err(AppError::QueueEmpty(_))));
    }

    /// Received product with an approved retouch and a render in `render_status`
    async fn seed_retouched(pool: &PgPool, barcode: &str, checker: Uuid, render_status: i16) -> Uuid {
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
        sqlx::query("INSERT INTO renders (product_id, checker_id, status_id, checked_at) VALUES ($1, $2, $3, NOW())")
            .bind(product_id)
            .bind(checker)
            .bind(render_status)
            .execute(pool)
            .await
            .unwrap();
        product_id
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn studio_upload_takes_only_unsuitable_renders(pool: PgPool) {
        let checker: Uuid = sqlx::query_scalar(
            "INSERT INTO users (email, name, password_hash, role) VALUES ('c@studio.test', 'C', 'x', 'render_checker') RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        let mut moderators = Vec::new();
        for email in ["m1@studio.test", "m2@studio.test"] {
            let id: Uuid = sqlx::query_scalar(
                "INSERT INTO users (email, name, password_hash, role) VALUES ($1, 'M', 'x', 'moderator') RETURNING id",
            )
            .bind(email)
            .fetch_one(&pool)
            .await
            .unwrap();
            moderators.push(id);
        }
        let unsuitable = seed_retouched(&pool, "4600000000001", checker, RenderStatus::Unsuitable.id()).await;
        seed_retouched(&pool, "4600000000002", checker, RenderStatus::Suitable.id()).await;

        let service = ModerationService::new(pool.clone());
        let upload = service.studio_upload_start(moderators[0]).await.unwrap();
        assert_eq!(upload.product_id, unsuitable);
        assert!(upload.studio);
        assert!(upload.render_id.is_some());

        let held = service.studio_upload_start(moderators[0]).await.unwrap();
        assert_eq!(held.id, upload.id);

        let other = service.studio_upload_start(moderators[1]).await;
        assert!(matches!(other, Err(AppError::QueueEmpty(_))));
    }
}

