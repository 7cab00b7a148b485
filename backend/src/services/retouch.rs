//! Retouch request service
//!
//! Approved photo lines are batched into retouch requests by the scheduler.
//! A retoucher works through a request, a senior retoucher reviews it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::notification::{retouch_batch_message, NotificationService, Topic};
use crate::services::product::log_operation;
use shared::{
    check_transition, full_batches, validate_link, OperationType, PaginatedResponse, Pagination,
    ProductMoveStatus, RetouchRequestStatus, RetouchStatus, Role, STRequestStatus,
    SeniorPhotoStatus, SeniorRetouchStatus,
};

/// Retouch request service
#[derive(Clone)]
pub struct RetouchService {
    db: PgPool,
    notifications: NotificationService,
    batch_size: usize,
}

#[derive(Debug, Clone, FromRow)]
struct RequestRow {
    id: Uuid,
    request_number: i64,
    status_id: i16,
    retoucher_id: Option<Uuid>,
    is_priority: bool,
    assigned_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    product_count: i64,
}

const REQUEST_SELECT: &str = r#"
    SELECT r.id, r.request_number, r.status_id, r.retoucher_id, r.is_priority, r.assigned_at,
           r.submitted_at, r.completed_at, r.created_at, r.updated_at,
           (SELECT COUNT(*) FROM retouch_request_products p WHERE p.request_id = r.id) AS product_count
    FROM retouch_requests r
"#;

/// Retouch request
#[derive(Debug, Clone, Serialize)]
pub struct RetouchRequest {
    pub id: Uuid,
    pub request_number: i64,
    pub status: RetouchRequestStatus,
    pub status_label: &'static str,
    pub retoucher_id: Option<Uuid>,
    pub is_priority: bool,
    pub assigned_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub product_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for RetouchRequest {
    type Error = AppError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let status = RetouchRequestStatus::try_from(row.status_id)?;
        Ok(RetouchRequest {
            id: row.id,
            request_number: row.request_number,
            status,
            status_label: status.label(),
            retoucher_id: row.retoucher_id,
            is_priority: row.is_priority,
            assigned_at: row.assigned_at,
            submitted_at: row.submitted_at,
            completed_at: row.completed_at,
            product_count: row.product_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct LineRow {
    id: Uuid,
    product_id: Uuid,
    barcode: String,
    name: Option<String>,
    photos_link: Option<String>,
    retouch_status_id: Option<i16>,
    senior_retouch_status_id: Option<i16>,
    retouch_link: Option<String>,
    comment: Option<String>,
    senior_comment: Option<String>,
}

/// Product line of a retouch request
#[derive(Debug, Clone, Serialize)]
pub struct RetouchLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub barcode: String,
    pub name: Option<String>,
    pub photos_link: Option<String>,
    pub retouch_status: Option<RetouchStatus>,
    pub senior_retouch_status: Option<SeniorRetouchStatus>,
    pub retouch_link: Option<String>,
    pub comment: Option<String>,
    pub senior_comment: Option<String>,
}

impl TryFrom<LineRow> for RetouchLine {
    type Error = AppError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        Ok(RetouchLine {
            id: row.id,
            product_id: row.product_id,
            barcode: row.barcode,
            name: row.name,
            photos_link: row.photos_link,
            retouch_status: row.retouch_status_id.map(RetouchStatus::try_from).transpose()?,
            senior_retouch_status: row
                .senior_retouch_status_id
                .map(SeniorRetouchStatus::try_from)
                .transpose()?,
            retouch_link: row.retouch_link,
            comment: row.comment,
            senior_comment: row.senior_comment,
        })
    }
}

/// Retouch request with its lines
#[derive(Debug, Clone, Serialize)]
pub struct RetouchRequestDetail {
    #[serde(flatten)]
    pub request: RetouchRequest,
    pub products: Vec<RetouchLine>,
}

/// Photo line ready for retouch
#[derive(Debug, Clone, FromRow)]
struct ReadyLine {
    line_id: Uuid,
    product_id: Uuid,
    is_priority: bool,
}

/// Outcome of one auto-creation pass
#[derive(Debug, Clone, Serialize)]
pub struct AutoCreateReport {
    pub ready: usize,
    pub batch_size: usize,
    pub created: Vec<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetouchFilter {
    pub status: Option<RetouchRequestStatus>,
    pub retoucher_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRetoucherInput {
    pub retoucher_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RetouchResultInput {
    pub status: RetouchStatus,
    pub retouch_link: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RetouchReviewInput {
    pub status: SeniorRetouchStatus,
    pub comment: Option<String>,
}

/// Keep the first line per product
fn dedupe_by_product(lines: Vec<ReadyLine>) -> Vec<ReadyLine> {
    let mut seen = std::collections::HashSet::new();
    lines
        .into_iter()
        .filter(|l| seen.insert(l.product_id))
        .collect()
}

impl RetouchService {
    /// Create a new RetouchService instance
    pub fn new(db: PgPool, notifications: NotificationService, batch_size: usize) -> Self {
        Self {
            db,
            notifications,
            batch_size,
        }
    }

    async fn lock_request(&self, conn: &mut PgConnection, request_id: Uuid) -> AppResult<RequestRow> {
        sqlx::query_as::<_, RequestRow>(&format!(
            "{} WHERE r.id = $1 FOR UPDATE OF r",
            REQUEST_SELECT
        ))
        .bind(request_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Retouch request".to_string()))
    }

    async fn change_status(
        &self,
        conn: &mut PgConnection,
        request: &RequestRow,
        to: RetouchRequestStatus,
    ) -> AppResult<()> {
        let from = RetouchRequestStatus::try_from(request.status_id)?;
        check_transition(Some(from), to)?;

        sqlx::query(
            r#"
            UPDATE retouch_requests
            SET status_id = $2,
                submitted_at = CASE WHEN $2 = 3 THEN NOW() ELSE submitted_at END,
                completed_at = CASE WHEN $2 = 4 THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(request.id)
        .bind(to.id())
        .execute(&mut *conn)
        .await?;

        tracing::info!(
            request_number = request.request_number,
            from = %from,
            to = %to,
            "Retouch request status changed"
        );
        Ok(())
    }

    fn require_status(request: &RequestRow, expected: RetouchRequestStatus) -> AppResult<()> {
        let status = RetouchRequestStatus::try_from(request.status_id)?;
        if status == expected {
            Ok(())
        } else {
            Err(AppError::Conflict {
                resource: "retouch_request".to_string(),
                message: format!("Request must be '{}', it is '{}'", expected, status),
                message_ru: format!("Заявка должна быть в статусе «{}», сейчас «{}»", expected, status),
            })
        }
    }

    async fn require_retoucher(conn: &mut PgConnection, user_id: Uuid) -> AppResult<()> {
        let role = sqlx::query_scalar::<_, String>("SELECT role FROM users WHERE id = $1 AND is_active")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Retoucher".to_string()))?;

        match Role::from_str(&role) {
            Some(Role::Retoucher | Role::SeniorRetoucher) => Ok(()),
            _ => Err(AppError::validation(
                "retoucher_id",
                "User is not a retoucher",
                "Пользователь не является ретушёром",
            )),
        }
    }

    /// Batch ready photo lines into retouch requests of exactly `batch_size`
    pub async fn auto_create(&self) -> AppResult<AutoCreateReport> {
        let batch_size = self.batch_size;
        let mut tx = self.db.begin().await?;

        let ready = sqlx::query_as::<_, ReadyLine>(
            r#"
            SELECT sp.id AS line_id, sp.product_id, pr.is_priority
            FROM st_request_products sp
            JOIN st_requests r ON r.id = sp.request_id
            JOIN products pr ON pr.id = sp.product_id
            WHERE r.status_id = $1
              AND sp.senior_photo_status_id = $2
              AND pr.move_status_id <> $3
              AND NOT pr.is_retouch_blocked
              AND NOT EXISTS (
                  SELECT 1 FROM retouch_request_products rp WHERE rp.product_id = sp.product_id
              )
            ORDER BY pr.is_priority DESC, r.checked_at, sp.created_at
            FOR UPDATE OF sp SKIP LOCKED
            "#,
        )
        .bind(STRequestStatus::Checked.id())
        .bind(SeniorPhotoStatus::Approved.id())
        .bind(ProductMoveStatus::Defective.id())
        .fetch_all(&mut *tx)
        .await?;

        let ready = dedupe_by_product(ready);
        let batches = full_batches(&ready_pairs(&ready), batch_size);

        let mut created = Vec::with_capacity(batches.len());
        for batch in &batches {
            check_transition(None, RetouchRequestStatus::Created)?;
            let is_priority = batch.iter().any(|(_, _, priority)| *priority);

            let (request_id, number) = sqlx::query_as::<_, (Uuid, i64)>(
                "INSERT INTO retouch_requests (status_id, is_priority) VALUES ($1, $2) RETURNING id, request_number",
            )
            .bind(RetouchRequestStatus::Created.id())
            .bind(is_priority)
            .fetch_one(&mut *tx)
            .await?;

            for (line_id, product_id, _) in batch {
                sqlx::query(
                    r#"
                    INSERT INTO retouch_request_products (request_id, st_request_product_id, product_id)
                    VALUES ($1, $2, $3)
                    "#,
                )
                .bind(request_id)
                .bind(line_id)
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
            }
            created.push(number);
        }

        if !created.is_empty() {
            self.notifications
                .enqueue(&mut *tx, Topic::Retouch, &retouch_batch_message(&created, batch_size))
                .await?;
        }

        tx.commit().await?;

        if created.is_empty() {
            tracing::debug!(ready = ready.len(), batch_size, "Not enough products for a retouch batch");
        } else {
            tracing::info!(
                ready = ready.len(),
                requests = created.len(),
                batch_size,
                "Retouch requests created"
            );
        }

        Ok(AutoCreateReport {
            ready: ready.len(),
            batch_size,
            created,
        })
    }

    /// Created → InProgress with a retoucher assigned
    pub async fn assign_retoucher(
        &self,
        request_id: Uuid,
        input: AssignRetoucherInput,
    ) -> AppResult<RetouchRequest> {
        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;
        Self::require_retoucher(&mut tx, input.retoucher_id).await?;

        self.change_status(&mut tx, &request, RetouchRequestStatus::InProgress).await?;
        sqlx::query("UPDATE retouch_requests SET retoucher_id = $2, assigned_at = NOW() WHERE id = $1")
            .bind(request.id)
            .bind(input.retoucher_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(self.get(request_id).await?.request)
    }

    /// Claim the next unassigned request, priority first
    pub async fn take_next(&self, user_id: Uuid) -> AppResult<RetouchRequestDetail> {
        let mut tx = self.db.begin().await?;

        let request = sqlx::query_as::<_, RequestRow>(&format!(
            "{} WHERE r.status_id = $1 ORDER BY r.is_priority DESC, r.created_at LIMIT 1 FOR UPDATE OF r SKIP LOCKED",
            REQUEST_SELECT
        ))
        .bind(RetouchRequestStatus::Created.id())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::QueueEmpty("retouch".to_string()))?;
        let request_id = request.id;

        self.change_status(&mut tx, &request, RetouchRequestStatus::InProgress).await?;
        sqlx::query("UPDATE retouch_requests SET retoucher_id = $2, assigned_at = NOW() WHERE id = $1")
            .bind(request_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(request_id = %request_id, user_id = %user_id, "Retouch request claimed");
        self.get(request_id).await
    }

    /// Record the retoucher's result for one line
    pub async fn set_retouch_status(
        &self,
        request_id: Uuid,
        barcode: &str,
        input: RetouchResultInput,
        actor: &AuthUser,
    ) -> AppResult<RetouchLine> {
        if let Some(link) = input.retouch_link.as_deref() {
            validate_link(link).map_err(|msg| {
                AppError::validation("retouch_link", msg, "Некорректная ссылка на ретушь")
            })?;
        }

        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;
        Self::require_status(&request, RetouchRequestStatus::InProgress)?;

        if actor.role == Role::Retoucher && request.retoucher_id != Some(actor.user_id) {
            return Err(AppError::InsufficientPermissions);
        }

        let line_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE retouch_request_products p
            SET retouch_status_id = $3, retouch_link = COALESCE($4, p.retouch_link), comment = $5
            FROM products pr
            WHERE p.product_id = pr.id AND p.request_id = $1 AND pr.barcode = $2
              AND p.senior_retouch_status_id IS DISTINCT FROM $6
            RETURNING p.id
            "#,
        )
        .bind(request.id)
        .bind(barcode)
        .bind(input.status.id())
        .bind(&input.retouch_link)
        .bind(&input.comment)
        .bind(SeniorRetouchStatus::Approved.id())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Unapproved product in request".to_string()))?;

        tx.commit().await?;
        self.line(request_id, line_id).await
    }

    /// InProgress → OnReview once every line carries a result
    pub async fn submit_for_review(&self, request_id: Uuid, actor: &AuthUser) -> AppResult<RetouchRequest> {
        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;

        if actor.role == Role::Retoucher && request.retoucher_id != Some(actor.user_id) {
            return Err(AppError::InsufficientPermissions);
        }

        let unmarked = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM retouch_request_products WHERE request_id = $1 AND retouch_status_id IS NULL",
        )
        .bind(request.id)
        .fetch_one(&mut *tx)
        .await?;

        if unmarked > 0 {
            return Err(AppError::validation(
                "products",
                format!("{} products have no retouch result", unmarked),
                format!("У {} товаров не указан результат ретуши", unmarked),
            ));
        }

        self.change_status(&mut tx, &request, RetouchRequestStatus::OnReview).await?;

        let done = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT product_id FROM retouch_request_products
            WHERE request_id = $1 AND retouch_status_id = $2 AND senior_retouch_status_id IS NULL
            "#,
        )
        .bind(request.id)
        .bind(RetouchStatus::Done.id())
        .fetch_all(&mut *tx)
        .await?;

        let comment = format!("Ретушь №{}", request.request_number);
        for product_id in done {
            log_operation(&mut tx, product_id, OperationType::Retouched, Some(actor.user_id), Some(&comment))
                .await?;
        }

        tx.commit().await?;
        Ok(self.get(request_id).await?.request)
    }

    /// Senior retoucher verdict on one finished line
    pub async fn review_line(
        &self,
        request_id: Uuid,
        barcode: &str,
        input: RetouchReviewInput,
    ) -> AppResult<RetouchLine> {
        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;
        Self::require_status(&request, RetouchRequestStatus::OnReview)?;

        let line_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE retouch_request_products p
            SET senior_retouch_status_id = $3, senior_comment = $4
            FROM products pr
            WHERE p.product_id = pr.id AND p.request_id = $1 AND pr.barcode = $2
              AND p.retouch_status_id = $5
            RETURNING p.id
            "#,
        )
        .bind(request.id)
        .bind(barcode)
        .bind(input.status.id())
        .bind(&input.comment)
        .bind(RetouchStatus::Done.id())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Retouched product in request".to_string()))?;

        tx.commit().await?;
        self.line(request_id, line_id).await
    }

    /// OnReview → Completed when all done lines are approved, back to
    /// InProgress with rework lines reset otherwise
    pub async fn complete_review(&self, request_id: Uuid) -> AppResult<RetouchRequestDetail> {
        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;
        Self::require_status(&request, RetouchRequestStatus::OnReview)?;

        let (unreviewed, rework) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT COUNT(*) FILTER (WHERE senior_retouch_status_id IS NULL),
                   COUNT(*) FILTER (WHERE senior_retouch_status_id = $3)
            FROM retouch_request_products
            WHERE request_id = $1 AND retouch_status_id = $2
            "#,
        )
        .bind(request.id)
        .bind(RetouchStatus::Done.id())
        .bind(SeniorRetouchStatus::Rework.id())
        .fetch_one(&mut *tx)
        .await?;

        if unreviewed > 0 {
            return Err(AppError::validation(
                "products",
                format!("{} retouched products are not reviewed", unreviewed),
                format!("{} товаров после ретуши не проверено", unreviewed),
            ));
        }

        if rework > 0 {
            self.change_status(&mut tx, &request, RetouchRequestStatus::InProgress).await?;
            sqlx::query(
                r#"
                UPDATE retouch_request_products
                SET retouch_status_id = NULL, senior_retouch_status_id = NULL
                WHERE request_id = $1 AND senior_retouch_status_id = $2
                "#,
            )
            .bind(request.id)
            .bind(SeniorRetouchStatus::Rework.id())
            .execute(&mut *tx)
            .await?;
        } else {
            self.change_status(&mut tx, &request, RetouchRequestStatus::Completed).await?;
        }

        tx.commit().await?;
        self.get(request_id).await
    }

    /// Cancel an unassigned request; its products return to the ready pool
    pub async fn cancel(&self, request_id: Uuid) -> AppResult<RetouchRequest> {
        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;
        self.change_status(&mut tx, &request, RetouchRequestStatus::Cancelled).await?;

        sqlx::query("DELETE FROM retouch_request_products WHERE request_id = $1")
            .bind(request.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(self.get(request_id).await?.request)
    }

    /// Get a request with its lines
    pub async fn get(&self, request_id: Uuid) -> AppResult<RetouchRequestDetail> {
        let row = sqlx::query_as::<_, RequestRow>(&format!("{} WHERE r.id = $1", REQUEST_SELECT))
            .bind(request_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Retouch request".to_string()))?;

        let lines = sqlx::query_as::<_, LineRow>(
            r#"
            SELECT p.id, p.product_id, pr.barcode, pr.name, sp.photos_link,
                   p.retouch_status_id, p.senior_retouch_status_id, p.retouch_link,
                   p.comment, p.senior_comment
            FROM retouch_request_products p
            JOIN products pr ON pr.id = p.product_id
            JOIN st_request_products sp ON sp.id = p.st_request_product_id
            WHERE p.request_id = $1
            ORDER BY p.created_at, pr.barcode
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.db)
        .await?;

        Ok(RetouchRequestDetail {
            request: row.try_into()?,
            products: lines
                .into_iter()
                .map(RetouchLine::try_from)
                .collect::<AppResult<Vec<_>>>()?,
        })
    }

    async fn line(&self, request_id: Uuid, line_id: Uuid) -> AppResult<RetouchLine> {
        self.get(request_id)
            .await?
            .products
            .into_iter()
            .find(|l| l.id == line_id)
            .ok_or_else(|| AppError::NotFound("Product in request".to_string()))
    }

    /// List requests, priority first then newest
    pub async fn list(
        &self,
        filter: &RetouchFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<RetouchRequest>> {
        let status = filter.status.map(|s| s.id());
        let where_clause = r#"
            WHERE ($1::smallint IS NULL OR r.status_id = $1)
              AND ($2::uuid IS NULL OR r.retoucher_id = $2)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM retouch_requests r {}",
            where_clause
        ))
        .bind(status)
        .bind(filter.retoucher_id)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "{} {} ORDER BY r.is_priority DESC, r.created_at DESC LIMIT $3 OFFSET $4",
            REQUEST_SELECT, where_clause
        ))
        .bind(status)
        .bind(filter.retoucher_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let data = rows
            .into_iter()
            .map(RetouchRequest::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse::new(data, pagination, total as u64))
    }
}

fn ready_pairs(lines: &[ReadyLine]) -> Vec<(Uuid, Uuid, bool)> {
    lines
        .iter()
        .map(|l| (l.line_id, l.product_id, l.is_priority))
        .collect()
}
