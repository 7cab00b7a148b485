//! Photography request service
//!
//! A request groups received products for one shooting session and moves
//! through Draft → Created → Shooting → Shot → Checked. Photographers mark
//! each line, a senior photographer reviews the result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::notification::NotificationService;
use crate::services::product::{apply_defect, lock_product, log_operation, BarcodeReport};
use shared::{
    check_transition, chunk_all, normalize_barcodes, partition_barcodes, validate_link,
    InvoiceStatus, OperationType, PaginatedResponse, Pagination, PhotoStatus, ProductMoveStatus, Role,
    STRequestStatus, SeniorPhotoStatus,
};

/// Statuses in which a request still holds its products
pub(crate) const OPEN_ST_STATUSES: [i16; 4] = [1, 2, 3, 4];

/// Photography request service
#[derive(Clone)]
pub struct STRequestService {
    db: PgPool,
    notifications: NotificationService,
    default_chunk_size: usize,
}

#[derive(Debug, Clone, FromRow)]
struct RequestRow {
    id: Uuid,
    request_number: i64,
    status_id: i16,
    stockman_id: Option<Uuid>,
    photographer_id: Option<Uuid>,
    assistant_id: Option<Uuid>,
    photo_date: Option<DateTime<Utc>>,
    shot_at: Option<DateTime<Utc>>,
    checked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    product_count: i64,
}

const REQUEST_SELECT: &str = r#"
    SELECT r.id, r.request_number, r.status_id, r.stockman_id, r.photographer_id, r.assistant_id,
           r.photo_date, r.shot_at, r.checked_at, r.created_at, r.updated_at,
           (SELECT COUNT(*) FROM st_request_products p WHERE p.request_id = r.id) AS product_count
    FROM st_requests r
"#;

/// Photography request
#[derive(Debug, Clone, Serialize)]
pub struct STRequest {
    pub id: Uuid,
    pub request_number: i64,
    pub status: STRequestStatus,
    pub status_label: &'static str,
    pub stockman_id: Option<Uuid>,
    pub photographer_id: Option<Uuid>,
    pub assistant_id: Option<Uuid>,
    pub photo_date: Option<DateTime<Utc>>,
    pub shot_at: Option<DateTime<Utc>>,
    pub checked_at: Option<DateTime<Utc>>,
    pub product_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for STRequest {
    type Error = AppError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let status = STRequestStatus::try_from(row.status_id)?;
        Ok(STRequest {
            id: row.id,
            request_number: row.request_number,
            status,
            status_label: status.label(),
            stockman_id: row.stockman_id,
            photographer_id: row.photographer_id,
            assistant_id: row.assistant_id,
            photo_date: row.photo_date,
            shot_at: row.shot_at,
            checked_at: row.checked_at,
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
    move_status_id: i16,
    is_priority: bool,
    photo_status_id: Option<i16>,
    senior_photo_status_id: Option<i16>,
    photos_link: Option<String>,
    comment: Option<String>,
    senior_comment: Option<String>,
}

/// Product line of a request
#[derive(Debug, Clone, Serialize)]
pub struct STRequestLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub barcode: String,
    pub name: Option<String>,
    pub move_status: ProductMoveStatus,
    pub is_priority: bool,
    pub photo_status: Option<PhotoStatus>,
    pub senior_photo_status: Option<SeniorPhotoStatus>,
    pub photos_link: Option<String>,
    pub comment: Option<String>,
    pub senior_comment: Option<String>,
}

impl TryFrom<LineRow> for STRequestLine {
    type Error = AppError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        Ok(STRequestLine {
            id: row.id,
            product_id: row.product_id,
            barcode: row.barcode,
            name: row.name,
            move_status: ProductMoveStatus::try_from(row.move_status_id)?,
            is_priority: row.is_priority,
            photo_status: row.photo_status_id.map(PhotoStatus::try_from).transpose()?,
            senior_photo_status: row
                .senior_photo_status_id
                .map(SeniorPhotoStatus::try_from)
                .transpose()?,
            photos_link: row.photos_link,
            comment: row.comment,
            senior_comment: row.senior_comment,
        })
    }
}

/// Request with its product lines
#[derive(Debug, Clone, Serialize)]
pub struct STRequestDetail {
    #[serde(flatten)]
    pub request: STRequest,
    pub products: Vec<STRequestLine>,
}

/// Request list filter
#[derive(Debug, Default, Deserialize)]
pub struct STRequestFilter {
    pub status: Option<STRequestStatus>,
    pub photographer_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct BarcodesInput {
    pub barcodes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignPhotographerInput {
    pub photographer_id: Uuid,
    pub assistant_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct PhotoResultInput {
    pub status: PhotoStatus,
    pub comment: Option<String>,
    pub photos_link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PhotoReviewInput {
    pub status: SeniorPhotoStatus,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkCreateInput {
    pub barcodes: Vec<String>,
    pub chunk_size: Option<usize>,
}

/// Outcome of bulk request creation
#[derive(Debug, Clone, Serialize)]
pub struct BulkCreateReport {
    pub requests: Vec<STRequest>,
    pub skipped: Vec<crate::services::product::SkippedBarcode>,
}

/// Why a product cannot join a request, if it cannot
async fn ineligibility(
    conn: &mut PgConnection,
    product_id: Uuid,
    move_status_id: i16,
) -> AppResult<Option<String>> {
    if move_status_id != ProductMoveStatus::Received.id() {
        let status = ProductMoveStatus::try_from(move_status_id)?;
        return Ok(Some(format!("Product is '{}', not received", status)));
    }

    let open = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT r.request_number
        FROM st_request_products p
        JOIN st_requests r ON r.id = p.request_id
        WHERE p.product_id = $1 AND r.status_id = ANY($2)
        LIMIT 1
        "#,
    )
    .bind(product_id)
    .bind(&OPEN_ST_STATUSES[..])
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(n) = open {
        return Ok(Some(format!("Product is already in request №{}", n)));
    }

    let invoice = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT i.invoice_number
        FROM invoice_products p
        JOIN invoices i ON i.id = p.invoice_id
        WHERE p.product_id = $1 AND i.status_id = $2
        LIMIT 1
        "#,
    )
    .bind(product_id)
    .bind(InvoiceStatus::Draft.id())
    .fetch_optional(&mut *conn)
    .await?;

    Ok(invoice.map(|n| format!("Product is in draft invoice №{}", n)))
}

async fn insert_line(
    conn: &mut PgConnection,
    request_id: Uuid,
    request_number: i64,
    product_id: Uuid,
    user_id: Uuid,
) -> AppResult<()> {
    sqlx::query("INSERT INTO st_request_products (request_id, product_id) VALUES ($1, $2)")
        .bind(request_id)
        .bind(product_id)
        .execute(&mut *conn)
        .await?;
    log_operation(
        conn,
        product_id,
        OperationType::AddedToRequest,
        Some(user_id),
        Some(&format!("Заявка №{}", request_number)),
    )
    .await
}

impl STRequestService {
    /// Create a new STRequestService instance
    pub fn new(db: PgPool, notifications: NotificationService, default_chunk_size: usize) -> Self {
        Self {
            db,
            notifications,
            default_chunk_size,
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
        .ok_or_else(|| AppError::NotFound("Photo request".to_string()))
    }

    async fn change_status(
        &self,
        conn: &mut PgConnection,
        request: &RequestRow,
        to: STRequestStatus,
    ) -> AppResult<()> {
        let from = STRequestStatus::try_from(request.status_id)?;
        check_transition(Some(from), to)?;

        sqlx::query(
            r#"
            UPDATE st_requests
            SET status_id = $2,
                shot_at = CASE WHEN $2 = 4 THEN NOW() ELSE shot_at END,
                checked_at = CASE WHEN $2 = 5 THEN NOW() ELSE checked_at END,
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
            "Photo request status changed"
        );
        Ok(())
    }

    fn require_editable(request: &RequestRow) -> AppResult<()> {
        let status = STRequestStatus::try_from(request.status_id)?;
        if matches!(status, STRequestStatus::Draft | STRequestStatus::Created) {
            Ok(())
        } else {
            Err(AppError::Conflict {
                resource: "st_request".to_string(),
                message: format!("Products cannot be changed while the request is '{}'", status),
                message_ru: format!("Нельзя менять состав заявки в статусе «{}»", status),
            })
        }
    }

    fn require_status(request: &RequestRow, expected: STRequestStatus) -> AppResult<()> {
        let status = STRequestStatus::try_from(request.status_id)?;
        if status == expected {
            Ok(())
        } else {
            Err(AppError::Conflict {
                resource: "st_request".to_string(),
                message: format!("Request must be '{}', it is '{}'", expected, status),
                message_ru: format!("Заявка должна быть в статусе «{}», сейчас «{}»", expected, status),
            })
        }
    }

    /// Create an empty draft request
    pub async fn create(&self, user_id: Uuid) -> AppResult<STRequest> {
        check_transition(None, STRequestStatus::Draft)?;

        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO st_requests (status_id, stockman_id) VALUES ($1, $2) RETURNING id",
        )
        .bind(STRequestStatus::Draft.id())
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(request_id = %id, "Photo request created");
        Ok(self.get(id).await?.request)
    }

    /// Add received products to a draft or created request
    pub async fn add_products(
        &self,
        request_id: Uuid,
        input: BarcodesInput,
        user_id: Uuid,
    ) -> AppResult<BarcodeReport> {
        let (valid, invalid) = partition_barcodes(&normalize_barcodes(&input.barcodes));
        let mut report = BarcodeReport::default();
        for (barcode, reason) in invalid {
            report.skip(&barcode, reason);
        }

        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;
        Self::require_editable(&request)?;

        for barcode in valid {
            let Some(product) = lock_product(&mut tx, &barcode).await? else {
                report.skip(&barcode, "Product not found");
                continue;
            };
            if let Some(reason) = ineligibility(&mut tx, product.id, product.move_status_id).await? {
                report.skip(&barcode, reason);
                continue;
            }
            insert_line(&mut tx, request.id, request.request_number, product.id, user_id).await?;
            report.processed.push(barcode);
        }

        sqlx::query("UPDATE st_requests SET updated_at = NOW() WHERE id = $1")
            .bind(request.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            request_number = request.request_number,
            added = report.processed.len(),
            skipped = report.skipped.len(),
            "Products added to photo request"
        );
        Ok(report)
    }

    /// Remove a product from a draft or created request
    pub async fn remove_product(
        &self,
        request_id: Uuid,
        barcode: &str,
        user_id: Uuid,
    ) -> AppResult<STRequestDetail> {
        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;
        Self::require_editable(&request)?;

        let product_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            DELETE FROM st_request_products p
            USING products pr
            WHERE p.product_id = pr.id AND p.request_id = $1 AND pr.barcode = $2
            RETURNING p.product_id
            "#,
        )
        .bind(request.id)
        .bind(barcode)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Product in request".to_string()))?;

        log_operation(
            &mut tx,
            product_id,
            OperationType::RemovedFromRequest,
            Some(user_id),
            Some(&format!("Заявка №{}", request.request_number)),
        )
        .await?;

        tx.commit().await?;
        self.get(request_id).await
    }

    /// Draft → Created
    pub async fn finalize(&self, request_id: Uuid) -> AppResult<STRequest> {
        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;

        if request.product_count == 0 {
            return Err(AppError::validation(
                "products",
                "Request has no products",
                "В заявке нет товаров",
            ));
        }

        self.change_status(&mut tx, &request, STRequestStatus::Created).await?;
        tx.commit().await?;
        Ok(self.get(request_id).await?.request)
    }

    /// Created → Draft
    pub async fn return_to_draft(&self, request_id: Uuid) -> AppResult<STRequest> {
        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;
        self.change_status(&mut tx, &request, STRequestStatus::Draft).await?;
        tx.commit().await?;
        Ok(self.get(request_id).await?.request)
    }

    /// Created → Shooting with a photographer assigned
    pub async fn assign_photographer(
        &self,
        request_id: Uuid,
        input: AssignPhotographerInput,
    ) -> AppResult<STRequest> {
        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;

        let role = sqlx::query_scalar::<_, String>(
            "SELECT role FROM users WHERE id = $1 AND is_active",
        )
        .bind(input.photographer_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Photographer".to_string()))?;

        if !matches!(
            Role::from_str(&role),
            Some(Role::Photographer | Role::SeniorPhotographer)
        ) {
            return Err(AppError::validation(
                "photographer_id",
                "User is not a photographer",
                "Пользователь не является фотографом",
            ));
        }

        self.change_status(&mut tx, &request, STRequestStatus::Shooting).await?;

        sqlx::query(
            r#"
            UPDATE st_requests
            SET photographer_id = $2, assistant_id = $3, photo_date = NOW()
            WHERE id = $1
            "#,
        )
        .bind(request.id)
        .bind(input.photographer_id)
        .bind(input.assistant_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(self.get(request_id).await?.request)
    }

    /// Record the shooting result for one line
    pub async fn set_photo_status(
        &self,
        request_id: Uuid,
        barcode: &str,
        input: PhotoResultInput,
        actor: &AuthUser,
    ) -> AppResult<STRequestLine> {
        if let Some(link) = input.photos_link.as_deref() {
            validate_link(link).map_err(|msg| {
                AppError::validation("photos_link", msg, "Некорректная ссылка на фото")
            })?;
        }

        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;
        Self::require_status(&request, STRequestStatus::Shooting)?;

        if actor.role == Role::Photographer
            && request.photographer_id != Some(actor.user_id)
            && request.assistant_id != Some(actor.user_id)
        {
            return Err(AppError::InsufficientPermissions);
        }

        let product = lock_product(&mut tx, barcode)
            .await?
            .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        let line = sqlx::query_as::<_, (Uuid, Option<i16>)>(
            "SELECT id, senior_photo_status_id FROM st_request_products WHERE request_id = $1 AND product_id = $2 FOR UPDATE",
        )
        .bind(request.id)
        .bind(product.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Product in request".to_string()))?;

        if line.1 == Some(SeniorPhotoStatus::Approved.id()) {
            return Err(AppError::Conflict {
                resource: "st_request_product".to_string(),
                message: "Line is already approved".to_string(),
                message_ru: "Позиция уже принята старшим фотографом".to_string(),
            });
        }

        let is_defective = product.move_status_id == ProductMoveStatus::Defective.id();
        match input.status {
            PhotoStatus::Defective if !is_defective => {
                apply_defect(
                    &mut tx,
                    &self.notifications,
                    &product,
                    actor.user_id,
                    input.comment.as_deref(),
                )
                .await?;
            }
            PhotoStatus::Shot if is_defective => {
                return Err(AppError::validation(
                    "status",
                    "A defective product cannot be marked as shot",
                    "Бракованный товар нельзя отметить отснятым",
                ));
            }
            _ => {}
        }

        sqlx::query(
            r#"
            UPDATE st_request_products
            SET photo_status_id = $2, comment = $3, photos_link = COALESCE($4, photos_link)
            WHERE id = $1
            "#,
        )
        .bind(line.0)
        .bind(input.status.id())
        .bind(&input.comment)
        .bind(&input.photos_link)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.line(request_id, line.0).await
    }

    /// Shooting → Shot once every line carries a photo status
    pub async fn finish_shooting(&self, request_id: Uuid, user_id: Uuid) -> AppResult<STRequest> {
        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;

        let unmarked = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM st_request_products WHERE request_id = $1 AND photo_status_id IS NULL",
        )
        .bind(request.id)
        .fetch_one(&mut *tx)
        .await?;

        if unmarked > 0 {
            return Err(AppError::validation(
                "products",
                format!("{} products have no photo status", unmarked),
                format!("У {} товаров не указан результат съёмки", unmarked),
            ));
        }

        self.change_status(&mut tx, &request, STRequestStatus::Shot).await?;

        let shot = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT product_id FROM st_request_products
            WHERE request_id = $1 AND photo_status_id = $2 AND senior_photo_status_id IS NULL
            "#,
        )
        .bind(request.id)
        .bind(PhotoStatus::Shot.id())
        .fetch_all(&mut *tx)
        .await?;

        let comment = format!("Заявка №{}", request.request_number);
        for product_id in shot {
            log_operation(&mut tx, product_id, OperationType::Photographed, Some(user_id), Some(&comment))
                .await?;
        }

        tx.commit().await?;
        Ok(self.get(request_id).await?.request)
    }

    /// Senior photographer verdict on one shot line
    pub async fn review_line(
        &self,
        request_id: Uuid,
        barcode: &str,
        input: PhotoReviewInput,
    ) -> AppResult<STRequestLine> {
        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;
        Self::require_status(&request, STRequestStatus::Shot)?;

        let line_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE st_request_products p
            SET senior_photo_status_id = $3, senior_comment = $4
            FROM products pr
            WHERE p.product_id = pr.id AND p.request_id = $1 AND pr.barcode = $2
              AND p.photo_status_id = $5
            RETURNING p.id
            "#,
        )
        .bind(request.id)
        .bind(barcode)
        .bind(input.status.id())
        .bind(&input.comment)
        .bind(PhotoStatus::Shot.id())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Shot product in request".to_string()))?;

        tx.commit().await?;
        self.line(request_id, line_id).await
    }

    /// Shot → Checked when all shot lines are approved, Shot → Shooting otherwise
    pub async fn complete_review(&self, request_id: Uuid) -> AppResult<STRequestDetail> {
        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;
        Self::require_status(&request, STRequestStatus::Shot)?;

        let (unreviewed, reshoot) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT COUNT(*) FILTER (WHERE senior_photo_status_id IS NULL),
                   COUNT(*) FILTER (WHERE senior_photo_status_id = $3)
            FROM st_request_products
            WHERE request_id = $1 AND photo_status_id = $2
            "#,
        )
        .bind(request.id)
        .bind(PhotoStatus::Shot.id())
        .bind(SeniorPhotoStatus::Reshoot.id())
        .fetch_one(&mut *tx)
        .await?;

        if unreviewed > 0 {
            return Err(AppError::validation(
                "products",
                format!("{} shot products are not reviewed", unreviewed),
                format!("{} отснятых товаров не проверено", unreviewed),
            ));
        }

        if reshoot > 0 {
            self.change_status(&mut tx, &request, STRequestStatus::Shooting).await?;
            sqlx::query(
                r#"
                UPDATE st_request_products
                SET photo_status_id = NULL, senior_photo_status_id = NULL
                WHERE request_id = $1 AND senior_photo_status_id = $2
                "#,
            )
            .bind(request.id)
            .bind(SeniorPhotoStatus::Reshoot.id())
            .execute(&mut *tx)
            .await?;
        } else {
            self.change_status(&mut tx, &request, STRequestStatus::Checked).await?;
        }

        tx.commit().await?;
        self.get(request_id).await
    }

    /// Create Created requests from eligible barcodes, `chunk_size` products each
    pub async fn bulk_create(&self, input: BulkCreateInput, user_id: Uuid) -> AppResult<BulkCreateReport> {
        let chunk_size = input.chunk_size.unwrap_or(self.default_chunk_size);
        if chunk_size == 0 {
            return Err(AppError::validation(
                "chunk_size",
                "Chunk size must be positive",
                "Размер заявки должен быть больше нуля",
            ));
        }
        check_transition(None, STRequestStatus::Created)?;

        let (valid, invalid) = partition_barcodes(&normalize_barcodes(&input.barcodes));
        let mut report = BarcodeReport::default();
        for (barcode, reason) in invalid {
            report.skip(&barcode, reason);
        }

        let mut tx = self.db.begin().await?;

        let mut eligible = Vec::new();
        for barcode in valid {
            let Some(product) = lock_product(&mut tx, &barcode).await? else {
                report.skip(&barcode, "Product not found");
                continue;
            };
            match ineligibility(&mut tx, product.id, product.move_status_id).await? {
                Some(reason) => report.skip(&barcode, reason),
                None => eligible.push(product.id),
            }
        }

        let mut created = Vec::new();
        for chunk in chunk_all(&eligible, chunk_size) {
            let (id, number) = sqlx::query_as::<_, (Uuid, i64)>(
                "INSERT INTO st_requests (status_id, stockman_id) VALUES ($1, $2) RETURNING id, request_number",
            )
            .bind(STRequestStatus::Created.id())
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

            for product_id in chunk {
                insert_line(&mut tx, id, number, product_id, user_id).await?;
            }
            created.push(id);
        }

        tx.commit().await?;

        tracing::info!(
            requests = created.len(),
            products = eligible.len(),
            chunk_size,
            "Photo requests created in bulk"
        );

        let mut requests = Vec::with_capacity(created.len());
        for id in created {
            requests.push(self.get(id).await?.request);
        }

        Ok(BulkCreateReport {
            requests,
            skipped: report.skipped,
        })
    }

    /// Cancel a request that has not gone to shooting
    pub async fn cancel(&self, request_id: Uuid, user_id: Uuid) -> AppResult<STRequest> {
        let mut tx = self.db.begin().await?;
        let request = self.lock_request(&mut tx, request_id).await?;
        self.change_status(&mut tx, &request, STRequestStatus::Cancelled).await?;

        let products = sqlx::query_scalar::<_, Uuid>(
            "SELECT product_id FROM st_request_products WHERE request_id = $1",
        )
        .bind(request.id)
        .fetch_all(&mut *tx)
        .await?;

        let comment = format!("Заявка №{} отменена", request.request_number);
        for product_id in products {
            log_operation(&mut tx, product_id, OperationType::RemovedFromRequest, Some(user_id), Some(&comment))
                .await?;
        }

        tx.commit().await?;
        Ok(self.get(request_id).await?.request)
    }

    /// Get a request with its lines
    pub async fn get(&self, request_id: Uuid) -> AppResult<STRequestDetail> {
        let row = sqlx::query_as::<_, RequestRow>(&format!("{} WHERE r.id = $1", REQUEST_SELECT))
            .bind(request_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Photo request".to_string()))?;

        let lines = sqlx::query_as::<_, LineRow>(
            r#"
            SELECT p.id, p.product_id, pr.barcode, pr.name, pr.move_status_id, pr.is_priority,
                   p.photo_status_id, p.senior_photo_status_id, p.photos_link, p.comment, p.senior_comment
            FROM st_request_products p
            JOIN products pr ON pr.id = p.product_id
            WHERE p.request_id = $1
            ORDER BY p.created_at, pr.barcode
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.db)
        .await?;

        Ok(STRequestDetail {
            request: row.try_into()?,
            products: lines
                .into_iter()
                .map(STRequestLine::try_from)
                .collect::<AppResult<Vec<_>>>()?,
        })
    }

    async fn line(&self, request_id: Uuid, line_id: Uuid) -> AppResult<STRequestLine> {
        self.get(request_id)
            .await?
            .products
            .into_iter()
            .find(|l| l.id == line_id)
            .ok_or_else(|| AppError::NotFound("Product in request".to_string()))
    }

    /// List requests, newest first
    pub async fn list(
        &self,
        filter: &STRequestFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<STRequest>> {
        let status = filter.status.map(|s| s.id());
        let where_clause = r#"
            WHERE ($1::smallint IS NULL OR r.status_id = $1)
              AND ($2::uuid IS NULL OR r.photographer_id = $2 OR r.assistant_id = $2)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM st_requests r {}",
            where_clause
        ))
        .bind(status)
        .bind(filter.photographer_id)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, RequestRow>(&format!(
            "{} {} ORDER BY r.created_at DESC LIMIT $3 OFFSET $4",
            REQUEST_SELECT, where_clause
        ))
        .bind(status)
        .bind(filter.photographer_id)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let data = rows
            .into_iter()
            .map(STRequest::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse::new(data, pagination, total as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_statuses_match_catalog() {
        let open: Vec<i16> = [
            STRequestStatus::Draft,
            STRequestStatus::Created,
            STRequestStatus::Shooting,
            STRequestStatus::Shot,
        ]
        .iter()
        .map(|s| s.id())
        .collect();
        assert_eq!(open, OPEN_ST_STATUSES.to_vec());
    }

    #[test]
    fn line_row_converts_optional_statuses() {
        let line = STRequestLine::try_from(LineRow {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            barcode: "4601234567890".to_string(),
            name: None,
            move_status_id: 3,
            is_priority: false,
            photo_status_id: Some(1),
            senior_photo_status_id: None,
            photos_link: None,
            comment: None,
            senior_comment: None,
        })
        .unwrap();
        assert_eq!(line.photo_status, Some(PhotoStatus::Shot));
        assert_eq!(line.senior_photo_status, None);
        assert_eq!(line.move_status, ProductMoveStatus::Received);
    }

    #[test]
    fn unknown_line_status_is_internal_error() {
        let result = STRequestLine::try_from(LineRow {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            barcode: "4601234567890".to_string(),
            name: None,
            move_status_id: 3,
            is_priority: false,
            photo_status_id: Some(9),
            senior_photo_status_id: None,
            photos_link: None,
            comment: None,
            senior_comment: None,
        });
        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    async fn seed_user(pool: &PgPool, email: &str, role: &str) -> Uuid {
        sqlx::query_scalar(
            "INSERT INTO users (email, name, password_hash, role) VALUES ($1, 'U', 'x', $2) RETURNING id",
        )
        .bind(email)
        .bind(role)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn reshoot_loop_ends_in_checked(pool: PgPool) {
        let telegram = crate::config::TelegramConfig {
            bot_token: String::new(),
            chat_id: 0,
            defects_thread_id: None,
            retouch_thread_id: None,
            orders_thread_id: None,
            max_attempts: 5,
            login_max_age_secs: 86400,
        };
        let notifications = NotificationService::new(pool.clone(), &telegram);
        let stockman = seed_user(&pool, "s@studio.test", "stockman").await;
        let photographer = seed_user(&pool, "p@studio.test", "photographer").await;
        let actor = AuthUser { user_id: photographer, role: Role::Photographer };
        const BARCODE: &str = "4601234567890";

        crate::services::ProductService::new(pool.clone(), notifications.clone())
            .receive(
                crate::services::product::ReceiveInput { barcodes: vec![BARCODE.into()], comment: None },
                stockman,
            )
            .await
            .unwrap();

        let service = STRequestService::new(pool.clone(), notifications, 20);
        let request_id = service.create(stockman).await.unwrap().id;
        let added = service
            .add_products(request_id, BarcodesInput { barcodes: vec![BARCODE.into()] }, stockman)
            .await
            .unwrap();
        assert_eq!(added.processed.len(), 1);
        service.finalize(request_id).await.unwrap();
        service
            .assign_photographer(request_id, AssignPhotographerInput { photographer_id: photographer, assistant_id: None })
            .await
            .unwrap();

        let shot = || PhotoResultInput {
            status: PhotoStatus::Shot,
            comment: None,
            photos_link: Some("https://disk.example.com/4601234567890".into()),
        };
        let review = |status| PhotoReviewInput { status, comment: None };

        service.set_photo_status(request_id, BARCODE, shot(), &actor).await.unwrap();
        service.finish_shooting(request_id, photographer).await.unwrap();
        service
            .review_line(request_id, BARCODE, review(SeniorPhotoStatus::Reshoot))
            .await
            .unwrap();
        let reshoot = service.complete_review(request_id).await.unwrap();
        assert_eq!(reshoot.request.status, STRequestStatus::Shooting);
        assert_eq!(reshoot.products[0].photo_status, None);
        assert_eq!(reshoot.products[0].senior_photo_status, None);

        service.set_photo_status(request_id, BARCODE, shot(), &actor).await.unwrap();
        service.finish_shooting(request_id, photographer).await.unwrap();
        service
            .review_line(request_id, BARCODE, review(SeniorPhotoStatus::Approved))
            .await
            .unwrap();
        let checked = service.complete_review(request_id).await.unwrap();
        assert_eq!(checked.request.status, STRequestStatus::Checked);

        let photographed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM product_operations WHERE operation_type_id = $1",
        )
        .bind(OperationType::Photographed.id())
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(photographed, 2);
    }
}

