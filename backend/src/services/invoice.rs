//! Shipping invoices

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::product::{lock_product, log_operation, move_product, BarcodeReport, SkippedBarcode};
use crate::services::st_request::OPEN_ST_STATUSES;
use shared::{
    check_transition, normalize_barcodes, partition_barcodes, InvoiceStatus, OperationType,
    PaginatedResponse, Pagination, ProductMoveStatus,
};

/// Retouch statuses in which a request still holds its products
const OPEN_RETOUCH_STATUSES: [i16; 3] = [1, 2, 3];

/// Invoice service
#[derive(Clone)]
pub struct InvoiceService {
    db: PgPool,
}

#[derive(Debug, Clone, FromRow)]
struct InvoiceRow {
    id: Uuid,
    invoice_number: i64,
    status_id: i16,
    creator_id: Option<Uuid>,
    comment: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    product_count: i64,
}

const INVOICE_SELECT: &str = r#"
    SELECT i.id, i.invoice_number, i.status_id, i.creator_id, i.comment, i.sent_at, i.created_at,
           (SELECT COUNT(*) FROM invoice_products p WHERE p.invoice_id = i.id) AS product_count
    FROM invoices i
"#;

/// Invoice
#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: Uuid,
    pub invoice_number: i64,
    pub status: InvoiceStatus,
    pub status_label: &'static str,
    pub creator_id: Option<Uuid>,
    pub comment: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub product_count: i64,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = AppError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let status = InvoiceStatus::try_from(row.status_id)?;
        Ok(Invoice {
            id: row.id,
            invoice_number: row.invoice_number,
            status,
            status_label: status.label(),
            creator_id: row.creator_id,
            comment: row.comment,
            sent_at: row.sent_at,
            product_count: row.product_count,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InvoiceLine {
    pub product_id: Uuid,
    pub barcode: String,
    pub name: Option<String>,
    pub move_status_id: i16,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub products: Vec<InvoiceLine>,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceInput {
    pub barcodes: Vec<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateInvoiceReport {
    pub invoice: Invoice,
    pub skipped: Vec<SkippedBarcode>,
}

/// Why a product cannot be shipped, if it cannot; `own_invoice` is ignored
/// when looking for draft invoices that already hold the product
async fn unshippable_reason(
    conn: &mut PgConnection,
    product_id: Uuid,
    move_status_id: i16,
    own_invoice: Option<Uuid>,
) -> AppResult<Option<String>> {
    let status = ProductMoveStatus::try_from(move_status_id)?;
    if !matches!(status, ProductMoveStatus::Received | ProductMoveStatus::Defective) {
        return Ok(Some(format!("Product is '{}'", status)));
    }

    let (in_photo, in_retouch, in_invoice) = sqlx::query_as::<_, (bool, bool, bool)>(
        r#"
        SELECT
            EXISTS (SELECT 1 FROM st_request_products p JOIN st_requests r ON r.id = p.request_id
                    WHERE p.product_id = $1 AND r.status_id = ANY($2)),
            EXISTS (SELECT 1 FROM retouch_request_products p JOIN retouch_requests r ON r.id = p.request_id
                    WHERE p.product_id = $1 AND r.status_id = ANY($3)),
            EXISTS (SELECT 1 FROM invoice_products p JOIN invoices i ON i.id = p.invoice_id
                    WHERE p.product_id = $1 AND i.status_id = $4 AND i.id IS DISTINCT FROM $5)
        "#,
    )
    .bind(product_id)
    .bind(&OPEN_ST_STATUSES[..])
    .bind(&OPEN_RETOUCH_STATUSES[..])
    .bind(InvoiceStatus::Draft.id())
    .bind(own_invoice)
    .fetch_one(&mut *conn)
    .await?;

    Ok(if in_photo {
        Some("Product is in an open photo request".to_string())
    } else if in_retouch {
        Some("Product is in an open retouch request".to_string())
    } else if in_invoice {
        Some("Product is already in a draft invoice".to_string())
    } else {
        None
    })
}

impl InvoiceService {
    /// Create a new InvoiceService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a draft invoice from shippable products
    pub async fn create(&self, input: CreateInvoiceInput, user_id: Uuid) -> AppResult<CreateInvoiceReport> {
        let (valid, invalid) = partition_barcodes(&normalize_barcodes(&input.barcodes));
        let mut report = BarcodeReport::default();
        for (barcode, reason) in invalid {
            report.skip(&barcode, reason);
        }

        check_transition(None, InvoiceStatus::Draft)?;
        let mut tx = self.db.begin().await?;

        let invoice_id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO invoices (status_id, creator_id, comment) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(InvoiceStatus::Draft.id())
        .bind(user_id)
        .bind(&input.comment)
        .fetch_one(&mut *tx)
        .await?;

        for barcode in valid {
            let Some(product) = lock_product(&mut tx, &barcode).await? else {
                report.skip(&barcode, "Product not found");
                continue;
            };
            if let Some(reason) = unshippable_reason(&mut tx, product.id, product.move_status_id, None).await? {
                report.skip(&barcode, reason);
                continue;
            }
            sqlx::query("INSERT INTO invoice_products (invoice_id, product_id) VALUES ($1, $2)")
                .bind(invoice_id)
                .bind(product.id)
                .execute(&mut *tx)
                .await?;
            report.processed.push(barcode);
        }

        if report.processed.is_empty() {
            return Err(AppError::validation(
                "barcodes",
                "No products can be shipped",
                "Нет товаров, которые можно отправить",
            ));
        }

        tx.commit().await?;

        tracing::info!(invoice_id = %invoice_id, products = report.processed.len(), "Invoice created");

        Ok(CreateInvoiceReport {
            invoice: self.get(invoice_id).await?.invoice,
            skipped: report.skipped,
        })
    }

    /// Draft → Sent; every product is shipped in the same transaction
    pub async fn send(&self, invoice_id: Uuid, user_id: Uuid) -> AppResult<InvoiceDetail> {
        let mut tx = self.db.begin().await?;

        let row = sqlx::query_as::<_, InvoiceRow>(&format!("{} WHERE i.id = $1 FOR UPDATE OF i", INVOICE_SELECT))
            .bind(invoice_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound("Invoice".to_string()))?;

        check_transition(Some(InvoiceStatus::try_from(row.status_id)?), InvoiceStatus::Sent)?;

        let barcodes = sqlx::query_scalar::<_, String>(
            r#"
            SELECT pr.barcode FROM invoice_products p
            JOIN products pr ON pr.id = p.product_id
            WHERE p.invoice_id = $1
            ORDER BY pr.barcode
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut products = Vec::with_capacity(barcodes.len());
        let mut blocked = Vec::new();
        for barcode in &barcodes {
            let product = lock_product(&mut tx, barcode)
                .await?
                .ok_or_else(|| AppError::NotFound("Product".to_string()))?;
            match unshippable_reason(&mut tx, product.id, product.move_status_id, Some(invoice_id)).await? {
                Some(reason) => blocked.push(format!("{}: {}", barcode, reason)),
                None => products.push(product),
            }
        }

        if !blocked.is_empty() {
            tracing::warn!(invoice_number = row.invoice_number, blocked = blocked.len(), "Invoice send refused");
            return Err(AppError::Conflict {
                resource: "invoice".to_string(),
                message: format!("Some products cannot be shipped: {}", blocked.join("; ")),
                message_ru: format!("Часть товаров нельзя отправить: {}", blocked.join("; ")),
            });
        }

        let comment = format!("Накладная №{}", row.invoice_number);
        for product in &products {
            move_product(&mut tx, product, ProductMoveStatus::Shipped).await?;
            log_operation(&mut tx, product.id, OperationType::Shipped, Some(user_id), Some(&comment)).await?;
        }

        sqlx::query("UPDATE invoices SET status_id = $2, sent_at = NOW() WHERE id = $1")
            .bind(invoice_id)
            .bind(InvoiceStatus::Sent.id())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(invoice_number = row.invoice_number, products = barcodes.len(), "Invoice sent");
        self.get(invoice_id).await
    }

    /// Get an invoice with its lines
    pub async fn get(&self, invoice_id: Uuid) -> AppResult<InvoiceDetail> {
        let row = sqlx::query_as::<_, InvoiceRow>(&format!("{} WHERE i.id = $1", INVOICE_SELECT))
            .bind(invoice_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Invoice".to_string()))?;

        let products = sqlx::query_as::<_, InvoiceLine>(
            r#"
            SELECT pr.id AS product_id, pr.barcode, pr.name, pr.move_status_id
            FROM invoice_products p
            JOIN products pr ON pr.id = p.product_id
            WHERE p.invoice_id = $1
            ORDER BY pr.barcode
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.db)
        .await?;

        Ok(InvoiceDetail {
            invoice: row.try_into()?,
            products,
        })
    }

    /// List invoices, newest first
    pub async fn list(&self, pagination: &Pagination) -> AppResult<PaginatedResponse<Invoice>> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM invoices")
            .fetch_one(&self.db)
            .await?;

        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            "{} ORDER BY i.created_at DESC LIMIT $1 OFFSET $2",
            INVOICE_SELECT
        ))
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let data = rows
            .into_iter()
            .map(Invoice::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse::new(data, pagination, total as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelegramConfig;
    use crate::services::notification::NotificationService;
    use crate::services::product::{ProductService, ReceiveInput};
    use crate::services::st_request::{BarcodesInput, STRequestService};
    use shared::RetouchRequestStatus;

    const BARCODE: &str = "4601234567890";

    fn notifications(pool: &PgPool) -> NotificationService {
        let telegram = TelegramConfig {
            bot_token: String::new(),
            chat_id: 0,
            defects_thread_id: None,
            retouch_thread_id: None,
            orders_thread_id: None,
            max_attempts: 5,
            login_max_age_secs: 86400,
        };
        NotificationService::new(pool.clone(), &telegram)
    }

    async fn received_draft_invoice(pool: &PgPool) -> (Uuid, Uuid) {
        let user: Uuid = sqlx::query_scalar(
            "INSERT INTO users (email, name, password_hash, role) VALUES ('i@studio.test', 'I', 'x', 'stockman') RETURNING id",
        )
        .fetch_one(pool)
        .await
        .unwrap();
        ProductService::new(pool.clone(), notifications(pool))
            .receive(ReceiveInput { barcodes: vec![BARCODE.into()], comment: None }, user)
            .await
            .unwrap();
        let report = InvoiceService::new(pool.clone())
            .create(CreateInvoiceInput { barcodes: vec![BARCODE.into()], comment: None }, user)
            .await
            .unwrap();
        assert!(report.skipped.is_empty());
        (user, report.invoice.id)
    }

    async fn move_status(pool: &PgPool) -> i16 {
        sqlx::query_scalar("SELECT move_status_id FROM products WHERE barcode = $1")
            .bind(BARCODE)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[test]
    fn open_retouch_statuses_exclude_terminal_ones() {
        for status in RetouchRequestStatus::ALL {
            let open = OPEN_RETOUCH_STATUSES.contains(&status.id());
            assert_eq!(open, !shared::Transition::is_terminal(*status), "{:?}", status);
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn drafted_product_cannot_join_photo_request(pool: PgPool) {
        let (user, _) = received_draft_invoice(&pool).await;
        let requests = STRequestService::new(pool.clone(), notifications(&pool), 20);
        let request = requests.create(user).await.unwrap();

        let report = requests
            .add_products(request.id, BarcodesInput { barcodes: vec![BARCODE.into()] }, user)
            .await
            .unwrap();
        assert!(report.processed.is_empty());
        assert!(report.skipped[0].reason.contains("draft invoice"));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn send_refuses_products_held_by_open_requests(pool: PgPool) {
        let (user, invoice_id) = received_draft_invoice(&pool).await;
        let request_id: Uuid = sqlx::query_scalar(
            "INSERT INTO st_requests (status_id) VALUES (2) RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO st_request_products (request_id, product_id) SELECT $1, id FROM products WHERE barcode = $2",
        )
        .bind(request_id)
        .bind(BARCODE)
        .execute(&pool)
        .await
        .unwrap();

        let service = InvoiceService::new(pool.clone());
        let refused = service.send(invoice_id, user).await;
        assert!(matches!(refused, Err(AppError::Conflict { .. })));
        assert_eq!(move_status(&pool).await, ProductMoveStatus::Received.id());
        let detail = service.get(invoice_id).await.unwrap();
        assert_eq!(detail.invoice.status, InvoiceStatus::Draft);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn send_ships_every_product_once(pool: PgPool) {
        let (user, invoice_id) = received_draft_invoice(&pool).await;
        let service = InvoiceService::new(pool.clone());

        let detail = service.send(invoice_id, user).await.unwrap();
        assert_eq!(detail.invoice.status, InvoiceStatus::Sent);
        assert!(detail.invoice.sent_at.is_some());
        assert_eq!(move_status(&pool).await, ProductMoveStatus::Shipped.id());

        let shipped: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM product_operations WHERE operation_type_id = $1",
        )
        .bind(OperationType::Shipped.id())
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(shipped, 1);

        let again = service.send(invoice_id, user).await;
        assert!(matches!(again, Err(AppError::InvalidStateTransition(_))));
    }
}
