//! Product service: intake, defects and movement history

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::notification::{defect_message, NotificationService, Topic};
use shared::{
    check_transition, normalize_barcodes, partition_barcodes, OperationType, PaginatedResponse,
    Pagination, ProductMoveStatus,
};

/// Product service
#[derive(Clone)]
pub struct ProductService {
    db: PgPool,
    notifications: NotificationService,
}

/// Product as stored
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ProductRow {
    pub id: Uuid,
    pub barcode: String,
    pub name: Option<String>,
    pub category: Option<String>,
    pub seller: Option<String>,
    pub declared_value: Option<Decimal>,
    pub move_status_id: i16,
    pub is_priority: bool,
    pub is_retouch_blocked: bool,
    pub income_date: Option<DateTime<Utc>>,
    pub outcome_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) const PRODUCT_COLUMNS: &str = "id, barcode, name, category, seller, declared_value, \
     move_status_id, is_priority, is_retouch_blocked, income_date, outcome_date, created_at, updated_at";

/// Product response
#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: Uuid,
    pub barcode: String,
    pub name: Option<String>,
    pub category: Option<String>,
    pub seller: Option<String>,
    pub declared_value: Option<Decimal>,
    pub move_status: ProductMoveStatus,
    pub move_status_label: &'static str,
    pub is_priority: bool,
    pub is_retouch_blocked: bool,
    pub income_date: Option<DateTime<Utc>>,
    pub outcome_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = AppError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let move_status = ProductMoveStatus::try_from(row.move_status_id)?;
        Ok(Product {
            id: row.id,
            barcode: row.barcode,
            name: row.name,
            category: row.category,
            seller: row.seller,
            declared_value: row.declared_value,
            move_status,
            move_status_label: move_status.label(),
            is_priority: row.is_priority,
            is_retouch_blocked: row.is_retouch_blocked,
            income_date: row.income_date,
            outcome_date: row.outcome_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Product list filter
#[derive(Debug, Default, Deserialize)]
pub struct ProductFilter {
    pub move_status: Option<ProductMoveStatus>,
    /// Matches barcode prefix or name substring
    pub search: Option<String>,
    pub priority: Option<bool>,
}

/// Input for receiving products at the warehouse
#[derive(Debug, Deserialize)]
pub struct ReceiveInput {
    pub barcodes: Vec<String>,
    pub comment: Option<String>,
}

/// Input for marking a product defective
#[derive(Debug, Deserialize)]
pub struct DefectInput {
    pub comment: Option<String>,
}

/// Barcode that was not processed, with the reason
#[derive(Debug, Clone, Serialize)]
pub struct SkippedBarcode {
    pub barcode: String,
    pub reason: String,
}

/// Outcome of a bulk barcode operation
#[derive(Debug, Default, Clone, Serialize)]
pub struct BarcodeReport {
    pub processed: Vec<String>,
    /// Barcodes for which a new product row was created
    pub created: Vec<String>,
    pub skipped: Vec<SkippedBarcode>,
}

impl BarcodeReport {
    pub(crate) fn skip(&mut self, barcode: &str, reason: impl Into<String>) {
        self.skipped.push(SkippedBarcode {
            barcode: barcode.to_string(),
            reason: reason.into(),
        });
    }
}

/// One entry of a product's history
#[derive(Debug, Clone, Serialize)]
pub struct ProductOperation {
    pub id: i64,
    pub operation: OperationType,
    pub operation_label: &'static str,
    pub user_id: Option<Uuid>,
    pub user_name: Option<String>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct OperationRow {
    id: i64,
    operation_type_id: i16,
    user_id: Option<Uuid>,
    user_name: Option<String>,
    comment: Option<String>,
    created_at: DateTime<Utc>,
}

// ============================================================================
// Helpers shared by workflow services
// ============================================================================

/// Append one history row
pub(crate) async fn log_operation(
    conn: &mut PgConnection,
    product_id: Uuid,
    operation: OperationType,
    user_id: Option<Uuid>,
    comment: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO product_operations (product_id, operation_type_id, user_id, comment)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(product_id)
    .bind(operation.id())
    .bind(user_id)
    .bind(comment)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Fetch and lock a product by barcode
pub(crate) async fn lock_product(
    conn: &mut PgConnection,
    barcode: &str,
) -> AppResult<Option<ProductRow>> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {} FROM products WHERE barcode = $1 FOR UPDATE",
        PRODUCT_COLUMNS
    ))
    .bind(barcode)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

/// Move a locked product to `to` after checking the transition table
pub(crate) async fn move_product(
    conn: &mut PgConnection,
    product: &ProductRow,
    to: ProductMoveStatus,
) -> AppResult<()> {
    let from = ProductMoveStatus::try_from(product.move_status_id)?;
    check_transition(Some(from), to)?;

    sqlx::query(
        r#"
        UPDATE products
        SET move_status_id = $2,
            income_date = CASE WHEN $2 = 3 THEN NOW() ELSE income_date END,
            outcome_date = CASE WHEN $2 = 4 THEN NOW() ELSE outcome_date END,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(product.id)
    .bind(to.id())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Mark a locked product defective: status 25 plus exactly one history row
pub(crate) async fn apply_defect(
    conn: &mut PgConnection,
    notifications: &NotificationService,
    product: &ProductRow,
    user_id: Uuid,
    comment: Option<&str>,
) -> AppResult<()> {
    move_product(conn, product, ProductMoveStatus::Defective).await?;
    log_operation(conn, product.id, OperationType::Defective, Some(user_id), comment).await?;
    notifications
        .enqueue(
            &mut *conn,
            Topic::Defects,
            &defect_message(&product.barcode, product.name.as_deref(), comment),
        )
        .await?;

    tracing::info!(product_id = %product.id, barcode = %product.barcode, "Product marked defective");
    Ok(())
}

impl ProductService {
    /// Create a new ProductService instance
    pub fn new(db: PgPool, notifications: NotificationService) -> Self {
        Self { db, notifications }
    }

    /// Receive products at the warehouse, creating unknown barcodes
    pub async fn receive(&self, input: ReceiveInput, user_id: Uuid) -> AppResult<BarcodeReport> {
        let (valid, invalid) = partition_barcodes(&normalize_barcodes(&input.barcodes));
        let mut report = BarcodeReport::default();
        for (barcode, reason) in invalid {
            report.skip(&barcode, reason);
        }

        let comment = input.comment.as_deref();
        let mut tx = self.db.begin().await?;

        for barcode in valid {
            match lock_product(&mut tx, &barcode).await? {
                Some(product) => match move_product(&mut tx, &product, ProductMoveStatus::Received).await {
                    Ok(()) => {
                        log_operation(&mut tx, product.id, OperationType::Received, Some(user_id), comment)
                            .await?;
                        report.processed.push(barcode);
                    }
                    Err(AppError::InvalidStateTransition(e)) => report.skip(&barcode, e.to_string()),
                    Err(e) => return Err(e),
                },
                None => {
                    check_transition(None, ProductMoveStatus::Received)?;
                    let product_id = sqlx::query_scalar::<_, Uuid>(
                        r#"
                        INSERT INTO products (barcode, move_status_id, income_date)
                        VALUES ($1, $2, NOW())
                        RETURNING id
                        "#,
                    )
                    .bind(&barcode)
                    .bind(ProductMoveStatus::Received.id())
                    .fetch_one(&mut *tx)
                    .await?;
                    log_operation(&mut tx, product_id, OperationType::Received, Some(user_id), comment)
                        .await?;
                    report.created.push(barcode.clone());
                    report.processed.push(barcode);
                }
            }
        }

        tx.commit().await?;

        tracing::info!(
            received = report.processed.len(),
            created = report.created.len(),
            skipped = report.skipped.len(),
            "Products received"
        );
        Ok(report)
    }

    /// Mark a product defective
    pub async fn mark_defective(
        &self,
        barcode: &str,
        input: DefectInput,
        user_id: Uuid,
    ) -> AppResult<Product> {
        let mut tx = self.db.begin().await?;

        let product = lock_product(&mut tx, barcode)
            .await?
            .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        if product.move_status_id == ProductMoveStatus::Defective.id() {
            return Err(AppError::Conflict {
                resource: "product".to_string(),
                message: format!("Product {} is already defective", barcode),
                message_ru: format!("Товар {} уже отмечен как брак", barcode),
            });
        }

        apply_defect(
            &mut tx,
            &self.notifications,
            &product,
            user_id,
            input.comment.as_deref(),
        )
        .await?;

        tx.commit().await?;

        self.get(barcode).await
    }

    /// Get a product by barcode
    pub async fn get(&self, barcode: &str) -> AppResult<Product> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products WHERE barcode = $1",
            PRODUCT_COLUMNS
        ))
        .bind(barcode)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        row.try_into()
    }

    /// List products
    pub async fn list(
        &self,
        filter: &ProductFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<Product>> {
        let status = filter.move_status.map(|s| s.id());
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let where_clause = r#"
            WHERE ($1::smallint IS NULL OR move_status_id = $1)
              AND ($2::text IS NULL OR barcode LIKE $2 || '%' OR name ILIKE '%' || $2 || '%')
              AND ($3::boolean IS NULL OR is_priority = $3)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM products {}",
            where_clause
        ))
        .bind(status)
        .bind(search)
        .bind(filter.priority)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products {} ORDER BY updated_at DESC LIMIT $4 OFFSET $5",
            PRODUCT_COLUMNS, where_clause
        ))
        .bind(status)
        .bind(search)
        .bind(filter.priority)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let data = rows
            .into_iter()
            .map(Product::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse::new(data, pagination, total as u64))
    }

    /// Operation history of a product, oldest first
    pub async fn history(&self, barcode: &str) -> AppResult<Vec<ProductOperation>> {
        let product = self.get(barcode).await?;

        let rows = sqlx::query_as::<_, OperationRow>(
            r#"
            SELECT po.id, po.operation_type_id, po.user_id, u.name AS user_name,
                   po.comment, po.created_at
            FROM product_operations po
            LEFT JOIN users u ON u.id = po.user_id
            WHERE po.product_id = $1
            ORDER BY po.created_at, po.id
            "#,
        )
        .bind(product.id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|r| {
                let operation = OperationType::try_from(r.operation_type_id)?;
                Ok(ProductOperation {
                    id: r.id,
                    operation,
                    operation_label: operation.label(),
                    user_id: r.user_id,
                    user_name: r.user_name,
                    comment: r.comment,
                    created_at: r.created_at,
                })
            })
            .collect()
    }

    /// Raise or clear the priority flag
    pub async fn set_priority(&self, barcode: &str, is_priority: bool) -> AppResult<Product> {
        self.set_flag(barcode, "is_priority", is_priority).await
    }

    /// Exclude a product from (or return it to) retouch batching
    pub async fn set_retouch_block(&self, barcode: &str, blocked: bool) -> AppResult<Product> {
        self.set_flag(barcode, "is_retouch_blocked", blocked).await
    }

    async fn set_flag(&self, barcode: &str, column: &'static str, value: bool) -> AppResult<Product> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "UPDATE products SET {} = $2, updated_at = NOW() WHERE barcode = $1 RETURNING {}",
            column, PRODUCT_COLUMNS
        ))
        .bind(barcode)
        .bind(value)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        tracing::info!(barcode, column, value, "Product flag updated");
        row.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelegramConfig;

    fn telegram() -> TelegramConfig {
        TelegramConfig {
            bot_token: String::new(),
            chat_id: -100,
            defects_thread_id: Some(7),
            retouch_thread_id: None,
            orders_thread_id: None,
            max_attempts: 5,
            login_max_age_secs: 86400,
        }
    }

    async fn seed_user(pool: &PgPool) -> Uuid {
        sqlx::query_scalar(
            "INSERT INTO users (email, name, password_hash, role) VALUES ('s@studio.test', 'S', 'x', 'stockman') RETURNING id",
        )
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[test]
    fn report_collects_skips() {
        let mut report = BarcodeReport::default();
        report.skip("123", "Barcode is too short");
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, "Barcode is too short");
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn defective_writes_exactly_one_operation(pool: PgPool) {
        let user = seed_user(&pool).await;
        let service = ProductService::new(pool.clone(), NotificationService::new(pool.clone(), &telegram()));

        service
            .receive(
                ReceiveInput {
                    barcodes: vec!["4601234567890".to_string()],
                    comment: None,
                },
                user,
            )
            .await
            .unwrap();

        let product = service
            .mark_defective("4601234567890", DefectInput { comment: Some("скол".into()) }, user)
            .await
            .unwrap();
        assert_eq!(product.move_status, ProductMoveStatus::Defective);

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM product_operations WHERE product_id = $1 AND operation_type_id = 25",
        )
        .bind(product.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);

        let again = service
            .mark_defective("4601234567890", DefectInput { comment: None }, user)
            .await;
        assert!(matches!(again, Err(AppError::Conflict { .. })));

        let queued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM telegram_messages WHERE thread_id = 7")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(queued, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn receive_skips_illegal_moves(pool: PgPool) {
        let user = seed_user(&pool).await;
        let service = ProductService::new(pool.clone(), NotificationService::new(pool.clone(), &telegram()));
        let input = || ReceiveInput {
            barcodes: vec!["4601234567890".to_string(), "12ab".to_string()],
            comment: None,
        };

        let first = service.receive(input(), user).await.unwrap();
        assert_eq!(first.created, vec!["4601234567890".to_string()]);
        assert_eq!(first.skipped.len(), 1);

        let second = service.receive(input(), user).await.unwrap();
        assert!(second.processed.is_empty());
        assert_eq!(second.skipped.len(), 2);
    }
}
