//! Order service: products ordered from sellers, assembled and accepted
//! into the warehouse by OKZ clerks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::notification::{order_message, NotificationService, Topic};
use crate::services::product::{
    lock_product, log_operation, move_product, BarcodeReport, SkippedBarcode,
};
use shared::{
    check_transition, normalize_barcodes, partition_barcodes, OperationType, OrderStatus,
    PaginatedResponse, Pagination, ProductMoveStatus,
};

/// Order service
#[derive(Clone)]
pub struct OrderService {
    db: PgPool,
    notifications: NotificationService,
}

#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: i64,
    status_id: i16,
    creator_id: Option<Uuid>,
    assembler_id: Option<Uuid>,
    acceptor_id: Option<Uuid>,
    assembly_started_at: Option<DateTime<Utc>>,
    assembled_at: Option<DateTime<Utc>>,
    accepted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    product_count: i64,
}

const ORDER_SELECT: &str = r#"
    SELECT o.id, o.order_number, o.status_id, o.creator_id, o.assembler_id, o.acceptor_id,
           o.assembly_started_at, o.assembled_at, o.accepted_at, o.created_at, o.updated_at,
           (SELECT COUNT(*) FROM order_products p WHERE p.order_id = o.id) AS product_count
    FROM orders o
"#;

/// Order
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: i64,
    pub status: OrderStatus,
    pub status_label: &'static str,
    pub creator_id: Option<Uuid>,
    pub assembler_id: Option<Uuid>,
    pub acceptor_id: Option<Uuid>,
    pub assembly_started_at: Option<DateTime<Utc>>,
    pub assembled_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub product_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = AppError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = OrderStatus::try_from(row.status_id)?;
        Ok(Order {
            id: row.id,
            order_number: row.order_number,
            status,
            status_label: status.label(),
            creator_id: row.creator_id,
            assembler_id: row.assembler_id,
            acceptor_id: row.acceptor_id,
            assembly_started_at: row.assembly_started_at,
            assembled_at: row.assembled_at,
            accepted_at: row.accepted_at,
            product_count: row.product_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Product line of an order
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OrderLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub barcode: String,
    pub name: Option<String>,
    pub assembled: bool,
    pub assembled_at: Option<DateTime<Utc>>,
    pub accepted: bool,
    pub accepted_at: Option<DateTime<Utc>>,
}

/// Order with its lines
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub products: Vec<OrderLine>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderInput {
    pub barcodes: Vec<String>,
}

/// Created order and barcodes left out of it
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderReport {
    pub order: Order,
    pub skipped: Vec<SkippedBarcode>,
}

/// Number of a live (not accepted, not cancelled) order holding the product
async fn live_order_number(conn: &mut PgConnection, product_id: Uuid) -> AppResult<Option<i64>> {
    let number = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT o.order_number
        FROM order_products p
        JOIN orders o ON o.id = p.order_id
        WHERE p.product_id = $1 AND o.status_id <> ALL($2)
        LIMIT 1
        "#,
    )
    .bind(product_id)
    .bind(&[OrderStatus::Accepted.id(), OrderStatus::Cancelled.id()][..])
    .fetch_optional(&mut *conn)
    .await?;
    Ok(number)
}

impl OrderService {
    /// Create a new OrderService instance
    pub fn new(db: PgPool, notifications: NotificationService) -> Self {
        Self { db, notifications }
    }

    async fn lock_order(&self, conn: &mut PgConnection, order_id: Uuid) -> AppResult<OrderRow> {
        sqlx::query_as::<_, OrderRow>(&format!("{} WHERE o.id = $1 FOR UPDATE OF o", ORDER_SELECT))
            .bind(order_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Order".to_string()))
    }

    async fn change_status(
        &self,
        conn: &mut PgConnection,
        order: &OrderRow,
        to: OrderStatus,
    ) -> AppResult<()> {
        let from = OrderStatus::try_from(order.status_id)?;
        check_transition(Some(from), to)?;

        sqlx::query(
            r#"
            UPDATE orders
            SET status_id = $2,
                assembled_at = CASE WHEN $2 = 3 THEN NOW() ELSE assembled_at END,
                accepted_at = CASE WHEN $2 = 5 THEN NOW() ELSE accepted_at END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(to.id())
        .execute(&mut *conn)
        .await?;

        tracing::info!(order_number = order.order_number, from = %from, to = %to, "Order status changed");
        Ok(())
    }

    fn require_status(order: &OrderRow, expected: OrderStatus) -> AppResult<()> {
        let status = OrderStatus::try_from(order.status_id)?;
        if status == expected {
            Ok(())
        } else {
            Err(AppError::Conflict {
                resource: "order".to_string(),
                message: format!("Order must be '{}', it is '{}'", expected, status),
                message_ru: format!("Заказ должен быть в статусе «{}», сейчас «{}»", expected, status),
            })
        }
    }

    /// Create an order; products are created as needed and moved to Ordered
    pub async fn create(&self, input: CreateOrderInput, user_id: Uuid) -> AppResult<CreateOrderReport> {
        let (valid, invalid) = partition_barcodes(&normalize_barcodes(&input.barcodes));
        let mut report = BarcodeReport::default();
        for (barcode, reason) in invalid {
            report.skip(&barcode, reason);
        }

        check_transition(None, OrderStatus::Created)?;
        let mut tx = self.db.begin().await?;

        let (order_id, order_number) = sqlx::query_as::<_, (Uuid, i64)>(
            "INSERT INTO orders (status_id, creator_id) VALUES ($1, $2) RETURNING id, order_number",
        )
        .bind(OrderStatus::Created.id())
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        let comment = format!("Заказ №{}", order_number);

        for barcode in valid {
            let product_id = match lock_product(&mut tx, &barcode).await? {
                Some(product) if product.move_status_id == ProductMoveStatus::Ordered.id() => {
                    if let Some(n) = live_order_number(&mut tx, product.id).await? {
                        report.skip(&barcode, format!("Product is already in order №{}", n));
                        continue;
                    }
                    product.id
                }
                Some(product) => {
                    match move_product(&mut tx, &product, ProductMoveStatus::Ordered).await {
                        Ok(()) => product.id,
                        Err(AppError::InvalidStateTransition(e)) => {
                            report.skip(&barcode, e.to_string());
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
                None => {
                    check_transition(None, ProductMoveStatus::Ordered)?;
                    report.created.push(barcode.clone());
                    sqlx::query_scalar::<_, Uuid>(
                        "INSERT INTO products (barcode, move_status_id) VALUES ($1, $2) RETURNING id",
                    )
                    .bind(&barcode)
                    .bind(ProductMoveStatus::Ordered.id())
                    .fetch_one(&mut *tx)
                    .await?
                }
            };

            sqlx::query("INSERT INTO order_products (order_id, product_id) VALUES ($1, $2)")
                .bind(order_id)
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
            log_operation(&mut tx, product_id, OperationType::Ordered, Some(user_id), Some(&comment)).await?;
            report.processed.push(barcode);
        }

        if report.processed.is_empty() {
            return Err(AppError::validation(
                "barcodes",
                "No products could be ordered",
                "Ни один товар не может быть заказан",
            ));
        }

        tx.commit().await?;

        tracing::info!(
            order_number,
            products = report.processed.len(),
            skipped = report.skipped.len(),
            "Order created"
        );

        Ok(CreateOrderReport {
            order: self.get(order_id).await?.order,
            skipped: report.skipped,
        })
    }

    /// Claim the oldest created order for assembly
    pub async fn start_assembly(&self, user_id: Uuid) -> AppResult<OrderDetail> {
        let mut tx = self.db.begin().await?;

        let order = sqlx::query_as::<_, OrderRow>(&format!(
            "{} WHERE o.status_id = $1 ORDER BY o.created_at LIMIT 1 FOR UPDATE OF o SKIP LOCKED",
            ORDER_SELECT
        ))
        .bind(OrderStatus::Created.id())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::QueueEmpty("order_assembly".to_string()))?;
        let order_id = order.id;

        self.change_status(&mut tx, &order, OrderStatus::Assembling).await?;
        sqlx::query("UPDATE orders SET assembler_id = $2, assembly_started_at = NOW() WHERE id = $1")
            .bind(order_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(order_id = %order_id, user_id = %user_id, "Order claimed for assembly");
        self.get(order_id).await
    }

    /// Put an assembling order back into the queue
    pub async fn release_assembly(&self, order_id: Uuid) -> AppResult<Order> {
        let mut tx = self.db.begin().await?;
        let order = self.lock_order(&mut tx, order_id).await?;
        self.change_status(&mut tx, &order, OrderStatus::Created).await?;
        sqlx::query("UPDATE orders SET assembler_id = NULL, assembly_started_at = NULL WHERE id = $1")
            .bind(order.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(self.get(order_id).await?.order)
    }

    /// Mark one line assembled; the product moves to Assembled
    pub async fn mark_assembled(&self, order_id: Uuid, barcode: &str, user_id: Uuid) -> AppResult<OrderLine> {
        let mut tx = self.db.begin().await?;
        let order = self.lock_order(&mut tx, order_id).await?;
        Self::require_status(&order, OrderStatus::Assembling)?;

        let product = lock_product(&mut tx, barcode)
            .await?
            .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        let line_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE order_products SET assembled = TRUE, assembled_at = NOW()
            WHERE order_id = $1 AND product_id = $2 AND NOT assembled
            RETURNING id
            "#,
        )
        .bind(order.id)
        .bind(product.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Unassembled product in order".to_string()))?;

        move_product(&mut tx, &product, ProductMoveStatus::Assembled).await?;
        log_operation(
            &mut tx,
            product.id,
            OperationType::Assembled,
            Some(user_id),
            Some(&format!("Заказ №{}", order.order_number)),
        )
        .await?;

        tx.commit().await?;
        self.line(order_id, line_id).await
    }

    /// Assembling → Assembled once every line is assembled
    pub async fn finish_assembly(&self, order_id: Uuid) -> AppResult<Order> {
        let mut tx = self.db.begin().await?;
        let order = self.lock_order(&mut tx, order_id).await?;

        let missing = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM order_products WHERE order_id = $1 AND NOT assembled",
        )
        .bind(order.id)
        .fetch_one(&mut *tx)
        .await?;

        if missing > 0 {
            return Err(AppError::validation(
                "products",
                format!("{} products are not assembled", missing),
                format!("{} товаров не собрано", missing),
            ));
        }

        self.change_status(&mut tx, &order, OrderStatus::Assembled).await?;
        self.notifications
            .enqueue(
                &mut *tx,
                Topic::Orders,
                &order_message(
                    order.order_number,
                    OrderStatus::Assembled.label(),
                    order.product_count as usize,
                ),
            )
            .await?;

        tx.commit().await?;
        Ok(self.get(order_id).await?.order)
    }

    /// Assembled → Accepting
    pub async fn start_acceptance(&self, order_id: Uuid, user_id: Uuid) -> AppResult<OrderDetail> {
        let mut tx = self.db.begin().await?;
        let order = self.lock_order(&mut tx, order_id).await?;
        self.change_status(&mut tx, &order, OrderStatus::Accepting).await?;
        sqlx::query("UPDATE orders SET acceptor_id = $2 WHERE id = $1")
            .bind(order.id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.get(order_id).await
    }

    /// Accept one product into the warehouse; the order completes with its last line
    pub async fn accept_product(&self, order_id: Uuid, barcode: &str, user_id: Uuid) -> AppResult<OrderDetail> {
        let mut tx = self.db.begin().await?;
        let order = self.lock_order(&mut tx, order_id).await?;
        Self::require_status(&order, OrderStatus::Accepting)?;

        let product = lock_product(&mut tx, barcode)
            .await?
            .ok_or_else(|| AppError::NotFound("Product".to_string()))?;

        sqlx::query(
            r#"
            UPDATE order_products SET accepted = TRUE, accepted_at = NOW()
            WHERE order_id = $1 AND product_id = $2 AND NOT accepted
            RETURNING id
            "#,
        )
        .bind(order.id)
        .bind(product.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Unaccepted product in order".to_string()))?;

        move_product(&mut tx, &product, ProductMoveStatus::Received).await?;
        log_operation(
            &mut tx,
            product.id,
            OperationType::Received,
            Some(user_id),
            Some(&format!("Заказ №{}", order.order_number)),
        )
        .await?;

        let remaining = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM order_products WHERE order_id = $1 AND NOT accepted",
        )
        .bind(order.id)
        .fetch_one(&mut *tx)
        .await?;

        if remaining == 0 {
            self.change_status(&mut tx, &order, OrderStatus::Accepted).await?;
        }

        tx.commit().await?;
        self.get(order_id).await
    }

    /// Cancel a created order; its products are released for a later order
    pub async fn cancel(&self, order_id: Uuid, user_id: Uuid) -> AppResult<Order> {
        let mut tx = self.db.begin().await?;
        let order = self.lock_order(&mut tx, order_id).await?;
        self.change_status(&mut tx, &order, OrderStatus::Cancelled).await?;

        let products = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT pr.id FROM order_products p
            JOIN products pr ON pr.id = p.product_id
            WHERE p.order_id = $1
            ORDER BY pr.barcode
            FOR UPDATE OF pr
            "#,
        )
        .bind(order.id)
        .fetch_all(&mut *tx)
        .await?;

        let comment = format!("Заказ №{} отменён", order.order_number);
        for product_id in &products {
            log_operation(&mut tx, *product_id, OperationType::RemovedFromRequest, Some(user_id), Some(&comment))
                .await?;
        }

        tx.commit().await?;

        tracing::info!(order_number = order.order_number, released = products.len(), "Order cancelled");
        Ok(self.get(order_id).await?.order)
    }

    /// Get an order with its lines
    pub async fn get(&self, order_id: Uuid) -> AppResult<OrderDetail> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("{} WHERE o.id = $1", ORDER_SELECT))
            .bind(order_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Order".to_string()))?;

        let products = sqlx::query_as::<_, OrderLine>(
            r#"
            SELECT p.id, p.product_id, pr.barcode, pr.name, p.assembled, p.assembled_at,
                   p.accepted, p.accepted_at
            FROM order_products p
            JOIN products pr ON pr.id = p.product_id
            WHERE p.order_id = $1
            ORDER BY pr.barcode
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;

        Ok(OrderDetail {
            order: row.try_into()?,
            products,
        })
    }

    async fn line(&self, order_id: Uuid, line_id: Uuid) -> AppResult<OrderLine> {
        self.get(order_id)
            .await?
            .products
            .into_iter()
            .find(|l| l.id == line_id)
            .ok_or_else(|| AppError::NotFound("Product in order".to_string()))
    }

    /// List orders, newest first
    pub async fn list(&self, filter: &OrderFilter, pagination: &Pagination) -> AppResult<PaginatedResponse<Order>> {
        let status = filter.status.map(|s| s.id());

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM orders o WHERE ($1::smallint IS NULL OR o.status_id = $1)",
        )
        .bind(status)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "{} WHERE ($1::smallint IS NULL OR o.status_id = $1) ORDER BY o.created_at DESC LIMIT $2 OFFSET $3",
            ORDER_SELECT
        ))
        .bind(status)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let data = rows
            .into_iter()
            .map(Order::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse::new(data, pagination, total as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelegramConfig;

    fn service(pool: &PgPool) -> OrderService {
        let telegram = TelegramConfig {
            bot_token: String::new(),
            chat_id: 0,
            defects_thread_id: None,
            retouch_thread_id: None,
            orders_thread_id: None,
            max_attempts: 5,
            login_max_age_secs: 86400,
        };
        OrderService::new(pool.clone(), NotificationService::new(pool.clone(), &telegram))
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn two_clerks_never_claim_the_same_order(pool: PgPool) {
        let user: Uuid = sqlx::query_scalar(
            "INSERT INTO users (email, name, password_hash, role) VALUES ('o@studio.test', 'O', 'x', 'okz') RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        let service = service(&pool);
        service
            .create(CreateOrderInput { barcodes: vec!["4601234567890".into()] }, user)
            .await
            .unwrap();

        let (a, b) = tokio::join!(service.start_assembly(user), service.start_assembly(user));
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AppError::QueueEmpty(_)))));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn full_order_cycle_receives_products(pool: PgPool) {
        let user: Uuid = sqlx::query_scalar(
            "INSERT INTO users (email, name, password_hash, role) VALUES ('o@studio.test', 'O', 'x', 'okz') RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        let service = service(&pool);
        let created = service
            .create(CreateOrderInput { barcodes: vec!["4601234567890".into()] }, user)
            .await
            .unwrap();
        let order_id = created.order.id;

        service.start_assembly(user).await.unwrap();
        service.mark_assembled(order_id, "4601234567890", user).await.unwrap();
        service.finish_assembly(order_id).await.unwrap();
        service.start_acceptance(order_id, user).await.unwrap();
        let detail = service.accept_product(order_id, "4601234567890", user).await.unwrap();

        assert_eq!(detail.order.status, OrderStatus::Accepted);
        let status: i16 = sqlx::query_scalar("SELECT move_status_id FROM products WHERE barcode = '4601234567890'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, ProductMoveStatus::Received.id());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn cancelled_order_releases_products_for_reorder(pool: PgPool) {
        let user: Uuid = sqlx::query_scalar(
            "INSERT INTO users (email, name, password_hash, role) VALUES ('o@studio.test', 'O', 'x', 'okz') RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        let service = service(&pool);
        let input = || CreateOrderInput { barcodes: vec!["4601234567890".into()] };

        let first = service.create(input(), user).await.unwrap();
        let busy = service.create(input(), user).await;
        assert!(matches!(busy, Err(AppError::Validation { .. })));

        let cancelled = service.cancel(first.order.id, user).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        let released: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM product_operations WHERE operation_type_id = $1",
        )
        .bind(OperationType::RemovedFromRequest.id())
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(released, 1);

        let second = service.create(input(), user).await.unwrap();
        assert!(second.skipped.is_empty());
        assert_eq!(second.order.product_count, 1);

        let again = service.cancel(first.order.id, user).await;
        assert!(matches!(again, Err(AppError::InvalidStateTransition(_))));
    }
}

