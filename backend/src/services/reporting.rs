//! Reporting service for the manager dashboard and daily statistics

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use shared::{
    DateRange, OperationType, OrderStatus, ProductMoveStatus,
    RenderStatus, RetouchRequestStatus, STRequestStatus, SeniorPhotoStatus, SeniorRetouchStatus,
};

/// Longest range a report may cover
pub const MAX_REPORT_DAYS: i64 = 366;

/// Reporting service
#[derive(Clone)]
pub struct ReportingService {
    db: PgPool,
}

/// Current queue sizes
#[derive(Debug, Serialize)]
pub struct DashboardMetrics {
    pub received_without_request: i64,
    pub in_photo_requests: i64,
    pub awaiting_retouch: i64,
    pub retouch_in_progress: i64,
    pub awaiting_render_check: i64,
    pub awaiting_upload: i64,
    pub open_orders: i64,
    pub defective: i64,
    pub pending_notifications: i64,
}

/// One row of `daily_stats`
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DailyStats {
    pub day: NaiveDate,
    pub received: i32,
    pub photographed: i32,
    pub retouched: i32,
    pub render_checked: i32,
    pub uploaded: i32,
    pub shipped: i32,
    pub defective: i32,
    pub updated_at: DateTime<Utc>,
}

/// Operation count per worker and operation type
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WorkerProductivity {
    pub user_id: Uuid,
    pub user_name: String,
    pub role: String,
    pub operation_type_id: i16,
    pub operation: String,
    pub count: i64,
}

/// Report filter parameters
#[derive(Debug, Default, Deserialize)]
pub struct ReportFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl ReportFilter {
    /// Resolve to a concrete range; defaults to the last 30 days ending `today`
    pub fn resolve(&self, today: NaiveDate) -> AppResult<DateRange> {
        let end = self.end_date.unwrap_or(today);
        let start = self.start_date.unwrap_or(end - Duration::days(29));
        let range = DateRange { start, end };

        if start > end {
            return Err(AppError::validation(
                "start_date",
                "start_date must not be after end_date",
                "Дата начала позже даты окончания",
            ));
        }
        if range.days() > MAX_REPORT_DAYS {
            return Err(AppError::validation(
                "start_date",
                format!("Range cannot exceed {} days", MAX_REPORT_DAYS),
                format!("Период не может превышать {} дней", MAX_REPORT_DAYS),
            ));
        }
        Ok(range)
    }
}

impl ReportingService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Get dashboard metrics
    pub async fn dashboard(&self) -> AppResult<DashboardMetrics> {
        let (received_without_request, defective) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                COUNT(*) FILTER (
                    WHERE pr.move_status_id = $1
                      AND NOT EXISTS (SELECT 1 FROM st_request_products p
                                      JOIN st_requests r ON r.id = p.request_id
                                      WHERE p.product_id = pr.id AND r.status_id <> $3)
                ),
                COUNT(*) FILTER (WHERE pr.move_status_id = $2)
            FROM products pr
            "#,
        )
        .bind(ProductMoveStatus::Received.id())
        .bind(ProductMoveStatus::Defective.id())
        .bind(STRequestStatus::Cancelled.id())
        .fetch_one(&self.db)
        .await?;

        let in_photo_requests: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM st_request_products p
            JOIN st_requests r ON r.id = p.request_id
            WHERE r.status_id = ANY($1)
            "#,
        )
        .bind(vec![
            STRequestStatus::Draft.id(),
            STRequestStatus::Created.id(),
            STRequestStatus::Shooting.id(),
            STRequestStatus::Shot.id(),
        ])
        .fetch_one(&self.db)
        .await?;

        // Approved photos not yet batched into a retouch request
        let awaiting_retouch: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT sp.product_id)
            FROM st_request_products sp
            JOIN st_requests r ON r.id = sp.request_id
            JOIN products pr ON pr.id = sp.product_id
            WHERE r.status_id = $1 AND sp.senior_photo_status_id = $2
              AND pr.move_status_id <> $3 AND NOT pr.is_retouch_blocked
              AND NOT EXISTS (SELECT 1 FROM retouch_request_products rp WHERE rp.product_id = sp.product_id)
            "#,
        )
        .bind(STRequestStatus::Checked.id())
        .bind(SeniorPhotoStatus::Approved.id())
        .bind(ProductMoveStatus::Defective.id())
        .fetch_one(&self.db)
        .await?;

        let retouch_in_progress: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM retouch_request_products rp
            JOIN retouch_requests r ON r.id = rp.request_id
            WHERE r.status_id = ANY($1)
            "#,
        )
        .bind(vec![
            RetouchRequestStatus::Created.id(),
            RetouchRequestStatus::InProgress.id(),
            RetouchRequestStatus::OnReview.id(),
        ])
        .fetch_one(&self.db)
        .await?;

        let awaiting_render_check: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT rp.product_id)
            FROM retouch_request_products rp
            JOIN retouch_requests r ON r.id = rp.request_id
            WHERE r.status_id = $1 AND rp.senior_retouch_status_id = $2
              AND NOT EXISTS (SELECT 1 FROM renders rd WHERE rd.product_id = rp.product_id)
              AND NOT EXISTS (SELECT 1 FROM moderation_uploads mu WHERE mu.product_id = rp.product_id)
            "#,
        )
        .bind(RetouchRequestStatus::Completed.id())
        .bind(SeniorRetouchStatus::Approved.id())
        .fetch_one(&self.db)
        .await?;

        // A product gets one upload record, so a rejected upload is final
        let awaiting_upload: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM renders rd
            JOIN products pr ON pr.id = rd.product_id
            WHERE rd.status_id = $1 AND pr.move_status_id <> $2
              AND NOT EXISTS (SELECT 1 FROM moderation_uploads mu WHERE mu.product_id = rd.product_id)
            "#,
        )
        .bind(RenderStatus::Suitable.id())
        .bind(ProductMoveStatus::Defective.id())
        .fetch_one(&self.db)
        .await?;

        let open_orders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE status_id = ANY($1)")
            .bind(vec![
                OrderStatus::Created.id(),
                OrderStatus::Assembling.id(),
                OrderStatus::Assembled.id(),
                OrderStatus::Accepting.id(),
            ])
            .fetch_one(&self.db)
            .await?;

        let pending_notifications: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM telegram_messages WHERE status IN ('pending', 'sending')")
                .fetch_one(&self.db)
                .await?;

        Ok(DashboardMetrics {
            received_without_request,
            in_photo_requests,
            awaiting_retouch,
            retouch_in_progress,
            awaiting_render_check,
            awaiting_upload,
            open_orders,
            defective,
            pending_notifications,
        })
    }

    /// Daily statistics for a range, oldest first
    pub async fn daily(&self, range: &DateRange) -> AppResult<Vec<DailyStats>> {
        let rows = sqlx::query_as::<_, DailyStats>(
            r#"
            SELECT day, received, photographed, retouched, render_checked, uploaded, shipped,
                   defective, updated_at
            FROM daily_stats
            WHERE day BETWEEN $1 AND $2
            ORDER BY day
            "#,
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }

    /// Operation counts per worker over a range
    pub async fn worker_productivity(&self, range: &DateRange) -> AppResult<Vec<WorkerProductivity>> {
        let rows = sqlx::query_as::<_, WorkerProductivity>(
            r#"
            SELECT u.id AS user_id, u.name AS user_name, u.role,
                   po.operation_type_id, ot.name AS operation, COUNT(*) AS count
            FROM product_operations po
            JOIN users u ON u.id = po.user_id
            JOIN operation_types ot ON ot.id = po.operation_type_id
            WHERE po.created_at >= $1::date AND po.created_at < ($2::date + 1)
            GROUP BY u.id, u.name, u.role, po.operation_type_id, ot.name
            ORDER BY u.name, po.operation_type_id
            "#,
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }

    /// Recompute one day of statistics from the operation log
    pub async fn aggregate_day(&self, day: NaiveDate) -> AppResult<DailyStats> {
        let stats = sqlx::query_as::<_, DailyStats>(
            r#"
            INSERT INTO daily_stats (day, received, photographed, retouched, render_checked,
                                     uploaded, shipped, defective, updated_at)
            SELECT $1,
                   COUNT(*) FILTER (WHERE operation_type_id = $2),
                   COUNT(*) FILTER (WHERE operation_type_id = $3),
                   COUNT(*) FILTER (WHERE operation_type_id = $4),
                   COUNT(*) FILTER (WHERE operation_type_id = $5),
                   COUNT(*) FILTER (WHERE operation_type_id = $6),
                   COUNT(*) FILTER (WHERE operation_type_id = $7),
                   COUNT(*) FILTER (WHERE operation_type_id = $8),
                   NOW()
            FROM product_operations
            WHERE created_at >= $1::date AND created_at < ($1::date + 1)
            ON CONFLICT (day) DO UPDATE SET
                received = EXCLUDED.received,
                photographed = EXCLUDED.photographed,
                retouched = EXCLUDED.retouched,
                render_checked = EXCLUDED.render_checked,
                uploaded = EXCLUDED.uploaded,
                shipped = EXCLUDED.shipped,
                defective = EXCLUDED.defective,
                updated_at = NOW()
            RETURNING day, received, photographed, retouched, render_checked, uploaded, shipped,
                      defective, updated_at
            "#,
        )
        .bind(day)
        .bind(OperationType::Received.id())
        .bind(OperationType::Photographed.id())
        .bind(OperationType::Retouched.id())
        .bind(OperationType::RenderChecked.id())
        .bind(OperationType::ModerationUploaded.id())
        .bind(OperationType::Shipped.id())
        .bind(OperationType::Defective.id())
        .fetch_one(&self.db)
        .await?;

        tracing::debug!(%day, "Daily statistics aggregated");
        Ok(stats)
    }

    /// Export data to CSV format
    pub fn export_to_csv<T: Serialize>(data: &[T]) -> AppResult<String> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        for record in data {
            wtr.serialize(record)
                .map_err(|e| AppError::Internal(format!("CSV serialization error: {}", e)))?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| AppError::Internal(format!("CSV writer error: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("UTF-8 conversion error: {}", e)))
    }
}
