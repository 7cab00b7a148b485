//! Telegram notification outbox
//!
//! Workflow services enqueue messages inside their own transaction; the
//! background dispatcher delivers them and records the outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use crate::config::TelegramConfig;
use crate::error::{AppError, AppResult};
use crate::external::telegram::{escape_html, TelegramClient};
use shared::{PaginatedResponse, Pagination};

/// Notification service for the Telegram outbox
#[derive(Clone)]
pub struct NotificationService {
    db: PgPool,
    telegram: TelegramConfig,
    client: Option<TelegramClient>,
}

/// Forum topic a notice is posted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    General,
    Defects,
    Retouch,
    Orders,
}

/// Outbox message state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    /// Claimed by a dispatcher, delivery in flight
    Sending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }
}

/// Outbox row
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub chat_id: i64,
    pub thread_id: Option<i32>,
    pub text: String,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Outbox list filter
#[derive(Debug, Default, Deserialize)]
pub struct OutboxFilter {
    pub status: Option<MessageStatus>,
}

/// Minutes after which an unfinished delivery claim is taken again
const SENDING_TIMEOUT_MINUTES: i32 = 5;

/// Result of one dispatch pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct DispatchSummary {
    pub sent: usize,
    pub retrying: usize,
    pub failed: usize,
}

/// Status a message moves to after a failed attempt
pub fn status_after_failure(attempts_so_far: i32, max_attempts: i32) -> MessageStatus {
    if attempts_so_far + 1 >= max_attempts {
        MessageStatus::Failed
    } else {
        MessageStatus::Pending
    }
}

impl NotificationService {
    /// Create a new NotificationService instance
    pub fn new(db: PgPool, telegram: &TelegramConfig) -> Self {
        let client = if telegram.is_enabled() {
            TelegramClient::new(telegram.bot_token.clone())
                .map_err(|e| tracing::error!(error = %e, "Telegram client disabled"))
                .ok()
        } else {
            None
        };
        Self {
            db,
            telegram: telegram.clone(),
            client,
        }
    }

    fn thread_for(&self, topic: Topic) -> Option<i32> {
        match topic {
            Topic::General => None,
            Topic::Defects => self.telegram.defects_thread_id,
            Topic::Retouch => self.telegram.retouch_thread_id,
            Topic::Orders => self.telegram.orders_thread_id,
        }
    }

    /// Queue a message; pass the caller's transaction to make it atomic with
    /// the change it reports
    pub async fn enqueue<'e, E>(&self, executor: E, topic: Topic, text: &str) -> AppResult<Uuid>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO telegram_messages (chat_id, thread_id, text)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(self.telegram.chat_id)
        .bind(self.thread_for(topic))
        .bind(text)
        .fetch_one(executor)
        .await?;

        tracing::debug!(message_id = %id, ?topic, "Telegram message queued");
        Ok(id)
    }

    /// Deliver up to `batch` pending messages
    pub async fn dispatch_pending(&self, batch: i64) -> AppResult<DispatchSummary> {
        let mut summary = DispatchSummary::default();

        let Some(client) = &self.client else {
            let pending = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM telegram_messages WHERE status = 'pending'",
            )
            .fetch_one(&self.db)
            .await?;
            if pending > 0 {
                tracing::warn!(pending, "Telegram bot token not configured, messages stay pending");
            }
            return Ok(summary);
        };

        let messages = self.claim(batch).await?;

        for message in messages {
            let attempts = message.attempts + 1;
            match client
                .send_message(message.chat_id, message.thread_id, &message.text)
                .await
            {
                Ok(telegram_id) => {
                    self.record(message.id, MessageStatus::Sent, None).await?;
                    tracing::debug!(message_id = %message.id, telegram_id, "Telegram message sent");
                    summary.sent += 1;
                }
                Err(e) => {
                    let next = status_after_failure(message.attempts, self.telegram.max_attempts);
                    self.record(message.id, next, Some(e.to_string().as_str())).await?;
                    tracing::error!(
                        message_id = %message.id,
                        attempts,
                        "Failed to send Telegram message: {}",
                        e
                    );
                    match next {
                        MessageStatus::Failed => summary.failed += 1,
                        _ => summary.retrying += 1,
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Mark up to `batch` deliverable messages as sending; the claim commits
    /// before any network call. Claims left behind by a dead dispatcher are
    /// picked up again once they are older than the sending timeout.
    async fn claim(&self, batch: i64) -> AppResult<Vec<OutboxMessage>> {
        let mut messages = sqlx::query_as::<_, OutboxMessage>(
            r#"
            UPDATE telegram_messages
            SET status = 'sending', claimed_at = NOW()
            WHERE id IN (
                SELECT id FROM telegram_messages
                WHERE status = 'pending'
                   OR (status = 'sending' AND claimed_at < NOW() - make_interval(mins => $2))
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, chat_id, thread_id, text, status, attempts, last_error, created_at, sent_at
            "#,
        )
        .bind(batch)
        .bind(SENDING_TIMEOUT_MINUTES)
        .fetch_all(&self.db)
        .await?;

        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    /// Store the outcome of one delivery attempt
    async fn record(&self, message_id: Uuid, status: MessageStatus, error: Option<&str>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE telegram_messages
            SET status = $2,
                attempts = attempts + 1,
                last_error = $3,
                claimed_at = NULL,
                sent_at = CASE WHEN $2 = 'sent' THEN NOW() ELSE sent_at END
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(message_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// List outbox messages, newest first
    pub async fn list(
        &self,
        filter: &OutboxFilter,
        pagination: &Pagination,
    ) -> AppResult<PaginatedResponse<OutboxMessage>> {
        let status = filter.status.map(|s| s.as_str());

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM telegram_messages WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, OutboxMessage>(
            r#"
            SELECT id, chat_id, thread_id, text, status, attempts, last_error, created_at, sent_at
            FROM telegram_messages
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(PaginatedResponse::new(rows, pagination, total as u64))
    }

    /// Put a failed message back in the queue
    pub async fn retry(&self, message_id: Uuid) -> AppResult<OutboxMessage> {
        sqlx::query_as::<_, OutboxMessage>(
            r#"
            UPDATE telegram_messages
            SET status = 'pending', attempts = 0
            WHERE id = $1 AND status = 'failed'
            RETURNING id, chat_id, thread_id, text, status, attempts, last_error, created_at, sent_at
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Failed message".to_string()))
    }
}

// ============================================================================
// Message templates
// ============================================================================

/// Defect notice for a product
pub fn defect_message(barcode: &str, name: Option<&str>, comment: Option<&str>) -> String {
    let mut text = format!("<b>Брак</b>\nШК: <code>{}</code>", escape_html(barcode));
    if let Some(name) = name {
        text.push_str(&format!("\nТовар: {}", escape_html(name)));
    }
    if let Some(comment) = comment.filter(|c| !c.trim().is_empty()) {
        text.push_str(&format!("\nКомментарий: {}", escape_html(comment)));
    }
    text
}

/// Summary of auto-created retouch requests
pub fn retouch_batch_message(request_numbers: &[i64], batch_size: usize) -> String {
    let numbers = request_numbers
        .iter()
        .map(|n| format!("№{}", n))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "<b>Созданы заявки на ретушь</b>: {} (по {} товаров)\n{}",
        request_numbers.len(),
        batch_size,
        numbers
    )
}

/// Notice about an order changing state
pub fn order_message(order_number: i64, status_label: &str, products: usize) -> String {
    format!(
        "<b>Заказ №{}</b>: {}\nТоваров: {}",
        order_number,
        escape_html(status_label),
        products
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_keeps_pending_until_max_attempts() {
        assert_eq!(status_after_failure(0, 5), MessageStatus::Pending);
        assert_eq!(status_after_failure(3, 5), MessageStatus::Pending);
        assert_eq!(status_after_failure(4, 5), MessageStatus::Failed);
        assert_eq!(status_after_failure(0, 1), MessageStatus::Failed);
    }

    #[test]
    fn defect_message_escapes_user_text() {
        let text = defect_message("4601234567890", Some("Кружка <XL>"), Some("скол & трещина"));
        assert!(text.contains("Кружка &lt;XL&gt;"));
        assert!(text.contains("скол &amp; трещина"));
        assert!(text.starts_with("<b>Брак</b>"));
    }

    #[test]
    fn defect_message_skips_blank_comment() {
        let text = defect_message("4601234567890", None, Some("  "));
        assert!(!text.contains("Комментарий"));
    }

    #[test]
    fn retouch_batch_message_lists_numbers() {
        let text = retouch_batch_message(&[12, 13], 10);
        assert!(text.contains(": 2 (по 10"));
        assert!(text.ends_with("№12, №13"));
    }

    fn unreachable_service(pool: &PgPool, max_attempts: i32) -> NotificationService {
        let telegram = TelegramConfig {
            bot_token: "123:test".to_string(),
            chat_id: -100,
            defects_thread_id: None,
            retouch_thread_id: None,
            orders_thread_id: None,
            max_attempts,
            login_max_age_secs: 86400,
        };
        let mut service = NotificationService::new(pool.clone(), &telegram);
        service.client = service.client.map(|c| c.with_base_url("http://127.0.0.1:9"));
        service
    }

    async fn outbox_row(pool: &PgPool, id: Uuid) -> (String, i32, Option<String>) {
        sqlx::query_as("SELECT status, attempts, last_error FROM telegram_messages WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn failing_delivery_stops_at_max_attempts(pool: PgPool) {
        let service = unreachable_service(&pool, 2);
        let id = service.enqueue(&pool, Topic::General, "test").await.unwrap();

        let first = service.dispatch_pending(10).await.unwrap();
        assert_eq!((first.sent, first.retrying, first.failed), (0, 1, 0));
        let (status, attempts, error) = outbox_row(&pool, id).await;
        assert_eq!((status.as_str(), attempts), ("pending", 1));
        assert!(error.is_some());

        let second = service.dispatch_pending(10).await.unwrap();
        assert_eq!(second.failed, 1);
        assert_eq!(outbox_row(&pool, id).await.0, "failed");

        let third = service.dispatch_pending(10).await.unwrap();
        assert_eq!(third.sent + third.retrying + third.failed, 0);

        let retried = service.retry(id).await.unwrap();
        assert_eq!((retried.status.as_str(), retried.attempts), ("pending", 0));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
    async fn abandoned_claims_are_taken_again(pool: PgPool) {
        let service = unreachable_service(&pool, 5);
        let fresh: Uuid = sqlx::query_scalar(
            "INSERT INTO telegram_messages (chat_id, text, status, claimed_at) VALUES (-100, 'a', 'sending', NOW()) RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        let stale: Uuid = sqlx::query_scalar(
            "INSERT INTO telegram_messages (chat_id, text, status, claimed_at) VALUES (-100, 'b', 'sending', NOW() - INTERVAL '1 hour') RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        let summary = service.dispatch_pending(10).await.unwrap();
        assert_eq!(summary.retrying, 1);
        assert_eq!(outbox_row(&pool, fresh).await.0, "sending");
        let (status, attempts, _) = outbox_row(&pool, stale).await;
        assert_eq!((status.as_str(), attempts), ("pending", 1));
    }
}

