//! Telegram outbox administration

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use shared::{PaginatedResponse, Pagination};
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::notification::{DispatchSummary, OutboxFilter, OutboxMessage};
use crate::AppState;

const DEFAULT_DISPATCH_BATCH: i64 = 50;

#[derive(Deserialize)]
pub struct DispatchQuery {
    pub batch: Option<i64>,
}

pub async fn list_outbox(
    State(state): State<AppState>,
    Query(filter): Query<OutboxFilter>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<OutboxMessage>>> {
    let service = state.notifications();
    Ok(Json(service.list(&filter, &pagination).await?))
}

/// Put a failed message back into the queue
pub async fn retry_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<OutboxMessage>> {
    let service = state.notifications();
    Ok(Json(service.retry(message_id).await?))
}

pub async fn dispatch_outbox(
    State(state): State<AppState>,
    Query(query): Query<DispatchQuery>,
) -> AppResult<Json<DispatchSummary>> {
    let batch = query.batch.unwrap_or(DEFAULT_DISPATCH_BATCH).clamp(1, 500);
    let service = state.notifications();
    Ok(Json(service.dispatch_pending(batch).await?))
}
