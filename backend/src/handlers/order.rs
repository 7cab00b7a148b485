//! Order assembly and acceptance handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use shared::{PaginatedResponse, Pagination};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::order::{
    CreateOrderInput, CreateOrderReport, Order, OrderDetail, OrderFilter, OrderLine,
};
use crate::services::OrderService;
use crate::AppState;

fn service(state: &AppState) -> OrderService {
    OrderService::new(state.db.clone(), state.notifications())
}

pub async fn create_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateOrderInput>,
) -> AppResult<(StatusCode, Json<CreateOrderReport>)> {
    let report = service(&state).create(input, user.user_id).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(filter): Query<OrderFilter>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<Order>>> {
    Ok(Json(service(&state).list(&filter, &pagination).await?))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<OrderDetail>> {
    Ok(Json(service(&state).get(order_id).await?))
}

/// Claim the oldest new order for assembly
pub async fn start_assembly(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<OrderDetail>> {
    Ok(Json(service(&state).start_assembly(user.user_id).await?))
}

pub async fn release_assembly(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    Ok(Json(service(&state).release_assembly(order_id).await?))
}

pub async fn mark_assembled(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((order_id, barcode)): Path<(Uuid, String)>,
) -> AppResult<Json<OrderLine>> {
    Ok(Json(
        service(&state)
            .mark_assembled(order_id, &barcode, user.user_id)
            .await?,
    ))
}

pub async fn finish_assembly(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    Ok(Json(service(&state).finish_assembly(order_id).await?))
}

pub async fn start_acceptance(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<OrderDetail>> {
    Ok(Json(
        service(&state)
            .start_acceptance(order_id, user.user_id)
            .await?,
    ))
}

pub async fn accept_product(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((order_id, barcode)): Path<(Uuid, String)>,
) -> AppResult<Json<OrderDetail>> {
    Ok(Json(
        service(&state)
            .accept_product(order_id, &barcode, user.user_id)
            .await?,
    ))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(order_id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    Ok(Json(service(&state).cancel(order_id, user.user_id).await?))
}
