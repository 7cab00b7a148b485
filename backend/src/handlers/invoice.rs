//! Outbound invoice handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use shared::{PaginatedResponse, Pagination};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::invoice::{CreateInvoiceInput, CreateInvoiceReport, Invoice, InvoiceDetail};
use crate::services::InvoiceService;
use crate::AppState;

pub async fn create_invoice(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateInvoiceInput>,
) -> AppResult<(StatusCode, Json<CreateInvoiceReport>)> {
    let service = InvoiceService::new(state.db.clone());
    let report = service.create(input, user.user_id).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<Invoice>>> {
    let service = InvoiceService::new(state.db.clone());
    Ok(Json(service.list(&pagination).await?))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<InvoiceDetail>> {
    let service = InvoiceService::new(state.db.clone());
    Ok(Json(service.get(invoice_id).await?))
}

/// Ship every product on the invoice
pub async fn send_invoice(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<InvoiceDetail>> {
    let service = InvoiceService::new(state.db.clone());
    Ok(Json(service.send(invoice_id, user.user_id).await?))
}
