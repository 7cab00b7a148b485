//! Product handlers for stockmen and OKZ clerks

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use shared::{PaginatedResponse, Pagination};

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::product::{
    BarcodeReport, DefectInput, Product, ProductFilter, ProductOperation, ReceiveInput,
};
use crate::services::ProductService;
use crate::AppState;

#[derive(Deserialize)]
pub struct FlagRequest {
    pub value: bool,
}

fn service(state: &AppState) -> ProductService {
    ProductService::new(state.db.clone(), state.notifications())
}

/// Receive scanned barcodes
pub async fn receive_products(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<ReceiveInput>,
) -> AppResult<Json<BarcodeReport>> {
    Ok(Json(service(&state).receive(input, user.user_id).await?))
}

pub async fn mark_defective(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(barcode): Path<String>,
    Json(input): Json<DefectInput>,
) -> AppResult<Json<Product>> {
    Ok(Json(
        service(&state)
            .mark_defective(&barcode, input, user.user_id)
            .await?,
    ))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> AppResult<Json<Product>> {
    Ok(Json(service(&state).get(&barcode).await?))
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(filter): Query<ProductFilter>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<Product>>> {
    Ok(Json(service(&state).list(&filter, &pagination).await?))
}

pub async fn get_product_history(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
) -> AppResult<Json<Vec<ProductOperation>>> {
    Ok(Json(service(&state).history(&barcode).await?))
}

pub async fn set_product_priority(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Json(body): Json<FlagRequest>,
) -> AppResult<Json<Product>> {
    Ok(Json(service(&state).set_priority(&barcode, body.value).await?))
}

pub async fn set_product_retouch_block(
    State(state): State<AppState>,
    Path(barcode): Path<String>,
    Json(body): Json<FlagRequest>,
) -> AppResult<Json<Product>> {
    Ok(Json(
        service(&state)
            .set_retouch_block(&barcode, body.value)
            .await?,
    ))
}
