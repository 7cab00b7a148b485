//! Photo-shoot (ST) request handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use shared::{PaginatedResponse, Pagination, Role};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::product::BarcodeReport;
use crate::services::st_request::{
    AssignPhotographerInput, BarcodesInput, BulkCreateInput, BulkCreateReport, PhotoResultInput,
    PhotoReviewInput, STRequest, STRequestDetail, STRequestFilter, STRequestLine,
};
use crate::services::STRequestService;
use crate::AppState;

fn service(state: &AppState) -> STRequestService {
    STRequestService::new(
        state.db.clone(),
        state.notifications(),
        state.config.workflow.st_request_chunk_size,
    )
}

pub async fn create_st_request(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<(StatusCode, Json<STRequest>)> {
    let request = service(&state).create(user.user_id).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// Split a barcode list into Created requests of the configured size
pub async fn bulk_create_st_requests(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<BulkCreateInput>,
) -> AppResult<(StatusCode, Json<BulkCreateReport>)> {
    let report = service(&state).bulk_create(input, user.user_id).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// Photographers only ever see their own requests
pub async fn list_st_requests(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(mut filter): Query<STRequestFilter>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<STRequest>>> {
    if user.role == Role::Photographer {
        filter.photographer_id = Some(user.user_id);
    }
    Ok(Json(service(&state).list(&filter, &pagination).await?))
}

pub async fn get_st_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<STRequestDetail>> {
    Ok(Json(service(&state).get(request_id).await?))
}

pub async fn add_st_products(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(request_id): Path<Uuid>,
    Json(input): Json<BarcodesInput>,
) -> AppResult<Json<BarcodeReport>> {
    Ok(Json(
        service(&state)
            .add_products(request_id, input, user.user_id)
            .await?,
    ))
}

pub async fn remove_st_product(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((request_id, barcode)): Path<(Uuid, String)>,
) -> AppResult<Json<STRequestDetail>> {
    Ok(Json(
        service(&state)
            .remove_product(request_id, &barcode, user.user_id)
            .await?,
    ))
}

pub async fn finalize_st_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<STRequest>> {
    Ok(Json(service(&state).finalize(request_id).await?))
}

pub async fn return_st_request_to_draft(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<STRequest>> {
    Ok(Json(service(&state).return_to_draft(request_id).await?))
}

pub async fn assign_photographer(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(input): Json<AssignPhotographerInput>,
) -> AppResult<Json<STRequest>> {
    Ok(Json(
        service(&state)
            .assign_photographer(request_id, input)
            .await?,
    ))
}

pub async fn set_photo_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((request_id, barcode)): Path<(Uuid, String)>,
    Json(input): Json<PhotoResultInput>,
) -> AppResult<Json<STRequestLine>> {
    Ok(Json(
        service(&state)
            .set_photo_status(request_id, &barcode, input, &user)
            .await?,
    ))
}

pub async fn finish_shooting(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<STRequest>> {
    Ok(Json(
        service(&state)
            .finish_shooting(request_id, user.user_id)
            .await?,
    ))
}

pub async fn review_photo(
    State(state): State<AppState>,
    Path((request_id, barcode)): Path<(Uuid, String)>,
    Json(input): Json<PhotoReviewInput>,
) -> AppResult<Json<STRequestLine>> {
    Ok(Json(
        service(&state)
            .review_line(request_id, &barcode, input)
            .await?,
    ))
}

pub async fn complete_photo_review(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<STRequestDetail>> {
    Ok(Json(service(&state).complete_review(request_id).await?))
}

pub async fn cancel_st_request(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<STRequest>> {
    Ok(Json(
        service(&state).cancel(request_id, user.user_id).await?,
    ))
}
