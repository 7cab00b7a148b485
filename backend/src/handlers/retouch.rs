//! Retouch request handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use shared::{PaginatedResponse, Pagination, Role};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::retouch::{
    AssignRetoucherInput, AutoCreateReport, RetouchFilter, RetouchLine, RetouchRequest,
    RetouchRequestDetail, RetouchResultInput, RetouchReviewInput,
};
use crate::services::RetouchService;
use crate::AppState;

fn service(state: &AppState) -> RetouchService {
    RetouchService::new(
        state.db.clone(),
        state.notifications(),
        state.config.workflow.retouch_batch_size,
    )
}

/// Run the batch builder now instead of waiting for the scheduler
pub async fn auto_create_retouch(State(state): State<AppState>) -> AppResult<Json<AutoCreateReport>> {
    Ok(Json(service(&state).auto_create().await?))
}

pub async fn take_next_retouch(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<RetouchRequestDetail>> {
    Ok(Json(service(&state).take_next(user.user_id).await?))
}

pub async fn list_retouch_requests(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(mut filter): Query<RetouchFilter>,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<PaginatedResponse<RetouchRequest>>> {
    if user.role == Role::Retoucher {
        filter.retoucher_id = Some(user.user_id);
    }
    Ok(Json(service(&state).list(&filter, &pagination).await?))
}

pub async fn get_retouch_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<RetouchRequestDetail>> {
    Ok(Json(service(&state).get(request_id).await?))
}

pub async fn assign_retoucher(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(input): Json<AssignRetoucherInput>,
) -> AppResult<Json<RetouchRequest>> {
    Ok(Json(
        service(&state).assign_retoucher(request_id, input).await?,
    ))
}

pub async fn set_retouch_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((request_id, barcode)): Path<(Uuid, String)>,
    Json(input): Json<RetouchResultInput>,
) -> AppResult<Json<RetouchLine>> {
    Ok(Json(
        service(&state)
            .set_retouch_status(request_id, &barcode, input, &user)
            .await?,
    ))
}

pub async fn submit_retouch_for_review(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<RetouchRequest>> {
    Ok(Json(
        service(&state).submit_for_review(request_id, &user).await?,
    ))
}

pub async fn review_retouch(
    State(state): State<AppState>,
    Path((request_id, barcode)): Path<(Uuid, String)>,
    Json(input): Json<RetouchReviewInput>,
) -> AppResult<Json<RetouchLine>> {
    Ok(Json(
        service(&state)
            .review_line(request_id, &barcode, input)
            .await?,
    ))
}

pub async fn complete_retouch_review(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<RetouchRequestDetail>> {
    Ok(Json(service(&state).complete_review(request_id).await?))
}

pub async fn cancel_retouch_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<RetouchRequest>> {
    Ok(Json(service(&state).cancel(request_id).await?))
}
