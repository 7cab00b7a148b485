//! Reporting handlers for analytics and data export

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::services::reporting::{DailyStats, DashboardMetrics, ReportFilter, ReportingService};
use crate::AppState;

#[derive(Deserialize)]
pub struct ReportQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub format: Option<String>, // "json" or "csv"
}

impl ReportQuery {
    fn filter(&self) -> ReportFilter {
        ReportFilter {
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }

    fn wants_csv(&self) -> bool {
        self.format.as_deref() == Some("csv")
    }
}

fn respond<T: Serialize>(data: Vec<T>, csv: bool, filename: &str) -> AppResult<Response> {
    if csv {
        let body = ReportingService::export_to_csv(&data)?;
        let disposition = format!("attachment; filename=\"{}\"", filename);
        Ok((
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            body,
        )
            .into_response())
    } else {
        Ok(Json(data).into_response())
    }
}

/// Get dashboard metrics
pub async fn get_dashboard(State(state): State<AppState>) -> AppResult<Json<DashboardMetrics>> {
    let service = ReportingService::new(state.db.clone());
    Ok(Json(service.dashboard().await?))
}

/// Daily workflow counters
pub async fn get_daily_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> AppResult<Response> {
    let range = query.filter().resolve(Utc::now().date_naive())?;
    let service = ReportingService::new(state.db.clone());
    let data = service.daily(&range).await?;
    respond(data, query.wants_csv(), "daily_stats.csv")
}

/// Operations per worker
pub async fn get_productivity_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> AppResult<Response> {
    let range = query.filter().resolve(Utc::now().date_naive())?;
    let service = ReportingService::new(state.db.clone());
    let data = service.worker_productivity(&range).await?;
    respond(data, query.wants_csv(), "worker_productivity.csv")
}

/// Recompute the stored counters for one day
pub async fn aggregate_day(
    State(state): State<AppState>,
    Path(day): Path<NaiveDate>,
) -> AppResult<Json<DailyStats>> {
    let service = ReportingService::new(state.db.clone());
    Ok(Json(service.aggregate_day(day).await?))
}
