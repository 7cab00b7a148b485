//! Background tasks and scheduled jobs.
//!
//! Every job runs on its own `tokio::time::interval` until the shared
//! [`CancellationToken`] fires. A failing run is logged and the loop keeps
//! going on the next tick.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::AppResult;
use crate::services::{ModerationService, RenderService, ReportingService, RetouchService};
use crate::AppState;

/// Messages sent per outbox pass
const DISPATCH_BATCH: i64 = 50;

/// Spawn every scheduled job; handles finish once `cancel` fires
pub fn spawn_all(state: &AppState, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let scheduler = &state.config.scheduler;
    let mut handles = Vec::with_capacity(4);

    let job_state = state.clone();
    handles.push(tokio::spawn(run_periodic(
        "retouch_batches",
        Duration::from_secs(scheduler.auto_retouch_interval_secs),
        cancel.clone(),
        move || {
            let state = job_state.clone();
            async move { retouch_batches(&state).await }
        },
    )));

    let job_state = state.clone();
    handles.push(tokio::spawn(run_periodic(
        "telegram_outbox",
        Duration::from_secs(scheduler.notification_interval_secs),
        cancel.clone(),
        move || {
            let state = job_state.clone();
            async move { telegram_outbox(&state).await }
        },
    )));

    let job_state = state.clone();
    handles.push(tokio::spawn(run_periodic(
        "stale_claims",
        Duration::from_secs(scheduler.stale_claims_interval_secs),
        cancel.clone(),
        move || {
            let state = job_state.clone();
            async move { stale_claims(&state).await }
        },
    )));

    let job_state = state.clone();
    handles.push(tokio::spawn(run_periodic(
        "daily_stats",
        Duration::from_secs(scheduler.stats_interval_secs),
        cancel,
        move || {
            let state = job_state.clone();
            async move { daily_stats(&state).await }
        },
    )));

    handles
}

/// Run `job` every `period` until `cancel` is triggered
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<()>>,
{
    let period = period.max(Duration::from_secs(1));
    tracing::info!(job = name, interval_secs = period.as_secs(), "Background job started");

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(job = name, "Background job stopping");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = job().await {
                    tracing::error!(job = name, error = %e, "Background job run failed");
                }
            }
        }
    }
}

async fn retouch_batches(state: &AppState) -> AppResult<()> {
    let service = RetouchService::new(
        state.db.clone(),
        state.notifications(),
        state.config.workflow.retouch_batch_size,
    );
    let report = service.auto_create().await?;
    if report.created.is_empty() {
        tracing::debug!(ready = report.ready, "Retouch batches: nothing to create");
    } else {
        tracing::info!(
            ready = report.ready,
            created = report.created.len(),
            "Retouch batches: requests created"
        );
    }
    Ok(())
}

async fn telegram_outbox(state: &AppState) -> AppResult<()> {
    let summary = state.notifications().dispatch_pending(DISPATCH_BATCH).await?;
    if summary.sent + summary.retrying + summary.failed > 0 {
        tracing::info!(
            sent = summary.sent,
            retrying = summary.retrying,
            failed = summary.failed,
            "Telegram outbox pass finished"
        );
    }
    Ok(())
}

async fn stale_claims(state: &AppState) -> AppResult<()> {
    let timeout = state.config.workflow.claim_timeout_minutes;
    let renders = RenderService::new(state.db.clone()).release_stale(timeout).await?;
    let uploads = ModerationService::new(state.db.clone())
        .release_stale(timeout)
        .await?;
    if renders + uploads > 0 {
        tracing::info!(renders, uploads, "Stale claims released");
    }
    Ok(())
}

async fn daily_stats(state: &AppState) -> AppResult<()> {
    let service = ReportingService::new(state.db.clone());
    let today = Utc::now().date_naive();
    if let Some(yesterday) = today.pred_opt() {
        service.aggregate_day(yesterday).await?;
    }
    service.aggregate_day(today).await?;
    tracing::debug!(%today, "Daily stats aggregated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn cancelled_token_skips_every_run() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        run_periodic("noop", Duration::from_secs(1), cancel, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_job_keeps_running() {
        let cancel = CancellationToken::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        let stop = cancel.clone();
        run_periodic("flaky", Duration::from_secs(1), cancel, move || {
            let counter = counter.clone();
            let stop = stop.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                    stop.cancel();
                }
                Err(AppError::Internal("boom".to_string()))
            }
        })
        .await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
