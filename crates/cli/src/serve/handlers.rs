//! HTTP route handlers.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use customs_sync_engine::period::{format_day, parse_day};
use customs_sync_engine::{RateSyncMode, SyncOutcome};
use customs_sync_storage::StorageError;
use serde::Deserialize;
use serde_json::json;
use time::Date;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use super::json_error;
use super::state::AppState;

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

fn storage_error(e: StorageError) -> Response {
    let status = match &e {
        StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
        StorageError::InvalidTransition { .. } | StorageError::AlreadyFinished { .. } => {
            StatusCode::CONFLICT
        }
        _ => {
            tracing::error!(error = %e, "storage failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    json_error(status, &e.to_string()).into_response()
}

fn day_param(name: &str, value: Option<&str>) -> Result<Date, Response> {
    let value = value.ok_or_else(|| {
        json_error(StatusCode::BAD_REQUEST, &format!("missing '{name}'")).into_response()
    })?;
    parse_day(value).map_err(|e| json_error(StatusCode::BAD_REQUEST, &e.to_string()).into_response())
}

// ──────────────────────────────────────────────
// Rates
// ──────────────────────────────────────────────

#[derive(Deserialize)]
pub(crate) struct SyncRatesParams {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// GET|POST /sync/rates?type=full|daily
///
/// Responds `{success, message, totalSynced}` with 200, 429 when the mode
/// is already running, or 500.
pub(crate) async fn handle_sync_rates(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SyncRatesParams>,
) -> Response {
    let mode: RateSyncMode = match params.kind.as_deref().unwrap_or("daily").parse() {
        Ok(mode) => mode,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "message": e.to_string(), "totalSynced": 0 })),
            )
                .into_response()
        }
    };

    match state.services.rates.run(mode, &|_| {}).await {
        Ok(SyncOutcome::Completed(report)) => {
            let message = if report.days_failed > 0 {
                format!("{mode} sync finished; {} day(s) failed", report.days_failed)
            } else {
                format!("{mode} sync finished")
            };
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": message,
                    "totalSynced": report.rows_synced,
                    "report": report,
                })),
            )
                .into_response()
        }
        Ok(SyncOutcome::Locked) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "success": false,
                "message": format!("{mode} sync is already running"),
                "totalSynced": 0,
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(%mode, error = %e, "rate sync failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "message": e.to_string(), "totalSynced": 0 })),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct AuditParams {
    from: Option<String>,
    to: Option<String>,
    #[serde(default)]
    repair: bool,
}

/// GET /audit/rates?from=&to=[&repair=true]
///
/// Streams one JSON event per line while the audit runs. The audit stops
/// when the client disconnects.
pub(crate) async fn handle_audit_rates(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> Response {
    let from = match day_param("from", params.from.as_deref()) {
        Ok(d) => d,
        Err(r) => return r,
    };
    let to = match day_param("to", params.to.as_deref()) {
        Ok(d) => d,
        Err(r) => return r,
    };

    let (tx, rx) = mpsc::channel(64);
    let repair = params.repair;
    tokio::spawn(async move {
        if let Err(e) = state.services.audit.run(from, to, repair, tx).await {
            tracing::info!(error = %e, "rate audit stream ended early");
        }
    });

    let lines = ReceiverStream::new(rx).map(|event| {
        serde_json::to_string(&event).map(|mut line| {
            line.push('\n');
            line
        })
    });
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response()
}

#[derive(Deserialize)]
pub(crate) struct RatesParams {
    date: Option<String>,
}

/// GET /exchange-rates?date=YYYY-MM-DD
pub(crate) async fn handle_exchange_rates(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RatesParams>,
) -> Response {
    let date = match day_param("date", params.date.as_deref()) {
        Ok(d) => d,
        Err(r) => return r,
    };
    match state.services.store.list_exchange_rates(date).await {
        Ok(rates) => (
            StatusCode::OK,
            Json(json!({ "date": format_day(date), "rates": rates })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

// ──────────────────────────────────────────────
// Summaries
// ──────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BackfillParams {
    batch_size: Option<usize>,
    cursor: Option<i64>,
}

/// POST /backfill/summaries?batchSize=&cursor=
///
/// One page; the client loops until `done`.
pub(crate) async fn handle_backfill_summaries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BackfillParams>,
) -> Response {
    let batch_size = params.batch_size.unwrap_or(100);
    match state.services.backfill.page(batch_size, params.cursor).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "summary backfill page failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response()
        }
    }
}

// ──────────────────────────────────────────────
// Declaration sync jobs
// ──────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateJobBody {
    date_from: Option<String>,
    date_to: Option<String>,
}

/// POST /companies/{id}/sync-jobs  body `{dateFrom, dateTo}`
///
/// Runs the job to a terminal status and returns it.
pub(crate) async fn handle_create_job(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<i64>,
    Json(body): Json<CreateJobBody>,
) -> Response {
    let from = match day_param("dateFrom", body.date_from.as_deref()) {
        Ok(d) => d,
        Err(r) => return r,
    };
    let to = match day_param("dateTo", body.date_to.as_deref()) {
        Ok(d) => d,
        Err(r) => return r,
    };
    let syncer = match state.services.declarations() {
        Ok(s) => s,
        Err(e) => {
            return json_error(StatusCode::SERVICE_UNAVAILABLE, &e.to_string()).into_response()
        }
    };

    match syncer.run(company_id, from, to).await {
        Ok(SyncOutcome::Completed(job)) => (StatusCode::OK, Json(job)).into_response(),
        Ok(SyncOutcome::Locked) => json_error(
            StatusCode::TOO_MANY_REQUESTS,
            &format!("a declaration sync for company {company_id} is already running"),
        )
        .into_response(),
        Err(e) => {
            tracing::error!(company_id, error = %e, "declaration sync failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response()
        }
    }
}

/// GET /sync-jobs/{id}
pub(crate) async fn handle_get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<i64>,
) -> Response {
    match state.services.jobs.get(job_id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => storage_error(e),
    }
}

/// POST /sync-jobs/{id}/cancel
///
/// 404 for an unknown job, 409 when it is no longer processing.
pub(crate) async fn handle_cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<i64>,
) -> Response {
    match state.services.jobs.cancel(job_id).await {
        Ok(job) => (StatusCode::OK, Json(job)).into_response(),
        Err(e) => storage_error(e),
    }
}

/// GET /companies/{id}/stats
pub(crate) async fn handle_company_stats(
    State(state): State<Arc<AppState>>,
    Path(company_id): Path<i64>,
) -> Response {
    match state.services.company_stats(company_id).await {
        Ok(stats) => (
            StatusCode::OK,
            Json(json!({ "companyId": company_id, "stats": stats })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}
