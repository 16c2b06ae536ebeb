//! `customs-sync serve` -- HTTP triggers for the sync engine.
//!
//! Endpoints:
//! - GET  /health                         - Server status (exempt from auth)
//! - GET|POST /sync/rates?type=full|daily - Run a rate sync
//! - POST /backfill/summaries             - One summary backfill page
//! - GET  /audit/rates?from=&to=&repair=  - NDJSON audit stream
//! - POST /companies/{id}/sync-jobs       - Run a declaration sync job
//! - GET  /companies/{id}/stats           - Cached declaration stats
//! - GET  /sync-jobs/{id}                 - Job and its error log
//! - POST /sync-jobs/{id}/cancel          - Cancel a processing job
//! - GET  /exchange-rates?date=           - Stored rates for a day
//!
//! When a sync secret is configured every endpoint but /health requires
//! `Authorization: Bearer <secret>` or `?secret=<secret>`.

mod handlers;
mod middleware;
mod state;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use self::handlers::{
    handle_audit_rates, handle_backfill_summaries, handle_cancel_job, handle_company_stats,
    handle_create_job, handle_exchange_rates, handle_get_job, handle_health, handle_not_found,
    handle_sync_rates,
};
use self::middleware::auth_middleware;
use self::state::AppState;
use crate::config::Config;
use crate::error::CliError;
use crate::services::Services;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({ "error": message })))
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sync/rates", get(handle_sync_rates).post(handle_sync_rates))
        .route("/backfill/summaries", post(handle_backfill_summaries))
        .route("/audit/rates", get(handle_audit_rates))
        .route("/companies/{id}/sync-jobs", post(handle_create_job))
        .route("/companies/{id}/stats", get(handle_company_stats))
        .route("/sync-jobs/{id}", get(handle_get_job))
        .route("/sync-jobs/{id}/cancel", post(handle_cancel_job))
        .route("/exchange-rates", get(handle_exchange_rates))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl+C.
pub async fn start_server(config: &Config, services: Services) -> Result<(), CliError> {
    let secret = config.secret().map(str::to_string);
    if secret.is_none() {
        tracing::warn!("no sync secret configured; HTTP triggers are unauthenticated");
    }

    let state = Arc::new(AppState { services, secret });
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "customs-sync listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    tracing::info!("received shutdown signal");
}
