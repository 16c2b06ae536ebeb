//! HTTP middleware: shared-secret authentication.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::state::AppState;

#[derive(Deserialize)]
struct SecretParam {
    secret: Option<String>,
}

/// Secret authentication middleware.
///
/// If a secret is configured, all requests (except /health) must carry it
/// as `Authorization: Bearer <secret>` or as the `secret` query parameter.
/// A missing or wrong secret is 401.
pub(crate) async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let expected = match &state.secret {
        Some(s) => s,
        None => return next.run(request).await,
    };

    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let bearer = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let query = Query::<SecretParam>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(p)| p.secret);

    match bearer.or(query) {
        Some(given) if given == *expected => next.run(request).await,
        Some(_) => {
            tracing::warn!(path = request.uri().path(), "rejected request with wrong secret");
            super::json_error(StatusCode::UNAUTHORIZED, "invalid secret").into_response()
        }
        None => super::json_error(StatusCode::UNAUTHORIZED, "authentication required")
            .into_response(),
    }
}
