use crate::auth::AdminCaller;
use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use axum::Json;
use gatehouse::config::AppEnvironment;
use gatehouse::error::AppError;
use gatehouse::identity::IdentityStore;
use gatehouse::registration::{registration_router, RegistrationApi};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub(crate) struct EmailCodeRequest {
    pub(crate) email: String,
}

pub(crate) fn with_ops_routes<S>(registration: Arc<RegistrationApi<S>>) -> axum::Router
where
    S: IdentityStore + 'static,
{
    registration_router(registration)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .route("/api/captcha", axum::routing::get(captcha_endpoint))
        .route(
            "/api/verification/email-code",
            axum::routing::post(email_code_endpoint),
        )
        .route("/api/admin/sync", axum::routing::post(sync_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Issues a captcha token. The answer stays server-side and is keyed by the token.
pub(crate) async fn captcha_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let (token, challenge) = state.captcha.issue();
    if state.environment == AppEnvironment::Development {
        info!(token, challenge, "captcha challenge issued");
    }
    Json(json!({ "token": token }))
}

pub(crate) async fn email_code_endpoint(
    Extension(state): Extension<AppState>,
    Json(request): Json<EmailCodeRequest>,
) -> impl IntoResponse {
    let email = request.email.trim();
    if email.is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "success": false, "message_key": "register.invalid_email" })),
        );
    }

    let code = state.email_codes.issue(email);
    // Mail delivery is external; development builds surface the code in the log instead.
    if state.environment == AppEnvironment::Development {
        info!(email, code, "email verification code issued");
    }
    (StatusCode::OK, Json(json!({ "success": true })))
}

pub(crate) async fn sync_endpoint(
    _admin: AdminCaller,
    Extension(state): Extension<AppState>,
) -> Result<Response, AppError> {
    let Some(engine) = state.reconciliation.as_ref() else {
        let payload = json!({ "error": "legacy credential sync is not enabled" });
        return Ok((StatusCode::NOT_FOUND, Json(payload)).into_response());
    };

    let report = engine.try_sync().await?;
    Ok((StatusCode::OK, Json(report)).into_response())
}
