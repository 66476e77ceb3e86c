use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::collaborators::MessageResolver;
use super::domain::{RegistrationForm, Rejection};
use super::pipeline::{RegistrationError, RegistrationPipeline};
use super::questionnaire::QuestionnaireIntake;
use crate::identity::{IdentityStore, StoreError};

/// Shared state behind the registration endpoints.
pub struct RegistrationApi<S> {
    pub pipeline: RegistrationPipeline<S>,
    /// Present when the questionnaire stage is enabled.
    pub intake: Option<QuestionnaireIntake>,
    pub messages: Arc<dyn MessageResolver>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionnaireSubmission {
    #[serde(default)]
    pub answers: Value,
    #[serde(default)]
    pub language: Option<String>,
}

/// Router builder exposing the registration and questionnaire endpoints.
pub fn registration_router<S>(api: Arc<RegistrationApi<S>>) -> Router
where
    S: IdentityStore + 'static,
{
    Router::new()
        .route("/api/register", post(register_handler::<S>))
        .route(
            "/api/questionnaire/submit",
            post(questionnaire_handler::<S>),
        )
        .with_state(api)
}

fn rejection_response(
    messages: &dyn MessageResolver,
    rejection: &Rejection,
    language: &str,
) -> Response {
    let payload = json!({
        "success": false,
        "message_key": rejection.message_key,
        "message": messages.resolve(rejection.message_key, language),
        "fields": rejection.fields,
    });
    (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
}

pub(crate) async fn register_handler<S>(
    State(api): State<Arc<RegistrationApi<S>>>,
    axum::Json(form): axum::Json<RegistrationForm>,
) -> Response
where
    S: IdentityStore + 'static,
{
    let request = api.pipeline.prepare(form);
    let language = request.language.clone();

    // Store writes are blocking file I/O.
    let worker = Arc::clone(&api);
    let result = tokio::task::spawn_blocking(move || worker.pipeline.register(&request))
        .await
        .unwrap_or_else(|e| {
            Err(StoreError::Unavailable(format!("spawn_blocking failed: {e}")).into())
        });

    match result {
        Ok(receipt) => {
            let status = if receipt.outcome.is_success() {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            let payload = json!({
                "success": receipt.outcome.is_success(),
                "outcome": receipt.outcome,
                "message_key": receipt.message_key,
                "message": api.messages.resolve(receipt.message_key, &language),
                "username": receipt.username,
                "status": receipt.status.map(|status| status.label()),
            });
            (status, axum::Json(payload)).into_response()
        }
        Err(RegistrationError::Rejected(rejection)) => {
            rejection_response(api.messages.as_ref(), &rejection, &language)
        }
        Err(RegistrationError::Store(error)) => {
            let payload = json!({
                "success": false,
                "error": error.to_string(),
            });
            (StatusCode::SERVICE_UNAVAILABLE, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn questionnaire_handler<S>(
    State(api): State<Arc<RegistrationApi<S>>>,
    axum::Json(submission): axum::Json<QuestionnaireSubmission>,
) -> Response
where
    S: IdentityStore + 'static,
{
    let language = submission
        .language
        .as_deref()
        .map(str::trim)
        .filter(|language| !language.is_empty())
        .unwrap_or("en")
        .to_string();

    let Some(intake) = &api.intake else {
        let payload = json!({
            "success": false,
            "message_key": "questionnaire.not_enabled",
            "message": api.messages.resolve("questionnaire.not_enabled", &language),
        });
        return (StatusCode::NOT_FOUND, axum::Json(payload)).into_response();
    };

    match intake.submit(submission.answers, &language).await {
        Ok(ticket) => {
            let mut payload = json!(ticket);
            if let Some(object) = payload.as_object_mut() {
                object.insert("success".to_string(), Value::Bool(true));
            }
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(rejection) => rejection_response(api.messages.as_ref(), &rejection, &language),
    }
}
