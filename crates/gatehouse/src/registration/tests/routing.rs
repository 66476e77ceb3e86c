use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;
use crate::identity::{
    IdentityStore, InMemoryIdentityStore, NewUser, StoreError, UserRecord, UserStatus,
};
use crate::registration::{
    registration_router, QuestionnaireIntake, RegistrationApi, RegistrationConfig, ScoreCard,
};

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("json body")
}

fn api_for<S>(harness: Harness<S>, with_intake: bool) -> Arc<RegistrationApi<S>>
where
    S: IdentityStore + 'static,
{
    let intake = with_intake.then(|| {
        QuestionnaireIntake::new(
            Arc::new(FixedScorer(ScoreCard {
                score: 90,
                pass_score: 60,
                passed: true,
                manual_review_required: false,
                details: details(),
            })),
            harness.submissions.clone(),
        )
    });

    Arc::new(RegistrationApi {
        pipeline: harness.pipeline,
        intake,
        messages: Arc::new(KeyEcho),
    })
}

/// Remembers which thread performed each write.
#[derive(Default)]
struct WriterThreads {
    inner: InMemoryIdentityStore,
    writers: Mutex<Vec<ThreadId>>,
}

impl WriterThreads {
    fn writers(&self) -> Vec<ThreadId> {
        self.writers.lock().expect("writer mutex poisoned").clone()
    }
}

impl IdentityStore for WriterThreads {
    fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        self.writers
            .lock()
            .expect("writer mutex poisoned")
            .push(thread::current().id());
        self.inner.create(user)
    }

    fn update_status(&self, username: &str, status: UserStatus) -> Result<bool, StoreError> {
        self.inner.update_status(username, status)
    }

    fn update_password(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        self.inner.update_password(username, password)
    }

    fn update_email(&self, username: &str, email: &str) -> Result<bool, StoreError> {
        self.inner.update_email(username, email)
    }

    fn update_external_id(&self, username: &str, id: &str) -> Result<bool, StoreError> {
        self.inner.update_external_id(username, id)
    }

    fn get_by_username(
        &self,
        username: &str,
        case_sensitive: bool,
    ) -> Result<Option<UserRecord>, StoreError> {
        self.inner.get_by_username(username, case_sensitive)
    }

    fn count_by_email(&self, email: &str) -> Result<usize, StoreError> {
        self.inner.count_by_email(email)
    }

    fn list_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.inner.list_all()
    }
}

#[tokio::test]
async fn register_route_reports_outcome_and_message() {
    let harness = harness(RegistrationConfig::default());
    harness.codes.issue("steve@gmail.com", "424242");
    let store = harness.store.clone();
    let router = registration_router(api_for(harness, false));

    let response = router
        .oneshot(post_json(
            "/api/register",
            json!({ "email": "steve@gmail.com", "code": "424242", "username": "Steve" }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["outcome"], json!("SUCCESS_PENDING"));
    assert_eq!(body["message"], json!("[en] register.success"));
    assert_eq!(body["status"], json!("pending"));
    assert!(store.get_by_username("Steve", true).expect("lookup").is_some());
}

#[tokio::test]
async fn register_route_returns_unprocessable_for_rejection() {
    let harness = harness(RegistrationConfig::default());
    let router = registration_router(api_for(harness, false));

    let response = router
        .oneshot(post_json(
            "/api/register",
            json!({ "email": "steve@gmail.com", "username": "no", "language": "de" }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["message_key"], json!("username.invalid"));
    assert_eq!(body["message"], json!("[de] username.invalid"));
    assert!(body["fields"]["regex"].is_string());
}

#[tokio::test]
async fn register_route_surfaces_failed_persistence() {
    let harness = harness_with(
        RegistrationConfig::default(),
        Arc::new(ReadOnlyStore),
        FixedBinding::default(),
    );
    harness.codes.issue("steve@gmail.com", "424242");
    let router = registration_router(api_for(harness, false));

    let response = router
        .oneshot(post_json(
            "/api/register",
            json!({ "email": "steve@gmail.com", "code": "424242", "username": "Steve" }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["outcome"], json!("FAILED"));
    assert_eq!(body["status"], Value::Null);
}

#[tokio::test]
async fn questionnaire_ticket_redeems_at_registration() {
    let config = RegistrationConfig {
        questionnaire_enabled: true,
        ..RegistrationConfig::default()
    };
    let harness = harness(config);
    harness.codes.issue("steve@gmail.com", "424242");
    let router = registration_router(api_for(harness, true));

    let answers = answers();
    let response = router
        .clone()
        .oneshot(post_json(
            "/api/questionnaire/submit",
            json!({ "answers": answers, "language": "en" }),
        ))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);
    let ticket = body_json(response).await;
    assert_eq!(ticket["success"], json!(true));
    assert_eq!(ticket["passed"], json!(true));

    let response = router
        .oneshot(post_json(
            "/api/register",
            json!({
                "email": "steve@gmail.com",
                "code": "424242",
                "username": "Steve",
                "questionnaire": {
                    "token": ticket["token"],
                    "submitted_at": ticket["submitted_at"],
                    "expires_at": ticket["expires_at"],
                    "answers": answers,
                }
            }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["outcome"], json!("SUCCESS_PENDING"));
}

#[tokio::test]
async fn questionnaire_route_is_absent_when_disabled() {
    let harness: Harness<InMemoryIdentityStore> = harness(RegistrationConfig::default());
    let router = registration_router(api_for(harness, false));

    let response = router
        .oneshot(post_json(
            "/api/questionnaire/submit",
            json!({ "answers": { "1": "a" } }),
        ))
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["message_key"], json!("questionnaire.not_enabled"));
}

#[tokio::test]
async fn register_route_keeps_store_writes_off_the_runtime_thread() {
    let store = Arc::new(WriterThreads::default());
    let harness = harness_with(
        RegistrationConfig::default(),
        store.clone(),
        FixedBinding::default(),
    );
    harness.codes.issue("steve@gmail.com", "424242");
    let router = registration_router(api_for(harness, false));

    let response = router
        .oneshot(post_json(
            "/api/register",
            json!({ "email": "steve@gmail.com", "code": "424242", "username": "Steve" }),
        ))
        .await
        .expect("router responds");
    assert_eq!(response.status(), StatusCode::OK);

    // The current-thread test runtime polls the handler on this thread.
    let writers = store.writers();
    assert_eq!(writers.len(), 1);
    assert_ne!(writers[0], thread::current().id());
}
