use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use crate::identity::{
    IdentityStore, InMemoryIdentityStore, NewUser, StoreError, UserRecord, UserStatus,
};
use crate::registration::{
    ApprovalHook, CaptchaValidator, EmailCodeValidator, ExternalBindingService, MessageResolver,
    QuestionDetail, QuestionnairePayload, QuestionnaireSubmissionRecord,
    QuestionnaireSubmissionStore, RegistrationCollaborators, RegistrationConfig, RegistrationForm,
    RegistrationPipeline, ScoreCard, ScoringError, ScoringService, SUBMISSION_TTL,
};

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

#[derive(Default)]
pub(super) struct MemoryCaptcha {
    answers: Mutex<HashMap<String, String>>,
}

impl MemoryCaptcha {
    pub(super) fn issue(&self, token: &str, answer: &str) {
        self.answers
            .lock()
            .expect("captcha mutex poisoned")
            .insert(token.to_string(), answer.to_string());
    }
}

impl CaptchaValidator for MemoryCaptcha {
    fn validate(&self, token: &str, answer: &str) -> bool {
        let expected = self
            .answers
            .lock()
            .expect("captcha mutex poisoned")
            .remove(token);
        expected.is_some_and(|expected| expected.eq_ignore_ascii_case(answer.trim()))
    }
}

#[derive(Default)]
pub(super) struct MemoryCodes {
    codes: Mutex<HashMap<String, String>>,
}

impl MemoryCodes {
    pub(super) fn issue(&self, email: &str, code: &str) {
        self.codes
            .lock()
            .expect("code mutex poisoned")
            .insert(email.to_string(), code.to_string());
    }
}

impl EmailCodeValidator for MemoryCodes {
    fn check(&self, email: &str, code: &str) -> bool {
        self.codes
            .lock()
            .expect("code mutex poisoned")
            .get(email)
            .is_some_and(|expected| expected == code)
    }
}

#[derive(Default)]
pub(super) struct FixedBinding {
    pub(super) required: bool,
    pub(super) linked: Vec<String>,
}

impl ExternalBindingService for FixedBinding {
    fn is_required(&self) -> bool {
        self.required
    }

    fn is_linked(&self, username: &str) -> bool {
        self.linked.iter().any(|linked| linked == username)
    }
}

pub(super) struct KeyEcho;

impl MessageResolver for KeyEcho {
    fn resolve(&self, key: &str, language: &str) -> String {
        format!("[{language}] {key}")
    }
}

#[derive(Default)]
pub(super) struct RecordingHook {
    approved: Mutex<Vec<String>>,
}

impl RecordingHook {
    pub(super) fn approvals(&self) -> Vec<String> {
        self.approved.lock().expect("hook mutex poisoned").clone()
    }
}

impl ApprovalHook for RecordingHook {
    fn approved(&self, username: &str) {
        self.approved
            .lock()
            .expect("hook mutex poisoned")
            .push(username.to_string());
    }
}

/// Lookups succeed against an empty table but every write fails.
pub(super) struct ReadOnlyStore;

impl IdentityStore for ReadOnlyStore {
    fn create(&self, _user: NewUser) -> Result<UserRecord, StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }

    fn update_status(&self, _username: &str, _status: UserStatus) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }

    fn update_password(&self, _username: &str, _password: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }

    fn update_email(&self, _username: &str, _email: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }

    fn update_external_id(&self, _username: &str, _id: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }

    fn get_by_username(
        &self,
        _username: &str,
        _case_sensitive: bool,
    ) -> Result<Option<UserRecord>, StoreError> {
        Ok(None)
    }

    fn count_by_email(&self, _email: &str) -> Result<usize, StoreError> {
        Ok(0)
    }

    fn list_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        Ok(Vec::new())
    }
}

pub(super) struct FixedScorer(pub(super) ScoreCard);

#[async_trait]
impl ScoringService for FixedScorer {
    async fn score(&self, _answers: &Value, _language: &str) -> Result<ScoreCard, ScoringError> {
        Ok(self.0.clone())
    }
}

pub(super) struct OfflineScorer;

#[async_trait]
impl ScoringService for OfflineScorer {
    async fn score(&self, _answers: &Value, _language: &str) -> Result<ScoreCard, ScoringError> {
        Err(ScoringError::Unavailable("connection refused".into()))
    }
}

pub(super) struct Harness<S> {
    pub(super) pipeline: RegistrationPipeline<S>,
    pub(super) store: Arc<S>,
    pub(super) submissions: Arc<QuestionnaireSubmissionStore>,
    pub(super) captcha: Arc<MemoryCaptcha>,
    pub(super) codes: Arc<MemoryCodes>,
}

pub(super) fn harness_with<S>(
    config: RegistrationConfig,
    store: Arc<S>,
    binding: FixedBinding,
) -> Harness<S>
where
    S: IdentityStore + 'static,
{
    let submissions = Arc::new(QuestionnaireSubmissionStore::new());
    let captcha = Arc::new(MemoryCaptcha::default());
    let codes = Arc::new(MemoryCodes::default());
    let pipeline = RegistrationPipeline::new(
        &config,
        store.clone(),
        submissions.clone(),
        RegistrationCollaborators {
            captcha: captcha.clone(),
            email_codes: codes.clone(),
            binding: Arc::new(binding),
        },
    )
    .expect("default patterns compile");

    Harness {
        pipeline,
        store,
        submissions,
        captcha,
        codes,
    }
}

pub(super) fn harness(config: RegistrationConfig) -> Harness<InMemoryIdentityStore> {
    harness_with(
        config,
        Arc::new(InMemoryIdentityStore::new()),
        FixedBinding::default(),
    )
}

pub(super) fn form(username: &str, email: &str) -> RegistrationForm {
    RegistrationForm {
        email: email.to_string(),
        code: "424242".to_string(),
        username: username.to_string(),
        ..RegistrationForm::default()
    }
}

pub(super) fn seed_user(store: &InMemoryIdentityStore, username: &str, email: &str) {
    store
        .create(NewUser {
            username: username.to_string(),
            email: email.to_string(),
            status: UserStatus::Approved,
            password: None,
            questionnaire: None,
        })
        .expect("seed user");
}

pub(super) fn answers() -> Value {
    json!({ "1": "survival", "2": ["a", "c"], "3": "I like building redstone farms" })
}

pub(super) fn details() -> Vec<QuestionDetail> {
    vec![
        QuestionDetail {
            question_id: 1,
            question_type: "single_choice".into(),
            score: 10,
            max_score: 10,
            reason: None,
        },
        QuestionDetail {
            question_id: 3,
            question_type: "text".into(),
            score: 6,
            max_score: 10,
            reason: Some("brief but sincere".into()),
        },
    ]
}

pub(super) fn submission_record(
    passed: bool,
    manual_review_required: bool,
    scoring_service_unavailable: bool,
    submitted_at: DateTime<Utc>,
) -> QuestionnaireSubmissionRecord {
    QuestionnaireSubmissionRecord {
        passed,
        score: if passed { 80 } else { 30 },
        pass_score: 60,
        details: details(),
        manual_review_required,
        scoring_service_unavailable,
        answers: answers(),
        submitted_at,
        expires_at: submitted_at + SUBMISSION_TTL,
    }
}

/// Parks a record and returns the payload a client would echo back for it.
pub(super) fn park_submission(
    submissions: &QuestionnaireSubmissionStore,
    token: &str,
    record: QuestionnaireSubmissionRecord,
) -> QuestionnairePayload {
    let payload = QuestionnairePayload {
        token: Some(token.to_string()),
        submitted_at: record.submitted_at.timestamp_millis(),
        expires_at: record.expires_at.timestamp_millis(),
        answers: Some(record.answers.clone()),
    };
    submissions.put(token, record);
    payload
}
