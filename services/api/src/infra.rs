use crate::server::Engine;
use async_trait::async_trait;
use gatehouse::config::AppEnvironment;
use gatehouse::registration::{
    keys, CaptchaValidator, EmailCodeValidator, MessageResolver, ScoreCard, ScoringError,
    ScoringService,
};
use metrics_exporter_prometheus::PrometheusHandle;
use rand::distributions::{Alphanumeric, DistString};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const CAPTCHA_LENGTH: usize = 5;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) environment: AppEnvironment,
    pub(crate) captcha: Arc<InMemoryCaptchaStore>,
    pub(crate) email_codes: Arc<InMemoryEmailCodes>,
    pub(crate) reconciliation: Option<Arc<Engine>>,
    pub(crate) admin_token: Option<Arc<str>>,
}

/// Outstanding captcha challenges keyed by token. Answers never leave the server; clients only
/// receive the token.
#[derive(Default)]
pub(crate) struct InMemoryCaptchaStore {
    challenges: Mutex<HashMap<String, String>>,
}

impl InMemoryCaptchaStore {
    pub(crate) fn issue(&self) -> (String, String) {
        let token = Uuid::new_v4().to_string();
        let challenge = Alphanumeric.sample_string(&mut rand::thread_rng(), CAPTCHA_LENGTH);
        if let Ok(mut guard) = self.challenges.lock() {
            guard.insert(token.clone(), challenge.clone());
        }
        (token, challenge)
    }
}

impl CaptchaValidator for InMemoryCaptchaStore {
    fn validate(&self, token: &str, answer: &str) -> bool {
        let Ok(mut guard) = self.challenges.lock() else {
            return false;
        };
        guard
            .remove(token)
            .is_some_and(|expected| expected.eq_ignore_ascii_case(answer.trim()))
    }
}

/// One-time email codes keyed by lowercase address. Delivery belongs to the mailer.
#[derive(Default)]
pub(crate) struct InMemoryEmailCodes {
    codes: Mutex<HashMap<String, String>>,
}

impl InMemoryEmailCodes {
    pub(crate) fn issue(&self, email: &str) -> String {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        if let Ok(mut guard) = self.codes.lock() {
            guard.insert(email.trim().to_lowercase(), code.clone());
        }
        code
    }
}

impl EmailCodeValidator for InMemoryEmailCodes {
    fn check(&self, email: &str, code: &str) -> bool {
        let Ok(mut guard) = self.codes.lock() else {
            return false;
        };
        let key = email.trim().to_lowercase();
        if guard.get(&key).is_some_and(|expected| expected == code.trim()) {
            guard.remove(&key);
            true
        } else {
            false
        }
    }
}

/// Stand-in scorer for deployments without a grading service; every submission goes to review.
pub(crate) struct OfflineScoring;

#[async_trait]
impl ScoringService for OfflineScoring {
    async fn score(&self, _answers: &Value, _language: &str) -> Result<ScoreCard, ScoringError> {
        Err(ScoringError::Unavailable("no scoring service configured".into()))
    }
}

/// English catalog. Unknown keys resolve to themselves.
pub(crate) struct StaticMessages {
    catalog: HashMap<&'static str, &'static str>,
}

impl Default for StaticMessages {
    fn default() -> Self {
        let catalog = HashMap::from([
            (keys::PASSWORD_REQUIRED, "A password is required."),
            (keys::INVALID_PASSWORD, "The password does not meet the requirements."),
            (keys::ALIAS_NOT_ALLOWED, "Email aliases are not allowed."),
            (keys::DOMAIN_NOT_ALLOWED, "This email domain is not allowed."),
            (keys::EMAIL_LIMIT, "Too many accounts use this email address."),
            (keys::INVALID_EMAIL, "The email address is not valid."),
            (keys::INVALID_USERNAME, "A username is required."),
            (keys::USERNAME_EXISTS, "This username is already registered."),
            (keys::USERNAME_PATTERN, "The username contains characters that are not allowed."),
            (
                keys::USERNAME_CASE_CONFLICT,
                "This username is registered with different capitalization.",
            ),
            (keys::QUESTIONNAIRE_REQUIRED, "Please complete the questionnaire."),
            (keys::QUESTIONNAIRE_MISSING, "The questionnaire submission was not found."),
            (keys::QUESTIONNAIRE_EXPIRED, "The questionnaire submission has expired."),
            (keys::QUESTIONNAIRE_INVALID, "The questionnaire submission is not valid."),
            (keys::CAPTCHA_REQUIRED, "Please solve the captcha."),
            (keys::CAPTCHA_INVALID, "The captcha answer is wrong."),
            (keys::WRONG_CODE, "The verification code is wrong."),
            (keys::BINDING_REQUIRED, "Link your Discord account before registering."),
            ("register.failed", "Registration failed. Please try again later."),
            ("register.success", "Registration received and awaiting approval."),
            ("register.success_whitelisted", "Registration complete. You can join now."),
            (
                "register.questionnaire_pending_review",
                "Registration received. Your questionnaire will be reviewed.",
            ),
            (
                "register.questionnaire_scoring_error_pending_review",
                "Registration received. Scoring was unavailable so a reviewer will check your answers.",
            ),
            ("questionnaire.not_enabled", "The questionnaire is not enabled."),
        ]);
        Self { catalog }
    }
}

impl MessageResolver for StaticMessages {
    fn resolve(&self, key: &str, _language: &str) -> String {
        self.catalog
            .get(key)
            .map(|text| text.to_string())
            .unwrap_or_else(|| key.to_string())
    }
}
