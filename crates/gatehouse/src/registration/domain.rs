use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client edition the registrant plays on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Java,
    Bedrock,
}

/// Questionnaire proof attached to a registration: the ticket issued at submission time
/// together with the answers that were scored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionnairePayload {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub submitted_at: i64,
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub answers: Option<Value>,
}

impl QuestionnairePayload {
    /// Token and a non-empty answer object are both required for redemption.
    pub fn redeemable(&self) -> Option<(&str, &Value)> {
        let token = self.token.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        let answers = self.answers.as_ref().filter(|answers| match answers {
            Value::Object(map) => !map.is_empty(),
            Value::Null => false,
            _ => true,
        })?;
        Some((token, answers))
    }
}

/// Registration body as received over the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub captcha_token: Option<String>,
    #[serde(default)]
    pub captcha_answer: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub questionnaire: Option<QuestionnairePayload>,
}

/// Normalized, immutable registration attempt handed to the pipeline stages.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationRequest {
    pub email: String,
    pub code: String,
    pub username: String,
    pub normalized_username: String,
    pub password: Option<String>,
    pub captcha_token: Option<String>,
    pub captcha_answer: Option<String>,
    pub language: String,
    pub platform: Platform,
    pub questionnaire: Option<QuestionnairePayload>,
}

/// Expected refusal of a registration attempt, carrying a message key for the caller's catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub message_key: &'static str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
}

impl Rejection {
    pub fn new(message_key: &'static str) -> Self {
        Self {
            message_key,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "registration rejected: {}", self.message_key)
    }
}

pub mod keys {
    pub const PASSWORD_REQUIRED: &str = "register.password_required";
    pub const INVALID_PASSWORD: &str = "register.invalid_password";
    pub const ALIAS_NOT_ALLOWED: &str = "register.alias_not_allowed";
    pub const DOMAIN_NOT_ALLOWED: &str = "register.domain_not_allowed";
    pub const EMAIL_LIMIT: &str = "register.email_limit";
    pub const INVALID_EMAIL: &str = "register.invalid_email";
    pub const INVALID_USERNAME: &str = "register.invalid_username";
    pub const USERNAME_EXISTS: &str = "register.username_exists";
    pub const USERNAME_PATTERN: &str = "username.invalid";
    pub const USERNAME_CASE_CONFLICT: &str = "username.case_conflict";
    pub const QUESTIONNAIRE_REQUIRED: &str = "register.questionnaire_required";
    pub const QUESTIONNAIRE_MISSING: &str = "register.questionnaire_missing";
    pub const QUESTIONNAIRE_EXPIRED: &str = "register.questionnaire_expired";
    pub const QUESTIONNAIRE_INVALID: &str = "register.questionnaire_invalid";
    pub const CAPTCHA_REQUIRED: &str = "captcha.required";
    pub const CAPTCHA_INVALID: &str = "captcha.invalid";
    pub const WRONG_CODE: &str = "verify.wrong_code";
    pub const BINDING_REQUIRED: &str = "discord.required";
}
