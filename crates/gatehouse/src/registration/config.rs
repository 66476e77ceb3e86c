use serde::{Deserialize, Serialize};

pub const DEFAULT_USERNAME_PATTERN: &str = r"^[a-zA-Z0-9_-]{3,16}$";
pub const DEFAULT_BEDROCK_PREFIX: &str = ".";
pub const DEFAULT_BEDROCK_USERNAME_PATTERN: &str = r"^\.[a-zA-Z0-9_\s]{3,16}$";
pub const DEFAULT_PASSWORD_PATTERN: &str = r"^[a-zA-Z0-9_]{8,26}$";
pub const DEFAULT_MAX_ACCOUNTS_PER_EMAIL: usize = 2;

/// Mail providers accepted when the domain whitelist is enabled without an explicit list.
pub const DEFAULT_EMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "qq.com",
    "163.com",
    "126.com",
    "outlook.com",
    "hotmail.com",
    "yahoo.com",
    "sina.com",
    "aliyun.com",
    "foxmail.com",
    "icloud.com",
    "yeah.net",
    "live.com",
    "mail.com",
    "protonmail.com",
    "zoho.com",
];

/// Policy dials for the registration pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationConfig {
    pub auto_approve: bool,
    pub questionnaire_enabled: bool,
    pub verification: VerificationMethods,
    pub credential: CredentialRules,
    pub email: EmailRules,
    pub username: UsernameRules,
}

/// Which proofs of presence a registrant must supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMethods {
    pub captcha: bool,
    pub email_code: bool,
}

impl VerificationMethods {
    /// The emailed code is checked whenever it is enabled, and as the fallback when captcha is off.
    pub fn requires_email_code(&self) -> bool {
        self.email_code || !self.captcha
    }
}

impl Default for VerificationMethods {
    fn default() -> Self {
        Self {
            captcha: false,
            email_code: true,
        }
    }
}

/// Password requirements imposed by the legacy authentication backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRules {
    pub password_required: bool,
    pub password_pattern: String,
}

impl Default for CredentialRules {
    fn default() -> Self {
        Self {
            password_required: false,
            password_pattern: DEFAULT_PASSWORD_PATTERN.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRules {
    pub alias_limit: bool,
    pub domain_whitelist_enabled: bool,
    pub domain_whitelist: Vec<String>,
    pub max_accounts_per_email: usize,
}

impl Default for EmailRules {
    fn default() -> Self {
        Self {
            alias_limit: false,
            domain_whitelist_enabled: true,
            domain_whitelist: DEFAULT_EMAIL_DOMAINS
                .iter()
                .map(|domain| domain.to_string())
                .collect(),
            max_accounts_per_email: DEFAULT_MAX_ACCOUNTS_PER_EMAIL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameRules {
    pub pattern: String,
    pub case_sensitive: bool,
    /// Present when bedrock-platform accounts are accepted.
    pub bedrock: Option<BedrockUsernames>,
}

impl Default for UsernameRules {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_USERNAME_PATTERN.to_string(),
            case_sensitive: false,
            bedrock: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BedrockUsernames {
    pub prefix: String,
    pub pattern: String,
}

impl Default for BedrockUsernames {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_BEDROCK_PREFIX.to_string(),
            pattern: DEFAULT_BEDROCK_USERNAME_PATTERN.to_string(),
        }
    }
}
