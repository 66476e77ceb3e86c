use std::sync::LazyLock;

use regex::Regex;

use super::config::RegistrationConfig;
use super::domain::{keys, Platform, RegistrationRequest, Rejection};
use super::pipeline::RegistrationError;
use crate::identity::IdentityStore;

static EMAIL_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w.+-]+@[\w.-]+\.[a-zA-Z]{2,}$").expect("EMAIL_SYNTAX is a valid regex pattern")
});

/// Raised when configured patterns fail to compile.
#[derive(Debug, thiserror::Error)]
pub enum PolicyConfigError {
    #[error("{name} is not a valid regular expression: {source}")]
    InvalidPattern {
        name: &'static str,
        #[source]
        source: regex::Error,
    },
}

fn compile(name: &'static str, pattern: &str) -> Result<Regex, PolicyConfigError> {
    Regex::new(pattern).map_err(|source| PolicyConfigError::InvalidPattern { name, source })
}

#[derive(Debug, Clone)]
struct BedrockRule {
    prefix: String,
    pattern: Regex,
}

/// Credential, email and username policy compiled from configuration.
#[derive(Debug, Clone)]
pub struct PolicyGuard {
    config: RegistrationConfig,
    password: Regex,
    username: Regex,
    bedrock: Option<BedrockRule>,
}

impl PolicyGuard {
    pub fn from_config(config: &RegistrationConfig) -> Result<Self, PolicyConfigError> {
        let password = compile("password pattern", &config.credential.password_pattern)?;
        let username = compile("username pattern", &config.username.pattern)?;
        let bedrock = match &config.username.bedrock {
            Some(rules) => Some(BedrockRule {
                prefix: rules.prefix.clone(),
                pattern: compile("bedrock username pattern", &rules.pattern)?,
            }),
            None => None,
        };

        Ok(Self {
            config: config.clone(),
            password,
            username,
            bedrock,
        })
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    /// Trims the name and, for bedrock registrants, applies the configured prefix.
    pub fn normalize_username(&self, username: &str, platform: Platform) -> String {
        let trimmed = username.trim();
        match (&self.bedrock, platform) {
            (Some(rule), Platform::Bedrock)
                if !trimmed.is_empty() && !trimmed.starts_with(&rule.prefix) =>
            {
                format!("{}{}", rule.prefix, trimmed)
            }
            _ => trimmed.to_string(),
        }
    }

    fn username_pattern(&self, platform: Platform) -> &Regex {
        match (&self.bedrock, platform) {
            (Some(rule), Platform::Bedrock) => &rule.pattern,
            _ => &self.username,
        }
    }

    pub fn check_credentials(&self, request: &RegistrationRequest) -> Result<(), Rejection> {
        if !self.config.credential.password_required {
            return Ok(());
        }

        let password = request
            .password
            .as_deref()
            .filter(|password| !password.trim().is_empty())
            .ok_or_else(|| Rejection::new(keys::PASSWORD_REQUIRED))?;

        if !self.password.is_match(password) {
            return Err(Rejection::new(keys::INVALID_PASSWORD)
                .with_field("regex", self.password.as_str()));
        }
        Ok(())
    }

    pub fn check_email<S>(
        &self,
        store: &S,
        request: &RegistrationRequest,
    ) -> Result<(), RegistrationError>
    where
        S: IdentityStore + ?Sized,
    {
        let rules = &self.config.email;
        let email = request.email.as_str();

        if rules.alias_limit && email.contains('+') {
            return Err(Rejection::new(keys::ALIAS_NOT_ALLOWED).into());
        }

        if rules.domain_whitelist_enabled {
            let domain = email.split_once('@').map(|(_, domain)| domain).unwrap_or("");
            if !rules
                .domain_whitelist
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(domain))
            {
                return Err(Rejection::new(keys::DOMAIN_NOT_ALLOWED).into());
            }
        }

        if store.count_by_email(email)? >= rules.max_accounts_per_email {
            return Err(Rejection::new(keys::EMAIL_LIMIT).into());
        }

        if !EMAIL_SYNTAX.is_match(email) {
            return Err(Rejection::new(keys::INVALID_EMAIL).into());
        }
        Ok(())
    }

    pub fn check_username<S>(
        &self,
        store: &S,
        request: &RegistrationRequest,
    ) -> Result<(), RegistrationError>
    where
        S: IdentityStore + ?Sized,
    {
        let username = request.normalized_username.as_str();
        if username.is_empty() {
            return Err(Rejection::new(keys::INVALID_USERNAME).into());
        }

        let case_sensitive = self.config.username.case_sensitive;
        // Stores key names ignoring case, so a case variant blocks the name in either mode.
        let existing = store.get_by_username(username, false)?;
        if let Some(record) = &existing {
            if case_sensitive || record.username == username {
                return Err(Rejection::new(keys::USERNAME_EXISTS).into());
            }
        }

        let pattern = self.username_pattern(request.platform);
        if !pattern.is_match(username) {
            return Err(Rejection::new(keys::USERNAME_PATTERN)
                .with_field("regex", pattern.as_str())
                .into());
        }

        if existing.is_some() {
            return Err(Rejection::new(keys::USERNAME_CASE_CONFLICT).into());
        }
        Ok(())
    }
}
