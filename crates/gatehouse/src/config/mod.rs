use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::registration::config::{
    BedrockUsernames, CredentialRules, EmailRules, RegistrationConfig, UsernameRules,
    VerificationMethods, DEFAULT_BEDROCK_PREFIX, DEFAULT_BEDROCK_USERNAME_PATTERN,
    DEFAULT_EMAIL_DOMAINS, DEFAULT_MAX_ACCOUNTS_PER_EMAIL, DEFAULT_PASSWORD_PATTERN,
    DEFAULT_USERNAME_PATTERN,
};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub storage: StorageConfig,
    pub registration: RegistrationConfig,
    pub legacy_auth: LegacyAuthConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let admin_token = env::var("ADMIN_API_TOKEN")
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let include_targets = env_bool("APP_LOG_TARGETS", false)?;

        let storage = StorageConfig {
            users_path: PathBuf::from(
                env::var("STORAGE_PATH").unwrap_or_else(|_| "data/users.json".to_string()),
            ),
        };

        let legacy_auth = LegacyAuthConfig {
            enabled: env_bool("LEGACY_AUTH_ENABLED", false)?,
            database_path: PathBuf::from(
                env::var("LEGACY_AUTH_DATABASE").unwrap_or_else(|_| "authme.db".to_string()),
            ),
            table: env::var("LEGACY_AUTH_TABLE").unwrap_or_else(|_| "authme".to_string()),
            sync_interval: Duration::from_secs(env_number("LEGACY_SYNC_INTERVAL_SECS", 30u64)?),
            call_timeout: Duration::from_millis(env_number("LEGACY_CALL_TIMEOUT_MS", 5_000u64)?),
        };

        let registration = load_registration(legacy_auth.enabled)?;

        Ok(Self {
            environment,
            server: ServerConfig {
                host,
                port,
                admin_token,
            },
            telemetry: TelemetryConfig {
                log_level,
                include_targets,
            },
            storage,
            registration,
            legacy_auth,
        })
    }
}

fn load_registration(legacy_auth_enabled: bool) -> Result<RegistrationConfig, ConfigError> {
    let verification = parse_auth_methods(
        &env::var("AUTH_METHODS").unwrap_or_else(|_| "email".to_string()),
    )?;

    let credential = CredentialRules {
        password_required: legacy_auth_enabled && env_bool("LEGACY_AUTH_REQUIRE_PASSWORD", false)?,
        password_pattern: env::var("LEGACY_AUTH_PASSWORD_REGEX")
            .unwrap_or_else(|_| DEFAULT_PASSWORD_PATTERN.to_string()),
    };

    let mut domain_whitelist = env_list("EMAIL_DOMAIN_WHITELIST");
    if domain_whitelist.is_empty() {
        domain_whitelist = DEFAULT_EMAIL_DOMAINS
            .iter()
            .map(|domain| domain.to_string())
            .collect();
    }

    let email = EmailRules {
        alias_limit: env_bool("EMAIL_ALIAS_LIMIT", false)?,
        domain_whitelist_enabled: env_bool("EMAIL_DOMAIN_WHITELIST_ENABLED", true)?,
        domain_whitelist,
        max_accounts_per_email: env_number(
            "MAX_ACCOUNTS_PER_EMAIL",
            DEFAULT_MAX_ACCOUNTS_PER_EMAIL,
        )?,
    };

    let bedrock = if env_bool("BEDROCK_ENABLED", false)? {
        Some(BedrockUsernames {
            prefix: env::var("BEDROCK_PREFIX")
                .unwrap_or_else(|_| DEFAULT_BEDROCK_PREFIX.to_string()),
            pattern: env::var("BEDROCK_USERNAME_REGEX")
                .unwrap_or_else(|_| DEFAULT_BEDROCK_USERNAME_PATTERN.to_string()),
        })
    } else {
        None
    };

    let username = UsernameRules {
        pattern: env::var("USERNAME_REGEX").unwrap_or_else(|_| DEFAULT_USERNAME_PATTERN.to_string()),
        case_sensitive: env_bool("USERNAME_CASE_SENSITIVE", false)?,
        bedrock,
    };

    Ok(RegistrationConfig {
        auto_approve: env_bool("REGISTER_AUTO_APPROVE", false)?,
        questionnaire_enabled: env_bool("QUESTIONNAIRE_ENABLED", false)?,
        verification,
        credential,
        email,
        username,
    })
}

fn parse_auth_methods(raw: &str) -> Result<VerificationMethods, ConfigError> {
    let mut methods = VerificationMethods {
        captcha: false,
        email_code: false,
    };

    for method in raw.split(',').map(str::trim).filter(|m| !m.is_empty()) {
        match method.to_ascii_lowercase().as_str() {
            "captcha" => methods.captcha = true,
            "email" => methods.email_code = true,
            _ => return Err(ConfigError::UnknownAuthMethod(method.to_string())),
        }
    }

    Ok(methods)
}

fn env_bool(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool { key, value }),
        },
        Err(_) => Ok(default),
    }
}

fn env_number<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        Err(_) => Ok(default),
    }
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|raw| {
            raw.split(',')
                .map(|item| item.trim().to_ascii_lowercase())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token for the admin endpoints. Unset means they refuse every caller.
    pub admin_token: Option<String>,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub include_targets: bool,
}

/// Location of the file-backed identity store.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub users_path: PathBuf,
}

/// Connection and scheduling settings for the legacy credential store.
#[derive(Debug, Clone)]
pub struct LegacyAuthConfig {
    pub enabled: bool,
    pub database_path: PathBuf,
    pub table: String,
    /// Zero disables the periodic pass; on-demand passes still run.
    pub sync_interval: Duration,
    pub call_timeout: Duration,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidBool { key: &'static str, value: String },
    InvalidNumber { key: &'static str, value: String },
    UnknownAuthMethod(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidBool { key, value } => {
                write!(f, "{key} must be true or false (found '{value}')")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a non-negative integer (found '{value}')")
            }
            ConfigError::UnknownAuthMethod(method) => {
                write!(f, "AUTH_METHODS contains unknown method '{method}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

/// Serialises every test in the crate that reads or mutates process environment variables.
#[cfg(test)]
pub(crate) fn env_guard() -> &'static std::sync::Mutex<()> {
    static GUARD: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
    GUARD.get_or_init(|| std::sync::Mutex::new(()))
}
