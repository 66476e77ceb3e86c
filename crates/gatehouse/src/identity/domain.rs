use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a registered identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Pending,
    Approved,
    Rejected,
    Banned,
}

impl UserStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Banned => "banned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "banned" => Some(Self::Banned),
            _ => None,
        }
    }
}

/// Questionnaire result retained for reviewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionnaireAudit {
    pub score: i32,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub scored_at: DateTime<Utc>,
}

/// Persisted identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub email: String,
    pub status: UserStatus,
    /// Stored in the salted hash format; `None` when registration did not collect one.
    #[serde(default)]
    pub password: Option<String>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub questionnaire: Option<QuestionnaireAudit>,
}

impl UserRecord {
    pub fn is_approved(&self) -> bool {
        self.status == UserStatus::Approved
    }

    pub fn password_or_empty(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }
}

/// Fields supplied when creating an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub status: UserStatus,
    pub password: Option<String>,
    pub questionnaire: Option<QuestionnaireAudit>,
}

impl NewUser {
    pub fn into_record(self, registered_at: DateTime<Utc>) -> UserRecord {
        UserRecord {
            username: self.username,
            email: self.email,
            status: self.status,
            password: self.password,
            registered_at,
            external_id: None,
            questionnaire: self.questionnaire,
        }
    }
}

/// One mutation within a batched write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityChange {
    Create(NewUser),
    Status { username: String, status: UserStatus },
    Password { username: String, password: String },
    Email { username: String, email: String },
}

impl IdentityChange {
    pub fn username(&self) -> &str {
        match self {
            Self::Create(user) => &user.username,
            Self::Status { username, .. }
            | Self::Password { username, .. }
            | Self::Email { username, .. } => username,
        }
    }
}
