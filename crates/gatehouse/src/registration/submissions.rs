use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// How long a scored questionnaire stays redeemable.
pub const SUBMISSION_TTL: Duration = Duration::minutes(10);

/// Per-question scoring breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDetail {
    pub question_id: i64,
    #[serde(rename = "type")]
    pub question_type: String,
    pub score: i32,
    pub max_score: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Scored questionnaire awaiting redemption by a registration.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionnaireSubmissionRecord {
    pub passed: bool,
    pub score: i32,
    pub pass_score: i32,
    pub details: Vec<QuestionDetail>,
    pub manual_review_required: bool,
    pub scoring_service_unavailable: bool,
    pub answers: Value,
    pub submitted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl QuestionnaireSubmissionRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Concurrent, single-use, TTL-bound token store for scored questionnaires.
///
/// `take` removes the entry whether or not it is still valid, so a token can be redeemed at
/// most once.
#[derive(Debug, Default)]
pub struct QuestionnaireSubmissionStore {
    entries: Mutex<HashMap<String, QuestionnaireSubmissionRecord>>,
}

impl QuestionnaireSubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, token: impl Into<String>, record: QuestionnaireSubmissionRecord) {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.insert(token.into(), record);
            }
            Err(poisoned) => {
                warn!("questionnaire submission lock poisoned; recovering");
                poisoned.into_inner().insert(token.into(), record);
            }
        }
    }

    /// Atomically removes and returns the record if it has not expired.
    pub fn take(&self, token: &str) -> Option<QuestionnaireSubmissionRecord> {
        self.take_at(token, Utc::now())
    }

    pub fn take_at(&self, token: &str, now: DateTime<Utc>) -> Option<QuestionnaireSubmissionRecord> {
        self.remove(token).filter(|record| {
            let live = !record.is_expired_at(now);
            if !live {
                debug!("discarded expired questionnaire submission on redemption");
            }
            live
        })
    }

    /// Atomically removes and returns the record, expired or not, so callers can tell an
    /// unknown token apart from a stale one.
    pub fn remove(&self, token: &str) -> Option<QuestionnaireSubmissionRecord> {
        match self.entries.lock() {
            Ok(mut entries) => entries.remove(token),
            Err(poisoned) => poisoned.into_inner().remove(token),
        }
    }

    /// Drops entries nobody redeemed before expiry, returning how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|_, record| !record.is_expired_at(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
