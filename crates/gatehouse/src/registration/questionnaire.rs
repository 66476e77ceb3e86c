use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::domain::{keys, Rejection};
use super::submissions::{
    QuestionDetail, QuestionnaireSubmissionRecord, QuestionnaireSubmissionStore, SUBMISSION_TTL,
};

/// Result returned by a questionnaire scorer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreCard {
    pub score: i32,
    pub pass_score: i32,
    pub passed: bool,
    pub manual_review_required: bool,
    pub details: Vec<QuestionDetail>,
}

/// Scores questionnaire answers, possibly by calling out to a remote grader.
#[async_trait]
pub trait ScoringService: Send + Sync {
    async fn score(&self, answers: &Value, language: &str) -> Result<ScoreCard, ScoringError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("scoring service unavailable: {0}")]
    Unavailable(String),
}

/// Handed back to the client after scoring; carries the token redeemed at registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionnaireTicket {
    pub token: String,
    pub score: i32,
    pub pass_score: i32,
    pub passed: bool,
    pub manual_review_required: bool,
    pub scoring_service_unavailable: bool,
    pub submitted_at: i64,
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<QuestionDetail>,
}

/// Scores submitted answers and parks the result in the submission store.
pub struct QuestionnaireIntake {
    scorer: Arc<dyn ScoringService>,
    submissions: Arc<QuestionnaireSubmissionStore>,
}

impl QuestionnaireIntake {
    pub fn new(
        scorer: Arc<dyn ScoringService>,
        submissions: Arc<QuestionnaireSubmissionStore>,
    ) -> Self {
        Self {
            scorer,
            submissions,
        }
    }

    pub async fn submit(
        &self,
        answers: Value,
        language: &str,
    ) -> Result<QuestionnaireTicket, Rejection> {
        self.submit_at(answers, language, Utc::now()).await
    }

    pub async fn submit_at(
        &self,
        answers: Value,
        language: &str,
        now: DateTime<Utc>,
    ) -> Result<QuestionnaireTicket, Rejection> {
        if !has_answers(&answers) {
            return Err(Rejection::new(keys::QUESTIONNAIRE_REQUIRED));
        }

        let (card, scoring_service_unavailable) = match self.scorer.score(&answers, language).await
        {
            Ok(card) => (card, false),
            Err(ScoringError::Unavailable(reason)) => {
                warn!(%reason, "questionnaire scoring unavailable; routing to manual review");
                (
                    ScoreCard {
                        score: 0,
                        pass_score: 0,
                        passed: false,
                        manual_review_required: true,
                        details: Vec::new(),
                    },
                    true,
                )
            }
        };

        let token = Uuid::new_v4().to_string();
        let record = QuestionnaireSubmissionRecord {
            passed: card.passed,
            score: card.score,
            pass_score: card.pass_score,
            details: card.details.clone(),
            manual_review_required: card.manual_review_required,
            scoring_service_unavailable,
            answers,
            submitted_at: now,
            expires_at: now + SUBMISSION_TTL,
        };
        let ticket = QuestionnaireTicket {
            token: token.clone(),
            score: card.score,
            pass_score: card.pass_score,
            passed: card.passed,
            manual_review_required: card.manual_review_required,
            scoring_service_unavailable,
            submitted_at: record.submitted_at.timestamp_millis(),
            expires_at: record.expires_at.timestamp_millis(),
            details: card.details,
        };

        self.submissions.put(token, record);
        debug!(
            score = ticket.score,
            passed = ticket.passed,
            manual_review = ticket.manual_review_required,
            "questionnaire submission stored"
        );
        Ok(ticket)
    }
}

fn has_answers(answers: &Value) -> bool {
    matches!(answers, Value::Object(map) if !map.is_empty())
}

/// Condenses free-text question details into a one-line note for reviewers.
pub fn review_summary(details: &[QuestionDetail]) -> Option<String> {
    let parts: Vec<String> = details
        .iter()
        .filter(|detail| detail.question_type.eq_ignore_ascii_case("text"))
        .map(|detail| {
            let reason = detail
                .reason
                .as_deref()
                .map(str::trim)
                .filter(|reason| !reason.is_empty())
                .unwrap_or("N/A");
            format!(
                "Q{}({}/{}): {}",
                detail.question_id, detail.score, detail.max_score, reason
            )
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}
