use serde::Serialize;

use crate::identity::UserStatus;

/// Result reported to a registrant. Derived on demand and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationOutcome {
    Failed,
    SuccessPending,
    SuccessWhitelisted,
    QuestionnairePendingReview,
    QuestionnaireScoringErrorPendingReview,
}

impl RegistrationOutcome {
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::Failed => "register.failed",
            Self::SuccessPending => "register.success",
            Self::SuccessWhitelisted => "register.success_whitelisted",
            Self::QuestionnairePendingReview => "register.questionnaire_pending_review",
            Self::QuestionnaireScoringErrorPendingReview => {
                "register.questionnaire_scoring_error_pending_review"
            }
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

/// Facts the resolver decides from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeInputs {
    pub registration_persisted: bool,
    pub manual_review_required: bool,
    pub questionnaire_passed: bool,
    pub scoring_unavailable: bool,
    pub auto_approve_enabled: bool,
}

impl OutcomeInputs {
    pub fn persisted(self, registration_persisted: bool) -> Self {
        Self {
            registration_persisted,
            ..self
        }
    }
}

pub fn resolve(inputs: OutcomeInputs) -> RegistrationOutcome {
    if !inputs.registration_persisted {
        return RegistrationOutcome::Failed;
    }

    if inputs.manual_review_required {
        if !inputs.questionnaire_passed && inputs.scoring_unavailable {
            return RegistrationOutcome::QuestionnaireScoringErrorPendingReview;
        }
        return RegistrationOutcome::QuestionnairePendingReview;
    }

    if inputs.auto_approve_enabled {
        RegistrationOutcome::SuccessWhitelisted
    } else {
        RegistrationOutcome::SuccessPending
    }
}

/// Status written for an outcome: only an auto-approved registration starts out approved.
pub fn resolve_status(outcome: RegistrationOutcome) -> UserStatus {
    match outcome {
        RegistrationOutcome::SuccessWhitelisted => UserStatus::Approved,
        _ => UserStatus::Pending,
    }
}
