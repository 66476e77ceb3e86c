//! Registration gating: policy checks, questionnaire redemption, verification and
//! persistence of new identities.

pub mod collaborators;
pub mod config;
pub mod domain;
pub mod outcome;
pub(crate) mod pipeline;
pub(crate) mod policy;
pub mod questionnaire;
pub mod router;
pub mod submissions;

#[cfg(test)]
mod tests;

pub use collaborators::{
    ApprovalHook, CaptchaValidator, EmailCodeValidator, ExternalBindingService, MessageResolver,
    NoBindingRequired,
};
pub use config::RegistrationConfig;
pub use domain::{
    keys, Platform, QuestionnairePayload, RegistrationForm, RegistrationRequest, Rejection,
};
pub use outcome::{resolve, resolve_status, OutcomeInputs, RegistrationOutcome};
pub use pipeline::{
    RegistrationCollaborators, RegistrationError, RegistrationPipeline, RegistrationReceipt,
};
pub use policy::{PolicyConfigError, PolicyGuard};
pub use questionnaire::{
    review_summary, QuestionnaireIntake, QuestionnaireTicket, ScoreCard, ScoringError,
    ScoringService,
};
pub use router::{registration_router, RegistrationApi};
pub use submissions::{
    QuestionDetail, QuestionnaireSubmissionRecord, QuestionnaireSubmissionStore, SUBMISSION_TTL,
};
