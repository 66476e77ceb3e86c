use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::collaborators::{
    ApprovalHook, CaptchaValidator, EmailCodeValidator, ExternalBindingService,
};
use super::config::RegistrationConfig;
use super::domain::{keys, RegistrationForm, RegistrationRequest, Rejection};
use super::outcome::{self, OutcomeInputs, RegistrationOutcome};
use super::policy::{PolicyConfigError, PolicyGuard};
use super::questionnaire::review_summary;
use super::submissions::{QuestionnaireSubmissionRecord, QuestionnaireSubmissionStore};
use crate::credentials::hash_password;
use crate::identity::{IdentityStore, NewUser, QuestionnaireAudit, StoreError, UserStatus};

/// Services the pipeline consults but does not own.
#[derive(Clone)]
pub struct RegistrationCollaborators {
    pub captcha: Arc<dyn CaptchaValidator>,
    pub email_codes: Arc<dyn EmailCodeValidator>,
    pub binding: Arc<dyn ExternalBindingService>,
}

/// Reported back for a registration that cleared every stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationReceipt {
    pub request_id: Uuid,
    pub username: String,
    pub outcome: RegistrationOutcome,
    pub message_key: &'static str,
    /// Status written to the identity store; `None` when nothing was persisted.
    pub status: Option<UserStatus>,
}

/// Error raised by the registration pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("{0}")]
    Rejected(Rejection),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<Rejection> for RegistrationError {
    fn from(value: Rejection) -> Self {
        Self::Rejected(value)
    }
}

/// Ordered registration stage chain ending in persistence.
///
/// Stages short-circuit on the first rejection. Tokens consumed by an earlier stage stay
/// consumed when a later stage rejects.
pub struct RegistrationPipeline<S> {
    guard: PolicyGuard,
    store: Arc<S>,
    submissions: Arc<QuestionnaireSubmissionStore>,
    collaborators: RegistrationCollaborators,
    approval_hook: Option<Arc<dyn ApprovalHook>>,
}

impl<S> RegistrationPipeline<S>
where
    S: IdentityStore + 'static,
{
    pub fn new(
        config: &RegistrationConfig,
        store: Arc<S>,
        submissions: Arc<QuestionnaireSubmissionStore>,
        collaborators: RegistrationCollaborators,
    ) -> Result<Self, PolicyConfigError> {
        Ok(Self {
            guard: PolicyGuard::from_config(config)?,
            store,
            submissions,
            collaborators,
            approval_hook: None,
        })
    }

    pub fn with_approval_hook(mut self, hook: Arc<dyn ApprovalHook>) -> Self {
        self.approval_hook = Some(hook);
        self
    }

    pub fn config(&self) -> &RegistrationConfig {
        self.guard.config()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Normalizes a wire form into the request the stages operate on.
    pub fn prepare(&self, form: RegistrationForm) -> RegistrationRequest {
        let normalized_username = self.guard.normalize_username(&form.username, form.platform);
        RegistrationRequest {
            email: form.email.trim().to_lowercase(),
            code: form.code.trim().to_string(),
            username: form.username.trim().to_string(),
            normalized_username,
            password: form.password,
            captcha_token: form.captcha_token,
            captcha_answer: form.captcha_answer,
            language: form
                .language
                .map(|language| language.trim().to_string())
                .filter(|language| !language.is_empty())
                .unwrap_or_else(|| "en".to_string()),
            platform: form.platform,
            questionnaire: form.questionnaire,
        }
    }

    pub fn register(
        &self,
        request: &RegistrationRequest,
    ) -> Result<RegistrationReceipt, RegistrationError> {
        self.register_at(request, Utc::now())
    }

    pub fn register_at(
        &self,
        request: &RegistrationRequest,
        now: DateTime<Utc>,
    ) -> Result<RegistrationReceipt, RegistrationError> {
        let request_id = Uuid::new_v4();

        self.stage(request_id, "credential_policy", || {
            self.guard.check_credentials(request).map_err(Into::into)
        })?;
        self.stage(request_id, "email_policy", || {
            self.guard.check_email(self.store.as_ref(), request)
        })?;
        self.stage(request_id, "username_policy", || {
            self.guard.check_username(self.store.as_ref(), request)
        })?;
        let submission = self.stage(request_id, "questionnaire", || {
            self.redeem_questionnaire(request, now).map_err(Into::into)
        })?;
        self.stage(request_id, "verification", || {
            self.check_verification(request).map_err(Into::into)
        })?;
        self.stage(request_id, "external_binding", || {
            self.check_binding(request).map_err(Into::into)
        })?;

        Ok(self.persist(request_id, request, submission.as_ref()))
    }

    fn stage<T, F>(
        &self,
        request_id: Uuid,
        stage: &'static str,
        run: F,
    ) -> Result<T, RegistrationError>
    where
        F: FnOnce() -> Result<T, RegistrationError>,
    {
        debug!(%request_id, stage, "registration stage");
        run().inspect_err(|err| match err {
            RegistrationError::Rejected(rejection) => {
                debug!(%request_id, stage, key = rejection.message_key, "registration rejected")
            }
            RegistrationError::Store(source) => {
                warn!(%request_id, stage, error = %source, "identity store lookup failed")
            }
        })
    }

    fn redeem_questionnaire(
        &self,
        request: &RegistrationRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<QuestionnaireSubmissionRecord>, Rejection> {
        if !self.config().questionnaire_enabled {
            return Ok(None);
        }

        let payload = request
            .questionnaire
            .as_ref()
            .ok_or_else(|| Rejection::new(keys::QUESTIONNAIRE_REQUIRED))?;
        let (token, answers) = payload
            .redeemable()
            .ok_or_else(|| Rejection::new(keys::QUESTIONNAIRE_REQUIRED))?;

        let record = self
            .submissions
            .remove(token)
            .ok_or_else(|| Rejection::new(keys::QUESTIONNAIRE_MISSING))?;

        let now_millis = now.timestamp_millis();
        if record.is_expired_at(now)
            || now_millis > payload.expires_at
            || payload.submitted_at <= 0
            || payload.expires_at <= payload.submitted_at
        {
            return Err(Rejection::new(keys::QUESTIONNAIRE_EXPIRED));
        }

        if record.answers != *answers
            || record.submitted_at.timestamp_millis() != payload.submitted_at
            || record.expires_at.timestamp_millis() != payload.expires_at
        {
            return Err(Rejection::new(keys::QUESTIONNAIRE_INVALID));
        }

        if !record.passed && !record.manual_review_required {
            return Err(Rejection::new(keys::QUESTIONNAIRE_REQUIRED));
        }

        Ok(Some(record))
    }

    fn check_verification(&self, request: &RegistrationRequest) -> Result<(), Rejection> {
        let methods = self.config().verification;

        if methods.captcha {
            let token = non_blank(request.captcha_token.as_deref());
            let answer = non_blank(request.captcha_answer.as_deref());
            let (token, answer) = token
                .zip(answer)
                .ok_or_else(|| Rejection::new(keys::CAPTCHA_REQUIRED))?;
            if !self.collaborators.captcha.validate(token, answer) {
                return Err(Rejection::new(keys::CAPTCHA_INVALID));
            }
        }

        if methods.requires_email_code()
            && !self
                .collaborators
                .email_codes
                .check(&request.email, &request.code)
        {
            return Err(Rejection::new(keys::WRONG_CODE));
        }
        Ok(())
    }

    fn check_binding(&self, request: &RegistrationRequest) -> Result<(), Rejection> {
        let binding = &self.collaborators.binding;
        if binding.is_required() && !binding.is_linked(&request.normalized_username) {
            return Err(Rejection::new(keys::BINDING_REQUIRED).with_field("discord_required", true));
        }
        Ok(())
    }

    fn persist(
        &self,
        request_id: Uuid,
        request: &RegistrationRequest,
        submission: Option<&QuestionnaireSubmissionRecord>,
    ) -> RegistrationReceipt {
        debug!(%request_id, stage = "persist", "registration stage");

        let inputs = OutcomeInputs {
            registration_persisted: true,
            manual_review_required: submission.is_some_and(|s| s.manual_review_required),
            questionnaire_passed: submission.is_some_and(|s| s.passed),
            scoring_unavailable: submission.is_some_and(|s| s.scoring_service_unavailable),
            auto_approve_enabled: self.config().auto_approve,
        };
        let planned = outcome::resolve(inputs);
        let status = outcome::resolve_status(planned);

        let user = NewUser {
            username: request.normalized_username.clone(),
            email: request.email.clone(),
            status,
            password: request
                .password
                .as_deref()
                .filter(|password| !password.is_empty())
                .map(hash_password),
            questionnaire: submission.map(|record| QuestionnaireAudit {
                score: record.score,
                passed: record.passed,
                summary: review_summary(&record.details),
                scored_at: record.submitted_at,
            }),
        };

        let persisted = match self.store.create(user) {
            Ok(_) => true,
            Err(err) => {
                warn!(
                    %request_id,
                    username = %request.normalized_username,
                    error = %err,
                    "registration could not be persisted"
                );
                false
            }
        };

        let reported = outcome::resolve(inputs.persisted(persisted));
        if persisted {
            info!(
                %request_id,
                username = %request.normalized_username,
                outcome = ?reported,
                status = status.label(),
                "registration accepted"
            );
        }

        if reported == RegistrationOutcome::SuccessWhitelisted {
            if let Some(hook) = &self.approval_hook {
                hook.approved(&request.normalized_username);
            }
        }

        RegistrationReceipt {
            request_id,
            username: request.normalized_username.clone(),
            outcome: reported,
            message_key: reported.message_key(),
            status: persisted.then_some(status),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
