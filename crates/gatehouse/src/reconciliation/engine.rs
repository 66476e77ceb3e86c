use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::external::{ExternalCredentialProfile, ExternalCredentialStore, ExternalStoreError};
use super::ReconciliationError;
use crate::credentials::hash_password;
use crate::identity::{IdentityChange, IdentityStore, NewUser, StoreError, UserRecord, UserStatus};

/// Counters describing one completed reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub external_created: usize,
    pub external_passwords: usize,
    pub external_emails: usize,
    pub internal_created: usize,
    pub internal_promoted: usize,
    pub internal_passwords: usize,
    pub internal_emails: usize,
}

impl ReconciliationReport {
    fn started(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration_ms: 0,
            external_created: 0,
            external_passwords: 0,
            external_emails: 0,
            internal_created: 0,
            internal_promoted: 0,
            internal_passwords: 0,
            internal_emails: 0,
        }
    }

    pub fn external_writes(&self) -> usize {
        self.external_created + self.external_passwords + self.external_emails
    }

    pub fn internal_writes(&self) -> usize {
        self.internal_created
            + self.internal_promoted
            + self.internal_passwords
            + self.internal_emails
    }

    pub fn total_writes(&self) -> usize {
        self.external_writes() + self.internal_writes()
    }

    fn count_internal(&mut self, change: &IdentityChange) {
        match change {
            IdentityChange::Create(_) => self.internal_created += 1,
            IdentityChange::Status { .. } => self.internal_promoted += 1,
            IdentityChange::Password { .. } => self.internal_passwords += 1,
            IdentityChange::Email { .. } => self.internal_emails += 1,
        }
    }
}

/// Bidirectional sync between the identity store and the legacy credential backend.
///
/// Passes are serialized. Nothing is ever deleted on either side and a non-empty value is
/// never overwritten with an empty one. The internal email only fills an empty external one;
/// when both are non-empty and differ, the external email is pulled into the identity store.
pub struct ReconciliationEngine<S> {
    identities: Arc<S>,
    external: Arc<dyn ExternalCredentialStore>,
    call_timeout: Duration,
    pass_lock: tokio::sync::Mutex<()>,
}

impl<S> ReconciliationEngine<S>
where
    S: IdentityStore + 'static,
{
    pub fn new(
        identities: Arc<S>,
        external: Arc<dyn ExternalCredentialStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            identities,
            external,
            call_timeout,
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run a pass, waiting for any pass already in flight to finish first.
    pub async fn sync(&self) -> Result<ReconciliationReport, ReconciliationError> {
        let _guard = self.pass_lock.lock().await;
        self.run_pass().await
    }

    /// Run a pass unless one is already in flight.
    pub async fn try_sync(&self) -> Result<ReconciliationReport, ReconciliationError> {
        let _guard = self
            .pass_lock
            .try_lock()
            .map_err(|_| ReconciliationError::Busy)?;
        self.run_pass().await
    }

    async fn run_pass(&self) -> Result<ReconciliationReport, ReconciliationError> {
        let clock = Instant::now();
        let mut report = ReconciliationReport::started(Utc::now());

        match self.reconcile(&mut report).await {
            Ok(()) => {
                report.duration_ms =
                    u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
                info!(
                    external_created = report.external_created,
                    external_passwords = report.external_passwords,
                    external_emails = report.external_emails,
                    internal_created = report.internal_created,
                    internal_promoted = report.internal_promoted,
                    internal_passwords = report.internal_passwords,
                    internal_emails = report.internal_emails,
                    duration_ms = report.duration_ms,
                    "reconciliation pass complete"
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    error = %err,
                    external_writes = report.external_writes(),
                    "reconciliation pass aborted"
                );
                Err(err)
            }
        }
    }

    async fn reconcile(
        &self,
        report: &mut ReconciliationReport,
    ) -> Result<(), ReconciliationError> {
        let users = self.load_identities().await?;
        let mut profiles: HashMap<String, ExternalCredentialProfile> = self
            .external_call("list_profiles", self.external.list_profiles())
            .await?
            .into_iter()
            .map(|profile| (profile.username.to_lowercase(), profile))
            .collect();

        let users: HashMap<String, UserRecord> = users
            .into_iter()
            .map(|user| (user.username.to_lowercase(), user))
            .collect();

        let mut ordered: Vec<&String> = users.keys().collect();
        ordered.sort();
        for key in ordered {
            let user = &users[key];
            if !effectively_approved(user, profiles.contains_key(key)) {
                continue;
            }
            match profiles.get_mut(key) {
                Some(profile) => self.refresh_external(user, profile, report).await?,
                None => {
                    if let Some(created) = self.create_external(user, report).await? {
                        profiles.insert(key.clone(), created);
                    }
                }
            }
        }

        let changes = plan_internal_changes(&users, &profiles);
        if changes.is_empty() {
            return Ok(());
        }
        for change in &changes {
            report.count_internal(change);
        }
        self.apply_internal(changes).await?;
        Ok(())
    }

    /// Returns the profile as written so the pull phase sees the same hash.
    async fn create_external(
        &self,
        user: &UserRecord,
        report: &mut ReconciliationReport,
    ) -> Result<Option<ExternalCredentialProfile>, ReconciliationError> {
        let password = user.password_or_empty();
        if password.is_empty() {
            return Ok(None);
        }

        let stored = hash_password(password);
        let created = self
            .external_write(
                "upsert",
                &user.username,
                self.external.upsert(&user.username, &stored),
            )
            .await?;
        if !created {
            return Ok(None);
        }
        report.external_created += 1;

        let mut profile = ExternalCredentialProfile {
            username: user.username.clone(),
            password: Some(stored),
            email: None,
        };
        if !user.email.is_empty()
            && self
                .external_write(
                    "update_email",
                    &user.username,
                    self.external.update_email(&user.username, &user.email),
                )
                .await?
        {
            report.external_emails += 1;
            profile.email = Some(user.email.clone());
        }
        Ok(Some(profile))
    }

    /// Fills empty external fields from the identity record.
    async fn refresh_external(
        &self,
        user: &UserRecord,
        profile: &mut ExternalCredentialProfile,
        report: &mut ReconciliationReport,
    ) -> Result<(), ReconciliationError> {
        let password = user.password_or_empty();
        if profile.password_or_empty().is_empty() && !password.is_empty() {
            let stored = hash_password(password);
            if self
                .external_write(
                    "update_password",
                    &user.username,
                    self.external.update_password(&profile.username, &stored),
                )
                .await?
            {
                report.external_passwords += 1;
                profile.password = Some(stored);
            }
        }

        if profile.email_or_empty().is_empty()
            && !user.email.is_empty()
            && self
                .external_write(
                    "update_email",
                    &user.username,
                    self.external.update_email(&profile.username, &user.email),
                )
                .await?
        {
            report.external_emails += 1;
            profile.email = Some(user.email.clone());
        }
        Ok(())
    }

    async fn load_identities(&self) -> Result<Vec<UserRecord>, ReconciliationError> {
        let store = Arc::clone(&self.identities);
        let users = tokio::task::spawn_blocking(move || store.list_all())
            .await
            .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {e}")))??;
        Ok(users)
    }

    async fn apply_internal(
        &self,
        changes: Vec<IdentityChange>,
    ) -> Result<usize, ReconciliationError> {
        let store = Arc::clone(&self.identities);
        let applied = tokio::task::spawn_blocking(move || store.apply_batch(changes))
            .await
            .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {e}")))??;
        Ok(applied)
    }

    async fn external_call<T, F>(
        &self,
        operation: &'static str,
        call: F,
    ) -> Result<T, ReconciliationError>
    where
        F: Future<Output = Result<T, ExternalStoreError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(ReconciliationError::External { operation, source }),
            Err(_) => Err(ReconciliationError::Timeout {
                operation,
                timeout_ms: u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn external_write<F>(
        &self,
        operation: &'static str,
        username: &str,
        call: F,
    ) -> Result<bool, ReconciliationError>
    where
        F: Future<Output = Result<bool, ExternalStoreError>>,
    {
        let changed = self.external_call(operation, call).await?;
        if !changed {
            warn!(operation, username, "credential backend reported no change");
        }
        Ok(changed)
    }
}

/// Approved users, plus matched users who are not banned and will be promoted this pass.
fn effectively_approved(user: &UserRecord, matched: bool) -> bool {
    user.is_approved() || (matched && user.status != UserStatus::Banned)
}

fn plan_internal_changes(
    users: &HashMap<String, UserRecord>,
    profiles: &HashMap<String, ExternalCredentialProfile>,
) -> Vec<IdentityChange> {
    let mut keys: Vec<&String> = profiles.keys().collect();
    keys.sort();

    let mut changes = Vec::new();
    for key in keys {
        let profile = &profiles[key];
        let Some(user) = users.get(key) else {
            changes.push(IdentityChange::Create(NewUser {
                username: profile.username.clone(),
                email: profile.email_or_empty().to_string(),
                status: UserStatus::Approved,
                password: profile.password.clone(),
                questionnaire: None,
            }));
            continue;
        };

        if !effectively_approved(user, true) {
            continue;
        }
        if !user.is_approved() {
            changes.push(IdentityChange::Status {
                username: user.username.clone(),
                status: UserStatus::Approved,
            });
        }

        let password = profile.password_or_empty();
        if !password.is_empty() && password != user.password_or_empty() {
            changes.push(IdentityChange::Password {
                username: user.username.clone(),
                password: password.to_string(),
            });
        }

        let email = profile.email_or_empty();
        if !email.is_empty() && !email.eq_ignore_ascii_case(&user.email) {
            changes.push(IdentityChange::Email {
                username: user.username.clone(),
                email: email.to_string(),
            });
        }
    }
    changes
}
