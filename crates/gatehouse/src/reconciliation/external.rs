use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

/// Credentials as held by the legacy authentication backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalCredentialProfile {
    pub username: String,
    /// Backend-native hash; `None` when the column is empty.
    pub password: Option<String>,
    pub email: Option<String>,
}

impl ExternalCredentialProfile {
    pub fn password_or_empty(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }

    pub fn email_or_empty(&self) -> &str {
        self.email.as_deref().unwrap_or_default()
    }
}

/// Legacy credential backend shared with a separate authentication system.
///
/// Write operations return `Ok(false)` when the backend accepted the call but changed nothing.
#[async_trait]
pub trait ExternalCredentialStore: Send + Sync {
    async fn list_profiles(&self) -> Result<Vec<ExternalCredentialProfile>, ExternalStoreError>;
    async fn upsert(&self, username: &str, password: &str) -> Result<bool, ExternalStoreError>;
    async fn update_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, ExternalStoreError>;
    async fn update_email(&self, username: &str, email: &str) -> Result<bool, ExternalStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExternalStoreError {
    #[error("credential backend unavailable: {0}")]
    Unavailable(String),
    #[error("credential backend query failed: {0}")]
    Backend(String),
    #[error("'{0}' is not a valid table or column name")]
    InvalidIdentifier(String),
}

/// Process-local credential backend used by tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    profiles: Mutex<BTreeMap<String, ExternalCredentialProfile>>,
    writes: AtomicUsize,
    offline: AtomicBool,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: impl IntoIterator<Item = ExternalCredentialProfile>) -> Self {
        let store = Self::default();
        if let Ok(mut map) = store.profiles.lock() {
            for profile in profiles {
                map.insert(profile.username.to_lowercase(), profile);
            }
        }
        store
    }

    /// Number of write calls that changed a profile.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn profile(&self, username: &str) -> Option<ExternalCredentialProfile> {
        self.profiles
            .lock()
            .ok()
            .and_then(|map| map.get(&username.to_lowercase()).cloned())
    }

    fn with_profiles_mut<T>(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, ExternalCredentialProfile>) -> T,
    ) -> Result<T, ExternalStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ExternalStoreError::Unavailable("backend offline".into()));
        }
        let mut map = self
            .profiles
            .lock()
            .map_err(|_| ExternalStoreError::Unavailable("profile lock poisoned".into()))?;
        Ok(apply(&mut map))
    }

    fn record_write(&self, changed: bool) -> bool {
        if changed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        changed
    }
}

#[async_trait]
impl ExternalCredentialStore for InMemoryCredentialStore {
    async fn list_profiles(&self) -> Result<Vec<ExternalCredentialProfile>, ExternalStoreError> {
        self.with_profiles_mut(|map| map.values().cloned().collect())
    }

    async fn upsert(&self, username: &str, password: &str) -> Result<bool, ExternalStoreError> {
        let changed = self.with_profiles_mut(|map| {
            let profile = map
                .entry(username.to_lowercase())
                .or_insert_with(|| ExternalCredentialProfile {
                    username: username.to_string(),
                    password: None,
                    email: None,
                });
            profile.password = Some(password.to_string());
            true
        })?;
        Ok(self.record_write(changed))
    }

    async fn update_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, ExternalStoreError> {
        let changed = self.with_profiles_mut(|map| match map.get_mut(&username.to_lowercase()) {
            Some(profile) => {
                profile.password = Some(password.to_string());
                true
            }
            None => false,
        })?;
        Ok(self.record_write(changed))
    }

    async fn update_email(&self, username: &str, email: &str) -> Result<bool, ExternalStoreError> {
        let changed = self.with_profiles_mut(|map| match map.get_mut(&username.to_lowercase()) {
            Some(profile) => {
                profile.email = Some(email.to_string());
                true
            }
            None => false,
        })?;
        Ok(self.record_write(changed))
    }
}
