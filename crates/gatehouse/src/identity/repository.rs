use super::domain::{IdentityChange, NewUser, UserRecord, UserStatus};

/// Storage abstraction for identities so the pipeline and reconciliation engine can be
/// exercised in isolation.
///
/// Usernames are unique ignoring case. Each mutation is atomic per record.
pub trait IdentityStore: Send + Sync {
    fn create(&self, user: NewUser) -> Result<UserRecord, StoreError>;
    fn update_status(&self, username: &str, status: UserStatus) -> Result<bool, StoreError>;
    fn update_password(&self, username: &str, password: &str) -> Result<bool, StoreError>;
    fn update_email(&self, username: &str, email: &str) -> Result<bool, StoreError>;
    fn update_external_id(&self, username: &str, external_id: &str) -> Result<bool, StoreError>;
    fn get_by_username(
        &self,
        username: &str,
        case_sensitive: bool,
    ) -> Result<Option<UserRecord>, StoreError>;
    fn count_by_email(&self, email: &str) -> Result<usize, StoreError>;
    fn list_all(&self) -> Result<Vec<UserRecord>, StoreError>;

    /// Apply a set of changes, returning how many took effect.
    ///
    /// Stores that can persist several mutations in one write override this.
    fn apply_batch(&self, changes: Vec<IdentityChange>) -> Result<usize, StoreError> {
        let mut applied = 0;
        for change in changes {
            let changed = match change {
                IdentityChange::Create(user) => self.create(user).map(|_| true)?,
                IdentityChange::Status { username, status } => {
                    self.update_status(&username, status)?
                }
                IdentityChange::Password { username, password } => {
                    self.update_password(&username, &password)?
                }
                IdentityChange::Email { username, email } => {
                    self.update_email(&username, &email)?
                }
            };
            if changed {
                applied += 1;
            }
        }
        Ok(applied)
    }
}

/// Error enumeration for identity store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("identity '{0}' already exists")]
    Conflict(String),
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
    #[error("identity store io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity store document is corrupt: {0}")]
    Corrupt(String),
}
