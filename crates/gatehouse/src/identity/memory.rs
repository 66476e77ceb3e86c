use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::domain::{IdentityChange, NewUser, UserRecord, UserStatus};
use super::repository::{IdentityStore, StoreError};

/// Identity records keyed by lowercase username.
#[derive(Debug, Default, Clone)]
pub(crate) struct UserTable {
    users: BTreeMap<String, UserRecord>,
}

impl UserTable {
    pub(crate) fn from_records(records: impl IntoIterator<Item = UserRecord>) -> Self {
        let users = records
            .into_iter()
            .map(|record| (record.username.to_lowercase(), record))
            .collect();
        Self { users }
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &UserRecord> {
        self.users.values()
    }

    pub(crate) fn create(&mut self, user: NewUser) -> Result<UserRecord, StoreError> {
        let key = user.username.to_lowercase();
        if self.users.contains_key(&key) {
            return Err(StoreError::Conflict(user.username));
        }
        let record = user.into_record(Utc::now());
        self.users.insert(key, record.clone());
        Ok(record)
    }

    pub(crate) fn get(&self, username: &str, case_sensitive: bool) -> Option<&UserRecord> {
        self.users
            .get(&username.to_lowercase())
            .filter(|record| !case_sensitive || record.username == username)
    }

    pub(crate) fn count_by_email(&self, email: &str) -> usize {
        self.users
            .values()
            .filter(|record| record.email.eq_ignore_ascii_case(email))
            .count()
    }

    pub(crate) fn update<F>(&mut self, username: &str, apply: F) -> bool
    where
        F: FnOnce(&mut UserRecord),
    {
        match self.users.get_mut(&username.to_lowercase()) {
            Some(record) => {
                apply(record);
                true
            }
            None => false,
        }
    }

    /// Applies a change; `Create` for an existing name is skipped rather than failing the batch.
    pub(crate) fn apply(&mut self, change: IdentityChange) -> bool {
        match change {
            IdentityChange::Create(user) => self.create(user).is_ok(),
            IdentityChange::Status { username, status } => {
                self.update(&username, |record| record.status = status)
            }
            IdentityChange::Password { username, password } => {
                self.update(&username, |record| record.password = Some(password))
            }
            IdentityChange::Email { username, email } => {
                self.update(&username, |record| record.email = email)
            }
        }
    }
}

pub(crate) fn lock_table<'a>(
    table: &'a Mutex<UserTable>,
) -> Result<MutexGuard<'a, UserTable>, StoreError> {
    table
        .lock()
        .map_err(|_| StoreError::Unavailable("identity table lock poisoned".into()))
}

/// Process-local identity store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    table: Mutex<UserTable>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = UserRecord>) -> Self {
        Self {
            table: Mutex::new(UserTable::from_records(records)),
        }
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        lock_table(&self.table)?.create(user)
    }

    fn update_status(&self, username: &str, status: UserStatus) -> Result<bool, StoreError> {
        Ok(lock_table(&self.table)?.update(username, |record| record.status = status))
    }

    fn update_password(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        Ok(lock_table(&self.table)?
            .update(username, |record| record.password = Some(password.to_string())))
    }

    fn update_email(&self, username: &str, email: &str) -> Result<bool, StoreError> {
        Ok(lock_table(&self.table)?.update(username, |record| record.email = email.to_string()))
    }

    fn update_external_id(&self, username: &str, external_id: &str) -> Result<bool, StoreError> {
        Ok(lock_table(&self.table)?
            .update(username, |record| record.external_id = Some(external_id.to_string())))
    }

    fn get_by_username(
        &self,
        username: &str,
        case_sensitive: bool,
    ) -> Result<Option<UserRecord>, StoreError> {
        Ok(lock_table(&self.table)?
            .get(username, case_sensitive)
            .cloned())
    }

    fn count_by_email(&self, email: &str) -> Result<usize, StoreError> {
        Ok(lock_table(&self.table)?.count_by_email(email))
    }

    fn list_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        Ok(lock_table(&self.table)?.records().cloned().collect())
    }

    fn apply_batch(&self, changes: Vec<IdentityChange>) -> Result<usize, StoreError> {
        let mut table = lock_table(&self.table)?;
        Ok(changes
            .into_iter()
            .map(|change| table.apply(change))
            .filter(|applied| *applied)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            status: UserStatus::Pending,
            password: None,
            questionnaire: None,
        }
    }

    #[test]
    fn usernames_are_unique_ignoring_case() {
        let store = InMemoryIdentityStore::new();
        store.create(new_user("Steve", "steve@gmail.com")).expect("first insert");
        let err = store
            .create(new_user("steve", "other@gmail.com"))
            .expect_err("case variant conflicts");
        assert!(matches!(err, StoreError::Conflict(name) if name == "steve"));
    }

    #[test]
    fn lookup_honours_case_sensitivity() {
        let store = InMemoryIdentityStore::new();
        store.create(new_user("Steve", "steve@gmail.com")).expect("insert");

        assert!(store.get_by_username("steve", false).expect("lookup").is_some());
        assert!(store.get_by_username("steve", true).expect("lookup").is_none());
        assert!(store.get_by_username("Steve", true).expect("lookup").is_some());
    }

    #[test]
    fn counts_email_ignoring_case() {
        let store = InMemoryIdentityStore::new();
        store.create(new_user("alpha", "Shared@gmail.com")).expect("insert");
        store.create(new_user("beta", "shared@gmail.com")).expect("insert");
        assert_eq!(store.count_by_email("shared@gmail.com").expect("count"), 2);
    }

    #[test]
    fn batch_skips_missing_records_and_duplicate_creates() {
        let store = InMemoryIdentityStore::new();
        store.create(new_user("alpha", "a@gmail.com")).expect("insert");

        let applied = store
            .apply_batch(vec![
                IdentityChange::Status {
                    username: "ALPHA".into(),
                    status: UserStatus::Approved,
                },
                IdentityChange::Email {
                    username: "ghost".into(),
                    email: "ghost@gmail.com".into(),
                },
                IdentityChange::Create(new_user("alpha", "dup@gmail.com")),
            ])
            .expect("batch");

        assert_eq!(applied, 1);
        let record = store
            .get_by_username("alpha", true)
            .expect("lookup")
            .expect("present");
        assert_eq!(record.status, UserStatus::Approved);
        assert_eq!(record.email, "a@gmail.com");
    }
}
