use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::domain::{IdentityChange, NewUser, QuestionnaireAudit, UserRecord, UserStatus};
use super::memory::{lock_table, UserTable};
use super::repository::{IdentityStore, StoreError};

pub const SCHEMA_VERSION: u32 = 1;

/// JSON-file identity store.
///
/// Every mutation writes a sibling temp file, flushes it to disk and renames it over the
/// document, so a crash mid-write leaves the previous document intact. Documents written before the schema was
/// versioned (a bare map of user objects) are upgraded once on open.
#[derive(Debug)]
pub struct FileIdentityStore {
    path: PathBuf,
    table: Mutex<UserTable>,
}

#[derive(Deserialize)]
struct UserDocument {
    schema_version: u32,
    #[serde(default)]
    users: Vec<UserRecord>,
}

#[derive(Serialize)]
struct UserDocumentRef<'a> {
    schema_version: u32,
    users: Vec<&'a UserRecord>,
}

impl FileIdentityStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let (table, upgraded) = load_table(&path)?;
        let store = Self {
            path,
            table: Mutex::new(table),
        };

        if upgraded {
            let table = lock_table(&store.table)?;
            store.persist(&table)?;
            info!(
                path = %store.path.display(),
                users = table.records().count(),
                schema_version = SCHEMA_VERSION,
                "upgraded legacy identity document"
            );
            drop(table);
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, table: &UserTable) -> Result<(), StoreError> {
        let directory = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(directory)?;

        let document = UserDocumentRef {
            schema_version: SCHEMA_VERSION,
            users: table.records().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;

        // NamedTempFile removes itself if any step before `persist` fails.
        let mut temp = NamedTempFile::new_in(directory)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|err| StoreError::Io(err.error))?;
        Ok(())
    }

    /// Runs `mutate` against a copy of the table and swaps it in only once the write lands.
    fn write<T, F>(&self, mutate: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut UserTable) -> Result<(T, bool), StoreError>,
    {
        let mut table = lock_table(&self.table)?;
        let mut next = table.clone();
        let (result, dirty) = mutate(&mut next)?;
        if dirty {
            self.persist(&next)?;
            *table = next;
        }
        Ok(result)
    }
}

impl IdentityStore for FileIdentityStore {
    fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        self.write(|table| table.create(user).map(|record| (record, true)))
    }

    fn update_status(&self, username: &str, status: UserStatus) -> Result<bool, StoreError> {
        self.write(|table| {
            let changed = table.update(username, |record| record.status = status);
            Ok((changed, changed))
        })
    }

    fn update_password(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        self.write(|table| {
            let changed =
                table.update(username, |record| record.password = Some(password.to_string()));
            Ok((changed, changed))
        })
    }

    fn update_email(&self, username: &str, email: &str) -> Result<bool, StoreError> {
        self.write(|table| {
            let changed = table.update(username, |record| record.email = email.to_string());
            Ok((changed, changed))
        })
    }

    fn update_external_id(&self, username: &str, external_id: &str) -> Result<bool, StoreError> {
        self.write(|table| {
            let changed = table.update(username, |record| {
                record.external_id = Some(external_id.to_string())
            });
            Ok((changed, changed))
        })
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
        let count = changes.len();
        let applied = self.write(|table| {
            let applied = changes
                .into_iter()
                .map(|change| table.apply(change))
                .filter(|applied| *applied)
                .count();
            Ok((applied, applied > 0))
        })?;
        debug!(requested = count, applied, "identity batch persisted");
        Ok(applied)
    }
}

fn load_table(path: &Path) -> Result<(UserTable, bool), StoreError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok((UserTable::default(), false))
        }
        Err(err) => return Err(StoreError::Io(err)),
    };

    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok((UserTable::default(), false));
    }

    let value: Value =
        serde_json::from_slice(&raw).map_err(|err| StoreError::Corrupt(err.to_string()))?;

    let versioned = matches!(&value, Value::Object(map) if map.contains_key("schema_version"));

    match value {
        Value::Object(_) if versioned => {
            let document: UserDocument = serde_json::from_value(value)
                .map_err(|err| StoreError::Corrupt(err.to_string()))?;
            if document.schema_version > SCHEMA_VERSION {
                return Err(StoreError::Corrupt(format!(
                    "unsupported schema version {}",
                    document.schema_version
                )));
            }
            Ok((UserTable::from_records(document.users), false))
        }
        Value::Object(_) => {
            let legacy: BTreeMap<String, LegacyUser> = serde_json::from_value(value)
                .map_err(|err| StoreError::Corrupt(err.to_string()))?;
            let records = legacy
                .into_iter()
                .map(|(key, user)| user.upgrade(&key));
            Ok((UserTable::from_records(records), true))
        }
        _ => Err(StoreError::Corrupt(
            "expected a JSON object at the document root".into(),
        )),
    }
}

/// User entry from the unversioned document layout.
///
/// Field names were written in camelCase, with snake_case spellings from older releases.
#[derive(Debug, Deserialize)]
struct LegacyUser {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, rename = "regTime", alias = "reg_time")]
    reg_time: Option<Value>,
    #[serde(default, rename = "discordId", alias = "discord_id")]
    discord_id: Option<Value>,
    #[serde(default, rename = "questionnaireScore", alias = "questionnaire_score")]
    questionnaire_score: Option<f64>,
    #[serde(default, rename = "questionnairePassed", alias = "questionnaire_passed")]
    questionnaire_passed: Option<bool>,
    #[serde(
        default,
        rename = "questionnaireReviewSummary",
        alias = "questionnaire_review_summary"
    )]
    questionnaire_review_summary: Option<String>,
    #[serde(default, rename = "questionnaireScoredAt", alias = "questionnaire_scored_at")]
    questionnaire_scored_at: Option<Value>,
}

impl LegacyUser {
    fn upgrade(self, key: &str) -> UserRecord {
        let now = Utc::now();
        let questionnaire = match (self.questionnaire_score, self.questionnaire_passed) {
            (Some(score), Some(passed)) => Some(QuestionnaireAudit {
                score: score.round() as i32,
                passed,
                summary: self.questionnaire_review_summary,
                scored_at: self
                    .questionnaire_scored_at
                    .as_ref()
                    .and_then(millis_from_value)
                    .unwrap_or(now),
            }),
            _ => None,
        };

        UserRecord {
            username: self
                .username
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| key.to_string()),
            email: self.email.unwrap_or_default(),
            status: self
                .status
                .as_deref()
                .and_then(UserStatus::parse)
                .unwrap_or(UserStatus::Pending),
            password: self.password.filter(|pw| !pw.is_empty()),
            registered_at: self
                .reg_time
                .as_ref()
                .and_then(millis_from_value)
                .unwrap_or(now),
            external_id: self.discord_id.and_then(|id| match id {
                Value::String(id) if !id.is_empty() => Some(id),
                Value::Number(id) => Some(id.to_string()),
                _ => None,
            }),
            questionnaire,
        }
    }
}

fn millis_from_value(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|f| f as i64))?,
        Value::String(raw) => raw.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: format!("{}@gmail.com", username.to_lowercase()),
            status: UserStatus::Pending,
            password: None,
            questionnaire: None,
        }
    }

    #[test]
    fn missing_file_opens_empty_and_writes_versioned_document() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("users.json");
        let store = FileIdentityStore::open(&path).expect("open");
        assert!(store.list_all().expect("list").is_empty());

        store.create(new_user("Alex")).expect("create");

        let written: Value =
            serde_json::from_slice(&fs::read(&path).expect("read")).expect("json");
        assert_eq!(written["schema_version"], json!(SCHEMA_VERSION));
        assert_eq!(written["users"][0]["username"], json!("Alex"));
        let leftovers: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.path() != path)
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[test]
    fn mutations_survive_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("users.json");
        {
            let store = FileIdentityStore::open(&path).expect("open");
            store.create(new_user("Alex")).expect("create");
            assert!(store
                .update_status("alex", UserStatus::Approved)
                .expect("status"));
            assert!(store.update_external_id("ALEX", "1234").expect("external id"));
            assert!(!store.update_email("nobody", "x@gmail.com").expect("email"));
        }

        let reopened = FileIdentityStore::open(&path).expect("reopen");
        let record = reopened
            .get_by_username("Alex", true)
            .expect("lookup")
            .expect("present");
        assert_eq!(record.status, UserStatus::Approved);
        assert_eq!(record.external_id.as_deref(), Some("1234"));
    }

    #[test]
    fn upgrades_legacy_map_once() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("users.json");
        let legacy = json!({
            "steve": {
                "username": "Steve",
                "email": "steve@gmail.com",
                "status": "approved",
                "password": "$SHA$0011223344556677$abc",
                "regTime": 1_700_000_000_000i64,
                "discord_id": "998877",
                "questionnaire_score": 85.0,
                "questionnaire_passed": true,
                "questionnaireReviewSummary": "Q3(8/10): thoughtful"
            },
            "bob": {
                "email": "bob@gmail.com",
                "status": "mystery"
            }
        });
        fs::write(&path, serde_json::to_vec(&legacy).expect("encode")).expect("seed");

        let store = FileIdentityStore::open(&path).expect("open legacy");
        let steve = store
            .get_by_username("steve", false)
            .expect("lookup")
            .expect("present");
        assert_eq!(steve.username, "Steve");
        assert_eq!(steve.status, UserStatus::Approved);
        assert_eq!(steve.external_id.as_deref(), Some("998877"));
        assert_eq!(steve.registered_at.timestamp_millis(), 1_700_000_000_000);
        let audit = steve.questionnaire.expect("audit carried over");
        assert_eq!(audit.score, 85);
        assert_eq!(audit.summary.as_deref(), Some("Q3(8/10): thoughtful"));

        let bob = store
            .get_by_username("bob", true)
            .expect("lookup")
            .expect("key used as username");
        assert_eq!(bob.status, UserStatus::Pending);
        assert!(bob.password.is_none());

        let rewritten: Value =
            serde_json::from_slice(&fs::read(&path).expect("read")).expect("json");
        assert_eq!(rewritten["schema_version"], json!(SCHEMA_VERSION));
    }

    #[test]
    fn rejects_future_schema_versions() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("users.json");
        fs::write(&path, br#"{"schema_version": 99, "users": []}"#).expect("seed");
        assert!(matches!(
            FileIdentityStore::open(&path),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn batch_writes_once_and_reports_applied_count() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("users.json");
        let store = FileIdentityStore::open(&path).expect("open");
        store.create(new_user("alpha")).expect("create");

        let applied = store
            .apply_batch(vec![
                IdentityChange::Create(new_user("beta")),
                IdentityChange::Password {
                    username: "alpha".into(),
                    password: "$SHA$aa$bb".into(),
                },
            ])
            .expect("batch");
        assert_eq!(applied, 2);

        let reopened = FileIdentityStore::open(&path).expect("reopen");
        assert_eq!(reopened.list_all().expect("list").len(), 2);
    }
}
