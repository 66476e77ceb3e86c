use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::external::{ExternalCredentialProfile, ExternalCredentialStore, ExternalStoreError};

const LOOPBACK: &str = "127.0.0.1";
const DEFAULT_WORLD: &str = "world";

/// Column names of the legacy authentication table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyColumns {
    pub name: String,
    pub real_name: String,
    pub password: String,
    pub email: String,
    pub register_date: String,
    pub last_login: String,
    pub ip: String,
    pub register_ip: String,
    pub logged: String,
    pub has_session: String,
    pub x: String,
    pub y: String,
    pub z: String,
    pub world: String,
    pub yaw: String,
    pub pitch: String,
}

impl Default for LegacyColumns {
    fn default() -> Self {
        Self {
            name: "username".into(),
            real_name: "realname".into(),
            password: "password".into(),
            email: "email".into(),
            register_date: "regdate".into(),
            last_login: "lastlogin".into(),
            ip: "ip".into(),
            register_ip: "regip".into(),
            logged: "isLogged".into(),
            has_session: "hasSession".into(),
            x: "x".into(),
            y: "y".into(),
            z: "z".into(),
            world: "world".into(),
            yaw: "yaw".into(),
            pitch: "pitch".into(),
        }
    }
}

impl LegacyColumns {
    fn all(&self) -> [&str; 16] {
        [
            &self.name,
            &self.real_name,
            &self.password,
            &self.email,
            &self.register_date,
            &self.last_login,
            &self.ip,
            &self.register_ip,
            &self.logged,
            &self.has_session,
            &self.x,
            &self.y,
            &self.z,
            &self.world,
            &self.yaw,
            &self.pitch,
        ]
    }
}

/// Prepared SQL for one table layout.
#[derive(Debug)]
struct Statements {
    create_table: String,
    list: String,
    exists: String,
    insert: String,
    refresh: String,
    update_password: String,
    update_email: String,
}

impl Statements {
    fn build(table: &str, c: &LegacyColumns) -> Self {
        Self {
            create_table: format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    {name} VARCHAR(255) NOT NULL UNIQUE,
                    {real_name} VARCHAR(255) NOT NULL DEFAULT '',
                    {password} VARCHAR(255) NOT NULL DEFAULT '',
                    {email} VARCHAR(255),
                    {register_date} BIGINT NOT NULL DEFAULT 0,
                    {last_login} BIGINT,
                    {ip} VARCHAR(40),
                    {register_ip} VARCHAR(40),
                    {logged} SMALLINT NOT NULL DEFAULT 0,
                    {has_session} SMALLINT NOT NULL DEFAULT 0,
                    {x} DOUBLE NOT NULL DEFAULT 0,
                    {y} DOUBLE NOT NULL DEFAULT 0,
                    {z} DOUBLE NOT NULL DEFAULT 0,
                    {world} VARCHAR(255) NOT NULL DEFAULT 'world',
                    {yaw} FLOAT,
                    {pitch} FLOAT
                )",
                name = c.name,
                real_name = c.real_name,
                password = c.password,
                email = c.email,
                register_date = c.register_date,
                last_login = c.last_login,
                ip = c.ip,
                register_ip = c.register_ip,
                logged = c.logged,
                has_session = c.has_session,
                x = c.x,
                y = c.y,
                z = c.z,
                world = c.world,
                yaw = c.yaw,
                pitch = c.pitch,
            ),
            list: format!(
                "SELECT {}, {}, {}, {} FROM {table}",
                c.name, c.real_name, c.password, c.email
            ),
            exists: format!(
                "SELECT {name} FROM {table} WHERE LOWER({name}) = LOWER(?1)",
                name = c.name
            ),
            insert: format!(
                "INSERT INTO {table} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?5, 0, 0, 0, 0, 0, ?6, 0, 0, '')",
                c.name,
                c.real_name,
                c.password,
                c.register_date,
                c.last_login,
                c.ip,
                c.register_ip,
                c.logged,
                c.has_session,
                c.x,
                c.y,
                c.z,
                c.world,
                c.yaw,
                c.pitch,
                c.email,
            ),
            refresh: format!(
                "UPDATE {table} SET {} = ?1, {} = ?2, {} = ?3, {} = ?4, {} = ?4, {} = 0, {} = 0
                 WHERE LOWER({name}) = LOWER(?5)",
                c.password,
                c.real_name,
                c.last_login,
                c.ip,
                c.register_ip,
                c.logged,
                c.has_session,
                name = c.name,
            ),
            update_password: format!(
                "UPDATE {table} SET {} = ?1 WHERE LOWER({name}) = LOWER(?2)",
                c.password,
                name = c.name
            ),
            update_email: format!(
                "UPDATE {table} SET {} = ?1 WHERE LOWER({name}) = LOWER(?2)",
                c.email,
                name = c.name
            ),
        }
    }
}

fn validate_identifier(value: &str) -> Result<(), ExternalStoreError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ExternalStoreError::InvalidIdentifier(value.to_string()))
    }
}

/// Legacy authentication table in a SQLite database.
///
/// Usernames are stored lowercase with the display spelling in the real-name column. All
/// queries run on the blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    conn: Arc<Mutex<Connection>>,
    statements: Arc<Statements>,
}

impl SqliteCredentialStore {
    pub fn open(path: impl AsRef<Path>, table: &str) -> Result<Self, ExternalStoreError> {
        let conn = Connection::open(path.as_ref())
            .map_err(|err| ExternalStoreError::Unavailable(err.to_string()))?;
        Self::with_connection(conn, table, LegacyColumns::default())
    }

    pub fn with_connection(
        conn: Connection,
        table: &str,
        columns: LegacyColumns,
    ) -> Result<Self, ExternalStoreError> {
        validate_identifier(table)?;
        for column in columns.all() {
            validate_identifier(column)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            statements: Arc::new(Statements::build(table, &columns)),
        })
    }

    /// Creates the table with the legacy layout when it does not exist yet.
    pub async fn ensure_table(&self) -> Result<(), ExternalStoreError> {
        self.blocking(|conn, sql| conn.execute_batch(&sql.create_table))
            .await
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, ExternalStoreError>
    where
        F: FnOnce(&Connection, &Statements) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let statements = Arc::clone(&self.statements);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| ExternalStoreError::Unavailable(format!("mutex poisoned: {e}")))?;
            op(&guard, &statements).map_err(|e| ExternalStoreError::Backend(e.to_string()))
        })
        .await
        .map_err(|e| ExternalStoreError::Unavailable(format!("spawn_blocking failed: {e}")))?
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[async_trait]
impl ExternalCredentialStore for SqliteCredentialStore {
    async fn list_profiles(&self) -> Result<Vec<ExternalCredentialProfile>, ExternalStoreError> {
        self.blocking(|conn, sql| {
            let mut stmt = conn.prepare(&sql.list)?;
            let rows = stmt.query_map([], |row| {
                let name: String = row.get(0)?;
                let real_name: Option<String> = row.get(1)?;
                Ok(ExternalCredentialProfile {
                    username: non_empty(real_name).unwrap_or(name),
                    password: non_empty(row.get(2)?),
                    email: non_empty(row.get(3)?),
                })
            })?;
            let profiles = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(profiles)
        })
        .await
    }

    async fn upsert(&self, username: &str, password: &str) -> Result<bool, ExternalStoreError> {
        let username = username.to_string();
        let password = password.to_string();
        self.blocking(move |conn, sql| {
            let now = Utc::now().timestamp();
            let exists = conn
                .query_row(&sql.exists, params![username], |row| row.get::<_, String>(0))
                .optional()?
                .is_some();

            let changed = if exists {
                conn.execute(
                    &sql.refresh,
                    params![password, username, now, LOOPBACK, username],
                )?
            } else {
                conn.execute(
                    &sql.insert,
                    params![
                        username.to_lowercase(),
                        username,
                        password,
                        now,
                        LOOPBACK,
                        DEFAULT_WORLD
                    ],
                )?
            };
            Ok(changed > 0)
        })
        .await
    }

    async fn update_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, ExternalStoreError> {
        let username = username.to_string();
        let password = password.to_string();
        self.blocking(move |conn, sql| {
            Ok(conn.execute(&sql.update_password, params![password, username])? > 0)
        })
        .await
    }

    async fn update_email(&self, username: &str, email: &str) -> Result<bool, ExternalStoreError> {
        let username = username.to_string();
        let email = email.to_string();
        self.blocking(move |conn, sql| {
            Ok(conn.execute(&sql.update_email, params![email, username])? > 0)
        })
        .await
    }
}
