//! Bidirectional reconciliation between the identity store and the legacy credential backend.

pub mod engine;
pub mod external;
pub mod sqlite;
pub mod worker;


use crate::identity::StoreError;

pub use engine::{ReconciliationEngine, ReconciliationReport};
pub use external::{
    ExternalCredentialProfile, ExternalCredentialStore, ExternalStoreError,
    InMemoryCredentialStore,
};
pub use sqlite::{LegacyColumns, SqliteCredentialStore};
pub use worker::{spawn_worker, SyncHandle};

/// Error enumeration for aborted reconciliation passes.
#[derive(Debug, thiserror::Error)]
pub enum ReconciliationError {
    #[error("a reconciliation pass is already running")]
    Busy,
    #[error(transparent)]
    Identity(#[from] StoreError),
    #[error("credential backend call '{operation}' failed: {source}")]
    External {
        operation: &'static str,
        #[source]
        source: ExternalStoreError,
    },
    #[error("credential backend call '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
}
