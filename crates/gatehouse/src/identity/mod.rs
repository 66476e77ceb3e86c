//! Identity records and the stores that hold them.

pub mod domain;
pub mod file;
pub mod memory;
pub mod repository;

pub use domain::{IdentityChange, NewUser, QuestionnaireAudit, UserRecord, UserStatus};
pub use file::FileIdentityStore;
pub use memory::InMemoryIdentityStore;
pub use repository::{IdentityStore, StoreError};
