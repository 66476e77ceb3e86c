//! Registration gating for restricted communities.
//!
//! A registration attempt runs through [`registration::RegistrationPipeline`], which checks
//! credential, email and username policy, redeems a scored questionnaire submission, verifies
//! the caller and enforces an optional external-account binding before an identity record is
//! written. [`reconciliation::ReconciliationEngine`] keeps approved identities aligned with the
//! legacy credential store used by a separate authentication system.

pub mod config;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod reconciliation;
pub mod registration;
pub mod telemetry;
