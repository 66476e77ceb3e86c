//! End-to-end scenarios through the public facade: a registrant is gated by the pipeline,
//! persisted to the file store and reconciled into the legacy credential table.

mod common {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use gatehouse::identity::FileIdentityStore;
    use gatehouse::reconciliation::{ReconciliationEngine, SqliteCredentialStore};
    use gatehouse::registration::{
        CaptchaValidator, EmailCodeValidator, NoBindingRequired, QuestionnaireSubmissionStore,
        RegistrationCollaborators, RegistrationConfig, RegistrationForm, RegistrationPipeline,
    };

    pub(super) struct NoCaptcha;

    impl CaptchaValidator for NoCaptcha {
        fn validate(&self, _token: &str, _answer: &str) -> bool {
            false
        }
    }

    #[derive(Default)]
    pub(super) struct Codes {
        codes: Mutex<HashMap<String, String>>,
    }

    impl Codes {
        pub(super) fn issue(&self, email: &str, code: &str) {
            self.codes
                .lock()
                .expect("code mutex poisoned")
                .insert(email.to_string(), code.to_string());
        }
    }

    impl EmailCodeValidator for Codes {
        fn check(&self, email: &str, code: &str) -> bool {
            self.codes
                .lock()
                .expect("code mutex poisoned")
                .get(email)
                .is_some_and(|expected| expected == code)
        }
    }

    pub(super) fn pipeline(
        config: RegistrationConfig,
        store: Arc<FileIdentityStore>,
        codes: Arc<Codes>,
    ) -> RegistrationPipeline<FileIdentityStore> {
        RegistrationPipeline::new(
            &config,
            store,
            Arc::new(QuestionnaireSubmissionStore::new()),
            RegistrationCollaborators {
                captcha: Arc::new(NoCaptcha),
                email_codes: codes,
                binding: Arc::new(NoBindingRequired),
            },
        )
        .expect("default patterns compile")
    }

    pub(super) async fn legacy(path: &Path) -> SqliteCredentialStore {
        let store = SqliteCredentialStore::open(path, "authme").expect("open legacy db");
        store.ensure_table().await.expect("create legacy table");
        store
    }

    pub(super) fn engine(
        identities: Arc<FileIdentityStore>,
        legacy: SqliteCredentialStore,
    ) -> ReconciliationEngine<FileIdentityStore> {
        ReconciliationEngine::new(identities, Arc::new(legacy), Duration::from_secs(5))
    }

    pub(super) fn form(username: &str, email: &str, password: &str) -> RegistrationForm {
        RegistrationForm {
            email: email.to_string(),
            code: "135790".to_string(),
            username: username.to_string(),
            password: Some(password.to_string()),
            ..RegistrationForm::default()
        }
    }
}

use std::sync::Arc;

use common::*;
use gatehouse::credentials::verify_password;
use gatehouse::identity::{FileIdentityStore, IdentityStore, UserStatus};
use gatehouse::reconciliation::ExternalCredentialStore;
use gatehouse::registration::{RegistrationConfig, RegistrationOutcome};
use tempfile::tempdir;

#[tokio::test]
async fn auto_approved_registrant_can_log_in_through_the_legacy_table() {
    let dir = tempdir().expect("tempdir");
    let identities =
        Arc::new(FileIdentityStore::open(dir.path().join("users.json")).expect("open users"));
    let codes = Arc::new(Codes::default());
    codes.issue("steve@gmail.com", "135790");

    let pipeline = pipeline(
        RegistrationConfig {
            auto_approve: true,
            ..RegistrationConfig::default()
        },
        identities.clone(),
        codes,
    );
    let request = pipeline.prepare(form("Steve", "Steve@Gmail.com", "hunter2222"));
    let receipt = pipeline.register(&request).expect("registration accepted");
    assert_eq!(receipt.outcome, RegistrationOutcome::SuccessWhitelisted);

    let legacy_db = dir.path().join("authme.db");
    let engine = engine(identities.clone(), legacy(&legacy_db).await);
    let report = engine.sync().await.expect("first pass");
    assert_eq!(report.external_created, 1);

    let profile = legacy(&legacy_db)
        .await
        .list_profiles()
        .await
        .expect("list profiles")
        .into_iter()
        .find(|profile| profile.username == "Steve")
        .expect("steve pushed");
    assert!(verify_password("hunter2222", profile.password_or_empty()));
    assert_eq!(profile.email.as_deref(), Some("steve@gmail.com"));

    let again = engine.sync().await.expect("second pass");
    assert_eq!(again.total_writes(), 0);
}

#[tokio::test]
async fn pending_registrant_is_promoted_by_a_legacy_account() {
    let dir = tempdir().expect("tempdir");
    let users_path = dir.path().join("users.json");
    let identities = Arc::new(FileIdentityStore::open(&users_path).expect("open users"));
    let codes = Arc::new(Codes::default());
    codes.issue("alex@gmail.com", "135790");

    let pipeline = pipeline(RegistrationConfig::default(), identities.clone(), codes);
    let receipt = pipeline
        .register(&pipeline.prepare(form("Alex", "alex@gmail.com", "password99")))
        .expect("registration accepted");
    assert_eq!(receipt.outcome, RegistrationOutcome::SuccessPending);

    let legacy_db = dir.path().join("authme.db");
    let legacy_store = legacy(&legacy_db).await;
    legacy_store
        .upsert("Alex", "$SHA$0123456789abcdef$feedface")
        .await
        .expect("seed legacy account");

    let report = engine(identities, legacy_store)
        .sync()
        .await
        .expect("pass succeeds");
    assert_eq!(report.internal_promoted, 1);
    assert_eq!(report.internal_passwords, 1);

    // A fresh handle reads what was persisted to disk.
    let reopened = FileIdentityStore::open(&users_path).expect("reopen users");
    let alex = reopened
        .get_by_username("alex", false)
        .expect("lookup")
        .expect("alex present");
    assert_eq!(alex.status, UserStatus::Approved);
    assert_eq!(
        alex.password.as_deref(),
        Some("$SHA$0123456789abcdef$feedface")
    );
    assert_eq!(alex.email, "alex@gmail.com");
}
