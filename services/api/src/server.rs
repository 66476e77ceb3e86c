use crate::cli::ServeArgs;
use crate::infra::{
    AppState, InMemoryCaptchaStore, InMemoryEmailCodes, OfflineScoring, StaticMessages,
};
use crate::routes::with_ops_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use gatehouse::config::{AppConfig, LegacyAuthConfig};
use gatehouse::error::AppError;
use gatehouse::identity::FileIdentityStore;
use gatehouse::reconciliation::{
    spawn_worker, ReconciliationEngine, ReconciliationError, SqliteCredentialStore, SyncHandle,
};
use gatehouse::registration::{
    NoBindingRequired, QuestionnaireIntake, QuestionnaireSubmissionStore,
    RegistrationApi, RegistrationCollaborators, RegistrationPipeline,
};
use gatehouse::telemetry;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) type Engine = ReconciliationEngine<FileIdentityStore>;

/// Fully wired service, ready to bind.
pub(crate) struct Gateway {
    pub(crate) router: axum::Router,
    pub(crate) state: AppState,
    pub(crate) submissions: Arc<QuestionnaireSubmissionStore>,
    /// Present when legacy credential sync is enabled; keeps the worker alive.
    pub(crate) sync: Option<SyncHandle>,
}

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let gateway = assemble(&config, prometheus_handle).await?;
    let Gateway {
        router,
        state,
        submissions,
        sync,
    } = gateway;

    tokio::spawn(purge_submissions(submissions));

    let app = router.layer(Extension(state.clone())).layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    state.readiness.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        legacy_sync = sync.is_some(),
        "gatehouse registration service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// Builds stores, the pipeline and the optional reconciliation worker from configuration.
pub(crate) async fn assemble(
    config: &AppConfig,
    metrics: PrometheusHandle,
) -> Result<Gateway, AppError> {
    let identities = Arc::new(FileIdentityStore::open(&config.storage.users_path)?);
    debug!(path = %identities.path().display(), "identity store opened");
    let submissions = Arc::new(QuestionnaireSubmissionStore::new());
    let captcha = Arc::new(InMemoryCaptchaStore::default());
    let email_codes = Arc::new(InMemoryEmailCodes::default());

    let mut pipeline = RegistrationPipeline::new(
        &config.registration,
        identities.clone(),
        submissions.clone(),
        RegistrationCollaborators {
            captcha: captcha.clone(),
            email_codes: email_codes.clone(),
            binding: Arc::new(NoBindingRequired),
        },
    )?;

    let (reconciliation, sync) = if config.legacy_auth.enabled {
        let engine = Arc::new(legacy_engine(identities.clone(), &config.legacy_auth).await?);
        let (handle, _worker) = spawn_worker(engine.clone(), config.legacy_auth.sync_interval);
        pipeline = pipeline.with_approval_hook(Arc::new(handle.clone()));
        (Some(engine), Some(handle))
    } else {
        (None, None)
    };

    let intake = config
        .registration
        .questionnaire_enabled
        .then(|| QuestionnaireIntake::new(Arc::new(OfflineScoring), submissions.clone()));

    let api = Arc::new(RegistrationApi {
        pipeline,
        intake,
        messages: Arc::new(StaticMessages::default()),
    });

    let state = AppState {
        readiness: Arc::new(AtomicBool::new(false)),
        metrics: Arc::new(metrics),
        environment: config.environment,
        captcha,
        email_codes,
        reconciliation,
        admin_token: config.server.admin_token.as_deref().map(Arc::from),
    };

    Ok(Gateway {
        router: with_ops_routes(api),
        state,
        submissions,
        sync,
    })
}

pub(crate) async fn legacy_engine(
    identities: Arc<FileIdentityStore>,
    legacy: &LegacyAuthConfig,
) -> Result<Engine, AppError> {
    let external = SqliteCredentialStore::open(&legacy.database_path, &legacy.table)
        .map_err(|source| ReconciliationError::External {
            operation: "open",
            source,
        })?;
    external
        .ensure_table()
        .await
        .map_err(|source| ReconciliationError::External {
            operation: "ensure_table",
            source,
        })?;

    Ok(ReconciliationEngine::new(
        identities,
        Arc::new(external),
        legacy.call_timeout,
    ))
}

async fn purge_submissions(submissions: Arc<QuestionnaireSubmissionStore>) {
    let mut ticker = tokio::time::interval(PURGE_INTERVAL);
    loop {
        ticker.tick().await;
        let purged = submissions.purge_expired(Utc::now());
        if purged > 0 {
            debug!(purged, "expired questionnaire submissions purged");
        }
    }
}
