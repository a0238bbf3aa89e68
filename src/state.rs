use std::sync::Arc;

use crate::config::Config;
use crate::db::Store;
use crate::services::{
    AccountService, AuditRecorder, AuthComponents, AuthService, CenterAccessGate, LockoutPolicy,
    RequestPipeline, SeaOrmAccountService, SeaOrmAuditRecorder, SeaOrmAuthService,
    SeaOrmCenterGate, SecretVerifier, SessionSecurityManager,
};

/// Services shared by the HTTP surface and the CLI.
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<Config>,

    pub store: Store,

    pub recorder: Arc<dyn AuditRecorder>,

    pub auth: Arc<dyn AuthService>,

    pub accounts: Arc<dyn AccountService>,

    pub gate: Arc<dyn CenterAccessGate>,

    pub sessions: Arc<SessionSecurityManager>,

    pub pipeline: Arc<RequestPipeline>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        Self::with_store(config, store)
    }

    /// Wires every service on top of an already migrated store.
    pub fn with_store(config: Config, store: Store) -> anyhow::Result<Self> {
        let verifier = Arc::new(SecretVerifier::new(&config.security)?);
        let recorder: Arc<dyn AuditRecorder> = Arc::new(SeaOrmAuditRecorder::new(store.clone()));

        let components = Arc::new(AuthComponents::new(
            store.clone(),
            verifier.clone(),
            recorder.clone(),
            &config.security,
            config.emergency.clone(),
        ));
        if config.emergency.enabled {
            tracing::error!(
                target: "centergate::security",
                "Emergency access is ENABLED; lockout and second factor can be bypassed"
            );
        }

        let auth: Arc<dyn AuthService> = Arc::new(SeaOrmAuthService::new(components));
        let accounts: Arc<dyn AccountService> = Arc::new(SeaOrmAccountService::new(
            store.clone(),
            verifier,
            recorder.clone(),
            config.security.password_expiry_days,
        ));
        let gate: Arc<dyn CenterAccessGate> =
            Arc::new(SeaOrmCenterGate::new(store.clone(), recorder.clone()));
        let sessions = Arc::new(SessionSecurityManager::new(
            &config.session,
            recorder.clone(),
        ));
        let pipeline = Arc::new(RequestPipeline::standard(
            sessions.clone(),
            store.clone(),
            LockoutPolicy::from_config(&config.security.lockout),
            gate.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            recorder,
            auth,
            accounts,
            gate,
            sessions,
            pipeline,
        })
    }
}
