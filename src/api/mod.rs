use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post, put},
};
use std::net::IpAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, SessionManagerLayer};

use crate::config::Config;
use crate::state::SharedState;

mod audit;
pub mod auth;
mod centers;
pub mod context;
mod error;
mod observability;
mod system;
mod types;
mod validation;

pub use context::{AuditedByService, CurrentUnit, resolve_client_ip, suspicious_pattern};
pub use error::ApiError;
pub use types::*;

use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    /// Peers whose `X-Forwarded-For` header is believed.
    pub trusted_proxies: Vec<IpAddr>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    #[must_use]
    pub fn store(&self) -> &crate::db::Store {
        &self.shared.store
    }
}

pub fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let trusted_proxies = shared
        .config
        .security
        .trusted_proxy_ips
        .iter()
        .map(|raw| {
            raw.parse::<IpAddr>()
                .map_err(|e| anyhow::anyhow!("Invalid trusted proxy address '{raw}': {e}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Arc::new(AppState {
        shared,
        trusted_proxies,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    }))
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::new(config).await?);
    create_app_state(shared, prometheus_handle)
}

pub async fn router(state: Arc<AppState>) -> anyhow::Result<Router> {
    let (cors_origins, secure_cookies, idle_minutes) = {
        let config = state.config();
        (
            config.server.cors_allowed_origins.clone(),
            config.server.secure_cookies,
            config.session.idle_timeout_minutes,
        )
    };

    let protected_routes = create_protected_router(state.clone());

    let session_store = state.store().session_store().await?;
    let session_layer = SessionManagerLayer::new(session_store)
        .with_name("centergate.sid")
        .with_secure(secure_cookies)
        .with_http_only(true)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(i64::from(
            idle_minutes,
        ))));

    let api_router = Router::new()
        .merge(protected_routes)
        .route("/auth/login", post(auth::login))
        .route("/auth/second-factor", post(auth::second_factor))
        .route(
            "/auth/password/required",
            post(auth::complete_required_change),
        )
        .route("/auth/password-reset/confirm", post(auth::confirm_reset))
        .route("/auth/logout", post(auth::logout))
        .route("/health", get(system::health))
        .with_state(state.clone());

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Ok(Router::new()
        .nest("/api", api_router)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            context::flag_suspicious_requests,
        ))
        .layer(session_layer)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(middleware::from_fn(observability::security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::logging_middleware))
        .layer(middleware::from_fn_with_state(
            state,
            context::request_context_middleware,
        )))
}

fn create_protected_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/password", put(auth::change_password))
        .route("/centers", get(centers::list_centers))
        .route("/centers/current", post(centers::switch_center))
        .route("/audit", get(audit::list_entries))
        .route("/metrics", get(observability::get_metrics))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            context::audit_mutations,
        ))
        .route_layer(middleware::from_fn_with_state(
            state,
            context::require_session,
        ))
}
