//! Security state attached to an authenticated session.
//!
//! The session cookie itself is handled by `tower-sessions`; this module owns
//! the record stored under [`SESSION_KEY`] and the per-request revalidation
//! of it: idle timeout and client fingerprint.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_sessions::Session;
use tracing::{debug, warn};

use crate::config::{FingerprintPolicy, SessionConfig};
use crate::context::RequestContext;
use crate::domain::{AccountId, AuditAction, UnitId};
use crate::services::audit_service::{AuditRecord, AuditRecorder, ResourceRef};
use crate::services::auth_service::AcceptedLogin;
use crate::services::secrets::generate_token;

pub const SESSION_KEY: &str = "centergate.security";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSecurity {
    pub account_id: AccountId,
    pub issued_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub origin_ip: Option<String>,
    pub user_agent_hash: String,
    pub current_unit: Option<UnitId>,
    pub two_factor_completed: bool,
    pub emergency: bool,
    /// Random per-session value, rotated on every login.
    pub nonce: String,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session expired")]
    Expired,

    #[error("Session fingerprint changed")]
    FingerprintMismatch,

    #[error("Session storage error: {0}")]
    Storage(String),
}

impl From<tower_sessions::session::Error> for SessionError {
    fn from(err: tower_sessions::session::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub struct SessionSecurityManager {
    idle_timeout: Duration,
    fingerprint_policy: FingerprintPolicy,
    recorder: Arc<dyn AuditRecorder>,
}

impl SessionSecurityManager {
    pub fn new(config: &SessionConfig, recorder: Arc<dyn AuditRecorder>) -> Self {
        Self {
            idle_timeout: Duration::minutes(i64::from(config.idle_timeout_minutes.max(1))),
            fingerprint_policy: config.fingerprint_policy,
            recorder,
        }
    }

    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Builds the record for a freshly accepted login, bound to the client
    /// that performed it.
    #[must_use]
    pub fn issue(&self, accepted: &AcceptedLogin, ctx: &RequestContext) -> SessionSecurity {
        SessionSecurity {
            account_id: AccountId::from(accepted.account.id),
            issued_at: ctx.timestamp,
            last_seen_at: ctx.timestamp,
            origin_ip: ctx.ip_string(),
            user_agent_hash: ctx.user_agent_hash(),
            current_unit: None,
            two_factor_completed: accepted.two_factor_completed,
            emergency: accepted.emergency,
            nonce: generate_token(),
        }
    }

    /// Checks a stored record against the current request and returns the
    /// refreshed record to write back.
    pub async fn revalidate(
        &self,
        mut security: SessionSecurity,
        ctx: &RequestContext,
    ) -> Result<SessionSecurity, SessionError> {
        if ctx.timestamp - security.last_seen_at > self.idle_timeout {
            debug!(account_id = %security.account_id, "Session idle timeout");
            return Err(SessionError::Expired);
        }

        let ip = ctx.ip_string();
        let agent_hash = ctx.user_agent_hash();
        if ip != security.origin_ip || agent_hash != security.user_agent_hash {
            let invalidate = self.fingerprint_policy == FingerprintPolicy::Invalidate;
            warn!(
                target: "centergate::security",
                account_id = %security.account_id,
                previous_ip = ?security.origin_ip,
                current_ip = ?ip,
                user_agent_changed = agent_hash != security.user_agent_hash,
                invalidate,
                "Session fingerprint changed"
            );

            let record = AuditRecord::new(AuditAction::View)
                .actor(Some(security.account_id))
                .resource(ResourceRef::new("session", security.account_id))
                .detail(json!({
                    "event": "fingerprint-changed",
                    "previous_ip": security.origin_ip,
                    "current_ip": ip,
                    "user_agent_changed": agent_hash != security.user_agent_hash,
                    "session_invalidated": invalidate,
                }));
            self.recorder.record(ctx, record).await;

            if invalidate {
                return Err(SessionError::FingerprintMismatch);
            }
            security.origin_ip = ip;
            security.user_agent_hash = agent_hash;
        }

        security.last_seen_at = ctx.timestamp;
        Ok(security)
    }

    pub async fn load(session: &Session) -> Result<Option<SessionSecurity>, SessionError> {
        Ok(session.get::<SessionSecurity>(SESSION_KEY).await?)
    }

    pub async fn store(session: &Session, security: &SessionSecurity) -> Result<(), SessionError> {
        session.insert(SESSION_KEY, security).await?;
        Ok(())
    }

    /// Starts a fresh session id for a new login so a pre-login id cannot be
    /// reused.
    pub async fn establish(
        session: &Session,
        security: &SessionSecurity,
    ) -> Result<(), SessionError> {
        session.cycle_id().await?;
        Self::store(session, security).await
    }

    pub async fn destroy(session: &Session) {
        if let Err(e) = session.flush().await {
            warn!("Failed to flush session: {e}");
        }
    }
}
