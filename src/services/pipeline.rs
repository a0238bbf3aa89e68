//! Ordered checks every protected request passes before reaching a handler.
//!
//! The standard pipeline is session revalidation, then actor resolution,
//! then unit resolution. Each stage takes the state by value and hands back
//! an enriched copy, or rejects the request.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::context::RequestContext;
use crate::db::{Center, Store};
use crate::domain::UnitId;
use crate::services::center_gate::{AccessError, Actor, CenterAccessGate};
use crate::services::lockout::{LockStatus, LockoutPolicy, LockoutState};
use crate::services::session_security::{SessionError, SessionSecurity, SessionSecurityManager};

#[derive(Debug, Clone)]
pub struct PipelineState {
    pub ctx: RequestContext,
    pub session: Option<SessionSecurity>,
    pub actor: Option<Actor>,
    pub unit: Option<Center>,
}

impl PipelineState {
    #[must_use]
    pub const fn new(ctx: RequestContext, session: Option<SessionSecurity>) -> Self {
        Self {
            ctx,
            session,
            actor: None,
            unit: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineRejection {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Session expired")]
    SessionExpired,

    #[error("Session fingerprint changed")]
    FingerprintMismatch,

    #[error("Account is inactive")]
    Inactive,

    #[error("Account is locked until {until}")]
    Locked { until: DateTime<Utc> },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SessionError> for PipelineRejection {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Expired => Self::SessionExpired,
            SessionError::FingerprintMismatch => Self::FingerprintMismatch,
            SessionError::Storage(msg) => Self::Internal(msg),
        }
    }
}

impl From<AccessError> for PipelineRejection {
    fn from(err: AccessError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for PipelineRejection {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

impl PipelineRejection {
    /// Rejections after which the stored session must be dropped.
    #[must_use]
    pub const fn ends_session(&self) -> bool {
        !matches!(self, Self::Internal(_) | Self::Unauthenticated)
    }
}

#[async_trait::async_trait]
pub trait RequestStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, state: PipelineState) -> Result<PipelineState, PipelineRejection>;
}

/// Idle timeout and fingerprint.
pub struct SessionRevalidation {
    sessions: Arc<SessionSecurityManager>,
}

impl SessionRevalidation {
    #[must_use]
    pub const fn new(sessions: Arc<SessionSecurityManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait::async_trait]
impl RequestStage for SessionRevalidation {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn run(&self, mut state: PipelineState) -> Result<PipelineState, PipelineRejection> {
        let Some(session) = state.session.take() else {
            return Err(PipelineRejection::Unauthenticated);
        };
        let session = self.sessions.revalidate(session, &state.ctx).await?;
        state.ctx = state.ctx.with_actor(session.account_id);
        state.session = Some(session);
        Ok(state)
    }
}

/// Loads the account behind the session. It must still be active and, unless
/// the session came through emergency access, not locked.
pub struct ActorResolution {
    store: Store,
    lockout: LockoutPolicy,
}

impl ActorResolution {
    #[must_use]
    pub const fn new(store: Store, lockout: LockoutPolicy) -> Self {
        Self { store, lockout }
    }
}

#[async_trait::async_trait]
impl RequestStage for ActorResolution {
    fn name(&self) -> &'static str {
        "actor"
    }

    async fn run(&self, mut state: PipelineState) -> Result<PipelineState, PipelineRejection> {
        let Some(session) = state.session.as_ref() else {
            return Err(PipelineRejection::Unauthenticated);
        };

        let Some(account) = self.store.get_account(session.account_id.value()).await? else {
            warn!(account_id = %session.account_id, "Session refers to a missing account");
            return Err(PipelineRejection::Unauthenticated);
        };
        if !account.is_active {
            return Err(PipelineRejection::Inactive);
        }
        if !session.emergency
            && let LockStatus::Locked { until } = self
                .lockout
                .status(&LockoutState::primary(&account), state.ctx.timestamp)
        {
            return Err(PipelineRejection::Locked { until });
        }

        state.actor = Some(Actor::from_account(
            &account,
            session.two_factor_completed,
            session.emergency,
        ));
        Ok(state)
    }
}

/// Picks the current center and records it on the context and the session.
pub struct UnitResolution {
    gate: Arc<dyn CenterAccessGate>,
}

impl UnitResolution {
    #[must_use]
    pub fn new(gate: Arc<dyn CenterAccessGate>) -> Self {
        Self { gate }
    }
}

#[async_trait::async_trait]
impl RequestStage for UnitResolution {
    fn name(&self) -> &'static str {
        "unit"
    }

    async fn run(&self, mut state: PipelineState) -> Result<PipelineState, PipelineRejection> {
        let (Some(actor), Some(session)) = (state.actor.as_ref(), state.session.as_mut()) else {
            return Err(PipelineRejection::Unauthenticated);
        };

        let unit = self
            .gate
            .resolve_current_unit(actor, session.current_unit)
            .await?;
        let unit_id = unit.as_ref().map(|center| UnitId::from(center.id));

        session.current_unit = unit_id;
        state.ctx = state.ctx.with_unit(unit_id);
        state.unit = unit;
        Ok(state)
    }
}

pub struct RequestPipeline {
    stages: Vec<Box<dyn RequestStage>>,
}

impl RequestPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    #[must_use]
    pub fn standard(
        sessions: Arc<SessionSecurityManager>,
        store: Store,
        lockout: LockoutPolicy,
        gate: Arc<dyn CenterAccessGate>,
    ) -> Self {
        Self::new()
            .with_stage(SessionRevalidation::new(sessions))
            .with_stage(ActorResolution::new(store, lockout))
            .with_stage(UnitResolution::new(gate))
    }

    #[must_use]
    pub fn with_stage(mut self, stage: impl RequestStage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub async fn run(&self, mut state: PipelineState) -> Result<PipelineState, PipelineRejection> {
        for stage in &self.stages {
            state = stage.run(state).await.inspect_err(|rejection| {
                tracing::debug!(stage = stage.name(), %rejection, "Request rejected");
            })?;
        }
        Ok(state)
    }
}

impl Default for RequestPipeline {
    fn default() -> Self {
        Self::new()
    }
}
