//! The ordered set of strategies tried against one login attempt.
//!
//! Strategies never audit. They hand back a [`Decision`] and the chain writes
//! the single `LOGIN` entry for it, so each terminal state produces exactly
//! one audit row no matter which strategy decided.
//!
//! # Emergency access
//!
//! [`EmergencyAccessStrategy`] runs first and only applies when the operator
//! enabled it through the environment and the attempt carries an emergency
//! code. It accepts a superuser's password together with that code and
//! **skips lockout, unit membership and the second factor entirely**. Every
//! use is logged at `error` on the `centergate::security` target.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{EmergencyAccess, SecurityConfig};
use crate::context::RequestContext;
use crate::db::{Account, IdentityResolution, LockoutCounter, Store, TicketKind};
use crate::domain::{AccountId, AuditAction};
use crate::services::audit_service::{AuditRecord, AuditRecorder, ResourceRef};
use crate::services::auth_service::{
    AcceptedLogin, AuthError, LoginAttempt, LoginOutcome, RejectReason, Rejection,
};
use crate::services::lockout::{LockStatus, LockoutPolicy, LockoutState};
use crate::services::secrets::SecretVerifier;

const SECURITY_TARGET: &str = "centergate::security";

/// Collaborators shared by the strategies and the auth service.
pub struct AuthComponents {
    pub store: Store,
    pub verifier: Arc<SecretVerifier>,
    pub recorder: Arc<dyn AuditRecorder>,
    pub lockout: LockoutPolicy,
    pub second_factor: LockoutPolicy,
    pub security: SecurityConfig,
    pub emergency: EmergencyAccess,
}

impl AuthComponents {
    pub fn new(
        store: Store,
        verifier: Arc<SecretVerifier>,
        recorder: Arc<dyn AuditRecorder>,
        security: &SecurityConfig,
        emergency: EmergencyAccess,
    ) -> Self {
        Self {
            store,
            verifier,
            recorder,
            lockout: LockoutPolicy::from_config(&security.lockout),
            second_factor: LockoutPolicy::from_config(&security.second_factor),
            security: security.clone(),
            emergency,
        }
    }

    pub(crate) fn ticket_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::minutes(i64::from(self.security.pending_ticket_minutes))
    }

    /// Resets both counters through their policies after an accepted login.
    pub(crate) async fn record_success(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let primary = self.lockout.record_success(&LockoutState::primary(account));
        let second_factor = self
            .second_factor
            .record_success(&LockoutState::second_factor(account));
        self.store
            .record_login_success(account.id, &primary, &second_factor, now)
            .await?;
        Ok(())
    }

    /// True when the flag is set or the password is older than the expiry
    /// window. Accounts that never recorded a change are not forced.
    pub(crate) fn password_change_required(&self, account: &Account, now: DateTime<Utc>) -> bool {
        if account.must_change_password {
            return true;
        }
        account.password_changed_at.is_some_and(|changed| {
            changed < now - Duration::days(i64::from(self.security.password_expiry_days))
        })
    }
}

/// A strategy's verdict, before it is audited.
#[derive(Debug)]
pub struct Decision {
    pub outcome: LoginOutcome,
    /// The account the attempt resolved to, if any.
    pub subject: Option<AccountId>,
    pub detail: Map<String, Value>,
}

impl Decision {
    #[must_use]
    pub fn new(outcome: LoginOutcome, subject: Option<AccountId>) -> Self {
        Self {
            outcome,
            subject,
            detail: Map::new(),
        }
    }

    #[must_use]
    pub fn rejected(rejection: Rejection, subject: Option<AccountId>) -> Self {
        Self::new(LoginOutcome::Rejected(rejection), subject)
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.detail.insert(key.to_string(), value);
        self
    }

    const fn is_emergency(&self) -> bool {
        match &self.outcome {
            LoginOutcome::Accepted(accepted) => accepted.emergency,
            LoginOutcome::Rejected(Rejection {
                reason: RejectReason::EmergencyDenied,
                ..
            }) => true,
            _ => false,
        }
    }
}

#[derive(Debug)]
pub enum StrategyOutcome {
    /// The strategy does not handle this attempt; try the next one.
    NotApplicable,
    Decided(Decision),
}

#[async_trait::async_trait]
pub trait AuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(
        &self,
        attempt: &LoginAttempt,
        ctx: &RequestContext,
    ) -> Result<StrategyOutcome, AuthError>;
}

/// Writes the one `LOGIN` entry for a decision and returns its outcome.
pub async fn finish_login(
    recorder: &dyn AuditRecorder,
    ctx: &RequestContext,
    identifier: &str,
    decision: Decision,
) -> LoginOutcome {
    let tag = decision.outcome.reason_tag();
    let emergency = decision.is_emergency();

    metrics::counter!("auth_login_outcomes_total", "reason" => tag).increment(1);

    let actor = decision.subject.map(|id| id.to_string());
    match &decision.outcome {
        _ if emergency => error!(
            target: SECURITY_TARGET,
            identifier,
            account_id = ?actor,
            client_ip = ?ctx.client_ip,
            reason = tag,
            "Emergency access used"
        ),
        LoginOutcome::Accepted(_) => info!(
            target: SECURITY_TARGET,
            identifier,
            account_id = ?actor,
            client_ip = ?ctx.client_ip,
            "Login accepted"
        ),
        LoginOutcome::Pending { .. } => info!(
            target: SECURITY_TARGET,
            identifier,
            account_id = ?actor,
            reason = tag,
            "Login pending"
        ),
        LoginOutcome::Rejected(_) => warn!(
            target: SECURITY_TARGET,
            identifier,
            account_id = ?actor,
            client_ip = ?ctx.client_ip,
            reason = tag,
            "Login rejected"
        ),
    }

    let mut detail = decision.detail;
    detail.insert("reason".to_string(), json!(tag));
    detail.insert("attempted_identifier".to_string(), json!(identifier));
    detail.insert("success".to_string(), json!(decision.outcome.is_accepted()));
    if let Some(rejection) = decision.outcome.rejection() {
        detail.insert("public_reason".to_string(), json!(rejection.public_reason()));
        if let Some(until) = rejection.locked_until {
            detail.insert("locked_until".to_string(), json!(until));
        }
        if let Some(remaining) = rejection.remaining_attempts {
            detail.insert("remaining_attempts".to_string(), json!(remaining));
        }
    }

    let mut record = AuditRecord::new(AuditAction::Login)
        .actor(decision.subject)
        .detail(Value::Object(detail));
    if let Some(subject) = decision.subject {
        record = record.resource(ResourceRef::new("account", subject));
    }
    recorder.record(ctx, record).await;

    decision.outcome
}

/// Out-of-band recovery path for superusers.
pub struct EmergencyAccessStrategy {
    components: Arc<AuthComponents>,
}

impl EmergencyAccessStrategy {
    #[must_use]
    pub const fn new(components: Arc<AuthComponents>) -> Self {
        Self { components }
    }
}

#[async_trait::async_trait]
impl AuthStrategy for EmergencyAccessStrategy {
    fn name(&self) -> &'static str {
        "emergency"
    }

    async fn attempt(
        &self,
        attempt: &LoginAttempt,
        ctx: &RequestContext,
    ) -> Result<StrategyOutcome, AuthError> {
        let c = &self.components;
        let Some(code) = attempt.emergency_code.as_deref() else {
            return Ok(StrategyOutcome::NotApplicable);
        };
        if !c.emergency.enabled {
            return Ok(StrategyOutcome::NotApplicable);
        }

        error!(
            target: SECURITY_TARGET,
            identifier = %attempt.identifier,
            client_ip = ?ctx.client_ip,
            "Emergency access attempted"
        );

        let denied = |subject: Option<AccountId>, why: &str| -> Result<StrategyOutcome, AuthError> {
            Ok(StrategyOutcome::Decided(
                Decision::rejected(Rejection::new(RejectReason::EmergencyDenied), subject)
                    .with("emergency_access", json!(true))
                    .with("emergency_denied", json!(why)),
            ))
        };

        if !SecretVerifier::verify_emergency_code(&c.emergency.code, code) {
            return denied(None, "invalid-code");
        }

        let IdentityResolution::Found(account) =
            c.store.resolve_identity(&attempt.identifier).await?
        else {
            return denied(None, "unknown-identity");
        };
        let subject = Some(AccountId::from(account.id));

        if !account.is_active || !account.is_superuser {
            return denied(subject, "not-superuser");
        }
        if !c.verifier.verify_password(&account, &attempt.password).await? {
            return denied(subject, "bad-credential");
        }

        let accepted = AcceptedLogin {
            account,
            two_factor_completed: false,
            emergency: true,
        };
        Ok(StrategyOutcome::Decided(
            Decision::new(LoginOutcome::Accepted(accepted), subject)
                .with("emergency_access", json!(true))
                .with("bypassed", json!(["lockout", "second-factor", "unit-assignment"])),
        ))
    }
}

/// The normal password path: identity, active flag, lockout, password, unit
/// membership, forced rotation, then second factor.
pub struct PrimaryCredentialStrategy {
    components: Arc<AuthComponents>,
}

impl PrimaryCredentialStrategy {
    #[must_use]
    pub const fn new(components: Arc<AuthComponents>) -> Self {
        Self { components }
    }

    async fn check_second_factor(
        &self,
        account: Box<Account>,
        code: &str,
        ctx: &RequestContext,
    ) -> Result<Decision, AuthError> {
        let c = &self.components;
        let subject = Some(AccountId::from(account.id));

        if c.verifier.verify_totp(&account, code, ctx.timestamp) {
            c.record_success(&account, ctx.timestamp).await?;
            let accepted = AcceptedLogin {
                account,
                two_factor_completed: true,
                emergency: false,
            };
            return Ok(Decision::new(LoginOutcome::Accepted(accepted), subject));
        }

        let outcome = c
            .store
            .record_login_failure(
                account.id,
                LockoutCounter::SecondFactor,
                &c.second_factor,
                ctx.timestamp,
            )
            .await?;
        let rejection = Rejection {
            reason: RejectReason::BadSecondFactor,
            remaining_attempts: Some(c.second_factor.remaining_attempts(&outcome.state)),
            locked_until: outcome
                .newly_locked
                .then_some(outcome.state.locked_until)
                .flatten(),
        };
        Ok(Decision::rejected(rejection, subject))
    }
}

#[async_trait::async_trait]
impl AuthStrategy for PrimaryCredentialStrategy {
    fn name(&self) -> &'static str {
        "primary"
    }

    async fn attempt(
        &self,
        attempt: &LoginAttempt,
        ctx: &RequestContext,
    ) -> Result<StrategyOutcome, AuthError> {
        let c = &self.components;
        let now = ctx.timestamp;

        let account = match c.store.resolve_identity(&attempt.identifier).await? {
            IdentityResolution::Found(account) => account,
            IdentityResolution::NotFound => {
                return Ok(StrategyOutcome::Decided(Decision::rejected(
                    Rejection::new(RejectReason::UnknownIdentity),
                    None,
                )));
            }
            IdentityResolution::Ambiguous(matches) => {
                error!(
                    target: SECURITY_TARGET,
                    identifier = %attempt.identifier,
                    matches,
                    "Identifier matches more than one account"
                );
                return Ok(StrategyOutcome::Decided(
                    Decision::rejected(Rejection::new(RejectReason::UnknownIdentity), None)
                        .with("ambiguous_matches", json!(matches)),
                ));
            }
        };
        let subject = Some(AccountId::from(account.id));

        if !account.is_active {
            return Ok(StrategyOutcome::Decided(Decision::rejected(
                Rejection::new(RejectReason::Inactive),
                subject,
            )));
        }

        if let LockStatus::Locked { until } = c.lockout.status(&LockoutState::primary(&account), now)
        {
            let rejection = Rejection {
                locked_until: Some(until),
                ..Rejection::new(RejectReason::Locked)
            };
            return Ok(StrategyOutcome::Decided(Decision::rejected(rejection, subject)));
        }

        if !c.verifier.verify_password(&account, &attempt.password).await? {
            let outcome = c
                .store
                .record_login_failure(account.id, LockoutCounter::Primary, &c.lockout, now)
                .await?;
            let rejection = Rejection {
                reason: RejectReason::BadCredential,
                remaining_attempts: Some(c.lockout.remaining_attempts(&outcome.state)),
                locked_until: outcome
                    .newly_locked
                    .then_some(outcome.state.locked_until)
                    .flatten(),
            };
            return Ok(StrategyOutcome::Decided(Decision::rejected(rejection, subject)));
        }

        if !account.is_multi_unit && !c.store.has_active_assignment(account.id).await? {
            return Ok(StrategyOutcome::Decided(Decision::rejected(
                Rejection::new(RejectReason::NoUnitAssignment),
                subject,
            )));
        }

        if c.password_change_required(&account, now) {
            let ticket = c
                .store
                .issue_ticket(account.id, TicketKind::PasswordChange, now, c.ticket_expiry(now))
                .await?;
            return Ok(StrategyOutcome::Decided(Decision::new(
                LoginOutcome::Pending {
                    kind: TicketKind::PasswordChange,
                    ticket,
                },
                subject,
            )));
        }

        if account.two_factor_enabled {
            if let LockStatus::Locked { until } =
                c.second_factor.status(&LockoutState::second_factor(&account), now)
            {
                let rejection = Rejection {
                    locked_until: Some(until),
                    ..Rejection::new(RejectReason::Locked)
                };
                return Ok(StrategyOutcome::Decided(
                    Decision::rejected(rejection, subject).with("factor", json!("second")),
                ));
            }

            let Some(code) = attempt.totp_code.as_deref().filter(|code| !code.trim().is_empty())
            else {
                let ticket = c
                    .store
                    .issue_ticket(account.id, TicketKind::SecondFactor, now, c.ticket_expiry(now))
                    .await?;
                return Ok(StrategyOutcome::Decided(Decision::new(
                    LoginOutcome::Pending {
                        kind: TicketKind::SecondFactor,
                        ticket,
                    },
                    subject,
                )));
            };

            let decision = self.check_second_factor(account, code, ctx).await?;
            return Ok(StrategyOutcome::Decided(decision));
        }

        c.record_success(&account, now).await?;
        let accepted = AcceptedLogin {
            account,
            two_factor_completed: false,
            emergency: false,
        };
        Ok(StrategyOutcome::Decided(Decision::new(
            LoginOutcome::Accepted(accepted),
            subject,
        )))
    }
}

pub struct AuthenticationChain {
    strategies: Vec<Box<dyn AuthStrategy>>,
    recorder: Arc<dyn AuditRecorder>,
}

impl AuthenticationChain {
    #[must_use]
    pub fn new(recorder: Arc<dyn AuditRecorder>) -> Self {
        Self {
            strategies: Vec::new(),
            recorder,
        }
    }

    /// Emergency first, then the primary credential path.
    #[must_use]
    pub fn standard(components: &Arc<AuthComponents>) -> Self {
        Self::new(components.recorder.clone())
            .with_strategy(EmergencyAccessStrategy::new(components.clone()))
            .with_strategy(PrimaryCredentialStrategy::new(components.clone()))
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: impl AuthStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub async fn authenticate(
        &self,
        attempt: &LoginAttempt,
        ctx: &RequestContext,
    ) -> Result<LoginOutcome, AuthError> {
        for strategy in &self.strategies {
            match strategy.attempt(attempt, ctx).await? {
                StrategyOutcome::NotApplicable => {}
                StrategyOutcome::Decided(decision) => {
                    let decision = decision.with("strategy", json!(strategy.name()));
                    return Ok(finish_login(
                        self.recorder.as_ref(),
                        ctx,
                        &attempt.identifier,
                        decision,
                    )
                    .await);
                }
            }
        }

        // Nothing applied; audit it like an unknown identity.
        let decision = Decision::rejected(Rejection::new(RejectReason::UnknownIdentity), None)
            .with("strategy", json!("none"));
        Ok(finish_login(self.recorder.as_ref(), ctx, &attempt.identifier, decision).await)
    }
}
