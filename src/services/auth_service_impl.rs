//! `SeaORM` implementation of the `AuthService` trait.

use async_trait::async_trait;
use chrono::Duration;
use sea_orm::Set;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::context::RequestContext;
use crate::db::{Account, IdentityResolution, LockoutCounter, TicketKind};
use crate::domain::validation::validate_password;
use crate::domain::{AccountId, AuditAction};
use crate::entities::accounts;
use crate::services::account_service::password_owner;
use crate::services::audit_service::{AuditRecord, ResourceRef, audit_updated};
use crate::services::auth_chain::{AuthComponents, AuthenticationChain, Decision, finish_login};
use crate::services::auth_service::{
    AcceptedLogin, AuthError, AuthService, LoginAttempt, LoginOutcome, RejectReason, Rejection,
};
use crate::services::lockout::{LockStatus, LockoutState};
use crate::services::secrets::{generate_token, token_digest};
use crate::services::session_security::SessionSecurity;

const INVALID_TICKET: &str = "Login ticket is invalid or expired";
const INVALID_RESET: &str = "Reset token is invalid or expired";

pub struct SeaOrmAuthService {
    components: Arc<AuthComponents>,
    chain: AuthenticationChain,
}

impl SeaOrmAuthService {
    #[must_use]
    pub fn new(components: Arc<AuthComponents>) -> Self {
        let chain = AuthenticationChain::standard(&components);
        Self { components, chain }
    }

    #[must_use]
    pub fn with_chain(components: Arc<AuthComponents>, chain: AuthenticationChain) -> Self {
        Self { components, chain }
    }

    async fn ticket_account(
        &self,
        ticket: &str,
        kind: TicketKind,
        ctx: &RequestContext,
    ) -> Result<(uuid::Uuid, Account), AuthError> {
        let store = &self.components.store;
        let Some(ticket) = store.find_open_ticket(ticket, kind, ctx.timestamp).await? else {
            return Err(AuthError::Invalid(INVALID_TICKET.to_string()));
        };
        match store.get_account(ticket.account_id).await? {
            Some(account) => Ok((ticket.id, account)),
            None => {
                store.consume_ticket(ticket.id, ctx.timestamp).await?;
                Err(AuthError::Invalid(INVALID_TICKET.to_string()))
            }
        }
    }

    /// Decides a second-factor continuation. Everything except a good code
    /// leaves the ticket open until its attempt budget runs out.
    async fn decide_second_factor(
        &self,
        ticket_id: uuid::Uuid,
        account: Account,
        code: &str,
        ctx: &RequestContext,
    ) -> Result<Decision, AuthError> {
        let c = &self.components;
        let now = ctx.timestamp;
        let subject = Some(AccountId::from(account.id));

        if !account.is_active {
            c.store.consume_ticket(ticket_id, now).await?;
            return Ok(Decision::rejected(
                Rejection::new(RejectReason::Inactive),
                subject,
            ));
        }

        let locks = [
            ("primary", c.lockout.status(&LockoutState::primary(&account), now)),
            (
                "second",
                c.second_factor
                    .status(&LockoutState::second_factor(&account), now),
            ),
        ];
        for (factor, status) in locks {
            if let LockStatus::Locked { until } = status {
                let rejection = Rejection {
                    locked_until: Some(until),
                    ..Rejection::new(RejectReason::Locked)
                };
                return Ok(Decision::rejected(rejection, subject).with("factor", json!(factor)));
            }
        }

        if c.verifier.verify_totp(&account, code, now) {
            if !c.store.consume_ticket(ticket_id, now).await? {
                return Err(AuthError::Invalid(INVALID_TICKET.to_string()));
            }
            c.record_success(&account, now).await?;
            let accepted = AcceptedLogin {
                account: Box::new(account),
                two_factor_completed: true,
                emergency: false,
            };
            return Ok(Decision::new(LoginOutcome::Accepted(accepted), subject));
        }

        let outcome = c
            .store
            .record_login_failure(account.id, LockoutCounter::SecondFactor, &c.second_factor, now)
            .await?;
        let attempts = c.store.record_ticket_attempt(ticket_id).await?;
        let burned = u32::try_from(attempts).unwrap_or(u32::MAX) >= c.second_factor.max_attempts();
        if burned {
            c.store.consume_ticket(ticket_id, now).await?;
        }

        let rejection = Rejection {
            reason: RejectReason::BadSecondFactor,
            remaining_attempts: Some(c.second_factor.remaining_attempts(&outcome.state)),
            locked_until: outcome
                .newly_locked
                .then_some(outcome.state.locked_until)
                .flatten(),
        };
        Ok(Decision::rejected(rejection, subject).with("ticket_burned", json!(burned)))
    }

    async fn check_new_password(
        &self,
        account: &Account,
        new_password: &str,
    ) -> Result<String, AuthError> {
        validate_password(new_password, password_owner(account))
            .map_err(|violations| AuthError::Invalid(violations.to_string()))?;

        let verifier = &self.components.verifier;
        if verifier.verify_password(account, new_password).await? {
            return Err(AuthError::Invalid(
                "New password must differ from the current password.".to_string(),
            ));
        }
        Ok(verifier.hash_password(new_password).await?)
    }
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn login(
        &self,
        attempt: LoginAttempt,
        ctx: &RequestContext,
    ) -> Result<LoginOutcome, AuthError> {
        if attempt.identifier.trim().is_empty() || attempt.password.is_empty() {
            return Err(AuthError::Invalid(
                "Identifier and password are required".to_string(),
            ));
        }
        self.chain.authenticate(&attempt, ctx).await
    }

    async fn complete_second_factor(
        &self,
        ticket: &str,
        code: &str,
        ctx: &RequestContext,
    ) -> Result<LoginOutcome, AuthError> {
        let (ticket_id, account) = self
            .ticket_account(ticket, TicketKind::SecondFactor, ctx)
            .await?;
        let identifier = account.login_name.clone();

        let decision = self
            .decide_second_factor(ticket_id, account, code, ctx)
            .await?
            .with("strategy", json!("second-factor-ticket"));

        Ok(finish_login(self.components.recorder.as_ref(), ctx, &identifier, decision).await)
    }

    async fn complete_password_change(
        &self,
        ticket: &str,
        new_password: &str,
        ctx: &RequestContext,
    ) -> Result<(), AuthError> {
        let (ticket_id, before) = self
            .ticket_account(ticket, TicketKind::PasswordChange, ctx)
            .await?;
        if !before.is_active {
            return Err(AuthError::Invalid(INVALID_TICKET.to_string()));
        }

        let password_hash = self.check_new_password(&before, new_password).await?;

        let store = &self.components.store;
        if !store.consume_ticket(ticket_id, ctx.timestamp).await? {
            return Err(AuthError::Invalid(INVALID_TICKET.to_string()));
        }

        let mut active: accounts::ActiveModel = before.clone().into();
        active.password_hash = Set(password_hash);
        active.password_changed_at = Set(Some(ctx.timestamp));
        active.must_change_password = Set(false);
        let after = store.update_account(active).await?;

        let ctx = ctx.clone().with_actor(AccountId::from(after.id));
        audit_updated(
            self.components.recorder.as_ref(),
            &ctx,
            &before,
            &after,
            json!({ "forced_change": true }),
        )
        .await;

        info!(target: "centergate::security", account_id = %after.id, "Forced password change completed");
        Ok(())
    }

    async fn issue_reset_token(
        &self,
        identifier: &str,
        ctx: &RequestContext,
    ) -> Result<Option<String>, AuthError> {
        let c = &self.components;
        let before = match c.store.resolve_identity(identifier).await? {
            IdentityResolution::Found(account) if account.is_active => *account,
            _ => {
                warn!(
                    target: "centergate::security",
                    identifier,
                    "Reset token requested for unknown or inactive identity"
                );
                return Ok(None);
            }
        };

        let token = generate_token();
        let expires_at = ctx.timestamp + Duration::hours(i64::from(c.security.reset_token_hours));

        let mut active: accounts::ActiveModel = before.clone().into();
        active.reset_token_hash = Set(Some(token_digest(&token)));
        active.reset_token_issued_at = Set(Some(ctx.timestamp));
        active.reset_token_expires_at = Set(Some(expires_at));
        let after = c.store.update_account(active).await?;

        audit_updated(
            c.recorder.as_ref(),
            ctx,
            &before,
            &after,
            json!({ "event": "reset-token-issued", "expires_at": expires_at }),
        )
        .await;

        Ok(Some(token))
    }

    async fn reset_password(
        &self,
        identifier: &str,
        token: &str,
        new_password: &str,
        ctx: &RequestContext,
    ) -> Result<(), AuthError> {
        let c = &self.components;
        let IdentityResolution::Found(before) = c.store.resolve_identity(identifier).await? else {
            return Err(AuthError::Invalid(INVALID_RESET.to_string()));
        };
        if !before.is_active || before.reset_token_hash.is_none() {
            return Err(AuthError::Invalid(INVALID_RESET.to_string()));
        }

        let password_hash = self.check_new_password(&before, new_password).await?;

        let consumed = c
            .store
            .consume_reset_token(
                before.id,
                &token_digest(token.trim()),
                password_hash,
                ctx.timestamp,
            )
            .await?;
        if !consumed {
            warn!(
                target: "centergate::security",
                account_id = %before.id,
                "Rejected reset token"
            );
            return Err(AuthError::Invalid(INVALID_RESET.to_string()));
        }

        let Some(after) = c.store.get_account(before.id).await? else {
            return Err(AuthError::Internal(format!(
                "Account {} vanished after password reset",
                before.id
            )));
        };
        let ctx = ctx.clone().with_actor(AccountId::from(after.id));
        audit_updated(
            c.recorder.as_ref(),
            &ctx,
            &*before,
            &after,
            json!({ "event": "reset-token-consumed" }),
        )
        .await;

        Ok(())
    }

    async fn logout(&self, session: &SessionSecurity, ctx: &RequestContext) {
        let record = AuditRecord::new(AuditAction::Logout)
            .actor(Some(session.account_id))
            .unit(session.current_unit)
            .resource(ResourceRef::new("account", session.account_id))
            .detail(json!({
                "session_seconds": (ctx.timestamp - session.issued_at).num_seconds(),
                "emergency": session.emergency,
            }));
        self.components.recorder.record(ctx, record).await;

        info!(
            target: "centergate::security",
            account_id = %session.account_id,
            "Logout"
        );
    }
}
