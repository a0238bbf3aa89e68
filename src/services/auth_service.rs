//! Domain service for authentication.
//!
//! Handles the login chain, the continuation of pending logins (second factor,
//! forced password change), password reset tokens and logout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::context::RequestContext;
use crate::db::{Account, TicketKind};
use crate::services::session_security::SessionSecurity;

/// Errors specific to authentication operations.
///
/// Rejected logins are not errors; they are [`LoginOutcome::Rejected`].
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AuthError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

/// One login request as submitted by the client.
#[derive(Clone, Default)]
pub struct LoginAttempt {
    pub identifier: String,
    pub password: String,
    pub totp_code: Option<String>,
    pub emergency_code: Option<String>,
}

impl fmt::Debug for LoginAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginAttempt")
            .field("identifier", &self.identifier)
            .field("password", &"<redacted>")
            .field("totp_code", &self.totp_code.as_ref().map(|_| "<redacted>"))
            .field(
                "emergency_code",
                &self.emergency_code.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl LoginAttempt {
    pub fn new(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_totp(mut self, code: impl Into<String>) -> Self {
        self.totp_code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_emergency_code(mut self, code: impl Into<String>) -> Self {
        self.emergency_code = Some(code.into());
        self
    }
}

/// Internal rejection reasons. These are written to the audit trail verbatim
/// and collapsed to a [`PublicReason`] before reaching the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    UnknownIdentity,
    Inactive,
    Locked,
    BadCredential,
    NoUnitAssignment,
    BadSecondFactor,
    EmergencyDenied,
}

impl RejectReason {
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::UnknownIdentity => "unknown-identity",
            Self::Inactive => "inactive",
            Self::Locked => "locked",
            Self::BadCredential => "bad-credential",
            Self::NoUnitAssignment => "no-unit-assignment",
            Self::BadSecondFactor => "bad-second-factor",
            Self::EmergencyDenied => "emergency-denied",
        }
    }

    #[must_use]
    pub const fn public(self) -> PublicReason {
        match self {
            Self::Locked => PublicReason::AccountLocked,
            Self::Inactive => PublicReason::AccountInactive,
            Self::UnknownIdentity
            | Self::BadCredential
            | Self::NoUnitAssignment
            | Self::BadSecondFactor
            | Self::EmergencyDenied => PublicReason::InvalidCredentials,
        }
    }
}

/// The only rejection reasons a caller ever sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublicReason {
    InvalidCredentials,
    AccountLocked,
    AccountInactive,
}

impl PublicReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid-credentials",
            Self::AccountLocked => "account-locked",
            Self::AccountInactive => "account-inactive",
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid credentials",
            Self::AccountLocked => "Account is temporarily locked",
            Self::AccountInactive => "Account is inactive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedLogin {
    pub account: Box<Account>,
    pub two_factor_completed: bool,
    /// Granted through the emergency path.
    pub emergency: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub remaining_attempts: Option<u32>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl Rejection {
    #[must_use]
    pub const fn new(reason: RejectReason) -> Self {
        Self {
            reason,
            remaining_attempts: None,
            locked_until: None,
        }
    }

    /// A rejection that left the account locked reads as locked to the
    /// caller, whatever the internal reason.
    #[must_use]
    pub const fn public_reason(&self) -> PublicReason {
        if self.locked_until.is_some() {
            PublicReason::AccountLocked
        } else {
            self.reason.public()
        }
    }
}

/// Terminal state of one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Accepted(AcceptedLogin),
    Pending { kind: TicketKind, ticket: String },
    Rejected(Rejection),
}

impl LoginOutcome {
    /// Name of the terminal state as written to the audit trail.
    #[must_use]
    pub const fn reason_tag(&self) -> &'static str {
        match self {
            Self::Accepted(_) => "accepted",
            Self::Pending {
                kind: TicketKind::PasswordChange,
                ..
            } => "password-change-required",
            Self::Pending {
                kind: TicketKind::SecondFactor,
                ..
            } => "second-factor-required",
            Self::Rejected(rejection) => rejection.reason.tag(),
        }
    }

    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    #[must_use]
    pub const fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }
}

/// Domain service trait for authentication.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Runs the strategy chain for one login attempt.
    ///
    /// Every returned outcome has produced exactly one `LOGIN` audit entry.
    async fn login(
        &self,
        attempt: LoginAttempt,
        ctx: &RequestContext,
    ) -> Result<LoginOutcome, AuthError>;

    /// Continues a login that stopped at `second-factor-required`.
    async fn complete_second_factor(
        &self,
        ticket: &str,
        code: &str,
        ctx: &RequestContext,
    ) -> Result<LoginOutcome, AuthError>;

    /// Rotates the password for a login that stopped at
    /// `password-change-required`. The user logs in again afterwards.
    async fn complete_password_change(
        &self,
        ticket: &str,
        new_password: &str,
        ctx: &RequestContext,
    ) -> Result<(), AuthError>;

    /// Issues a single-use reset token. `None` for unknown identifiers.
    async fn issue_reset_token(
        &self,
        identifier: &str,
        ctx: &RequestContext,
    ) -> Result<Option<String>, AuthError>;

    /// Redeems a reset token. Fails with `Invalid` for unknown identifiers,
    /// wrong, expired or already used tokens alike.
    async fn reset_password(
        &self,
        identifier: &str,
        token: &str,
        new_password: &str,
        ctx: &RequestContext,
    ) -> Result<(), AuthError>;

    async fn logout(&self, session: &SessionSecurity, ctx: &RequestContext);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_reasons_collapse() {
        assert_eq!(
            RejectReason::UnknownIdentity.public(),
            RejectReason::BadCredential.public()
        );
        assert_eq!(
            RejectReason::NoUnitAssignment.public(),
            PublicReason::InvalidCredentials
        );
        assert_eq!(RejectReason::Locked.public().as_str(), "account-locked");
        assert_eq!(RejectReason::Inactive.public().as_str(), "account-inactive");
    }

    #[test]
    fn test_attempt_debug_hides_secrets() {
        let attempt = LoginAttempt::new("mgarcia", "hunter2hunter2")
            .with_totp("123456")
            .with_emergency_code("break-glass");
        let debug = format!("{attempt:?}");
        assert!(debug.contains("mgarcia"));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("123456"));
        assert!(!debug.contains("break-glass"));
    }

    #[test]
    fn test_pending_tags() {
        let pending = LoginOutcome::Pending {
            kind: TicketKind::SecondFactor,
            ticket: "t".into(),
        };
        assert_eq!(pending.reason_tag(), "second-factor-required");
        let rejected = LoginOutcome::Rejected(Rejection::new(RejectReason::BadCredential));
        assert_eq!(rejected.reason_tag(), "bad-credential");
        assert!(!rejected.is_accepted());
    }
}
