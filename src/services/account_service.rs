//! Domain service for account administration.
//!
//! Accounts are created by an administrator, never by self-registration, and
//! are never hard-deleted.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::context::RequestContext;
use crate::db::Account;
use crate::domain::validation::PasswordOwner;
use crate::domain::{AccountId, Role};

/// Input for [`AccountService::create_account`].
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub login_name: String,
    pub employee_code: String,
    pub display_name: String,
    pub password: String,
    pub role: Role,
    pub is_superuser: bool,
    pub is_multi_unit: bool,
    pub must_change_password: bool,
}

/// Returned once by enrollment; the secret is not retrievable afterwards.
#[derive(Debug, Clone)]
pub struct SecondFactorEnrollment {
    pub secret_base32: String,
    pub otpauth_url: String,
}

/// Errors specific to account operations.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("Identity already in use: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AccountError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AccountError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

/// Identity fields a password for `account` must not contain.
#[must_use]
pub fn password_owner(account: &Account) -> PasswordOwner<'_> {
    PasswordOwner {
        login_name: Some(&account.login_name),
        employee_code: Some(&account.employee_code),
    }
}

/// Domain service trait for accounts. Every mutation is audited.
#[async_trait::async_trait]
pub trait AccountService: Send + Sync {
    async fn create_account(
        &self,
        ctx: &RequestContext,
        account: NewAccount,
    ) -> Result<Account, AccountError>;

    async fn get_account(&self, id: AccountId) -> Result<Account, AccountError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, AccountError>;

    /// Active accounts still locked out at `now`.
    async fn locked_accounts(&self, now: DateTime<Utc>) -> Result<Vec<Account>, AccountError>;

    /// Active accounts that must change their password at next login,
    /// either flagged or past the expiry window.
    async fn password_expired(&self, now: DateTime<Utc>) -> Result<Vec<Account>, AccountError>;

    /// Soft delete.
    async fn deactivate(&self, ctx: &RequestContext, id: AccountId)
    -> Result<Account, AccountError>;

    async fn reactivate(&self, ctx: &RequestContext, id: AccountId)
    -> Result<Account, AccountError>;

    /// Clears the primary lock and failure counter.
    async fn unlock(&self, ctx: &RequestContext, id: AccountId) -> Result<Account, AccountError>;

    async fn require_password_change(
        &self,
        ctx: &RequestContext,
        id: AccountId,
    ) -> Result<Account, AccountError>;

    async fn enroll_second_factor(
        &self,
        ctx: &RequestContext,
        id: AccountId,
    ) -> Result<SecondFactorEnrollment, AccountError>;

    async fn disable_second_factor(
        &self,
        ctx: &RequestContext,
        id: AccountId,
    ) -> Result<Account, AccountError>;

    /// Self-service change; the current password must be supplied.
    async fn change_password(
        &self,
        ctx: &RequestContext,
        id: AccountId,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AccountError>;
}
