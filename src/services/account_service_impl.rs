//! `SeaORM` implementation of the `AccountService` trait.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::Set;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::db::{Account, Store};
use crate::domain::AccountId;
use crate::domain::validation::{
    PasswordOwner, normalize_employee_code, validate_login_name, validate_password,
};
use crate::entities::accounts;
use crate::services::account_service::{
    AccountError, AccountService, NewAccount, SecondFactorEnrollment, password_owner,
};
use crate::services::audit_service::{AuditRecorder, audit_created, audit_updated};
use crate::services::secrets::SecretVerifier;

pub struct SeaOrmAccountService {
    store: Store,
    verifier: Arc<SecretVerifier>,
    recorder: Arc<dyn AuditRecorder>,
    password_expiry: Duration,
}

impl SeaOrmAccountService {
    #[must_use]
    pub fn new(
        store: Store,
        verifier: Arc<SecretVerifier>,
        recorder: Arc<dyn AuditRecorder>,
        password_expiry_days: u32,
    ) -> Self {
        Self {
            store,
            verifier,
            recorder,
            password_expiry: Duration::days(i64::from(password_expiry_days)),
        }
    }

    async fn load(&self, id: AccountId) -> Result<Account, AccountError> {
        self.store
            .get_account(id.value())
            .await?
            .ok_or_else(|| AccountError::NotFound(id.to_string()))
    }

    /// Applies `apply` to the stored row and audits the resulting diff.
    async fn mutate<F>(
        &self,
        ctx: &RequestContext,
        id: AccountId,
        detail: Value,
        apply: F,
    ) -> Result<Account, AccountError>
    where
        F: FnOnce(&mut accounts::ActiveModel) + Send,
    {
        let before = self.load(id).await?;
        let mut active: accounts::ActiveModel = before.clone().into();
        apply(&mut active);
        let after = self.store.update_account(active).await?;

        audit_updated(self.recorder.as_ref(), ctx, &before, &after, detail).await;
        Ok(after)
    }
}

#[async_trait]
impl AccountService for SeaOrmAccountService {
    async fn create_account(
        &self,
        ctx: &RequestContext,
        account: NewAccount,
    ) -> Result<Account, AccountError> {
        let login_name = validate_login_name(&account.login_name)
            .map_err(AccountError::Invalid)?
            .to_string();
        let employee_code =
            normalize_employee_code(&account.employee_code).map_err(AccountError::Invalid)?;
        let display_name = account.display_name.trim();
        if display_name.is_empty() {
            return Err(AccountError::Invalid("Display name is required".to_string()));
        }

        if self
            .store
            .identity_taken(&[login_name.as_str(), employee_code.as_str()])
            .await?
        {
            return Err(AccountError::Conflict(format!(
                "{login_name} / {employee_code}"
            )));
        }

        validate_password(
            &account.password,
            PasswordOwner {
                login_name: Some(&login_name),
                employee_code: Some(&employee_code),
            },
        )
        .map_err(|violations| AccountError::Invalid(violations.to_string()))?;

        let password_hash = self.verifier.hash_password(&account.password).await?;
        let now = ctx.timestamp;

        let created = self
            .store
            .insert_account(accounts::ActiveModel {
                id: Set(Uuid::new_v4()),
                login_name: Set(login_name),
                employee_code: Set(employee_code),
                display_name: Set(display_name.to_string()),
                password_hash: Set(password_hash),
                role: Set(account.role),
                is_superuser: Set(account.is_superuser),
                is_multi_unit: Set(account.is_multi_unit),
                is_active: Set(true),
                failed_attempt_count: Set(0),
                last_failed_attempt_at: Set(None),
                locked_until: Set(None),
                second_factor_failed_count: Set(0),
                second_factor_locked_until: Set(None),
                password_changed_at: Set(Some(now)),
                must_change_password: Set(account.must_change_password),
                two_factor_enabled: Set(false),
                totp_secret_enc: Set(None),
                reset_token_hash: Set(None),
                reset_token_issued_at: Set(None),
                reset_token_expires_at: Set(None),
                last_login_at: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            })
            .await?;

        audit_created(self.recorder.as_ref(), ctx, &created).await;
        info!(
            account_id = %created.id,
            login_name = %created.login_name,
            role = %created.role.as_str(),
            "Account created"
        );
        Ok(created)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account, AccountError> {
        self.load(id).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, AccountError> {
        Ok(self.store.list_accounts().await?)
    }

    async fn locked_accounts(&self, now: DateTime<Utc>) -> Result<Vec<Account>, AccountError> {
        Ok(self.store.locked_accounts(now).await?)
    }

    async fn password_expired(&self, now: DateTime<Utc>) -> Result<Vec<Account>, AccountError> {
        Ok(self
            .store
            .password_expired_accounts(now - self.password_expiry)
            .await?)
    }

    async fn deactivate(
        &self,
        ctx: &RequestContext,
        id: AccountId,
    ) -> Result<Account, AccountError> {
        self.mutate(ctx, id, json!({ "event": "deactivated" }), |a| {
            a.is_active = Set(false);
        })
        .await
    }

    async fn reactivate(
        &self,
        ctx: &RequestContext,
        id: AccountId,
    ) -> Result<Account, AccountError> {
        self.mutate(ctx, id, json!({ "event": "reactivated" }), |a| {
            a.is_active = Set(true);
        })
        .await
    }

    async fn unlock(&self, ctx: &RequestContext, id: AccountId) -> Result<Account, AccountError> {
        let account = self
            .mutate(ctx, id, json!({ "event": "unlocked" }), |a| {
                a.failed_attempt_count = Set(0);
                a.last_failed_attempt_at = Set(None);
                a.locked_until = Set(None);
                a.second_factor_failed_count = Set(0);
                a.second_factor_locked_until = Set(None);
            })
            .await?;
        info!(target: "centergate::security", account_id = %account.id, "Account unlocked by operator");
        Ok(account)
    }

    async fn require_password_change(
        &self,
        ctx: &RequestContext,
        id: AccountId,
    ) -> Result<Account, AccountError> {
        self.mutate(ctx, id, json!({ "event": "password-change-required" }), |a| {
            a.must_change_password = Set(true);
        })
        .await
    }

    async fn enroll_second_factor(
        &self,
        ctx: &RequestContext,
        id: AccountId,
    ) -> Result<SecondFactorEnrollment, AccountError> {
        let account = self.load(id).await?;
        if !account.is_active {
            return Err(AccountError::Invalid("Account is inactive".to_string()));
        }

        let enrollment = self.verifier.enroll_totp(&account)?;
        let encrypted = enrollment.encrypted_secret;
        self.mutate(ctx, id, json!({ "event": "second-factor-enrolled" }), |a| {
            a.totp_secret_enc = Set(Some(encrypted));
            a.two_factor_enabled = Set(true);
            a.second_factor_failed_count = Set(0);
            a.second_factor_locked_until = Set(None);
        })
        .await?;

        Ok(SecondFactorEnrollment {
            secret_base32: enrollment.secret_base32,
            otpauth_url: enrollment.otpauth_url,
        })
    }

    async fn disable_second_factor(
        &self,
        ctx: &RequestContext,
        id: AccountId,
    ) -> Result<Account, AccountError> {
        self.mutate(ctx, id, json!({ "event": "second-factor-disabled" }), |a| {
            a.totp_secret_enc = Set(None);
            a.two_factor_enabled = Set(false);
            a.second_factor_failed_count = Set(0);
            a.second_factor_locked_until = Set(None);
        })
        .await
    }

    async fn change_password(
        &self,
        ctx: &RequestContext,
        id: AccountId,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AccountError> {
        let account = self.load(id).await?;
        if !account.is_active {
            return Err(AccountError::Invalid("Account is inactive".to_string()));
        }

        if !self
            .verifier
            .verify_password(&account, current_password)
            .await?
        {
            warn!(
                target: "centergate::security",
                account_id = %account.id,
                "Password change with wrong current password"
            );
            return Err(AccountError::Invalid(
                "Current password is incorrect".to_string(),
            ));
        }
        if current_password == new_password {
            return Err(AccountError::Invalid(
                "New password must differ from the current password.".to_string(),
            ));
        }

        validate_password(new_password, password_owner(&account))
            .map_err(|violations| AccountError::Invalid(violations.to_string()))?;

        let password_hash = self.verifier.hash_password(new_password).await?;
        let now = ctx.timestamp;
        self.mutate(ctx, id, json!({ "event": "password-changed" }), |a| {
            a.password_hash = Set(password_hash);
            a.password_changed_at = Set(Some(now));
            a.must_change_password = Set(false);
        })
        .await?;

        Ok(())
    }
}
