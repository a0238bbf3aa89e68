use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::warn;
use uuid::Uuid;

use crate::entities::accounts;
use crate::services::lockout::{FailureOutcome, LockoutPolicy, LockoutState};

/// Outcome of looking an identifier up against both identity fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityResolution {
    Found(Box<accounts::Model>),
    NotFound,
    /// More than one account matched; an integrity violation.
    Ambiguous(usize),
}

/// Which failure counter on the account row an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutCounter {
    Primary,
    SecondFactor,
}

pub struct AccountRepository {
    conn: DatabaseConnection,
}

impl AccountRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Matches `identifier` against the login name, or the upper-cased
    /// identifier against the employee code.
    ///
    /// Active accounts win over inactive ones so that a deactivated duplicate
    /// does not shadow the live account.
    pub async fn resolve(&self, identifier: &str) -> Result<IdentityResolution> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Ok(IdentityResolution::NotFound);
        }

        let matches = accounts::Entity::find()
            .filter(
                Condition::any()
                    .add(accounts::Column::LoginName.eq(identifier))
                    .add(accounts::Column::EmployeeCode.eq(identifier.to_uppercase())),
            )
            .all(&self.conn)
            .await
            .context("Failed to resolve account identifier")?;

        let (active, inactive): (Vec<_>, Vec<_>) =
            matches.into_iter().partition(|account| account.is_active);

        let pool = if active.is_empty() { inactive } else { active };
        Ok(match pool.len() {
            0 => IdentityResolution::NotFound,
            1 => pool
                .into_iter()
                .next()
                .map_or(IdentityResolution::NotFound, |a| {
                    IdentityResolution::Found(Box::new(a))
                }),
            n => IdentityResolution::Ambiguous(n),
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<accounts::Model>> {
        accounts::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query account by ID")
    }

    pub async fn list(&self) -> Result<Vec<accounts::Model>> {
        accounts::Entity::find()
            .order_by_asc(accounts::Column::LoginName)
            .all(&self.conn)
            .await
            .context("Failed to list accounts")
    }

    /// Active accounts whose primary lock is still in force at `now`.
    pub async fn list_locked(&self, now: DateTime<Utc>) -> Result<Vec<accounts::Model>> {
        accounts::Entity::find()
            .filter(accounts::Column::IsActive.eq(true))
            .filter(accounts::Column::LockedUntil.gt(now))
            .order_by_asc(accounts::Column::LockedUntil)
            .all(&self.conn)
            .await
            .context("Failed to list locked accounts")
    }

    /// Active accounts flagged for a change or whose password was last set
    /// before `changed_before`.
    pub async fn list_password_expired(
        &self,
        changed_before: DateTime<Utc>,
    ) -> Result<Vec<accounts::Model>> {
        accounts::Entity::find()
            .filter(accounts::Column::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(accounts::Column::MustChangePassword.eq(true))
                    .add(accounts::Column::PasswordChangedAt.lt(changed_before)),
            )
            .order_by_asc(accounts::Column::LoginName)
            .all(&self.conn)
            .await
            .context("Failed to list accounts with expired passwords")
    }

    /// True when any value is already used as a login name or employee code.
    pub async fn identity_taken(&self, values: &[&str]) -> Result<bool> {
        let upper: Vec<String> = values.iter().map(|v| v.to_uppercase()).collect();
        let mut condition = Condition::any();
        for value in values {
            condition = condition.add(accounts::Column::LoginName.eq(*value));
        }
        for value in &upper {
            condition = condition.add(accounts::Column::EmployeeCode.eq(value.as_str()));
        }

        let found = accounts::Entity::find()
            .filter(condition)
            .one(&self.conn)
            .await
            .context("Failed to check identity uniqueness")?;

        Ok(found.is_some())
    }

    pub async fn insert(&self, model: accounts::ActiveModel) -> Result<accounts::Model> {
        model
            .insert(&self.conn)
            .await
            .context("Failed to insert account")
    }

    pub async fn update(&self, mut model: accounts::ActiveModel) -> Result<accounts::Model> {
        model.updated_at = Set(Utc::now());
        model
            .update(&self.conn)
            .await
            .context("Failed to update account")
    }

    /// Counts one failed attempt and applies the lock threshold.
    ///
    /// The increment is issued before the row is read, inside one
    /// transaction, so concurrent failures serialize on the row write lock and
    /// none of them is lost.
    pub async fn record_failure(
        &self,
        id: Uuid,
        counter: LockoutCounter,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome> {
        let txn = self
            .conn
            .begin()
            .await
            .context("Failed to open lockout transaction")?;

        let mut update = accounts::Entity::update_many().filter(accounts::Column::Id.eq(id));
        update = match counter {
            LockoutCounter::Primary => update
                .col_expr(
                    accounts::Column::FailedAttemptCount,
                    Expr::col(accounts::Column::FailedAttemptCount).add(1),
                )
                .col_expr(accounts::Column::LastFailedAttemptAt, Expr::value(now)),
            LockoutCounter::SecondFactor => update.col_expr(
                accounts::Column::SecondFactorFailedCount,
                Expr::col(accounts::Column::SecondFactorFailedCount).add(1),
            ),
        };
        let result = update
            .exec(&txn)
            .await
            .context("Failed to increment failure counter")?;
        if result.rows_affected == 0 {
            anyhow::bail!("Account {id} disappeared while recording a failure");
        }

        let account = accounts::Entity::find_by_id(id)
            .one(&txn)
            .await
            .context("Failed to re-read account after increment")?
            .ok_or_else(|| anyhow::anyhow!("Account {id} not found"))?;

        let after = match counter {
            LockoutCounter::Primary => LockoutState::primary(&account),
            LockoutCounter::SecondFactor => LockoutState::second_factor(&account),
        };
        let before = LockoutState {
            failed_attempts: after.failed_attempts.saturating_sub(1),
            ..after
        };
        let outcome = policy.record_failure(&before, now);

        if outcome.newly_locked {
            let lock_column = match counter {
                LockoutCounter::Primary => accounts::Column::LockedUntil,
                LockoutCounter::SecondFactor => accounts::Column::SecondFactorLockedUntil,
            };
            accounts::Entity::update_many()
                .col_expr(lock_column, Expr::value(outcome.state.locked_until))
                .filter(accounts::Column::Id.eq(id))
                .exec(&txn)
                .await
                .context("Failed to set lock expiry")?;
            warn!(
                target: "centergate::security",
                account_id = %id,
                counter = ?counter,
                failed_attempts = outcome.state.failed_attempts,
                "Account locked after repeated failures"
            );
        }

        txn.commit()
            .await
            .context("Failed to commit lockout transaction")?;

        Ok(outcome)
    }

    /// Writes the post-success lockout states for both counters and stamps
    /// the login time.
    pub async fn record_success(
        &self,
        id: Uuid,
        primary: &LockoutState,
        second_factor: &LockoutState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        accounts::Entity::update_many()
            .col_expr(
                accounts::Column::FailedAttemptCount,
                Expr::value(i32::try_from(primary.failed_attempts).unwrap_or(i32::MAX)),
            )
            .col_expr(
                accounts::Column::LastFailedAttemptAt,
                Expr::value(primary.last_failed_at),
            )
            .col_expr(accounts::Column::LockedUntil, Expr::value(primary.locked_until))
            .col_expr(
                accounts::Column::SecondFactorFailedCount,
                Expr::value(i32::try_from(second_factor.failed_attempts).unwrap_or(i32::MAX)),
            )
            .col_expr(
                accounts::Column::SecondFactorLockedUntil,
                Expr::value(second_factor.locked_until),
            )
            .col_expr(accounts::Column::LastLoginAt, Expr::value(now))
            .filter(accounts::Column::Id.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to record successful login")?;
        Ok(())
    }

    /// Sets the new password and clears the reset token in one statement.
    ///
    /// Only succeeds while the stored hash still matches and has not expired,
    /// so a token can be redeemed at most once.
    pub async fn consume_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        new_password_hash: String,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = accounts::Entity::update_many()
            .col_expr(accounts::Column::PasswordHash, Expr::value(new_password_hash))
            .col_expr(accounts::Column::PasswordChangedAt, Expr::value(now))
            .col_expr(accounts::Column::MustChangePassword, Expr::value(false))
            .col_expr(
                accounts::Column::ResetTokenHash,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                accounts::Column::ResetTokenIssuedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(
                accounts::Column::ResetTokenExpiresAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(accounts::Column::UpdatedAt, Expr::value(now))
            .filter(accounts::Column::Id.eq(id))
            .filter(accounts::Column::ResetTokenHash.eq(token_hash))
            .filter(accounts::Column::ResetTokenExpiresAt.gt(now))
            .exec(&self.conn)
            .await
            .context("Failed to consume reset token")?;

        Ok(result.rows_affected == 1)
    }
}
