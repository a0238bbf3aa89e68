//! Failed-attempt counting and temporary lockout.
//!
//! [`LockoutPolicy`] is a pure state machine over [`LockoutState`]. Callers
//! load the state from an account row, ask the policy what the next state is,
//! and persist it. The same machine drives both the primary password counter
//! and the separate, shorter second-factor counter.
//!
//! The counter is only cleared by a successful authentication or an explicit
//! unlock. An expired lock leaves the counter at or above the threshold, so a
//! single further failure locks the account again.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::LockoutConfig;
use crate::db::Account;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LockoutState {
    pub failed_attempts: u32,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    #[must_use]
    pub fn primary(account: &Account) -> Self {
        Self {
            failed_attempts: u32::try_from(account.failed_attempt_count).unwrap_or(0),
            last_failed_at: account.last_failed_attempt_at,
            locked_until: account.locked_until,
        }
    }

    /// The second-factor counter does not track a last-failure timestamp.
    #[must_use]
    pub fn second_factor(account: &Account) -> Self {
        Self {
            failed_attempts: u32::try_from(account.second_factor_failed_count).unwrap_or(0),
            last_failed_at: None,
            locked_until: account.second_factor_locked_until,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Open,
    Locked { until: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub state: LockoutState,
    /// True only for the failure that moved the state into `Locked`.
    pub newly_locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    max_attempts: u32,
    lockout_duration: Duration,
}

impl LockoutPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, lockout_duration: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            lockout_duration,
        }
    }

    #[must_use]
    pub fn from_config(config: &LockoutConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::minutes(i64::from(config.lockout_minutes)),
        )
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }

    #[must_use]
    pub fn is_locked(&self, state: &LockoutState, now: DateTime<Utc>) -> bool {
        state.locked_until.is_some_and(|until| now < until)
    }

    #[must_use]
    pub fn status(&self, state: &LockoutState, now: DateTime<Utc>) -> LockStatus {
        match state.locked_until {
            Some(until) if now < until => LockStatus::Locked { until },
            _ => LockStatus::Open,
        }
    }

    /// Applies one failed attempt.
    ///
    /// A failure against an account that is still locked keeps the existing
    /// expiry, so concurrent failures produce a single lock transition.
    #[must_use]
    pub fn record_failure(&self, state: &LockoutState, now: DateTime<Utc>) -> FailureOutcome {
        let failed_attempts = state.failed_attempts.saturating_add(1);
        let already_locked = self.is_locked(state, now);
        let newly_locked = failed_attempts >= self.max_attempts && !already_locked;

        let locked_until = if newly_locked {
            Some(now + self.lockout_duration)
        } else {
            state.locked_until
        };

        FailureOutcome {
            state: LockoutState {
                failed_attempts,
                last_failed_at: Some(now),
                locked_until,
            },
            newly_locked,
        }
    }

    #[must_use]
    pub const fn record_success(&self, _state: &LockoutState) -> LockoutState {
        LockoutState {
            failed_attempts: 0,
            last_failed_at: None,
            locked_until: None,
        }
    }

    /// Attempts left before the next failure locks the account.
    #[must_use]
    pub const fn remaining_attempts(&self, state: &LockoutState) -> u32 {
        self.max_attempts.saturating_sub(state.failed_attempts)
    }
}
