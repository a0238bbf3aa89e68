//! Login chain behaviour against a real database: lockout, account state,
//! unit assignment and the one-audit-entry-per-login rule.

use centergate::config::Config;
use centergate::context::RequestContext;
use centergate::db::{Account, Center};
use centergate::domain::{AccountId, AuditAction, Role, UnitId};
use centergate::services::auth_service::RejectReason;
use centergate::services::{LoginAttempt, LoginOutcome, NewAccount, NewCenter, PublicReason};
use centergate::state::SharedState;
use centergate::entities::{accounts, centers};
use chrono::{Duration, Utc};
use futures::future::join_all;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};

const PASSWORD: &str = "Tr0ub4dor&Zq!9x";
const WRONG_PASSWORD: &str = "Wr0ng&Guess!7k";

fn test_config() -> Config {
    let db_path =
        std::env::temp_dir().join(format!("centergate-auth-test-{}.db", uuid::Uuid::new_v4()));

    let mut config = Config::default();
    config.general.database_path = format!("sqlite:{}", db_path.display());
    config.security.argon2_memory_cost_kib = 1024;
    config.security.argon2_time_cost = 1;
    config.observability.metrics_enabled = false;
    config
}

async fn spawn_state(config: Config) -> SharedState {
    SharedState::new(config)
        .await
        .expect("failed to create shared state")
}

fn ctx() -> RequestContext {
    RequestContext::new(
        Some("10.0.0.5".parse().unwrap()),
        Some("auth-tests/1.0".to_string()),
    )
}

async fn seed_center(state: &SharedState, code: &str) -> Center {
    state
        .gate
        .create_center(
            &RequestContext::system("tests"),
            NewCenter {
                code: code.to_string(),
                name: format!("{code} residence"),
                capacity: 40,
                administrator: None,
            },
        )
        .await
        .expect("failed to create center")
}

async fn seed_account(
    state: &SharedState,
    login: &str,
    code: &str,
    multi_unit: bool,
) -> Account {
    state
        .accounts
        .create_account(
            &RequestContext::system("tests"),
            NewAccount {
                login_name: login.to_string(),
                employee_code: code.to_string(),
                display_name: format!("{login} test"),
                password: PASSWORD.to_string(),
                role: Role::Nurse,
                is_superuser: false,
                is_multi_unit: multi_unit,
                must_change_password: false,
            },
        )
        .await
        .expect("failed to create account")
}

/// An account assigned to a fresh center, ready to log in.
async fn seed_assigned(state: &SharedState, login: &str, code: &str) -> (Account, Center) {
    let center = seed_center(state, "NORTH").await;
    let account = seed_account(state, login, code, false).await;
    state
        .gate
        .assign(
            &RequestContext::system("tests"),
            AccountId::from(account.id),
            UnitId::from(center.id),
            true,
        )
        .await
        .expect("failed to assign");
    (account, center)
}

async fn login_entries(state: &SharedState) -> usize {
    state
        .recorder
        .by_action(AuditAction::Login)
        .await
        .expect("audit query failed")
        .len()
}

fn rejection_reason(outcome: &LoginOutcome) -> RejectReason {
    outcome
        .rejection()
        .map(|r| r.reason)
        .expect("expected a rejection")
}

#[tokio::test]
async fn test_valid_login_by_login_name_and_employee_code() {
    let state = spawn_state(test_config()).await;
    let (account, _) = seed_assigned(&state, "mnurse", "NU12345").await;

    let outcome = state
        .auth
        .login(LoginAttempt::new("mnurse", PASSWORD), &ctx())
        .await
        .unwrap();
    let LoginOutcome::Accepted(accepted) = outcome else {
        panic!("expected acceptance, got {outcome:?}");
    };
    assert_eq!(accepted.account.id, account.id);
    assert!(!accepted.emergency);

    // Employee code lookup is case-insensitive
    let outcome = state
        .auth
        .login(LoginAttempt::new("nu12345", PASSWORD), &ctx())
        .await
        .unwrap();
    assert!(outcome.is_accepted());

    let refreshed = state
        .accounts
        .get_account(AccountId::from(account.id))
        .await
        .unwrap();
    assert_eq!(refreshed.failed_attempt_count, 0);
    assert!(refreshed.last_login_at.is_some());
}

#[tokio::test]
async fn test_lockout_after_threshold_and_release_after_expiry() {
    let state = spawn_state(test_config()).await;
    let (account, _) = seed_assigned(&state, "lnurse", "NU20001").await;
    let start = ctx();
    let now = start.timestamp;

    for expected_remaining in (1..=4).rev() {
        let outcome = state
            .auth
            .login(LoginAttempt::new("lnurse", WRONG_PASSWORD), &start)
            .await
            .unwrap();
        let rejection = outcome.rejection().unwrap();
        assert_eq!(rejection.reason, RejectReason::BadCredential);
        assert_eq!(rejection.remaining_attempts, Some(expected_remaining));
        assert!(rejection.locked_until.is_none());
    }

    // Fifth failure locks
    let outcome = state
        .auth
        .login(LoginAttempt::new("lnurse", WRONG_PASSWORD), &start)
        .await
        .unwrap();
    let rejection = outcome.rejection().unwrap();
    assert_eq!(rejection.reason, RejectReason::BadCredential);
    assert_eq!(rejection.locked_until, Some(now + Duration::minutes(30)));
    assert_eq!(rejection.public_reason(), PublicReason::AccountLocked);

    // Correct password is refused while locked and the counter does not move
    let during = RequestContext::new(None, None).at(now + Duration::minutes(10));
    let outcome = state
        .auth
        .login(LoginAttempt::new("lnurse", PASSWORD), &during)
        .await
        .unwrap();
    assert_eq!(rejection_reason(&outcome), RejectReason::Locked);

    let locked = state
        .accounts
        .get_account(AccountId::from(account.id))
        .await
        .unwrap();
    assert_eq!(locked.failed_attempt_count, 5);

    // After expiry the correct password succeeds and resets the counter
    let after = RequestContext::new(None, None).at(now + Duration::minutes(31));
    let outcome = state
        .auth
        .login(LoginAttempt::new("lnurse", PASSWORD), &after)
        .await
        .unwrap();
    assert!(outcome.is_accepted());

    let released = state
        .accounts
        .get_account(AccountId::from(account.id))
        .await
        .unwrap();
    assert_eq!(released.failed_attempt_count, 0);
    assert!(released.last_failed_attempt_at.is_none());
    assert!(released.locked_until.is_none());
    assert!(released.last_login_at.is_some());
}

#[tokio::test]
async fn test_failure_after_expired_lock_relocks_immediately() {
    let state = spawn_state(test_config()).await;
    seed_assigned(&state, "rnurse", "NU20002").await;
    let now = ctx().timestamp;

    for _ in 0..5 {
        state
            .auth
            .login(LoginAttempt::new("rnurse", WRONG_PASSWORD), &ctx().at(now))
            .await
            .unwrap();
    }

    let later = now + Duration::minutes(31);
    let outcome = state
        .auth
        .login(LoginAttempt::new("rnurse", WRONG_PASSWORD), &ctx().at(later))
        .await
        .unwrap();
    let rejection = outcome.rejection().unwrap();
    assert_eq!(rejection.reason, RejectReason::BadCredential);
    assert_eq!(rejection.locked_until, Some(later + Duration::minutes(30)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_lock_exactly_once() {
    const ATTEMPTS: usize = 8;

    let state = spawn_state(test_config()).await;
    let (account, _) = seed_assigned(&state, "cnurse", "NU20003").await;

    let handles: Vec<_> = (0..ATTEMPTS)
        .map(|_| {
            let auth = state.auth.clone();
            tokio::spawn(async move {
                auth.login(LoginAttempt::new("cnurse", WRONG_PASSWORD), &ctx())
                    .await
                    .unwrap()
            })
        })
        .collect();

    let outcomes: Vec<LoginOutcome> = join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let bad_credentials = outcomes
        .iter()
        .filter(|o| rejection_reason(o) == RejectReason::BadCredential)
        .count();
    let refused_while_locked = outcomes
        .iter()
        .filter(|o| rejection_reason(o) == RejectReason::Locked)
        .count();
    let lock_transitions = outcomes
        .iter()
        .filter(|o| {
            o.rejection().is_some_and(|r| {
                r.reason == RejectReason::BadCredential && r.locked_until.is_some()
            })
        })
        .count();

    assert_eq!(bad_credentials + refused_while_locked, ATTEMPTS);
    assert_eq!(lock_transitions, 1);

    let stored = state
        .accounts
        .get_account(AccountId::from(account.id))
        .await
        .unwrap();
    assert_eq!(
        usize::try_from(stored.failed_attempt_count).unwrap(),
        bad_credentials
    );
    assert!(stored.locked_until.is_some());
    assert_eq!(login_entries(&state).await, ATTEMPTS);
}

#[tokio::test]
async fn test_inactive_account_is_rejected_without_counting() {
    let state = spawn_state(test_config()).await;
    let (account, _) = seed_assigned(&state, "inurse", "NU20004").await;
    state
        .accounts
        .deactivate(&RequestContext::system("tests"), AccountId::from(account.id))
        .await
        .unwrap();

    let outcome = state
        .auth
        .login(LoginAttempt::new("inurse", PASSWORD), &ctx())
        .await
        .unwrap();
    let rejection = outcome.rejection().unwrap();
    assert_eq!(rejection.reason, RejectReason::Inactive);
    assert_eq!(rejection.public_reason(), PublicReason::AccountInactive);

    let outcome = state
        .auth
        .login(LoginAttempt::new("inurse", WRONG_PASSWORD), &ctx())
        .await
        .unwrap();
    assert_eq!(rejection_reason(&outcome), RejectReason::Inactive);

    let stored = state
        .accounts
        .get_account(AccountId::from(account.id))
        .await
        .unwrap();
    assert_eq!(stored.failed_attempt_count, 0);
}

#[tokio::test]
async fn test_account_without_assignment_is_rejected() {
    let state = spawn_state(test_config()).await;
    let account = seed_account(&state, "unassigned", "NU20005", false).await;
    seed_account(&state, "roamer", "AD20006", true).await;

    for _ in 0..2 {
        state
            .auth
            .login(LoginAttempt::new("unassigned", WRONG_PASSWORD), &ctx())
            .await
            .unwrap();
    }
    let before = state
        .accounts
        .get_account(AccountId::from(account.id))
        .await
        .unwrap();
    assert_eq!(before.failed_attempt_count, 2);

    let outcome = state
        .auth
        .login(LoginAttempt::new("unassigned", PASSWORD), &ctx())
        .await
        .unwrap();
    assert_eq!(rejection_reason(&outcome), RejectReason::NoUnitAssignment);
    assert_eq!(
        outcome.rejection().unwrap().public_reason(),
        PublicReason::InvalidCredentials
    );

    // A correct password here is not a successful login
    let after = state
        .accounts
        .get_account(AccountId::from(account.id))
        .await
        .unwrap();
    assert_eq!(after.failed_attempt_count, 2);
    assert_eq!(after.last_failed_attempt_at, before.last_failed_attempt_at);
    assert_eq!(after.locked_until, None);
    assert_eq!(after.last_login_at, None);

    // Multi-unit accounts need no assignment
    let outcome = state
        .auth
        .login(LoginAttempt::new("roamer", PASSWORD), &ctx())
        .await
        .unwrap();
    assert!(outcome.is_accepted());
}

#[tokio::test]
async fn test_assignment_to_deactivated_center_does_not_count() {
    let state = spawn_state(test_config()).await;
    let (_, center) = seed_assigned(&state, "dnurse", "NU20011").await;

    centers::Entity::update_many()
        .col_expr(centers::Column::IsActive, Expr::value(false))
        .filter(centers::Column::Id.eq(center.id))
        .exec(&state.store.conn)
        .await
        .unwrap();

    let outcome = state
        .auth
        .login(LoginAttempt::new("dnurse", PASSWORD), &ctx())
        .await
        .unwrap();
    assert_eq!(rejection_reason(&outcome), RejectReason::NoUnitAssignment);
}

#[tokio::test]
async fn test_unknown_and_wrong_password_look_identical() {
    let state = spawn_state(test_config()).await;
    seed_assigned(&state, "knurse", "NU20007").await;
    seed_account(&state, "lonely", "NU20012", false).await;

    let unknown = state
        .auth
        .login(LoginAttempt::new("nobody", PASSWORD), &ctx())
        .await
        .unwrap();
    let wrong = state
        .auth
        .login(LoginAttempt::new("knurse", WRONG_PASSWORD), &ctx())
        .await
        .unwrap();
    let unassigned = state
        .auth
        .login(LoginAttempt::new("lonely", PASSWORD), &ctx())
        .await
        .unwrap();

    assert_eq!(rejection_reason(&unknown), RejectReason::UnknownIdentity);
    assert_eq!(rejection_reason(&wrong), RejectReason::BadCredential);
    assert_eq!(rejection_reason(&unassigned), RejectReason::NoUnitAssignment);

    for other in [&wrong, &unassigned] {
        let (a, b) = (unknown.rejection().unwrap(), other.rejection().unwrap());
        assert_eq!(a.public_reason(), b.public_reason());
        assert_eq!(a.locked_until, b.locked_until);
    }
}

async fn backdate_password(state: &SharedState, account: &Account, days_ago: i64) {
    accounts::Entity::update_many()
        .col_expr(
            accounts::Column::PasswordChangedAt,
            Expr::value(Some(Utc::now() - Duration::days(days_ago))),
        )
        .filter(accounts::Column::Id.eq(account.id))
        .exec(&state.store.conn)
        .await
        .expect("failed to backdate password");
}

#[tokio::test]
async fn test_password_older_than_expiry_requires_change() {
    let state = spawn_state(test_config()).await;
    let (account, _) = seed_assigned(&state, "onurse", "NU20013").await;

    backdate_password(&state, &account, 89).await;
    let outcome = state
        .auth
        .login(LoginAttempt::new("onurse", PASSWORD), &ctx())
        .await
        .unwrap();
    assert!(outcome.is_accepted());

    backdate_password(&state, &account, 91).await;
    let outcome = state
        .auth
        .login(LoginAttempt::new("onurse", PASSWORD), &ctx())
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        LoginOutcome::Pending {
            kind: centergate::db::TicketKind::PasswordChange,
            ..
        }
    ));
    assert_eq!(outcome_tag(&state, "onurse").await, "password-change-required");

    let expired = state.accounts.password_expired(Utc::now()).await.unwrap();
    assert_eq!(
        expired.iter().map(|a| a.id).collect::<Vec<_>>(),
        vec![account.id]
    );
}

#[tokio::test]
async fn test_exactly_one_audit_entry_per_login() {
    let state = spawn_state(test_config()).await;
    let (account, _) = seed_assigned(&state, "anurse", "NU20008").await;

    let attempts = [
        LoginAttempt::new("anurse", PASSWORD),
        LoginAttempt::new("anurse", WRONG_PASSWORD),
        LoginAttempt::new("ghost", PASSWORD),
    ];
    for (n, attempt) in attempts.into_iter().enumerate() {
        state.auth.login(attempt, &ctx()).await.unwrap();
        assert_eq!(login_entries(&state).await, n + 1);
    }

    let entries = state
        .recorder
        .by_action(AuditAction::Login)
        .await
        .unwrap();
    let success = entries
        .iter()
        .find(|e| e.detail["success"] == serde_json::json!(true))
        .expect("missing success entry");
    assert_eq!(success.actor_id, Some(account.id));
    assert_eq!(success.ip_address.as_deref(), Some("10.0.0.5"));

    let unknown = entries
        .iter()
        .find(|e| e.detail["reason"] == serde_json::json!("unknown-identity"))
        .expect("missing unknown-identity entry");
    assert_eq!(unknown.actor_id, None);
    assert_eq!(unknown.detail["attempted_identifier"], serde_json::json!("ghost"));
    assert!(unknown.detail.get("password").is_none());
}

#[tokio::test]
async fn test_audit_failure_does_not_fail_login() {
    let state = spawn_state(test_config()).await;
    seed_assigned(&state, "fnurse", "NU20009").await;

    state
        .store
        .conn
        .execute_unprepared("DROP TABLE audit_entries")
        .await
        .unwrap();

    let outcome = state
        .auth
        .login(LoginAttempt::new("fnurse", PASSWORD), &ctx())
        .await
        .unwrap();
    assert!(outcome.is_accepted());
}

#[tokio::test]
async fn test_forced_password_change_yields_pending_ticket() {
    let state = spawn_state(test_config()).await;
    let (account, _) = seed_assigned(&state, "pnurse", "NU20010").await;
    state
        .accounts
        .require_password_change(&RequestContext::system("tests"), AccountId::from(account.id))
        .await
        .unwrap();

    let outcome = state
        .auth
        .login(LoginAttempt::new("pnurse", PASSWORD), &ctx())
        .await
        .unwrap();
    let LoginOutcome::Pending { ticket, .. } = outcome else {
        panic!("expected a pending password change, got {outcome:?}");
    };
    assert_eq!(outcome_tag(&state, "pnurse").await, "password-change-required");

    let new_password = "Gl4cier#Moss27";
    state
        .auth
        .complete_password_change(&ticket, new_password, &ctx())
        .await
        .unwrap();

    // The ticket is single use
    assert!(
        state
            .auth
            .complete_password_change(&ticket, "Hx9!pLm2#vRt", &ctx())
            .await
            .is_err()
    );

    let outcome = state
        .auth
        .login(LoginAttempt::new("pnurse", new_password), &ctx())
        .await
        .unwrap();
    assert!(outcome.is_accepted());
}

async fn outcome_tag(state: &SharedState, identifier: &str) -> &'static str {
    state
        .auth
        .login(LoginAttempt::new(identifier, PASSWORD), &ctx())
        .await
        .unwrap()
        .reason_tag()
}

#[tokio::test]
async fn test_emergency_access_bypasses_lockout_when_enabled() {
    let mut config = test_config();
    config.emergency.enabled = true;
    config.emergency.code = "break-glass-7731".to_string();
    let state = spawn_state(config).await;

    let admin = state
        .accounts
        .create_account(
            &RequestContext::system("tests"),
            NewAccount {
                login_name: "root.admin".to_string(),
                employee_code: "AD90001".to_string(),
                display_name: "Root Admin".to_string(),
                password: PASSWORD.to_string(),
                role: Role::Administrator,
                is_superuser: true,
                is_multi_unit: true,
                must_change_password: false,
            },
        )
        .await
        .unwrap();

    for _ in 0..5 {
        state
            .auth
            .login(LoginAttempt::new("root.admin", WRONG_PASSWORD), &ctx())
            .await
            .unwrap();
    }

    let wrong_code = state
        .auth
        .login(
            LoginAttempt::new("root.admin", PASSWORD).with_emergency_code("guess"),
            &ctx(),
        )
        .await
        .unwrap();
    assert_eq!(rejection_reason(&wrong_code), RejectReason::EmergencyDenied);

    let outcome = state
        .auth
        .login(
            LoginAttempt::new("root.admin", PASSWORD).with_emergency_code("break-glass-7731"),
            &ctx(),
        )
        .await
        .unwrap();
    let LoginOutcome::Accepted(accepted) = outcome else {
        panic!("expected emergency acceptance, got {outcome:?}");
    };
    assert!(accepted.emergency);

    // Emergency access leaves the counters alone
    let stored = state
        .accounts
        .get_account(AccountId::from(admin.id))
        .await
        .unwrap();
    assert_eq!(stored.failed_attempt_count, 5);
    assert!(stored.locked_until.is_some());
}

#[tokio::test]
async fn test_emergency_code_ignored_when_disabled() {
    let state = spawn_state(test_config()).await;
    seed_assigned(&state, "enurse", "NU20011").await;

    let outcome = state
        .auth
        .login(
            LoginAttempt::new("enurse", PASSWORD).with_emergency_code("anything"),
            &ctx(),
        )
        .await
        .unwrap();
    let LoginOutcome::Accepted(accepted) = outcome else {
        panic!("expected normal acceptance, got {outcome:?}");
    };
    assert!(!accepted.emergency);
}

#[tokio::test]
async fn test_empty_credentials_are_invalid_input() {
    let state = spawn_state(test_config()).await;
    assert!(
        state
            .auth
            .login(LoginAttempt::new("  ", PASSWORD), &ctx())
            .await
            .is_err()
    );
    assert!(
        state
            .auth
            .login(LoginAttempt::new("someone", ""), &ctx())
            .await
            .is_err()
    );
    assert_eq!(login_entries(&state).await, 0);
}
