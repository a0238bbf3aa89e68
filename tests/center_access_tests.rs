//! Multi-center isolation: authorization, scoped reads, switching and
//! assignment management.

use centergate::config::Config;
use centergate::context::RequestContext;
use centergate::db::{Account, AuditQuery, Center};
use centergate::domain::{AccountId, AuditAction, Role, UnitId};
use centergate::services::{
    AccessError, Actor, AuditRecord, NewAccount, NewCenter, ResourceRef, ensure_access,
    filter_scoped,
};
use centergate::state::SharedState;

fn test_config() -> Config {
    let db_path = std::env::temp_dir().join(format!(
        "centergate-center-test-{}.db",
        uuid::Uuid::new_v4()
    ));

    let mut config = Config::default();
    config.general.database_path = format!("sqlite:{}", db_path.display());
    config.security.argon2_memory_cost_kib = 1024;
    config.security.argon2_time_cost = 1;
    config.observability.metrics_enabled = false;
    config
}

fn admin_ctx() -> RequestContext {
    RequestContext::system("tests")
}

struct Fixture {
    state: SharedState,
    north: Center,
    south: Center,
    east: Center,
    nurse: Account,
    admin: Account,
}

impl Fixture {
    async fn new() -> Self {
        let state = SharedState::new(test_config())
            .await
            .expect("failed to create shared state");

        let mut centers = Vec::new();
        for code in ["NORTH", "SOUTH", "EAST"] {
            let center = state
                .gate
                .create_center(
                    &admin_ctx(),
                    NewCenter {
                        code: code.to_string(),
                        name: format!("{code} house"),
                        capacity: 30,
                        administrator: None,
                    },
                )
                .await
                .unwrap();
            centers.push(center);
        }
        let east = centers.pop().unwrap();
        let south = centers.pop().unwrap();
        let north = centers.pop().unwrap();

        let nurse = create(&state, "floor.nurse", "NU50001", false).await;
        let admin = create(&state, "group.admin", "AD50002", true).await;

        for (center, primary) in [(&north, true), (&south, false)] {
            state
                .gate
                .assign(
                    &admin_ctx(),
                    AccountId::from(nurse.id),
                    UnitId::from(center.id),
                    primary,
                )
                .await
                .unwrap();
        }

        Self {
            state,
            north,
            south,
            east,
            nurse,
            admin,
        }
    }

    fn nurse_actor(&self) -> Actor {
        Actor::from_account(&self.nurse, false, false)
    }

    fn admin_actor(&self) -> Actor {
        Actor::from_account(&self.admin, false, false)
    }
}

async fn create(state: &SharedState, login: &str, code: &str, multi_unit: bool) -> Account {
    state
        .accounts
        .create_account(
            &admin_ctx(),
            NewAccount {
                login_name: login.to_string(),
                employee_code: code.to_string(),
                display_name: login.to_string(),
                password: "Tr0ub4dor&Zq!9x".to_string(),
                role: if multi_unit {
                    Role::Administrator
                } else {
                    Role::Nurse
                },
                is_superuser: false,
                is_multi_unit: multi_unit,
                must_change_password: false,
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_authorize_follows_assignments() {
    let f = Fixture::new().await;
    let gate = &f.state.gate;
    let nurse = f.nurse_actor();

    assert!(gate.authorize(&nurse, UnitId::from(f.north.id)).await.unwrap());
    assert!(gate.authorize(&nurse, UnitId::from(f.south.id)).await.unwrap());
    assert!(!gate.authorize(&nurse, UnitId::from(f.east.id)).await.unwrap());

    let admin = f.admin_actor();
    for center in [&f.north, &f.south, &f.east] {
        assert!(gate.authorize(&admin, UnitId::from(center.id)).await.unwrap());
    }
}

#[tokio::test]
async fn test_filter_scoped_hides_other_centers() {
    let f = Fixture::new().await;
    let all = vec![f.north.clone(), f.south.clone(), f.east.clone()];

    let visible = filter_scoped(f.state.gate.as_ref(), &f.nurse_actor(), all.clone())
        .await
        .unwrap();
    let codes: Vec<&str> = visible.iter().map(|c| c.code.as_str()).collect();
    assert_eq!(codes, ["NORTH", "SOUTH"]);

    let everything = filter_scoped(f.state.gate.as_ref(), &f.admin_actor(), all)
        .await
        .unwrap();
    assert_eq!(everything.len(), 3);
}

#[tokio::test]
async fn test_ensure_access_distinguishes_missing_from_forbidden() {
    let f = Fixture::new().await;
    let gate = f.state.gate.as_ref();
    let nurse = f.nurse_actor();

    let ok = ensure_access(gate, &nurse, Some(f.north.clone()), "center").await;
    assert!(ok.is_ok());

    let forbidden = ensure_access(gate, &nurse, Some(f.east.clone()), "center").await;
    assert!(matches!(forbidden, Err(AccessError::Forbidden(_))));

    let missing = ensure_access::<Center>(gate, &nurse, None, "center").await;
    assert!(matches!(missing, Err(AccessError::NotFound(_))));
}

#[tokio::test]
async fn test_current_unit_resolution() {
    let f = Fixture::new().await;
    let gate = &f.state.gate;
    let nurse = f.nurse_actor();

    // No session unit: the primary assignment
    let current = gate.resolve_current_unit(&nurse, None).await.unwrap();
    assert_eq!(current.map(|c| c.id), Some(f.north.id));

    let current = gate
        .resolve_current_unit(&nurse, Some(UnitId::from(f.south.id)))
        .await
        .unwrap();
    assert_eq!(current.map(|c| c.id), Some(f.south.id));

    // A stale session unit falls back to the primary
    let current = gate
        .resolve_current_unit(&nurse, Some(UnitId::from(f.east.id)))
        .await
        .unwrap();
    assert_eq!(current.map(|c| c.id), Some(f.north.id));
}

#[tokio::test]
async fn test_switch_unit_is_authorized_and_audited() {
    let f = Fixture::new().await;
    let nurse = f.nurse_actor();
    let ctx = RequestContext::new(None, None)
        .with_actor(nurse.id)
        .with_unit(Some(UnitId::from(f.north.id)));

    let center = f
        .state
        .gate
        .switch_unit(&ctx, &nurse, UnitId::from(f.south.id))
        .await
        .unwrap();
    assert_eq!(center.id, f.south.id);

    let denied = f
        .state
        .gate
        .switch_unit(&ctx, &nurse, UnitId::from(f.east.id))
        .await;
    assert!(matches!(denied, Err(AccessError::Forbidden(_))));

    let switches: Vec<_> = f
        .state
        .recorder
        .for_actor(nurse.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.action == AuditAction::Update && e.detail["event"] == "center_switched")
        .collect();
    assert_eq!(switches.len(), 1);
    assert_eq!(switches[0].unit_id, Some(f.south.id));
}

#[tokio::test]
async fn test_primary_assignment_is_demoted_and_revoke_is_soft() {
    let f = Fixture::new().await;
    let gate = &f.state.gate;
    let nurse_id = AccountId::from(f.nurse.id);

    gate.assign(&admin_ctx(), nurse_id, UnitId::from(f.south.id), true)
        .await
        .unwrap();
    let primary = gate
        .resolve_current_unit(&f.nurse_actor(), None)
        .await
        .unwrap();
    assert_eq!(primary.map(|c| c.id), Some(f.south.id));

    let assignments = f.state.store.assignments_for_account(f.nurse.id).await.unwrap();
    assert_eq!(assignments.iter().filter(|a| a.is_primary).count(), 1);

    gate.revoke(&admin_ctx(), nurse_id, UnitId::from(f.north.id))
        .await
        .unwrap();
    assert!(
        !gate
            .authorize(&f.nurse_actor(), UnitId::from(f.north.id))
            .await
            .unwrap()
    );

    // Row kept, only deactivated
    let assignments = f.state.store.assignments_for_account(f.nurse.id).await.unwrap();
    assert_eq!(assignments.len(), 2);
    assert!(assignments.iter().any(|a| !a.is_active));

    let missing = gate
        .revoke(&admin_ctx(), nurse_id, UnitId::from(f.east.id))
        .await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn test_center_codes_are_validated_and_unique() {
    let f = Fixture::new().await;
    let duplicate = f
        .state
        .gate
        .create_center(
            &admin_ctx(),
            NewCenter {
                code: "north".to_string(),
                name: "Again".to_string(),
                capacity: 10,
                administrator: None,
            },
        )
        .await;
    assert!(duplicate.is_err());

    let invalid = f
        .state
        .gate
        .create_center(
            &admin_ctx(),
            NewCenter {
                code: "N0RTH".to_string(),
                name: "Digits".to_string(),
                capacity: 10,
                administrator: None,
            },
        )
        .await;
    assert!(matches!(invalid, Err(AccessError::Invalid(_))));
}

#[tokio::test]
async fn test_unit_scoped_audit_queries() {
    let f = Fixture::new().await;

    let north_entries = f
        .state
        .recorder
        .for_unit(UnitId::from(f.north.id))
        .await
        .unwrap();
    // Center creation and the nurse assignment
    assert!(north_entries.len() >= 2);
    assert!(
        north_entries
            .iter()
            .all(|e| e.unit_id == Some(f.north.id))
    );

    let visible = filter_scoped(
        f.state.gate.as_ref(),
        &f.nurse_actor(),
        f.state.recorder.within_window(1).await.unwrap(),
    )
    .await
    .unwrap();
    assert!(visible.iter().all(|e| e.unit_id != Some(f.east.id)));
}

#[tokio::test]
async fn test_audit_queries_return_every_match() {
    const VIEWS: usize = 250;

    let f = Fixture::new().await;
    let ctx = RequestContext::new(None, None)
        .with_actor(f.nurse_actor().id)
        .with_unit(Some(UnitId::from(f.north.id)));
    for n in 0..VIEWS {
        let record = AuditRecord::new(AuditAction::View).resource(ResourceRef::new("report", n));
        assert!(f.state.recorder.record(&ctx, record).await.is_some());
    }

    let views = f.state.recorder.by_action(AuditAction::View).await.unwrap();
    assert_eq!(views.len(), VIEWS);

    let by_nurse = f.state.recorder.for_actor(f.nurse_actor().id).await.unwrap();
    assert!(by_nurse.len() >= VIEWS);
    assert!(f.state.recorder.within_window(1).await.unwrap().len() > VIEWS);

    // An explicit limit still caps the page
    let page = f
        .state
        .recorder
        .query(&AuditQuery {
            actions: vec![AuditAction::View],
            limit: Some(20),
            ..AuditQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(page.len(), 20);
}
