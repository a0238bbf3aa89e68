use axum::{
    Extension, Router,
    body::Body,
    http::{Request, StatusCode, header},
    middleware::{self, Next},
    routing::post,
};
use centergate::api::AuditedByService;
use centergate::api::context::audit_mutations;
use centergate::config::Config;
use centergate::context::RequestContext;
use centergate::db::Center;
use centergate::domain::{AccountId, AuditAction, Role, UnitId};
use centergate::services::{NewAccount, NewCenter};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const PASSWORD: &str = "Tr0ub4dor&Zq!9x";

struct TestApp {
    state: Arc<centergate::api::AppState>,
    router: Router,
    north: Center,
    south: Center,
}

async fn spawn_app() -> TestApp {
    let db_path =
        std::env::temp_dir().join(format!("centergate-api-test-{}.db", uuid::Uuid::new_v4()));

    let mut config = Config::default();
    config.general.database_path = format!("sqlite:{}", db_path.display());
    config.security.argon2_memory_cost_kib = 1024;
    config.security.argon2_time_cost = 1;
    config.observability.metrics_enabled = false;

    let state = centergate::api::create_app_state_from_config(config, None)
        .await
        .expect("Failed to create app state");

    let ctx = RequestContext::system("api-tests");
    let shared = &state.shared;
    let mut centers = Vec::new();
    for code in ["NORTH", "SOUTH"] {
        centers.push(
            shared
                .gate
                .create_center(
                    &ctx,
                    NewCenter {
                        code: code.to_string(),
                        name: format!("{code} home"),
                        capacity: 20,
                        administrator: None,
                    },
                )
                .await
                .unwrap(),
        );
    }
    let south = centers.pop().unwrap();
    let north = centers.pop().unwrap();

    for (login, code, role, multi_unit) in [
        ("floor.nurse", "NU60001", Role::Nurse, false),
        ("house.manager", "MG60002", Role::Manager, false),
        ("group.admin", "AD60003", Role::Administrator, true),
    ] {
        let account = shared
            .accounts
            .create_account(
                &ctx,
                NewAccount {
                    login_name: login.to_string(),
                    employee_code: code.to_string(),
                    display_name: login.to_string(),
                    password: PASSWORD.to_string(),
                    role,
                    is_superuser: false,
                    is_multi_unit: multi_unit,
                    must_change_password: false,
                },
            )
            .await
            .unwrap();
        if !multi_unit {
            shared
                .gate
                .assign(
                    &ctx,
                    AccountId::from(account.id),
                    UnitId::from(north.id),
                    true,
                )
                .await
                .unwrap();
        }
    }

    let router = centergate::api::router(state.clone())
        .await
        .expect("Failed to build router");
    TestApp {
        state,
        router,
        north,
        south,
    }
}

fn login_request(identifier: &str, password: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
        .body(Body::from(
            json!({ "identifier": identifier, "password": password }).to_string(),
        ))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

/// Logs in and returns the session cookie pair.
async fn login(app: &Router, identifier: &str) -> String {
    let response = app
        .clone()
        .oneshot(login_request(identifier, PASSWORD))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .expect("missing session cookie")
        .to_string()
}

fn get(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let app = spawn_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-frame-options").unwrap(),
        "DENY"
    );
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["database"], true);
}

#[tokio::test]
async fn test_protected_routes_require_session() {
    let app = spawn_app().await;

    for uri in ["/api/auth/me", "/api/centers", "/api/audit"] {
        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
}

#[tokio::test]
async fn test_login_me_and_logout() {
    let app = spawn_app().await;
    let cookie = login(&app.router, "floor.nurse").await;

    let response = app
        .router
        .clone()
        .oneshot(get("/api/auth/me", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["actor"]["login_name"], "floor.nurse");
    assert_eq!(
        body["data"]["current_unit"]["id"],
        app.north.id.to_string()
    );

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/logout")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(get("/api/auth/me", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rejections_are_generic_then_locked() {
    let app = spawn_app().await;

    let response = app
        .router
        .clone()
        .oneshot(login_request("no.such.user", PASSWORD))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let unknown = body_json(response).await;
    assert_eq!(unknown["data"]["reason"], "invalid-credentials");

    for attempt in 1..=5 {
        let response = app
            .router
            .clone()
            .oneshot(login_request("floor.nurse", "Wr0ng&Guess!7k"))
            .await
            .unwrap();
        let expected = if attempt < 5 {
            StatusCode::UNAUTHORIZED
        } else {
            StatusCode::LOCKED
        };
        assert_eq!(response.status(), expected, "attempt {attempt}");
    }

    let response = app
        .router
        .clone()
        .oneshot(login_request("floor.nurse", PASSWORD))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::LOCKED);
    let body = body_json(response).await;
    assert_eq!(body["data"]["reason"], "account-locked");
    assert!(body["data"]["locked_until"].is_string());
}

#[tokio::test]
async fn test_centers_listing_and_switching() {
    let app = spawn_app().await;
    let cookie = login(&app.router, "floor.nurse").await;

    let response = app
        .router
        .clone()
        .oneshot(get("/api/centers", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let centers = body["data"].as_array().unwrap();
    assert_eq!(centers.len(), 1);
    assert_eq!(centers[0]["code"], "NORTH");
    assert_eq!(centers[0]["current"], true);

    // The nurse is not assigned to SOUTH
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/centers/current")
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
                .body(Body::from(
                    json!({ "center_id": app.south.id.to_string() }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The administrator may switch anywhere
    let admin_cookie = login(&app.router, "group.admin").await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/centers/current")
                .header(header::COOKIE, &admin_cookie)
                .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
                .body(Body::from(
                    json!({ "center_id": app.south.id.to_string() }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(get("/api/auth/me", &admin_cookie))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(
        body["data"]["current_unit"]["id"],
        app.south.id.to_string()
    );
}

#[tokio::test]
async fn test_audit_review_is_role_and_center_scoped() {
    let app = spawn_app().await;

    let nurse_cookie = login(&app.router, "floor.nurse").await;
    let response = app
        .router
        .clone()
        .oneshot(get("/api/audit", &nurse_cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let manager_cookie = login(&app.router, "house.manager").await;
    let response = app
        .router
        .clone()
        .oneshot(get("/api/audit?days=1", &manager_cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let north = app.north.id.to_string();
    let entries = body["data"].as_array().unwrap();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|e| e["unit_id"] == north.as_str()));

    let response = app
        .router
        .clone()
        .oneshot(get(
            &format!("/api/audit?unit={}", app.south.id),
            &manager_cookie,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin_cookie = login(&app.router, "group.admin").await;
    let response = app
        .router
        .clone()
        .oneshot(get("/api/audit?action=login", &admin_cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(
        body["data"]
            .as_array()
            .unwrap()
            .iter()
            .all(|e| e["action"] == "LOGIN")
    );
}

#[tokio::test]
async fn test_service_audited_mutations_are_not_duplicated() {
    let app = spawn_app().await;
    let cookie = login(&app.router, "floor.nurse").await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/auth/password")
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
                .body(Body::from(
                    json!({
                        "current_password": PASSWORD,
                        "new_password": "Gl4cier#Moss27",
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let recorder = &app.state.shared.recorder;
    let http = recorder
        .for_resource("http", "/api/auth/password")
        .await
        .unwrap();
    assert!(http.is_empty());
    let changed: Vec<_> = recorder
        .by_action(AuditAction::Update)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.detail["event"] == "password-changed")
        .collect();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].resource_type.as_deref(), Some("account"));

    let admin_cookie = login(&app.router, "group.admin").await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/centers/current")
                .header(header::COOKIE, &admin_cookie)
                .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
                .body(Body::from(
                    json!({ "center_id": app.south.id.to_string() }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let http = recorder
        .for_resource("http", "/api/centers/current")
        .await
        .unwrap();
    assert!(http.is_empty());
    let switches = recorder
        .by_action(AuditAction::Update)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.detail["event"] == "center_switched")
        .count();
    assert_eq!(switches, 1);
}

#[tokio::test]
async fn test_unmarked_mutations_are_audited_on_success() {
    let app = spawn_app().await;
    let router = Router::new()
        .route("/notes", post(|| async { StatusCode::CREATED }))
        .route("/notes/invalid", post(|| async { StatusCode::BAD_REQUEST }))
        .route(
            "/notes/self-audited",
            post(|| async { (Extension(AuditedByService), StatusCode::OK) }),
        )
        .route_layer(middleware::from_fn_with_state(
            app.state.clone(),
            audit_mutations,
        ))
        .layer(middleware::from_fn(
            |mut request: Request<Body>, next: Next| async move {
                request
                    .extensions_mut()
                    .insert(RequestContext::new(None, None));
                next.run(request).await
            },
        ));

    for uri in ["/notes", "/notes/invalid", "/notes/self-audited"] {
        router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
    }

    let recorder = &app.state.shared.recorder;
    let created = recorder.for_resource("http", "/notes").await.unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].action, AuditAction::Create);
    assert_eq!(created[0].detail["method"], "POST");
    assert_eq!(created[0].detail["status"], 201);

    for uri in ["/notes/invalid", "/notes/self-audited"] {
        assert!(recorder.for_resource("http", uri).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_login_rejection_bodies_are_indistinguishable() {
    let app = spawn_app().await;
    app.state
        .shared
        .accounts
        .create_account(
            &RequestContext::system("api-tests"),
            NewAccount {
                login_name: "spare.nurse".to_string(),
                employee_code: "NU60004".to_string(),
                display_name: "spare.nurse".to_string(),
                password: PASSWORD.to_string(),
                role: Role::Nurse,
                is_superuser: false,
                is_multi_unit: false,
                must_change_password: false,
            },
        )
        .await
        .unwrap();

    let mut bodies = Vec::new();
    for (identifier, password) in [
        ("no.such.user", PASSWORD),
        ("floor.nurse", "Wr0ng&Guess!7k"),
        ("spare.nurse", PASSWORD),
    ] {
        let response = app
            .router
            .clone()
            .oneshot(login_request(identifier, password))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{identifier}");
        bodies.push(body_json(response).await);
    }

    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[0], bodies[2]);
    assert!(bodies[0]["data"].get("remaining_attempts").is_none());
}

#[tokio::test]
async fn test_suspicious_requests_are_audited_for_signed_in_callers() {
    let app = spawn_app().await;
    let recorder = &app.state.shared.recorder;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/wp-admin/setup.php")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let flagged = |entries: Vec<centergate::db::AuditEntry>| {
        entries
            .into_iter()
            .filter(|e| e.detail["suspicious_activity"] == true)
            .collect::<Vec<_>>()
    };
    assert!(flagged(recorder.by_action(AuditAction::View).await.unwrap()).is_empty());

    let cookie = login(&app.router, "floor.nurse").await;
    let response = app
        .router
        .clone()
        .oneshot(get("/api/health?q=1%20UNION%20SELECT%20password", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let entries = flagged(recorder.by_action(AuditAction::View).await.unwrap());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].detail["pattern_matched"], "union select");
    assert_eq!(entries[0].detail["path"], "/api/health");
    assert_eq!(entries[0].resource_type.as_deref(), Some("http"));
    assert!(entries[0].actor_id.is_some());
    assert_eq!(entries[0].unit_id, Some(app.north.id));
}
