//! Drives the HTTP router end to end: staging, verification, admin login
//! and logout, against an in-memory database.

use std::sync::{Arc, Mutex};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Duration;
use futures_util::future::BoxFuture;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use chaingrid_api::auth::{AppState, AppStateInner, TokenSettings, bootstrap_admin};
use chaingrid_api::mail::Mailer;
use chaingrid_api::registrar::{Registrar, RegistrarConfig};
use chaingrid_api::routes::router;
use chaingrid_db::{Database, MemoryStagingStore};

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
}

impl Outbox {
    fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, code)| code.clone())
    }
}

impl Mailer for Outbox {
    fn send_otp<'a>(&'a self, to: &'a str, code: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.sent.lock().unwrap().push((to.to_string(), code.to_string()));
            Ok(())
        })
    }
}

struct TestApp {
    router: Router,
    db: Arc<Database>,
    outbox: Arc<Outbox>,
}

fn app(debug: bool) -> TestApp {
    app_with_token_ttl(debug, Duration::days(1))
}

fn app_with_token_ttl(debug: bool, token_ttl: Duration) -> TestApp {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let outbox = Arc::new(Outbox::default());
    let registrar = Registrar::new(
        db.clone(),
        Arc::new(MemoryStagingStore::new()),
        outbox.clone(),
        RegistrarConfig {
            debug,
            ..Default::default()
        },
    );
    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        registrar,
        tokens: TokenSettings {
            secret: "integration-secret".into(),
            ttl: token_ttl,
        },
        debug,
    });
    TestApp {
        router: router(state),
        db,
        outbox,
    }
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>, bearer: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn post_raw(router: &Router, uri: &str, body: &'static str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|e| panic!("{status} body is not JSON ({e}): {}", String::from_utf8_lossy(&bytes)));
    (status, value)
}

async fn post(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    call(router, "POST", uri, Some(body), None).await
}

fn ada_form() -> Value {
    json!({
        "name": "Ada Lovelace",
        "username": "ada",
        "email": "ada@example.com",
        "password": "Passw0rd!",
        "password_confirmation": "Passw0rd!"
    })
}

#[tokio::test]
async fn ada_registers_and_cannot_replay_the_code() {
    let app = app(false);

    let (status, body) = post(&app.router, "/api/send-otp", ada_form()).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["mail_sent"], true);
    assert!(body.get("otp").is_none(), "OTP must not be echoed outside debug mode");

    let token = body["registration_token"].as_str().unwrap().to_string();
    let code = app.outbox.last_code_for("ada@example.com").unwrap();
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_digit()));

    let verify = json!({ "registration_token": token, "otp": code });
    let (status, body) = post(&app.router, "/api/register", verify.clone()).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["username"], "ada");
    assert_eq!(body["user"]["email"], "ada@example.com");
    assert!(body["user"].get("password").is_none());
    assert!(body["user"].get("password_hash").is_none());
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));

    let (status, body) = post(&app.router, "/api/register", verify).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("expired or not found"));
}

#[tokio::test]
async fn existing_email_is_rejected_without_staging() {
    let app = app(false);
    bootstrap_admin(&app.db, "Ada", "ada_admin", "ada@example.com", "Passw0rd!").unwrap();

    let (status, body) = post(&app.router, "/api/send-otp", ada_form()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["errors"]["email"][0], "The email has already been taken.");
    assert!(body.get("registration_token").is_none());
    assert!(app.outbox.last_code_for("ada@example.com").is_none());
}

#[tokio::test]
async fn validation_reports_every_field() {
    let app = app(false);
    let (status, body) = post(
        &app.router,
        "/api/send-otp",
        json!({ "email": "nope", "password": "short", "password_confirmation": "other" }),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let errors = body["errors"].as_object().unwrap();
    for field in ["name", "username", "email", "password"] {
        assert!(errors.contains_key(field), "missing {field} in {body}");
    }
    assert_eq!(body["errors"]["password"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn wrong_code_can_be_retried() {
    let app = app(false);
    let (_, body) = post(&app.router, "/api/send-otp", ada_form()).await;
    let token = body["registration_token"].as_str().unwrap().to_string();
    let code = app.outbox.last_code_for("ada@example.com").unwrap();
    let wrong = if code == "999999" { "000000" } else { "999999" };

    let (status, body) = post(
        &app.router,
        "/api/register",
        json!({ "registration_token": token, "otp": wrong }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"].as_str().unwrap().starts_with("Invalid OTP"));

    let (status, _) = post(
        &app.router,
        "/api/register",
        json!({ "registration_token": token, "otp": code }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn debug_mode_echoes_the_code() {
    let app = app(true);
    let (status, body) = post(&app.router, "/api/send-otp", ada_form()).await;
    assert_eq!(status, StatusCode::OK);
    let echoed = body["otp"].as_str().unwrap();
    assert_eq!(Some(echoed.to_string()), app.outbox.last_code_for("ada@example.com"));
}

#[tokio::test]
async fn admin_login_logout_cycle() {
    let app = app(false);
    bootstrap_admin(&app.db, "Root", "root", "root@example.com", "Sup3rSecret!").unwrap();

    let (status, _) = post(
        &app.router,
        "/api/login",
        json!({ "email": "root@example.com", "password": "wrong-password" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = post(
        &app.router,
        "/api/login",
        json!({ "email": "Root@Example.com", "password": "Sup3rSecret!" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = call(&app.router, "GET", "/api/me", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "root");

    let (status, _) = call(&app.router, "POST", "/api/logout", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app.router, "GET", "/api/me", None, Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn regular_users_cannot_use_the_dashboard_login() {
    let app = app(false);
    let (_, body) = post(&app.router, "/api/send-otp", ada_form()).await;
    let token = body["registration_token"].as_str().unwrap().to_string();
    let code = app.outbox.last_code_for("ada@example.com").unwrap();
    let (status, _) = post(
        &app.router,
        "/api/register",
        json!({ "registration_token": token, "otp": code }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = post(
        &app.router,
        "/api/login",
        json!({ "email": "ada@example.com", "password": "Passw0rd!" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Unauthorized");
}

#[tokio::test]
async fn protected_routes_need_a_bearer_token() {
    let app = app(false);
    let (status, body) = call(&app.router, "GET", "/api/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = call(&app.router, "GET", "/api/me", None, Some("garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_is_public() {
    let app = app(false);
    let (status, body) = call(&app.router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn malformed_bodies_get_a_json_error() {
    let app = app(false);

    let (status, body) = post(
        &app.router,
        "/api/register",
        json!({ "registration_token": "x", "otp": 123456 }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().starts_with("Malformed request body"));

    let (status, body) = post_raw(&app.router, "/api/send-otp", "not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());

    let (status, body) = post_raw(&app.router, "/api/login", "{\"email\": 7}").await;
    assert!(status.is_client_error());
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn registration_survives_a_token_failure() {
    let app = app_with_token_ttl(false, Duration::MAX);
    let (_, body) = post(&app.router, "/api/send-otp", ada_form()).await;
    let token = body["registration_token"].as_str().unwrap().to_string();
    let code = app.outbox.last_code_for("ada@example.com").unwrap();

    let (status, body) = post(
        &app.router,
        "/api/register",
        json!({ "registration_token": token, "otp": code }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["user"]["username"], "ada");
    assert!(body.get("token").is_none());
    assert!(app.db.get_user_by_username("ada").unwrap().is_some());
}
