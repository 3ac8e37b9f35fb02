use std::sync::{Arc, Once};

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use bcrypt::hash;
use chrono::Duration;
use serde_json::Value;
use sqlx::SqlitePool;
use tower::ServiceExt;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use crate::config::Config;
use crate::db::memory::MemoryStore;
use crate::db::AuthStore;
use crate::models::reset::UserSecurityQuestion;
use crate::models::user::{Role, User};
use crate::services::jwt_service::JwtService;
use crate::services::mailer::Mailer;
use crate::services::password_reset_service::normalize_answer;
use crate::AppState;

static INIT: Once = Once::new();

/// Initialize logging exactly once
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_target(false)
            .with_level(true)
            .with_max_level(Level::ERROR)
            .with_span_events(FmtSpan::NONE)
            .init();
    });
}

pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        redis_url: String::new(),
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        access_secret: "test-access-secret".to_string(),
        refresh_secret: "test-refresh-secret".to_string(),
        access_ttl: Duration::minutes(15),
        refresh_ttl: Duration::days(7),
        session_ttl_secs: 7 * 24 * 60 * 60,
        reset_token_ttl: Duration::minutes(30),
        reset_max_attempts: 3,
        reset_request_max: 1,
        reset_request_window_secs: 300,
        login_max_attempts: 10,
        login_window_secs: 900,
        allowed_email_domains: vec!["gamc.gov.bo".to_string()],
        secure_cookies: false,
    }
}

/// In-memory SQLite plus the in-process key-value store; no external
/// services needed.
pub async fn setup_state_with(config: Config) -> AppState {
    init_tracing();
    info!("Setting up test state");

    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let jwt = JwtService::new(&config);
    AppState {
        pool,
        store: AuthStore::new(Arc::new(MemoryStore::new())),
        jwt,
        mailer: Mailer::new(),
        config,
    }
}

pub async fn setup_state() -> AppState {
    setup_state_with(test_config()).await
}

pub fn create_test_app(state: &AppState) -> Router {
    crate::create_router(state.clone())
}

pub async fn seed_user(
    pool: &SqlitePool,
    email: &str,
    password: &str,
    role: Role,
    org_unit_id: i64,
) -> User {
    // Low cost keeps the suite fast; login only verifies.
    let password_hash = hash(password, 4).expect("Failed to hash password");
    User::create(pool, email, &password_hash, "Test User", role, org_unit_id)
        .await
        .expect("Failed to seed user")
}

pub async fn bind_security_question(
    pool: &SqlitePool,
    user_id: i64,
    question_id: i64,
    answer: &str,
) {
    let answer_hash = hash(normalize_answer(answer), 4).expect("Failed to hash answer");
    UserSecurityQuestion::bind_question(pool, user_id, question_id, &answer_hash)
        .await
        .expect("Failed to bind security question");
}

/// Reset tokens are only ever delivered by email; tests read them straight
/// from the table instead.
pub async fn latest_reset_token(pool: &SqlitePool, user_id: i64) -> String {
    let (token,): (String,) = sqlx::query_as(
        "SELECT token FROM password_reset_tokens WHERE user_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .expect("No reset token found");
    token
}

pub async fn test_request(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    bearer: Option<&str>,
    cookies: Option<&[(&str, &str)]>,
) -> (StatusCode, Value, HeaderMap) {
    info!(method = %method, uri = %uri, "Making test request");

    let body = if let Some(json) = body {
        Body::from(serde_json::to_string(&json).unwrap())
    } else {
        Body::empty()
    };

    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");

    if let Some(token) = bearer {
        request = request.header("authorization", format!("Bearer {token}"));
    }

    if let Some(cookies) = cookies {
        if !cookies.is_empty() {
            let cookie_header = cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header("cookie", cookie_header);
        }
    }

    let request = request.body(body).unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    info!(status = %status, "Test response received");
    (status, body, headers)
}

/// Pull the refresh-token cookie value out of a Set-Cookie header.
pub fn refresh_cookie_value(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("refresh_token="))
        .and_then(|value| value.split(';').next())
        .and_then(|pair| pair.split('=').nth(1))
        .map(|token| token.to_string())
}
