use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

mod api;
mod config;
mod db;
mod error;
mod middleware;
mod models;
mod services;
#[cfg(test)]
mod tests;

use config::Config;
use db::AuthStore;
use services::jwt_service::JwtService;
use services::mailer::Mailer;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub store: AuthStore,
    pub jwt: JwtService,
    pub mailer: Mailer,
    pub config: Config,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Every route here runs the full auth pipeline before its handler.
    let protected = Router::new()
        .route("/auth/logout", post(api::auth::logout))
        .route("/auth/profile", get(api::auth::profile))
        .route("/auth/verify", get(api::auth::verify))
        .route("/auth/change-password", put(api::auth::change_password))
        .route("/auth/reset-status", get(api::auth::reset_status))
        .route("/auth/cleanup-tokens", post(api::auth::cleanup_tokens))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Same pipeline, but anonymous callers pass through without an identity.
    let optional = Router::new()
        .route(
            "/auth/security-questions",
            get(api::auth::security_questions),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth::optional_auth_middleware,
        ));

    Router::new()
        .route("/auth/login", post(api::auth::login))
        .route("/auth/refresh", post(api::auth::refresh))
        .route("/auth/forgot-password", post(api::auth::forgot_password))
        .route(
            "/auth/verify-security-question",
            post(api::auth::verify_security_question),
        )
        .route("/auth/reset-password", post(api::auth::reset_password))
        .merge(protected)
        .merge(optional)
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Refusing to start with invalid configuration");
            std::process::exit(1);
        }
    };

    let pool = db::create_db_pool(&config.database_url).await;
    let store = db::create_auth_store(&config.redis_url);
    let jwt = JwtService::new(&config);
    let addr = config.bind_addr;

    let state = AppState {
        pool,
        store,
        jwt,
        mailer: Mailer::new(),
        config,
    };
    let app = create_router(state);

    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
