use axum::{
    extract::{Extension, Query, State},
    http::{header::USER_AGENT, HeaderMap},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::{
    error::AuthError,
    middleware::auth::{CurrentUser, MaybeUser},
    middleware::guards::require_role,
    models::jwt::TokenPair,
    models::response::ApiResponse,
    models::user::{PublicUser, Role},
    services::auth_service::AuthService,
    services::cookie_service::CookieService,
    services::password_reset_service::{PasswordResetService, GENERIC_RESET_MESSAGE},
    AppState,
};

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.pool.clone(),
        state.store.clone(),
        state.jwt.clone(),
        state.config.clone(),
    )
}

fn reset_service(state: &AppState) -> PasswordResetService {
    PasswordResetService::new(
        state.pool.clone(),
        state.store.clone(),
        state.mailer.clone(),
        state.config.clone(),
    )
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/* ---------- credential endpoints ---------- */

#[derive(Deserialize)]
pub(crate) struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
pub(crate) struct LoginData {
    #[serde(flatten)]
    tokens: TokenPair,
    user: PublicUser,
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let (tokens, user) = auth_service(&state)
        .login(
            &payload.email,
            &payload.password,
            &client_ip(&headers),
            &user_agent(&headers),
        )
        .await?;

    let cookie_headers = CookieService::set_refresh_cookie(
        &tokens.refresh_token,
        state.config.refresh_ttl.num_seconds().max(0) as u64,
        state.config.secure_cookies,
    );
    let body = ApiResponse::ok(
        "Login successful",
        LoginData {
            user: PublicUser::from(&user),
            tokens,
        },
    );
    Ok((cookie_headers, Json(body)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest {
    refresh_token: Option<String>,
}

/// The refresh token may arrive as the HttpOnly cookie or in the body; the
/// cookie wins when both are present.
#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let refresh_token = CookieService::extract_refresh_token(&headers)
        .or_else(|| payload.and_then(|Json(body)| body.refresh_token))
        .ok_or(AuthError::MissingToken)?;

    let tokens = auth_service(&state).refresh(&refresh_token).await?;

    let cookie_headers = CookieService::set_refresh_cookie(
        &tokens.refresh_token,
        state.config.refresh_ttl.num_seconds().max(0) as u64,
        state.config.secure_cookies,
    );
    let body = ApiResponse::ok("Token refreshed", tokens);
    Ok((cookie_headers, Json(body)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LogoutRequest {
    #[serde(default)]
    logout_all: bool,
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    Extension(identity): Extension<CurrentUser>,
    headers: HeaderMap,
    payload: Option<Json<LogoutRequest>>,
) -> Result<impl IntoResponse, AuthError> {
    let logout_all = payload.map(|Json(body)| body.logout_all).unwrap_or(false);
    let refresh_token = CookieService::extract_refresh_token(&headers);

    auth_service(&state)
        .logout(&identity.claims, refresh_token.as_deref(), logout_all)
        .await?;

    let cookie_headers = CookieService::clear_refresh_cookie(state.config.secure_cookies);
    let body = ApiResponse::message("Logout successful");
    Ok((cookie_headers, Json(body)))
}

pub async fn profile(
    Extension(identity): Extension<CurrentUser>,
) -> impl IntoResponse {
    Json(ApiResponse::ok(
        "Profile",
        PublicUser::from(&identity.user),
    ))
}

/// Reports the identity the pipeline resolved; reaching this handler at all
/// means the token, session and user checks passed.
pub async fn verify(Extension(identity): Extension<CurrentUser>) -> impl IntoResponse {
    Json(ApiResponse::ok(
        "Token is valid",
        json!({
            "user": PublicUser::from(&identity.user),
            "sessionId": identity.session_id,
            "expiresAt": identity.claims.exp,
        }),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

#[instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    Extension(identity): Extension<CurrentUser>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    auth_service(&state)
        .change_password(
            &identity.user,
            &payload.current_password,
            &payload.new_password,
        )
        .await?;
    Ok(Json(ApiResponse::message("Password changed successfully")))
}

/* ---------- password recovery ---------- */

#[derive(Deserialize)]
pub(crate) struct ForgotPasswordRequest {
    email: String,
}

#[instrument(skip_all)]
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    reset_service(&state)
        .request_reset(
            &payload.email,
            Some(&client_ip(&headers)),
            Some(&user_agent(&headers)),
        )
        .await?;
    // Same body whether or not the address matched an account.
    Ok(Json(ApiResponse::message(GENERIC_RESET_MESSAGE)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VerifySecurityQuestionRequest {
    email: String,
    question_id: i64,
    answer: String,
}

#[instrument(skip_all)]
pub async fn verify_security_question(
    State(state): State<AppState>,
    Json(payload): Json<VerifySecurityQuestionRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let reset_token = reset_service(&state)
        .verify_security_answer(&payload.email, payload.question_id, &payload.answer)
        .await?;
    Ok(Json(ApiResponse::ok(
        "Security question verified",
        json!({ "resetToken": reset_token }),
    )))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResetPasswordRequest {
    token: String,
    new_password: String,
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    reset_service(&state)
        .confirm_reset(&payload.token, &payload.new_password)
        .await?;
    Ok(Json(ApiResponse::message(
        "Password has been reset, please log in again",
    )))
}

#[derive(Deserialize)]
pub(crate) struct SecurityQuestionsQuery {
    email: Option<String>,
}

/// Challenge questions for an email. Optionally authenticated: a logged-in
/// caller gets their own questions without supplying an address.
#[instrument(skip_all)]
pub async fn security_questions(
    State(state): State<AppState>,
    Extension(MaybeUser(identity)): Extension<MaybeUser>,
    Query(query): Query<SecurityQuestionsQuery>,
) -> Result<impl IntoResponse, AuthError> {
    let email = identity
        .map(|id| id.user.email)
        .or(query.email)
        .ok_or_else(|| AuthError::Validation("email is required".to_string()))?;

    let questions = reset_service(&state).questions_for_email(&email).await?;
    Ok(Json(ApiResponse::ok("Security questions", questions)))
}

/* ---------- admin ---------- */

pub async fn reset_status(
    State(state): State<AppState>,
    Extension(identity): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AuthError> {
    require_role(&identity, &[Role::Admin])?;
    let stats = reset_service(&state).stats().await?;
    Ok(Json(ApiResponse::ok("Recovery token status", stats)))
}

#[instrument(skip_all)]
pub async fn cleanup_tokens(
    State(state): State<AppState>,
    Extension(identity): Extension<CurrentUser>,
) -> Result<impl IntoResponse, AuthError> {
    require_role(&identity, &[Role::Admin])?;
    let removed = reset_service(&state).cleanup_tokens().await?;
    Ok(Json(ApiResponse::ok(
        "Spent recovery tokens removed",
        json!({ "removed": removed }),
    )))
}
