use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::warn;

use crate::{
    error::AuthError,
    models::jwt::{Claims, TokenKind},
    models::user::User,
    AppState,
};

/// Identity resolved by the auth pipeline, attached to request extensions.
#[derive(Clone)]
pub struct CurrentUser {
    pub user: User,
    pub claims: Claims,
    pub session_id: String,
}

/// Extension inserted by the optional-auth variant: `None` when any pipeline
/// step failed, without rejecting the request.
#[derive(Clone)]
pub struct MaybeUser(pub Option<CurrentUser>);

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingToken)?;
    header
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// The fixed verification sequence every protected request goes through,
/// short-circuiting on the first failure:
/// bearer extraction, token verification, blacklist, session lookup,
/// claim/session cross-check, user profile, last-activity refresh.
///
/// Both middleware variants call this one function; they differ only in what
/// they do with an `Err`.
pub async fn resolve_identity(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<CurrentUser, AuthError> {
    let token = bearer_token(headers)?;

    let claims = state.jwt.verify(token, TokenKind::Access)?;

    // Tokens without a jti cannot be individually revoked; their session
    // check below is the only thing standing between them and acceptance.
    if !claims.jti.is_empty() && state.store.is_token_revoked(&claims.jti).await? {
        return Err(AuthError::TokenRevoked);
    }

    let mut session = state
        .store
        .get_session(&claims.sid)
        .await?
        .ok_or(AuthError::SessionExpired)?;

    if session.user_id != claims.sub || session.email != claims.email {
        warn!(
            session_user = session.user_id,
            token_user = claims.sub,
            "Session record does not match token claims"
        );
        return Err(AuthError::SessionInconsistent);
    }

    let user = User::find_by_id(&state.pool, claims.sub)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    if !user.is_active {
        return Err(AuthError::UserInactive);
    }

    // Cosmetic last-write-wins field; re-saved with the remaining TTL so the
    // session's absolute expiry is preserved.
    session.last_activity = Utc::now();
    let ttl = state
        .store
        .session_ttl(&claims.sid, state.config.session_ttl_secs)
        .await?;
    state.store.save_session(&claims.sid, &session, ttl).await?;

    Ok(CurrentUser {
        user,
        session_id: claims.sid.clone(),
        claims,
    })
}

/// Rejecting variant: protected routes.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let identity = resolve_identity(&state, request.headers()).await?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Lenient variant: same pipeline, but a failure just means no identity.
pub async fn optional_auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let identity = resolve_identity(&state, request.headers()).await.ok();
    request.extensions_mut().insert(MaybeUser(identity));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_header_is_missing_token() {
        assert!(matches!(
            bearer_token(&HeaderMap::new()),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn non_bearer_scheme_is_missing_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert!(matches!(
            bearer_token(&headers),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn empty_bearer_is_missing_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(matches!(
            bearer_token(&headers),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn bearer_token_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
    }
}
