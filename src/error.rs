use axum::{
    http::{header::RETRY_AFTER, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::models::response::ApiResponse;

/// Every failure the auth subsystem can produce, mapped to an HTTP status
/// exactly once, in [`IntoResponse`]. Handlers and services return these
/// variants directly; nothing matches on error message strings.
#[derive(Debug)]
pub enum AuthError {
    // Authentication (401)
    MissingToken,
    TokenInvalid,
    TokenRevoked,
    SessionExpired,
    SessionInconsistent,
    UserInactive,
    UserNotFound,
    InvalidCredentials,

    // Authorization (403)
    InsufficientPermissions,
    RestrictedToOrgUnit,
    NotOwner,
    EmailNotAllowed,

    // Password-reset token lifecycle (400)
    TokenExpired,
    TokenUsed,
    ChallengeRequired,
    InvalidAnswer { attempts_left: u32 },
    AttemptsExceeded,
    Validation(String),

    // Throttling (429)
    RateLimitExceeded { retry_after_secs: u64 },

    // Internal (500) — logged server-side, surfaced as a generic message
    Database(sqlx::Error),
    Store(String),
    Hash(bcrypt::BcryptError),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Database(err)
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        AuthError::Store(err.to_string())
    }
}

impl From<bcrypt::BcryptError> for AuthError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AuthError::Hash(err)
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    // Malformed, bad signature and expired all collapse to one variant so a
    // caller cannot probe which check failed.
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        AuthError::TokenInvalid
    }
}

impl AuthError {
    /// Stable machine-readable discriminant placed in the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "MISSING_TOKEN",
            AuthError::TokenInvalid => "TOKEN_INVALID",
            AuthError::TokenRevoked => "TOKEN_REVOKED",
            AuthError::SessionExpired => "SESSION_EXPIRED",
            AuthError::SessionInconsistent => "SESSION_INCONSISTENT",
            AuthError::UserInactive => "USER_INACTIVE",
            AuthError::UserNotFound => "USER_NOT_FOUND",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            AuthError::RestrictedToOrgUnit => "RESTRICTED_TO_ORG_UNIT",
            AuthError::NotOwner => "NOT_OWNER",
            AuthError::EmailNotAllowed => "EMAIL_NOT_ALLOWED",
            AuthError::TokenExpired => "RESET_TOKEN_EXPIRED",
            AuthError::TokenUsed => "RESET_TOKEN_USED",
            AuthError::ChallengeRequired => "CHALLENGE_REQUIRED",
            AuthError::InvalidAnswer { .. } => "INVALID_ANSWER",
            AuthError::AttemptsExceeded => "ATTEMPTS_EXCEEDED",
            AuthError::Validation(_) => "VALIDATION",
            AuthError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AuthError::Database(_) | AuthError::Store(_) | AuthError::Hash(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingToken
            | AuthError::TokenInvalid
            | AuthError::TokenRevoked
            | AuthError::SessionExpired
            | AuthError::SessionInconsistent
            | AuthError::UserInactive
            | AuthError::UserNotFound
            | AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,

            AuthError::InsufficientPermissions
            | AuthError::RestrictedToOrgUnit
            | AuthError::NotOwner
            | AuthError::EmailNotAllowed => StatusCode::FORBIDDEN,

            AuthError::TokenExpired
            | AuthError::TokenUsed
            | AuthError::ChallengeRequired
            | AuthError::InvalidAnswer { .. }
            | AuthError::AttemptsExceeded
            | AuthError::Validation(_) => StatusCode::BAD_REQUEST,

            AuthError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,

            AuthError::Database(_) | AuthError::Store(_) | AuthError::Hash(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn message(&self) -> String {
        match self {
            AuthError::MissingToken => "Authentication token required".to_string(),
            AuthError::TokenInvalid => "Invalid or expired token".to_string(),
            AuthError::TokenRevoked => "Token has been revoked".to_string(),
            AuthError::SessionExpired => "Session has expired, please log in again".to_string(),
            AuthError::SessionInconsistent => "Session does not match token".to_string(),
            AuthError::UserInactive => "Account is disabled".to_string(),
            AuthError::UserNotFound => "Account not found".to_string(),
            AuthError::InvalidCredentials => "Invalid email or password".to_string(),
            AuthError::InsufficientPermissions => {
                "You do not have permission to perform this action".to_string()
            }
            AuthError::RestrictedToOrgUnit => {
                "This resource is restricted to another organizational unit".to_string()
            }
            AuthError::NotOwner => "You can only access your own resources".to_string(),
            AuthError::EmailNotAllowed => {
                "Password recovery is only available for institutional accounts".to_string()
            }
            AuthError::TokenExpired => "Recovery token has expired".to_string(),
            AuthError::TokenUsed => "Recovery token has already been used".to_string(),
            AuthError::ChallengeRequired => {
                "Security question verification is required before resetting".to_string()
            }
            // The remaining-attempts count is the one deliberate leak in the
            // challenge flow.
            AuthError::InvalidAnswer { attempts_left } => {
                format!("Incorrect answer, {attempts_left} attempt(s) remaining")
            }
            AuthError::AttemptsExceeded => {
                "Too many incorrect answers, the recovery token has been disabled".to_string()
            }
            AuthError::Validation(msg) => msg.clone(),
            AuthError::RateLimitExceeded { retry_after_secs } => {
                format!("Too many requests, try again in {retry_after_secs} second(s)")
            }
            AuthError::Database(_) | AuthError::Store(_) | AuthError::Hash(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            AuthError::Database(e) => error!(error = %e, "Database error"),
            AuthError::Store(e) => error!(error = %e, "Key-value store error"),
            AuthError::Hash(e) => error!(error = %e, "Password hashing error"),
            _ => {}
        }

        let status = self.status();
        let body = Json(ApiResponse::error(self.message(), self.code()));

        let mut response = (status, body).into_response();
        if let AuthError::RateLimitExceeded { retry_after_secs } = self {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_errors_collapse_to_token_invalid() {
        use jsonwebtoken::errors::{Error, ErrorKind};

        let err = AuthError::from(Error::from(ErrorKind::ExpiredSignature));
        assert!(matches!(err, AuthError::TokenInvalid));
        let err = AuthError::from(Error::from(ErrorKind::InvalidSignature));
        assert!(matches!(err, AuthError::TokenInvalid));
    }

    #[test]
    fn status_mapping_matches_error_class() {
        assert_eq!(AuthError::MissingToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::SessionInconsistent.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::NotOwner.status(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::TokenUsed.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AuthError::RateLimitExceeded { retry_after_secs: 60 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
