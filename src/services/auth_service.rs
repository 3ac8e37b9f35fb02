use bcrypt::{hash, verify, DEFAULT_COST};
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::{AuthStore, RateLimitDecision};
use crate::error::AuthError;
use crate::models::jwt::{Claims, TokenKind, TokenPair};
use crate::models::session::Session;
use crate::models::user::User;
use crate::services::jwt_service::JwtService;

/// Login, refresh rotation, logout and password change. Password reset has
/// its own state machine in `password_reset_service`.
#[derive(Clone)]
pub struct AuthService {
    pool: SqlitePool,
    store: AuthStore,
    jwt: JwtService,
    config: Config,
}

pub fn validate_new_password(password: &str) -> Result<(), AuthError> {
    if password.len() < 8 {
        return Err(AuthError::Validation(
            "Password must be at least 8 characters long".to_string(),
        ));
    }
    Ok(())
}

impl AuthService {
    pub fn new(pool: SqlitePool, store: AuthStore, jwt: JwtService, config: Config) -> Self {
        Self {
            pool,
            store,
            jwt,
            config,
        }
    }

    #[instrument(skip(self, password))]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<(TokenPair, User), AuthError> {
        let email = email.trim().to_lowercase();

        // Throttle before touching credentials so hammering a single account
        // is cut off; a successful login clears the counter further down.
        if let RateLimitDecision::Limited { retry_after_secs } = self
            .store
            .hit_rate_limit(
                "login",
                &email,
                self.config.login_max_attempts,
                self.config.login_window_secs,
            )
            .await?
        {
            return Err(AuthError::RateLimitExceeded { retry_after_secs });
        }

        let user = User::find_by_email(&self.pool, &email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let password_matches =
            verify(password, &user.password_hash).map_err(AuthError::from)?;
        if !password_matches {
            warn!(email = %email, "Login failed, wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            return Err(AuthError::UserInactive);
        }

        // Only failed attempts count against the throttle; a user on several
        // devices must not share a budget with an attacker.
        self.store.clear_rate_limit("login", &email).await?;

        let session_id = Uuid::new_v4().to_string();
        let session = Session::new(&user, client_ip, user_agent);
        self.store
            .create_session(&session_id, &session, self.config.session_ttl_secs)
            .await?;

        let issued = self.jwt.issue_pair(&user, &session_id)?;
        self.store
            .track_refresh_jti(
                user.id,
                &issued.refresh_claims.jti,
                self.config.refresh_ttl.num_seconds().max(0) as u64,
            )
            .await?;

        info!(user_id = user.id, "Login successful");
        Ok((issued.pair, user))
    }

    /// Exchange a valid refresh token for a new pair, revoking the old one.
    /// The session created at login survives rotation.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.jwt.verify(refresh_token, TokenKind::Refresh)?;

        if !claims.jti.is_empty() && self.store.is_token_revoked(&claims.jti).await? {
            return Err(AuthError::TokenRevoked);
        }

        let session = self
            .store
            .get_session(&claims.sid)
            .await?
            .ok_or(AuthError::SessionExpired)?;
        if session.user_id != claims.sub || session.email != claims.email {
            warn!(
                session_user = session.user_id,
                token_user = claims.sub,
                "Refresh rejected, session does not match token claims"
            );
            return Err(AuthError::SessionInconsistent);
        }

        let user = User::find_by_id(&self.pool, claims.sub)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !user.is_active {
            return Err(AuthError::UserInactive);
        }

        // Rotate: the old refresh token is dead from this point even though
        // its signature is still valid.
        self.store
            .revoke_token(&claims.jti, claims.remaining_ttl_secs())
            .await?;
        self.store.untrack_refresh_jti(user.id, &claims.jti).await?;

        let issued = self.jwt.issue_pair(&user, &claims.sid)?;
        self.store
            .track_refresh_jti(
                user.id,
                &issued.refresh_claims.jti,
                self.config.refresh_ttl.num_seconds().max(0) as u64,
            )
            .await?;

        let mut session = session;
        session.last_activity = chrono::Utc::now();
        let ttl = self
            .store
            .session_ttl(&claims.sid, self.config.session_ttl_secs)
            .await?;
        self.store.save_session(&claims.sid, &session, ttl).await?;

        info!(user_id = user.id, "Token pair rotated");
        Ok(issued.pair)
    }

    /// Revoke the presented tokens and drop the session. `logout_all` widens
    /// this to every session and outstanding refresh token of the user.
    #[instrument(skip(self, access_claims, refresh_token))]
    pub async fn logout(
        &self,
        access_claims: &Claims,
        refresh_token: Option<&str>,
        logout_all: bool,
    ) -> Result<(), AuthError> {
        if !access_claims.jti.is_empty() {
            self.store
                .revoke_token(&access_claims.jti, access_claims.remaining_ttl_secs())
                .await?;
        }

        if let Some(token) = refresh_token {
            if let Ok(claims) = self.jwt.verify(token, TokenKind::Refresh) {
                self.store
                    .revoke_token(&claims.jti, claims.remaining_ttl_secs())
                    .await?;
                self.store
                    .untrack_refresh_jti(claims.sub, &claims.jti)
                    .await?;
            }
        }

        if logout_all {
            self.store.delete_user_sessions(access_claims.sub).await?;
            self.store
                .revoke_user_refresh_tokens(
                    access_claims.sub,
                    self.config.refresh_ttl.num_seconds().max(0) as u64,
                )
                .await?;
        } else {
            self.store
                .delete_session(&access_claims.sid, access_claims.sub)
                .await?;
        }

        info!(user_id = access_claims.sub, logout_all, "Logout complete");
        Ok(())
    }

    #[instrument(skip(self, current_password, new_password))]
    pub async fn change_password(
        &self,
        user: &User,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let matches = verify(current_password, &user.password_hash).map_err(AuthError::from)?;
        if !matches {
            return Err(AuthError::InvalidCredentials);
        }
        validate_new_password(new_password)?;

        let password_hash = hash(new_password, DEFAULT_COST)?;
        User::update_password(&self.pool, user.id, &password_hash).await?;
        info!(user_id = user.id, "Password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_passwords_rejected() {
        assert!(matches!(
            validate_new_password("abc123"),
            Err(AuthError::Validation(_))
        ));
        assert!(validate_new_password("abc12345").is_ok());
    }
}
