use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::db::{AuthStore, RateLimitDecision};
use crate::error::AuthError;
use crate::models::reset::{
    PasswordResetToken, ResetTokenStats, SecurityQuestion, UserSecurityQuestion,
};
use crate::models::user::User;
use crate::services::auth_service::validate_new_password;
use crate::services::mailer::Mailer;

/// Returned for every forgot-password request, hit or miss, so responses
/// cannot be used to enumerate accounts.
pub const GENERIC_RESET_MESSAGE: &str =
    "If the address belongs to an institutional account, recovery instructions have been sent";

const RESET_TOKEN_LEN: usize = 64;

/// Issues, challenges and consumes single-use password recovery tokens.
///
/// Token lifecycle: requested → (challenge pending → challenge verified) →
/// consumed, with expiry and the attempt cap as terminal failures from any
/// non-consumed state. At most one token per user is active; a new request
/// supersedes the rest.
#[derive(Clone)]
pub struct PasswordResetService {
    pool: SqlitePool,
    store: AuthStore,
    mailer: Mailer,
    config: Config,
}

pub fn generate_reset_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Case-fold and collapse whitespace so "  La  Paz " and "la paz" hash the
/// same.
pub fn normalize_answer(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn email_domain_allowed(email: &str, allowed_domains: &[String]) -> bool {
    allowed_domains
        .iter()
        .any(|domain| email.ends_with(&format!("@{domain}")))
}

impl PasswordResetService {
    pub fn new(pool: SqlitePool, store: AuthStore, mailer: Mailer, config: Config) -> Self {
        Self {
            pool,
            store,
            mailer,
            config,
        }
    }

    /// Start a recovery. Whether the email matches an account or not, the
    /// caller sees the same generic success; only non-institutional domains
    /// and the cooldown are rejected outright.
    #[instrument(skip(self))]
    pub async fn request_reset(
        &self,
        email: &str,
        request_ip: Option<&str>,
        request_user_agent: Option<&str>,
    ) -> Result<(), AuthError> {
        let email = email.trim().to_lowercase();

        if !email_domain_allowed(&email, &self.config.allowed_email_domains) {
            return Err(AuthError::EmailNotAllowed);
        }

        if let RateLimitDecision::Limited { retry_after_secs } = self
            .store
            .hit_rate_limit(
                "pwreset",
                &email,
                self.config.reset_request_max,
                self.config.reset_request_window_secs,
            )
            .await?
        {
            return Err(AuthError::RateLimitExceeded { retry_after_secs });
        }

        let Some(user) = User::find_by_email(&self.pool, &email).await? else {
            // Deliberate silent success.
            info!("Recovery requested for unknown address");
            return Ok(());
        };
        if !user.is_active {
            info!(user_id = user.id, "Recovery requested for disabled account");
            return Ok(());
        }

        let superseded = PasswordResetToken::deactivate_for_user(&self.pool, user.id).await?;
        if superseded > 0 {
            info!(user_id = user.id, superseded, "Superseded earlier recovery tokens");
        }

        let requires_challenge =
            UserSecurityQuestion::count_for_user(&self.pool, user.id).await? > 0;
        let token_value = generate_reset_token();
        let expires_at = Utc::now() + self.config.reset_token_ttl;

        PasswordResetToken::insert(
            &self.pool,
            user.id,
            &token_value,
            expires_at,
            requires_challenge,
            request_ip,
            request_user_agent,
        )
        .await?;

        self.mailer
            .send_reset_email(&user.email, &token_value, requires_challenge);
        info!(user_id = user.id, requires_challenge, "Recovery token issued");
        Ok(())
    }

    /// Answer the security-question challenge guarding the user's active
    /// token. Every call against a live challenge burns an attempt; on
    /// success the reset token value is returned as the credential for the
    /// final reset call.
    #[instrument(skip(self, answer))]
    pub async fn verify_security_answer(
        &self,
        email: &str,
        question_id: i64,
        answer: &str,
    ) -> Result<String, AuthError> {
        let email = email.trim().to_lowercase();
        // Unknown accounts and missing tokens get the same answer-shaped
        // rejection a first wrong attempt would produce.
        let generic_attempts_left = (self.config.reset_max_attempts - 1).max(0) as u32;

        let user = match User::find_by_email(&self.pool, &email).await? {
            Some(user) if user.is_active => user,
            _ => {
                return Err(AuthError::InvalidAnswer {
                    attempts_left: generic_attempts_left,
                })
            }
        };

        let Some(token) = PasswordResetToken::find_active_for_user(&self.pool, user.id).await?
        else {
            return Err(AuthError::InvalidAnswer {
                attempts_left: generic_attempts_left,
            });
        };

        // Expired tokens and tokens with no pending challenge also get the
        // answer-shaped rejection; a distinct code on either branch would
        // separate known accounts from unknown ones.
        if token.is_expired(Utc::now()) || !token.requires_security_question {
            return Err(AuthError::InvalidAnswer {
                attempts_left: generic_attempts_left,
            });
        }
        if token.security_question_verified {
            // Already answered; re-answering is harmless.
            return Ok(token.token);
        }

        // The counter is the lock: once it reaches the cap the token is done
        // for, both here and in confirm_reset, no matter what is answered.
        let attempts = PasswordResetToken::increment_attempts(&self.pool, token.id).await?;
        if attempts > self.config.reset_max_attempts {
            return Err(AuthError::AttemptsExceeded);
        }

        let binding = UserSecurityQuestion::find(&self.pool, user.id, question_id).await?;
        let correct = match binding {
            Some(b) => verify(normalize_answer(answer), &b.answer_hash)?,
            None => false,
        };

        if !correct {
            warn!(user_id = user.id, attempts, "Wrong security answer");
            if attempts >= self.config.reset_max_attempts {
                return Err(AuthError::AttemptsExceeded);
            }
            return Err(AuthError::InvalidAnswer {
                attempts_left: (self.config.reset_max_attempts - attempts).max(0) as u32,
            });
        }

        PasswordResetToken::mark_verified(&self.pool, token.id).await?;
        info!(user_id = user.id, "Security challenge passed");
        Ok(token.token)
    }

    /// Consume a token and rotate the password. Every session and outstanding
    /// refresh token of the user is invalidated, including whichever session
    /// the requester is currently using.
    #[instrument(skip(self, token_value, new_password))]
    pub async fn confirm_reset(
        &self,
        token_value: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        validate_new_password(new_password)?;

        let token = PasswordResetToken::find_by_token(&self.pool, token_value.trim())
            .await?
            .ok_or(AuthError::TokenInvalid)?;
        token.check_usable(Utc::now(), self.config.reset_max_attempts)?;

        let user = User::find_by_id(&self.pool, token.user_id)
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        let password_hash = hash(new_password, DEFAULT_COST)?;
        User::update_password(&self.pool, user.id, &password_hash).await?;
        PasswordResetToken::mark_used(&self.pool, token.id).await?;

        // Best effort: a session racing in during enumeration may survive;
        // see AuthStore::delete_user_sessions.
        let sessions = self.store.delete_user_sessions(user.id).await?;
        let refresh = self
            .store
            .revoke_user_refresh_tokens(
                user.id,
                self.config.refresh_ttl.num_seconds().max(0) as u64,
            )
            .await?;

        info!(
            user_id = user.id,
            sessions_removed = sessions,
            refresh_revoked = refresh,
            "Password reset completed"
        );
        Ok(())
    }

    /// Questions to present for the challenge step. Unknown or unchallenged
    /// accounts get a deterministic decoy drawn from the catalog so the
    /// response shape never reveals whether the account exists.
    #[instrument(skip(self))]
    pub async fn questions_for_email(&self, email: &str) -> Result<Vec<SecurityQuestion>, AuthError> {
        let email = email.trim().to_lowercase();
        let catalog = SecurityQuestion::catalog(&self.pool).await?;

        if let Some(user) = User::find_by_email(&self.pool, &email).await? {
            let bound = SecurityQuestion::for_user(&self.pool, user.id).await?;
            if !bound.is_empty() {
                return Ok(bound);
            }
        }

        if catalog.is_empty() {
            return Ok(Vec::new());
        }
        let index = email.bytes().map(usize::from).sum::<usize>() % catalog.len();
        Ok(vec![catalog[index].clone()])
    }

    pub async fn stats(&self) -> Result<ResetTokenStats, AuthError> {
        Ok(PasswordResetToken::stats(&self.pool, self.config.reset_max_attempts).await?)
    }

    #[instrument(skip(self))]
    pub async fn cleanup_tokens(&self) -> Result<u64, AuthError> {
        let removed = PasswordResetToken::cleanup(&self.pool).await?;
        info!(removed, "Spent recovery tokens purged");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_64_alphanumeric_chars() {
        let token = generate_reset_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_reset_token());
    }

    #[test]
    fn answers_normalize_case_and_whitespace() {
        assert_eq!(normalize_answer("  La  Paz "), "la paz");
        assert_eq!(normalize_answer("LA PAZ"), "la paz");
        assert_eq!(normalize_answer("la\tpaz"), "la paz");
        assert_eq!(normalize_answer(""), "");
    }

    #[test]
    fn only_institutional_domains_pass() {
        let domains = vec!["gamc.gov.bo".to_string()];
        assert!(email_domain_allowed("ana.flores@gamc.gov.bo", &domains));
        assert!(!email_domain_allowed("ana.flores@gmail.com", &domains));
        assert!(!email_domain_allowed("ana.flores@gamc.gov.bo.evil.com", &domains));
    }
}
