use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::AuthError;

/// Single-use password recovery token. At most one row per user has
/// `active = 1`; issuing a new token supersedes earlier active ones.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PasswordResetToken {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub requires_security_question: bool,
    pub security_question_verified: bool,
    pub security_question_attempts: i64,
    pub request_ip: Option<String>,
    pub request_user_agent: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SecurityQuestion {
    pub id: i64,
    pub question: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserSecurityQuestion {
    pub id: i64,
    pub user_id: i64,
    pub question_id: i64,
    pub answer_hash: String,
}

/// Aggregate counts for the admin status endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetTokenStats {
    pub active: i64,
    pub used: i64,
    pub expired: i64,
    pub locked: i64,
}

const TOKEN_COLUMNS: &str = r#"
    id, user_id, token, expires_at, created_at, used_at,
    requires_security_question, security_question_verified,
    security_question_attempts, request_ip, request_user_agent, active
"#;

impl PasswordResetToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Gate for `confirm_reset`. Order matters: a consumed token reports
    /// `TokenUsed` even after its expiry has also passed, and a superseded
    /// token is indistinguishable from an unknown one.
    pub fn check_usable(
        &self,
        now: DateTime<Utc>,
        max_attempts: i64,
    ) -> Result<(), AuthError> {
        if self.used_at.is_some() {
            return Err(AuthError::TokenUsed);
        }
        if !self.active {
            return Err(AuthError::TokenInvalid);
        }
        if self.is_expired(now) {
            return Err(AuthError::TokenExpired);
        }
        if self.security_question_attempts >= max_attempts && !self.security_question_verified {
            return Err(AuthError::AttemptsExceeded);
        }
        if self.requires_security_question && !self.security_question_verified {
            return Err(AuthError::ChallengeRequired);
        }
        Ok(())
    }

    pub async fn insert(
        pool: &SqlitePool,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
        requires_security_question: bool,
        request_ip: Option<&str>,
        request_user_agent: Option<&str>,
    ) -> Result<PasswordResetToken, sqlx::Error> {
        sqlx::query_as::<_, PasswordResetToken>(&format!(
            r#"
            INSERT INTO password_reset_tokens
                (user_id, token, expires_at, requires_security_question,
                 request_ip, request_user_agent)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .bind(requires_security_question)
        .bind(request_ip)
        .bind(request_user_agent)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_token(
        pool: &SqlitePool,
        token: &str,
    ) -> Result<Option<PasswordResetToken>, sqlx::Error> {
        sqlx::query_as::<_, PasswordResetToken>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM password_reset_tokens WHERE token = ?"
        ))
        .bind(token)
        .fetch_optional(pool)
        .await
    }

    /// Latest active token for a user, if any.
    pub async fn find_active_for_user(
        pool: &SqlitePool,
        user_id: i64,
    ) -> Result<Option<PasswordResetToken>, sqlx::Error> {
        sqlx::query_as::<_, PasswordResetToken>(&format!(
            r#"
            SELECT {TOKEN_COLUMNS} FROM password_reset_tokens
            WHERE user_id = ? AND active = 1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Supersede any outstanding active tokens before issuing a new one.
    pub async fn deactivate_for_user(pool: &SqlitePool, user_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE password_reset_tokens SET active = 0 WHERE user_id = ? AND active = 1",
        )
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Atomic increment; the returned value is the attempt count including
    /// this call. Read-modify-write would allow two concurrent wrong answers
    /// to count as one.
    pub async fn increment_attempts(pool: &SqlitePool, id: i64) -> Result<i64, sqlx::Error> {
        let (attempts,): (i64,) = sqlx::query_as(
            r#"
            UPDATE password_reset_tokens
            SET security_question_attempts = security_question_attempts + 1
            WHERE id = ?
            RETURNING security_question_attempts
            "#,
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(attempts)
    }

    pub async fn mark_verified(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE password_reset_tokens SET security_question_verified = 1 WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn mark_used(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE password_reset_tokens SET used_at = ?, active = 0 WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn stats(pool: &SqlitePool, max_attempts: i64) -> Result<ResetTokenStats, sqlx::Error> {
        let now = Utc::now();
        let (active,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM password_reset_tokens
             WHERE active = 1 AND used_at IS NULL AND expires_at > ?",
        )
        .bind(now)
        .fetch_one(pool)
        .await?;
        let (used,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM password_reset_tokens WHERE used_at IS NOT NULL")
                .fetch_one(pool)
                .await?;
        let (expired,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM password_reset_tokens
             WHERE used_at IS NULL AND expires_at <= ?",
        )
        .bind(now)
        .fetch_one(pool)
        .await?;
        let (locked,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM password_reset_tokens
             WHERE security_question_attempts >= ? AND security_question_verified = 0",
        )
        .bind(max_attempts)
        .fetch_one(pool)
        .await?;

        Ok(ResetTokenStats {
            active,
            used,
            expired,
            locked,
        })
    }

    /// Drop rows that can never become usable again.
    pub async fn cleanup(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM password_reset_tokens
             WHERE used_at IS NOT NULL OR expires_at <= ? OR active = 0",
        )
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

impl SecurityQuestion {
    pub async fn catalog(pool: &SqlitePool) -> Result<Vec<SecurityQuestion>, sqlx::Error> {
        sqlx::query_as::<_, SecurityQuestion>(
            "SELECT id, question FROM security_questions WHERE is_active = 1 ORDER BY id",
        )
        .fetch_all(pool)
        .await
    }

    pub async fn for_user(
        pool: &SqlitePool,
        user_id: i64,
    ) -> Result<Vec<SecurityQuestion>, sqlx::Error> {
        sqlx::query_as::<_, SecurityQuestion>(
            r#"
            SELECT sq.id, sq.question
            FROM security_questions sq
            JOIN user_security_questions usq ON usq.question_id = sq.id
            WHERE usq.user_id = ? AND sq.is_active = 1
            ORDER BY sq.id
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }
}

impl UserSecurityQuestion {
    pub const MAX_BINDINGS: i64 = 3;

    pub async fn find(
        pool: &SqlitePool,
        user_id: i64,
        question_id: i64,
    ) -> Result<Option<UserSecurityQuestion>, sqlx::Error> {
        sqlx::query_as::<_, UserSecurityQuestion>(
            r#"
            SELECT id, user_id, question_id, answer_hash
            FROM user_security_questions
            WHERE user_id = ? AND question_id = ?
            "#,
        )
        .bind(user_id)
        .bind(question_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn count_for_user(pool: &SqlitePool, user_id: i64) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM user_security_questions WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }

    pub async fn bind_question(
        pool: &SqlitePool,
        user_id: i64,
        question_id: i64,
        answer_hash: &str,
    ) -> Result<(), sqlx::Error> {
        let count = Self::count_for_user(pool, user_id).await?;
        if count >= Self::MAX_BINDINGS {
            // Enforced at the API layer too; this is the last line of defense.
            return Err(sqlx::Error::Protocol(
                "user already has the maximum number of security questions".into(),
            ));
        }
        sqlx::query(
            r#"
            INSERT INTO user_security_questions (user_id, question_id, answer_hash)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(question_id)
        .bind(answer_hash)
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(now: DateTime<Utc>) -> PasswordResetToken {
        PasswordResetToken {
            id: 1,
            user_id: 7,
            token: "x".repeat(64),
            expires_at: now + Duration::minutes(30),
            created_at: now,
            used_at: None,
            requires_security_question: false,
            security_question_verified: false,
            security_question_attempts: 0,
            request_ip: None,
            request_user_agent: None,
            active: true,
        }
    }

    #[test]
    fn fresh_token_is_usable() {
        let now = Utc::now();
        assert!(token(now).check_usable(now, 3).is_ok());
    }

    #[test]
    fn used_wins_over_expired() {
        let now = Utc::now();
        let mut t = token(now);
        t.used_at = Some(now);
        t.expires_at = now - Duration::minutes(1);
        assert!(matches!(t.check_usable(now, 3), Err(AuthError::TokenUsed)));
    }

    #[test]
    fn superseded_token_is_indistinguishable_from_unknown() {
        let now = Utc::now();
        let mut t = token(now);
        t.active = false;
        assert!(matches!(t.check_usable(now, 3), Err(AuthError::TokenInvalid)));
    }

    #[test]
    fn expired_token_rejected() {
        let now = Utc::now();
        let mut t = token(now);
        t.expires_at = now - Duration::seconds(1);
        assert!(matches!(t.check_usable(now, 3), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn unverified_challenge_reports_challenge_required() {
        let now = Utc::now();
        let mut t = token(now);
        t.requires_security_question = true;
        assert!(matches!(
            t.check_usable(now, 3),
            Err(AuthError::ChallengeRequired)
        ));
        t.security_question_verified = true;
        assert!(t.check_usable(now, 3).is_ok());
    }

    #[test]
    fn attempt_cap_locks_token_regardless_of_answer_state() {
        let now = Utc::now();
        let mut t = token(now);
        t.requires_security_question = true;
        t.security_question_attempts = 3;
        assert!(matches!(
            t.check_usable(now, 3),
            Err(AuthError::AttemptsExceeded)
        ));
    }
}
