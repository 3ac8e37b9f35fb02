use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::{KeyValueStore, StoreError};
use crate::models::session::Session;

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn user_sessions_key(user_id: i64) -> String {
    format!("user_sessions:{user_id}")
}

fn blacklist_key(jti: &str) -> String {
    format!("blacklist:{jti}")
}

fn user_refresh_key(user_id: i64) -> String {
    format!("user_refresh_jtis:{user_id}")
}

fn rate_limit_key(scope: &str, identity: &str) -> String {
    format!("ratelimit:{scope}:{identity}")
}

#[derive(Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

/// Session, blacklist and rate-limit operations over the key-value backend.
#[derive(Clone)]
pub struct AuthStore {
    kv: Arc<dyn KeyValueStore>,
}

impl AuthStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /* ---------- sessions ---------- */

    #[instrument(skip(self, session))]
    pub async fn create_session(
        &self,
        session_id: &str,
        session: &Session,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(session)
            .map_err(|e| StoreError(format!("session serialization: {e}")))?;
        self.kv.set_ex(&session_key(session_id), &payload, ttl_secs).await?;

        // Per-user index for delete_user_sessions; kept alive as long as the
        // newest session.
        let index = user_sessions_key(session.user_id);
        self.kv.sadd(&index, session_id).await?;
        self.kv.expire(&index, ttl_secs).await?;

        info!(user_id = session.user_id, "Session created");
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let raw = self.kv.get(&session_key(session_id)).await?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError(format!("session deserialization: {e}"))),
            None => Ok(None),
        }
    }

    /// Re-save an existing session (last-activity refresh). The TTL passed
    /// here is the remaining lifetime, not a sliding renewal.
    pub async fn save_session(
        &self,
        session_id: &str,
        session: &Session,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(session)
            .map_err(|e| StoreError(format!("session serialization: {e}")))?;
        self.kv.set_ex(&session_key(session_id), &payload, ttl_secs).await
    }

    /// Remaining TTL of a session key, so a re-save keeps the original
    /// absolute expiry. Falls back to the configured TTL if the key has
    /// somehow lost its expiry.
    pub async fn session_ttl(&self, session_id: &str, default_secs: u64) -> Result<u64, StoreError> {
        let ttl = self.kv.ttl(&session_key(session_id)).await?;
        if ttl > 0 {
            Ok(ttl as u64)
        } else {
            Ok(default_secs)
        }
    }

    #[instrument(skip(self))]
    pub async fn delete_session(&self, session_id: &str, user_id: i64) -> Result<(), StoreError> {
        self.kv.del(&session_key(session_id)).await?;
        self.kv.srem(&user_sessions_key(user_id), session_id).await?;
        info!(user_id, "Session deleted");
        Ok(())
    }

    /// Remove every session recorded for a user. Best effort: a session
    /// created after the index is read here is not caught — an accepted
    /// eventual-consistency gap, since closing it would need a global lock.
    #[instrument(skip(self))]
    pub async fn delete_user_sessions(&self, user_id: i64) -> Result<u64, StoreError> {
        let index = user_sessions_key(user_id);
        let session_ids = self.kv.smembers(&index).await?;
        let mut removed = 0u64;
        for session_id in &session_ids {
            self.kv.del(&session_key(session_id)).await?;
            removed += 1;
        }
        self.kv.del(&index).await?;
        info!(user_id, removed, "All user sessions removed");
        Ok(removed)
    }

    /* ---------- token blacklist ---------- */

    /// Mark a jti revoked for `ttl_secs` — callers pass the token's remaining
    /// life so the entry dies exactly when the token would have.
    #[instrument(skip(self))]
    pub async fn revoke_token(&self, jti: &str, ttl_secs: u64) -> Result<(), StoreError> {
        if ttl_secs == 0 {
            // Already past expiry; verification rejects it without our help.
            return Ok(());
        }
        self.kv.set_ex(&blacklist_key(jti), "1", ttl_secs).await?;
        info!("Token revoked");
        Ok(())
    }

    pub async fn is_token_revoked(&self, jti: &str) -> Result<bool, StoreError> {
        self.kv.exists(&blacklist_key(jti)).await
    }

    /* ---------- refresh-token tracking ---------- */

    /// Remember which refresh jtis are outstanding for a user so a password
    /// reset can revoke them all.
    pub async fn track_refresh_jti(
        &self,
        user_id: i64,
        jti: &str,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let key = user_refresh_key(user_id);
        self.kv.sadd(&key, jti).await?;
        self.kv.expire(&key, ttl_secs).await
    }

    pub async fn untrack_refresh_jti(&self, user_id: i64, jti: &str) -> Result<(), StoreError> {
        self.kv.srem(&user_refresh_key(user_id), jti).await
    }

    /// Blacklist every outstanding refresh jti for a user. The full refresh
    /// lifetime is used as the TTL, an upper bound on each token's remaining
    /// life.
    #[instrument(skip(self))]
    pub async fn revoke_user_refresh_tokens(
        &self,
        user_id: i64,
        refresh_ttl_secs: u64,
    ) -> Result<u64, StoreError> {
        let key = user_refresh_key(user_id);
        let jtis = self.kv.smembers(&key).await?;
        let mut revoked = 0u64;
        for jti in &jtis {
            self.kv.set_ex(&blacklist_key(jti), "1", refresh_ttl_secs).await?;
            revoked += 1;
        }
        self.kv.del(&key).await?;
        info!(user_id, revoked, "Outstanding refresh tokens revoked");
        Ok(revoked)
    }

    /* ---------- rate limiting ---------- */

    /// Fixed-window counter, increment-then-compare. The increment is atomic
    /// in the backend, so two concurrent requests cannot both observe a count
    /// below the cap and pass.
    #[instrument(skip(self))]
    pub async fn hit_rate_limit(
        &self,
        scope: &str,
        identity: &str,
        max: u32,
        window_secs: u64,
    ) -> Result<RateLimitDecision, StoreError> {
        let key = rate_limit_key(scope, identity);
        let count = self.kv.incr(&key).await?;
        if count == 1 {
            self.kv.expire(&key, window_secs).await?;
        }
        if count > i64::from(max) {
            let ttl = self.kv.ttl(&key).await?;
            let retry_after_secs = if ttl > 0 { ttl as u64 } else { window_secs };
            warn!(scope, identity, count, "Rate limit exceeded");
            return Ok(RateLimitDecision::Limited { retry_after_secs });
        }
        Ok(RateLimitDecision::Allowed)
    }

    /// Forget the counter for an identity. Callers that clear on success turn
    /// the window into a failures-only budget.
    pub async fn clear_rate_limit(&self, scope: &str, identity: &str) -> Result<(), StoreError> {
        self.kv.del(&rate_limit_key(scope, identity)).await
    }
}
