use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::{Role, User};

/// Access and refresh tokens are signed with distinct secrets and carry
/// distinct lifetimes; the kind is also embedded in the claims so a token of
/// one kind can never pass verification as the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,          // user id
    pub email: String,
    pub role: Role,
    pub org_unit_id: i64,
    pub sid: String,       // session id
    pub jti: String,       // unique token id, blacklist key
    pub iat: i64,
    pub exp: i64,
    pub token_type: TokenKind,
}

impl Claims {
    pub fn new(user: &User, session_id: &str, kind: TokenKind, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
            org_unit_id: user.org_unit_id,
            sid: session_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            token_type: kind,
        }
    }

    /// Seconds until this token expires naturally; used as the blacklist TTL
    /// so a revocation entry never outlives the token it guards.
    pub fn remaining_ttl_secs(&self) -> u64 {
        (self.exp - Utc::now().timestamp()).max(0) as u64
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}
