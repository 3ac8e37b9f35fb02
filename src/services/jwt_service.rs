use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::config::Config;
use crate::error::AuthError;
use crate::models::jwt::{Claims, TokenKind, TokenPair};
use crate::models::user::User;

/// Stateless token codec. Signing and verification are pure computation —
/// no store access, no async. Access and refresh tokens use distinct secrets,
/// so the kind check is enforced by the signature itself as well as by the
/// `token_type` claim.
#[derive(Clone)]
pub struct JwtService {
    access_enc: EncodingKey,
    access_dec: DecodingKey,
    refresh_enc: EncodingKey,
    refresh_dec: DecodingKey,
    access_ttl: chrono::Duration,
    refresh_ttl: chrono::Duration,
}

/// Freshly issued pair plus the refresh claims the caller needs for
/// jti tracking.
pub struct IssuedTokens {
    pub pair: TokenPair,
    pub access_claims: Claims,
    pub refresh_claims: Claims,
}

impl JwtService {
    pub fn new(config: &Config) -> Self {
        Self {
            access_enc: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_dec: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_enc: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_dec: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        }
    }

    pub fn issue(&self, user: &User, session_id: &str, kind: TokenKind) -> Result<(String, Claims), AuthError> {
        let (key, ttl) = match kind {
            TokenKind::Access => (&self.access_enc, self.access_ttl),
            TokenKind::Refresh => (&self.refresh_enc, self.refresh_ttl),
        };
        let claims = Claims::new(user, session_id, kind, ttl);
        let token = encode(&Header::default(), &claims, key)?;
        Ok((token, claims))
    }

    /// Access + refresh pair for one session.
    pub fn issue_pair(&self, user: &User, session_id: &str) -> Result<IssuedTokens, AuthError> {
        let (access_token, access_claims) = self.issue(user, session_id, TokenKind::Access)?;
        let (refresh_token, refresh_claims) = self.issue(user, session_id, TokenKind::Refresh)?;
        Ok(IssuedTokens {
            pair: TokenPair {
                access_token,
                refresh_token,
                expires_in: self.access_ttl.num_seconds(),
            },
            access_claims,
            refresh_claims,
        })
    }

    /// Verify signature, expiry and kind. Every failure collapses to
    /// `TokenInvalid` so callers cannot tell which check tripped.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, AuthError> {
        let key = match kind {
            TokenKind::Access => &self.access_dec,
            TokenKind::Refresh => &self.refresh_dec,
        };
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let claims = decode::<Claims>(token, key, &validation)?.claims;
        if claims.token_type != kind {
            return Err(AuthError::TokenInvalid);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;
    use chrono::Duration;

    fn test_service() -> JwtService {
        JwtService {
            access_enc: EncodingKey::from_secret(b"access-secret"),
            access_dec: DecodingKey::from_secret(b"access-secret"),
            refresh_enc: EncodingKey::from_secret(b"refresh-secret"),
            refresh_dec: DecodingKey::from_secret(b"refresh-secret"),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
        }
    }

    fn test_user() -> User {
        User {
            id: 42,
            email: "maria.rojas@gamc.gov.bo".to_string(),
            password_hash: String::new(),
            full_name: "Maria Rojas".to_string(),
            role: Role::Input,
            org_unit_id: 7,
            is_active: true,
        }
    }

    #[test]
    fn issued_claims_round_trip() {
        let svc = test_service();
        let user = test_user();
        let (token, issued) = svc.issue(&user, "sess-1", TokenKind::Access).unwrap();

        let claims = svc.verify(&token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.role, Role::Input);
        assert_eq!(claims.org_unit_id, 7);
        assert_eq!(claims.sid, "sess-1");
        assert_eq!(claims.jti, issued.jti);
        assert_eq!(claims.token_type, TokenKind::Access);
    }

    #[test]
    fn pair_carries_distinct_jtis() {
        let svc = test_service();
        let issued = svc.issue_pair(&test_user(), "sess-1").unwrap();
        assert_ne!(issued.access_claims.jti, issued.refresh_claims.jti);
        assert_eq!(issued.pair.expires_in, 15 * 60);
    }

    #[test]
    fn access_token_fails_refresh_verification() {
        let svc = test_service();
        let (token, _) = svc.issue(&test_user(), "sess-1", TokenKind::Access).unwrap();
        // Different secret, different kind — either alone must reject.
        assert!(matches!(
            svc.verify(&token, TokenKind::Refresh),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn expired_token_rejected_despite_valid_signature() {
        let mut svc = test_service();
        // Well past the default validation leeway.
        svc.access_ttl = Duration::minutes(-30);
        let (token, _) = svc.issue(&test_user(), "sess-1", TokenKind::Access).unwrap();
        assert!(matches!(
            svc.verify(&token, TokenKind::Access),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn garbage_token_rejected() {
        let svc = test_service();
        assert!(matches!(
            svc.verify("not-a-jwt", TokenKind::Access),
            Err(AuthError::TokenInvalid)
        ));
    }
}
