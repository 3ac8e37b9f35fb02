use std::env;
use std::fmt;
use std::net::SocketAddr;

use chrono::Duration;
use dotenv::dotenv;

/// Reset-token lifetime must fall inside this window; values outside it are
/// a deployment mistake and abort startup.
pub const RESET_TTL_MIN_MINUTES: i64 = 5;
pub const RESET_TTL_MAX_MINUTES: i64 = 120;

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing required environment variable {key}"),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Empty string selects the in-process memory store (single instance
    /// only; see `db::memory`).
    pub redis_url: String,
    pub bind_addr: SocketAddr,

    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub session_ttl_secs: u64,

    pub reset_token_ttl: Duration,
    pub reset_max_attempts: i64,
    pub reset_request_max: u32,
    pub reset_request_window_secs: u64,
    pub login_max_attempts: u32,
    pub login_window_secs: u64,

    pub allowed_email_domains: Vec<String>,
    pub secure_cookies: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let access_secret =
            env::var("JWT_ACCESS_SECRET").map_err(|_| ConfigError::Missing("JWT_ACCESS_SECRET"))?;
        let refresh_secret = env::var("JWT_REFRESH_SECRET")
            .map_err(|_| ConfigError::Missing("JWT_REFRESH_SECRET"))?;
        if access_secret == refresh_secret {
            return Err(ConfigError::Invalid(
                "JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ".to_string(),
            ));
        }

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("BIND_ADDR: {e}")))?;

        let reset_ttl_minutes = parse_i64("RESET_TOKEN_TTL_MINUTES", 30)?;
        let reset_token_ttl = validate_reset_ttl(reset_ttl_minutes)?;

        let allowed_email_domains = env::var("ALLOWED_EMAIL_DOMAINS")
            .unwrap_or_else(|_| "gamc.gov.bo".to_string())
            .split(',')
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            redis_url: env::var("REDIS_URL").unwrap_or_default(),
            bind_addr,
            access_secret,
            refresh_secret,
            access_ttl: Duration::minutes(parse_i64("ACCESS_TOKEN_TTL_MINUTES", 15)?),
            refresh_ttl: Duration::days(parse_i64("REFRESH_TOKEN_TTL_DAYS", 7)?),
            session_ttl_secs: parse_i64("SESSION_TTL_SECS", 7 * 24 * 60 * 60)? as u64,
            reset_token_ttl,
            reset_max_attempts: parse_i64("RESET_MAX_ATTEMPTS", 3)?,
            reset_request_max: parse_i64("RESET_REQUEST_MAX", 1)? as u32,
            reset_request_window_secs: parse_i64("RESET_REQUEST_WINDOW_SECS", 300)? as u64,
            login_max_attempts: parse_i64("LOGIN_MAX_ATTEMPTS", 10)? as u32,
            login_window_secs: parse_i64("LOGIN_WINDOW_SECS", 900)? as u64,
            allowed_email_domains,
            secure_cookies: env::var("SECURE_COOKIES")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        })
    }
}

fn parse_i64(key: &'static str, default: i64) -> Result<i64, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Bounds check for the reset-token lifetime, [5 min, 2 h].
pub fn validate_reset_ttl(minutes: i64) -> Result<Duration, ConfigError> {
    if !(RESET_TTL_MIN_MINUTES..=RESET_TTL_MAX_MINUTES).contains(&minutes) {
        return Err(ConfigError::Invalid(format!(
            "RESET_TOKEN_TTL_MINUTES must be between {RESET_TTL_MIN_MINUTES} and \
             {RESET_TTL_MAX_MINUTES}, got {minutes}"
        )));
    }
    Ok(Duration::minutes(minutes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_ttl_default_is_within_bounds() {
        assert_eq!(validate_reset_ttl(30).unwrap(), Duration::minutes(30));
    }

    #[test]
    fn reset_ttl_bounds_are_inclusive() {
        assert!(validate_reset_ttl(5).is_ok());
        assert!(validate_reset_ttl(120).is_ok());
    }

    #[test]
    fn out_of_bounds_reset_ttl_is_a_config_error() {
        assert!(matches!(validate_reset_ttl(4), Err(ConfigError::Invalid(_))));
        assert!(matches!(validate_reset_ttl(121), Err(ConfigError::Invalid(_))));
        assert!(matches!(validate_reset_ttl(0), Err(ConfigError::Invalid(_))));
    }
}
