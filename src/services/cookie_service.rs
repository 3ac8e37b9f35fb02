use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue};
use time::{Duration, OffsetDateTime};
use tower_cookies::Cookie;

pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
const SAME_SITE: tower_cookies::cookie::SameSite = tower_cookies::cookie::SameSite::Strict;

/// The refresh token travels as an HttpOnly cookie (Secure outside local
/// development); the access token only ever rides the Authorization header.
pub struct CookieService;

impl CookieService {
    pub fn set_refresh_cookie(refresh_token: &str, max_age_secs: u64, secure: bool) -> HeaderMap {
        let cookie = Self::create_cookie(
            REFRESH_TOKEN_COOKIE,
            refresh_token,
            Duration::seconds(max_age_secs as i64),
            secure,
        );

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
            headers.insert(SET_COOKIE, value);
        }
        headers
    }

    pub fn clear_refresh_cookie(secure: bool) -> HeaderMap {
        let cookie = Cookie::build((REFRESH_TOKEN_COOKIE, ""))
            .secure(secure)
            .http_only(true)
            .same_site(SAME_SITE)
            .path("/")
            .expires(OffsetDateTime::now_utc() - Duration::days(1))
            .build();

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
            headers.insert(SET_COOKIE, value);
        }
        headers
    }

    pub fn extract_refresh_token(headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(axum::http::header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .find_map(|raw| {
                Cookie::parse(raw.trim().to_string())
                    .ok()
                    .filter(|c| c.name() == REFRESH_TOKEN_COOKIE)
                    .map(|c| c.value().to_string())
            })
    }

    fn create_cookie(name: &str, value: &str, max_age: Duration, secure: bool) -> Cookie<'static> {
        Cookie::build((name.to_string(), value.to_string()))
            .secure(secure)
            .http_only(true)
            .same_site(SAME_SITE)
            .path("/")
            .expires(OffsetDateTime::now_utc() + max_age)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_cookie_is_http_only() {
        let headers = CookieService::set_refresh_cookie("tok", 3600, true);
        let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("refresh_token=tok"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Strict"));
    }

    #[test]
    fn dev_cookie_skips_secure_flag() {
        let headers = CookieService::set_refresh_cookie("tok", 3600, false);
        let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn extracts_refresh_token_among_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("theme=dark; refresh_token=abc123; lang=es"),
        );
        assert_eq!(
            CookieService::extract_refresh_token(&headers).as_deref(),
            Some("abc123")
        );
    }

    #[test]
    fn missing_cookie_yields_none() {
        assert_eq!(CookieService::extract_refresh_token(&HeaderMap::new()), None);
    }
}
