use std::fmt::Write;

use axum::http::{header, HeaderMap, HeaderValue};

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// Attributes for one `Set-Cookie` header.
#[derive(Debug, Clone)]
pub struct AuthCookie<'a> {
    pub name: &'a str,
    pub value: &'a str,
    pub max_age_secs: i64,
    pub secure: bool,
}

impl AuthCookie<'_> {
    /// Auth cookies are always HttpOnly, SameSite=Lax and scoped to `/`.
    pub fn build(&self) -> String {
        let mut cookie = format!("{}={}", self.name, self.value);
        let _ = write!(cookie, "; Max-Age={}", self.max_age_secs);
        cookie.push_str("; Path=/; HttpOnly");
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str("; SameSite=Lax");
        cookie
    }
}

fn append_cookie(headers: &mut HeaderMap, cookie: &AuthCookie<'_>) {
    if let Ok(value) = HeaderValue::from_str(&cookie.build()) {
        headers.append(header::SET_COOKIE, value);
    }
}

pub fn set_auth_cookies(
    headers: &mut HeaderMap,
    access_token: &str,
    access_max_age_secs: i64,
    refresh_token: &str,
    refresh_max_age_secs: i64,
    secure: bool,
) {
    append_cookie(
        headers,
        &AuthCookie {
            name: ACCESS_TOKEN_COOKIE,
            value: access_token,
            max_age_secs: access_max_age_secs,
            secure,
        },
    );
    append_cookie(
        headers,
        &AuthCookie {
            name: REFRESH_TOKEN_COOKIE,
            value: refresh_token,
            max_age_secs: refresh_max_age_secs,
            secure,
        },
    );
}

pub fn clear_auth_cookies(headers: &mut HeaderMap, secure: bool) {
    for name in [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE] {
        append_cookie(
            headers,
            &AuthCookie {
                name,
                value: "",
                max_age_secs: 0,
                secure,
            },
        );
    }
}

pub fn get_cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|cookie| {
            let (name, value) = cookie.trim().split_once('=')?;
            (name.trim() == cookie_name && !value.trim().is_empty())
                .then(|| value.trim().to_owned())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_auth_cookies_emits_both_cookies() {
        let mut headers = HeaderMap::new();
        set_auth_cookies(&mut headers, "acc", 86_400, "ref", 604_800, false);

        let cookies: Vec<&str> = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert_eq!(
            cookies[0],
            "access_token=acc; Max-Age=86400; Path=/; HttpOnly; SameSite=Lax"
        );
        assert!(cookies[1].starts_with("refresh_token=ref; Max-Age=604800"));
        assert!(!cookies[1].contains("Secure"));
    }

    #[test]
    fn test_secure_flag_and_clearing() {
        let mut headers = HeaderMap::new();
        clear_auth_cookies(&mut headers, true);

        for value in headers.get_all(header::SET_COOKIE) {
            let value = value.to_str().unwrap();
            assert!(value.contains("=; Max-Age=0"));
            assert!(value.contains("; Secure"));
        }
    }

    #[test]
    fn test_get_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; access_token=abc.def; refresh_token="),
        );

        assert_eq!(
            get_cookie_value(&headers, ACCESS_TOKEN_COOKIE).as_deref(),
            Some("abc.def")
        );
        assert_eq!(get_cookie_value(&headers, REFRESH_TOKEN_COOKIE), None);
        assert_eq!(get_cookie_value(&headers, "missing"), None);
    }
}
