use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::api_state::ApiState;

const WINDOW: Duration = Duration::from_secs(60);

/// Paths that are never counted against a client.
const EXEMPT_PREFIXES: [&str; 2] = ["/health", "/api/health"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub is_limited: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp at which the current window ends.
    pub reset_at: i64,
}

/// Fixed one minute window per client address.
#[derive(Clone)]
pub struct RateLimiter {
    limit: u32,
    requests: Arc<Mutex<HashMap<String, (u32, Instant)>>>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            limit: limit_per_minute,
            requests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn check(&self, client: &str) -> RateLimitStatus {
        let now = Instant::now();

        let (count, window_start, is_limited) = {
            let mut requests = self.requests.lock().unwrap_or_else(|poisoned| {
                tracing::warn!("Rate limiter lock poisoned, recovering");
                poisoned.into_inner()
            });

            requests.retain(|_, (_, start)| now.duration_since(*start) < WINDOW * 2);

            let (count, start) = requests
                .entry(client.to_owned())
                .or_insert((0, now));
            if now.duration_since(*start) >= WINDOW {
                *count = 0;
                *start = now;
            }

            let is_limited = *count >= self.limit;
            if !is_limited {
                *count += 1;
            }
            (*count, *start, is_limited)
        };

        let remaining_window = WINDOW.saturating_sub(now.duration_since(window_start));
        let reset_at = chrono::Utc::now().timestamp()
            + i64::try_from(remaining_window.as_secs()).unwrap_or(60);

        RateLimitStatus {
            is_limited,
            limit: self.limit,
            remaining: self.limit.saturating_sub(count),
            reset_at,
        }
    }
}

fn is_exempt(path: &str) -> bool {
    EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |info| info.0.ip().to_string())
}

fn insert_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    for (name, value) in [
        ("x-ratelimit-limit", status.limit.to_string()),
        ("x-ratelimit-remaining", status.remaining.to_string()),
        ("x-ratelimit-reset", status.reset_at.to_string()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

pub async fn rate_limit(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    if is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let client = client_key(&request);
    let status = state.rate_limiter.check(&client);

    if status.is_limited {
        tracing::warn!(client = %client, limit = status.limit, "Rate limit exceeded");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": format!(
                    "Rate limit exceeded. Max {} requests per minute.",
                    status.limit
                ),
                "status": "error"
            })),
        )
            .into_response();
        insert_headers(response.headers_mut(), &status);
        return response;
    }

    let mut response = next.run(request).await;
    insert_headers(response.headers_mut(), &status);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_after_quota() {
        let limiter = RateLimiter::new(3);

        let first = limiter.check("10.0.0.1");
        assert!(!first.is_limited);
        assert_eq!(first.remaining, 2);

        limiter.check("10.0.0.1");
        let third = limiter.check("10.0.0.1");
        assert!(!third.is_limited);
        assert_eq!(third.remaining, 0);

        let fourth = limiter.check("10.0.0.1");
        assert!(fourth.is_limited);
        assert_eq!(fourth.remaining, 0);

        assert!(!limiter.check("10.0.0.2").is_limited);
    }

    #[test]
    fn test_reset_is_in_the_future() {
        let limiter = RateLimiter::new(1);
        let status = limiter.check("client");
        assert!(status.reset_at > chrono::Utc::now().timestamp());
    }

    #[test]
    fn test_health_paths_are_exempt() {
        assert!(is_exempt("/health"));
        assert!(is_exempt("/health/db"));
        assert!(is_exempt("/api/health"));
        assert!(!is_exempt("/tasks"));
    }
}
