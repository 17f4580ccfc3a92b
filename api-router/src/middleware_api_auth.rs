use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use common::{storage::types::user::User, utils::jwt::TokenKind};

use crate::{
    api_state::ApiState,
    cookies::{get_cookie_value, ACCESS_TOKEN_COOKIE},
    error::ApiError,
};

/// Resolves the caller from the access token cookie, falling back to a
/// bearer header, and stores the active [`User`] in request extensions.
pub async fn api_auth(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_access_token(request.headers())
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

    let claims = state.jwt.verify(&token, TokenKind::Access)?;

    let user: Option<User> = state.db.get_item(&claims.sub).await.map_err(|e| {
        tracing::error!("Failed to load user for token: {e}");
        ApiError::InternalError("Internal server error".to_string())
    })?;
    let user = user
        .filter(|u| u.is_active)
        .ok_or_else(|| ApiError::Unauthorized("User not found or inactive".to_string()))?;

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    get_cookie_value(headers, ACCESS_TOKEN_COOKIE).or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|auth| auth.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(String::from)
    })
}
