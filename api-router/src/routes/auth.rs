use axum::{
    body::Bytes,
    extract::{FromRef, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use common::{
    storage::types::{
        refresh_token::RefreshToken,
        user::{User, UserProfile},
    },
    utils::jwt::TokenKind,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    api_state::ApiState,
    cookies::{clear_auth_cookies, get_cookie_value, set_auth_cookies, REFRESH_TOKEN_COOKIE},
    error::ApiError,
};

pub const PASSWORD_MAX_CHARS: usize = 100;
pub const FULL_NAME_MAX_CHARS: usize = 255;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
    pub password: String,
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
struct RefreshRequest {
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub user: UserProfile,
}

/// Endpoints reachable without a session.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
}

/// Endpoints that need a valid access token.
pub fn session_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/auth/verify", get(verify))
        .route("/auth/me", get(me))
}

pub(crate) fn validate_password_length(password: &str) -> Result<(), ApiError> {
    if password.chars().count() > PASSWORD_MAX_CHARS {
        return Err(ApiError::ValidationError(format!(
            "Password cannot exceed {PASSWORD_MAX_CHARS} characters"
        )));
    }
    Ok(())
}

pub(crate) fn validate_full_name(full_name: &str) -> Result<String, ApiError> {
    let full_name = full_name.trim();
    if full_name.is_empty() || full_name.chars().count() > FULL_NAME_MAX_CHARS {
        return Err(ApiError::ValidationError(format!(
            "Full name must be between 1 and {FULL_NAME_MAX_CHARS} characters"
        )));
    }
    Ok(full_name.to_owned())
}

/// Mints an access/refresh pair, records the refresh token and sets both cookies.
async fn start_session(
    state: &ApiState,
    user: User,
) -> Result<(HeaderMap, TokenResponse), ApiError> {
    let access = state.jwt.issue(&user.id, TokenKind::Access)?;
    let refresh = state.jwt.issue(&user.id, TokenKind::Refresh)?;

    RefreshToken::store(
        &user.id,
        &refresh.token,
        refresh.claims.expires_at(),
        &state.db,
    )
    .await?;

    let mut headers = HeaderMap::new();
    set_auth_cookies(
        &mut headers,
        &access.token,
        state.jwt.access_ttl().num_seconds(),
        &refresh.token,
        state.jwt.refresh_ttl().num_seconds(),
        state.config.is_production(),
    );

    Ok((
        headers,
        TokenResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "bearer".to_string(),
            user: user.into(),
        },
    ))
}

fn refresh_token_from(headers: &HeaderMap, body: &Bytes) -> Option<String> {
    get_cookie_value(headers, REFRESH_TOKEN_COOKIE).or_else(|| {
        serde_json::from_slice::<RefreshRequest>(body)
            .ok()
            .and_then(|req| req.refresh_token)
            .filter(|token| !token.trim().is_empty())
    })
}

pub async fn register(
    State(state): State<ApiState>,
    Json(input): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_password_length(&input.password)?;
    let full_name = validate_full_name(&input.full_name)?;

    let username = match input.username.filter(|u| !u.trim().is_empty()) {
        Some(username) => username,
        None => User::derive_username(&input.email.trim().to_lowercase(), &state.db).await?,
    };

    let user = User::create_new(input.email, username, input.password, full_name, &state.db).await?;
    info!(user_id = %user.id, "User registered");

    let (headers, body) = start_session(&state, user).await?;
    Ok((StatusCode::CREATED, headers, Json(body)))
}

pub async fn login(
    State(state): State<ApiState>,
    Json(input): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = User::authenticate(&input.email, &input.password, &state.db)
        .await
        .map_err(|_| ApiError::Unauthorized("Incorrect email or password".to_string()))?;
    info!(user_id = %user.id, "User logged in");

    let (headers, body) = start_session(&state, user).await?;
    Ok((headers, Json(body)))
}

pub async fn refresh(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let token = refresh_token_from(&headers, &body)
        .ok_or_else(|| ApiError::Unauthorized("Refresh token not provided".to_string()))?;

    let claims = state.jwt.verify(&token, TokenKind::Refresh)?;

    // Rotation: a refresh token works exactly once.
    let stored = RefreshToken::revoke(&token, &state.db)
        .await?
        .filter(|record| !record.is_expired() && record.user_id == claims.sub)
        .ok_or_else(|| ApiError::Unauthorized("Invalid refresh token".to_string()))?;

    let user: Option<User> = state.db.get_item(&stored.user_id).await.map_err(|e| {
        tracing::error!("Failed to load user for refresh: {e}");
        ApiError::InternalError("Internal server error".to_string())
    })?;
    let user = user
        .filter(|u| u.is_active)
        .ok_or_else(|| ApiError::Unauthorized("User not found or inactive".to_string()))?;

    let (headers, body) = start_session(&state, user).await?;
    Ok((headers, Json(body)))
}

pub async fn logout(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = refresh_token_from(&headers, &body) {
        if let Some(record) = RefreshToken::revoke(&token, &state.db).await? {
            info!(user_id = %record.user_id, "User logged out");
        }
    }

    let mut response_headers = HeaderMap::new();
    clear_auth_cookies(&mut response_headers, state.config.is_production());

    Ok((
        response_headers,
        Json(json!({"message": "Successfully logged out"})),
    ))
}

pub async fn verify(Extension(user): Extension<User>) -> impl IntoResponse {
    Json(json!({
        "authenticated": true,
        "user": UserProfile::from(user),
    }))
}

pub async fn me(Extension(user): Extension<User>) -> Json<UserProfile> {
    Json(user.into())
}
