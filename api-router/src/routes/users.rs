use axum::{
    extract::{FromRef, State},
    response::IntoResponse,
    routing::{get, put},
    Extension, Json, Router,
};
use common::storage::types::{
    refresh_token::RefreshToken,
    user::{User, UserProfile},
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    api_state::ApiState,
    error::ApiError,
    routes::auth::{validate_full_name, validate_password_length},
};

#[derive(Debug, Deserialize)]
pub struct ProfilePatch {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordChange {
    pub old_password: String,
    pub new_password: String,
}

pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/users/profile", get(get_profile).patch(patch_profile))
        .route("/users/password", put(change_password))
}

pub async fn get_profile(Extension(user): Extension<User>) -> Json<UserProfile> {
    Json(user.into())
}

pub async fn patch_profile(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<UserProfile>, ApiError> {
    let full_name = patch
        .full_name
        .as_deref()
        .map(validate_full_name)
        .transpose()?;

    let updated = User::patch_profile(&user.id, full_name, patch.avatar_url, &state.db).await?;
    Ok(Json(updated.into()))
}

pub async fn change_password(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(input): Json<PasswordChange>,
) -> Result<impl IntoResponse, ApiError> {
    validate_password_length(&input.new_password)?;
    User::change_password(&user.id, &input.old_password, &input.new_password, &state.db).await?;
    // Sessions started with the old password cannot be refreshed any more.
    RefreshToken::revoke_all_for_user(&user.id, &state.db).await?;

    tracing::info!(user_id = %user.id, "Password changed, refresh tokens revoked");
    Ok(Json(json!({"message": "Password updated successfully"})))
}
