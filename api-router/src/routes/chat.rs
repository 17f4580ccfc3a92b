use assistant_pipeline::ToolInvocationRecord;
use axum::{
    extract::{FromRef, Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use common::storage::types::{conversation::Conversation, message::Message, user::User};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCallSummary {
    pub tool: String,
    pub args: Value,
    pub result: String,
}

impl From<ToolInvocationRecord> for ToolCallSummary {
    fn from(record: ToolInvocationRecord) -> Self {
        Self {
            tool: record.tool,
            args: record.args,
            result: record.result,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub response: String,
    pub tool_calls: Vec<ToolCallSummary>,
}

#[derive(Debug, Serialize)]
pub struct ConversationDetail {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub struct TitlePatch {
    pub title: String,
}

pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/{user_id}/chat", post(chat))
        .route("/{user_id}/conversations", get(list_conversations))
        .route(
            "/{user_id}/conversations/{conversation_id}",
            get(get_conversation).patch(patch_conversation_title),
        )
}

/// The path names whose data is touched; it has to be the caller.
fn ensure_caller(user: &User, path_user_id: &str) -> Result<(), ApiError> {
    if user.id == path_user_id {
        Ok(())
    } else {
        tracing::warn!(caller = %user.id, requested = %path_user_id, "User id mismatch");
        Err(ApiError::Forbidden(
            "Cannot access another user's chat".to_string(),
        ))
    }
}

pub async fn chat(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(user_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    ensure_caller(&user, &user_id)?;

    let result = state
        .chat
        .handle_turn(&user.id, request.conversation_id.as_deref(), &request.message)
        .await?;

    Ok(Json(ChatResponse {
        conversation_id: result.conversation_id,
        response: result.response,
        tool_calls: result.tool_calls.into_iter().map(Into::into).collect(),
    }))
}

pub async fn list_conversations(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    ensure_caller(&user, &user_id)?;
    let conversations = User::get_user_conversations(&user.id, &state.db).await?;
    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path((user_id, conversation_id)): Path<(String, String)>,
) -> Result<Json<ConversationDetail>, ApiError> {
    ensure_caller(&user, &user_id)?;
    let (conversation, messages) =
        Conversation::get_complete_conversation(&conversation_id, &user.id, &state.db).await?;

    Ok(Json(ConversationDetail {
        conversation,
        messages,
    }))
}

pub async fn patch_conversation_title(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path((user_id, conversation_id)): Path<(String, String)>,
    Json(patch): Json<TitlePatch>,
) -> Result<Json<Conversation>, ApiError> {
    ensure_caller(&user, &user_id)?;
    let conversation =
        Conversation::patch_title(&conversation_id, &user.id, &patch.title, &state.db).await?;
    Ok(Json(conversation))
}
