use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            conversation::Conversation,
            message::{Message, MessageRole, ToolCallRecord},
        },
    },
};
use serde_json::json;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::{
    agent_loop::{AgentLoop, AgentLoopConfig, ToolInvocationRecord},
    history::assemble_transcript,
    oracle::{Oracle, ToolCallRequest, TranscriptEntry},
    tools::ToolRegistry,
};

/// Tool results kept on persisted message records are cut to this many characters.
pub const STORED_RESULT_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurnResult {
    pub conversation_id: String,
    pub response: String,
    pub tool_calls: Vec<ToolInvocationRecord>,
}

/// Runs chat turns end to end: resolves the conversation, stores the user
/// message, drives the agent loop and appends what it produced.
pub struct ChatPipeline {
    db: Arc<SurrealDbClient>,
    oracle: Arc<dyn Oracle>,
    agent: AgentLoop,
}

impl ChatPipeline {
    pub fn new(db: Arc<SurrealDbClient>, oracle: Arc<dyn Oracle>, config: AgentLoopConfig) -> Self {
        Self {
            db,
            oracle,
            agent: AgentLoop::new(config),
        }
    }

    pub async fn handle_turn(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        message: &str,
    ) -> Result<ChatTurnResult, AppError> {
        if message.trim().is_empty() {
            return Err(AppError::Validation("Message cannot be empty".into()));
        }

        let (conversation, history) = match conversation_id {
            Some(id) => {
                Uuid::parse_str(id).map_err(|_| {
                    AppError::Validation("Invalid conversation_id format".into())
                })?;
                Conversation::get_complete_conversation(id, user_id, &self.db).await?
            }
            None => {
                let conversation = Conversation::new(
                    user_id.to_string(),
                    Conversation::title_from_message(message),
                );
                let stored = self.db.store_item(conversation).await?.ok_or_else(|| {
                    AppError::InternalError("Conversation failed to store".into())
                })?;
                (stored, Vec::new())
            }
        };

        let span = info_span!("chat_turn", conversation_id = %conversation.id, user_id);
        self.run_turn(conversation, history, user_id, message)
            .instrument(span)
            .await
    }

    async fn run_turn(
        &self,
        conversation: Conversation,
        history: Vec<Message>,
        user_id: &str,
        message: &str,
    ) -> Result<ChatTurnResult, AppError> {
        let base_ordinal = i64::try_from(history.len()).unwrap_or(i64::MAX);

        // The user's message is kept even if the oracle later fails.
        self.db
            .store_item(Message::new(
                conversation.id.clone(),
                user_id.to_string(),
                MessageRole::User,
                message.to_string(),
                None,
                base_ordinal,
            ))
            .await?;

        let transcript = assemble_transcript(&self.agent.config().system_prompt, &history, message);
        let registry = ToolRegistry::new(Arc::clone(&self.db), user_id);
        let outcome = self
            .agent
            .run(self.oracle.as_ref(), &registry, transcript)
            .await?;

        let generated = to_messages(&conversation.id, user_id, &outcome.generated, base_ordinal);
        let stored = generated.len();
        Conversation::append_messages(&conversation.id, generated, &self.db).await?;

        info!(
            rounds = outcome.rounds,
            stored_messages = stored,
            exhausted = outcome.exhausted,
            "chat turn persisted"
        );

        Ok(ChatTurnResult {
            conversation_id: conversation.id,
            response: outcome.response,
            tool_calls: outcome.tool_calls,
        })
    }
}

fn truncate_result(result: &str) -> String {
    result.chars().take(STORED_RESULT_MAX_CHARS).collect()
}

/// Turns the entries a loop produced into message rows, ordinals continuing after the user message.
///
/// Tool results are paired with calls by position: the results directly after an
/// assistant entry answer its calls in order. Call ids are only unique per round.
fn to_messages(
    conversation_id: &str,
    user_id: &str,
    generated: &[TranscriptEntry],
    base_ordinal: i64,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(generated.len());
    let mut round_calls: &[ToolCallRequest] = &[];
    let mut position = 0_usize;

    for (index, (entry, offset)) in generated.iter().zip(1_i64..).enumerate() {
        let (role, content, tool_calls) = match entry {
            TranscriptEntry::Assistant {
                content,
                tool_calls,
            } => {
                round_calls = tool_calls.as_slice();
                position = 0;

                let mut results = round_results(generated, index);
                let records = (!tool_calls.is_empty()).then(|| {
                    tool_calls
                        .iter()
                        .map(|call| ToolCallRecord {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                            result: results.next().map(truncate_result),
                        })
                        .collect()
                });
                (
                    MessageRole::Assistant,
                    content.clone().unwrap_or_default(),
                    records,
                )
            }
            TranscriptEntry::ToolResult {
                call_id,
                name,
                content,
            } => {
                let arguments = round_calls
                    .get(position)
                    .filter(|call| call.id == *call_id)
                    .map_or_else(|| json!({}), |call| call.arguments.clone());
                position = position.saturating_add(1);

                (
                    MessageRole::Tool,
                    content.clone(),
                    Some(vec![ToolCallRecord {
                        id: call_id.clone(),
                        name: name.clone(),
                        arguments,
                        result: Some(truncate_result(content)),
                    }]),
                )
            }
            TranscriptEntry::System(_) | TranscriptEntry::User(_) => continue,
        };

        messages.push(Message::new(
            conversation_id.to_string(),
            user_id.to_string(),
            role,
            content,
            tool_calls,
            base_ordinal.saturating_add(offset),
        ));
    }

    messages
}

/// The run of tool results that directly follows the entry at `index`.
fn round_results(generated: &[TranscriptEntry], index: usize) -> impl Iterator<Item = &str> {
    generated
        .iter()
        .skip(index.saturating_add(1))
        .map_while(|entry| match entry {
            TranscriptEntry::ToolResult { content, .. } => Some(content.as_str()),
            _ => None,
        })
}
