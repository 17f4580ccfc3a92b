#![allow(clippy::module_name_repetitions)]
use uuid::Uuid;

use crate::stored_object;

#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

/// One tool invocation as persisted alongside the message that produced it.
#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    /// Null arguments are not stored, so a missing field reads back as null.
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub result: Option<String>,
}

stored_object!(Message, "message", {
    conversation_id: String,
    user_id: String,
    role: MessageRole,
    content: String,
    tool_calls: Option<Vec<ToolCallRecord>>,
    #[serde(default)]
    ordinal: i64
});

impl Message {
    pub fn new(
        conversation_id: String,
        user_id: String,
        role: MessageRole,
        content: String,
        tool_calls: Option<Vec<ToolCallRecord>>,
        ordinal: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            conversation_id,
            user_id,
            role,
            content,
            tool_calls,
            ordinal,
        }
    }

    /// Canonical replay order: creation time, then ordinal for equal timestamps.
    pub fn sort_chronologically(messages: &mut [Message]) {
        messages.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.ordinal.cmp(&b.ordinal))
        });
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}
