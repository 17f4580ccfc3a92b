use surrealdb::opt::PatchOp;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::message::Message;

/// Titles are cut from the opening message.
pub const TITLE_MAX_CHARS: usize = 50;

stored_object!(Conversation, "conversation", {
    user_id: String,
    title: String
});

impl Conversation {
    pub fn new(user_id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id,
            title,
        }
    }

    pub fn title_from_message(message: &str) -> String {
        message.trim().chars().take(TITLE_MAX_CHARS).collect()
    }

    /// Loads a conversation owned by `user_id` with its messages in replay order.
    /// Conversations owned by someone else are reported as not found.
    pub async fn get_complete_conversation(
        conversation_id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(Self, Vec<Message>), AppError> {
        let conversation: Conversation = db
            .get_item(conversation_id)
            .await?
            .filter(|c: &Conversation| c.user_id == user_id)
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

        let mut messages: Vec<Message> = db
            .client
            .query("SELECT * FROM type::table($table_name) WHERE conversation_id = $conversation_id AND user_id = $user_id ORDER BY created_at, ordinal")
            .bind(("table_name", Message::table_name()))
            .bind(("conversation_id", conversation_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;
        Message::sort_chronologically(&mut messages);

        Ok((conversation, messages))
    }

    /// Stores a batch of messages and bumps `updated_at` in one transaction.
    /// Either every message lands or none do.
    pub async fn append_messages(
        id: &str,
        messages: Vec<Message>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let query = format!(
            "BEGIN TRANSACTION;
             INSERT INTO {} $messages;
             UPDATE type::thing($table_name, $id) SET updated_at = $updated_at;
             COMMIT TRANSACTION;",
            Message::table_name()
        );

        db.client
            .query(query)
            .bind(("messages", messages))
            .bind(("table_name", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("updated_at", surrealdb::Datetime::from(Utc::now())))
            .await?
            .check()?;

        Ok(())
    }

    pub async fn patch_title(
        id: &str,
        user_id: &str,
        new_title: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let conversation: Option<Conversation> = db.get_item(id).await?;
        let conversation = conversation
            .filter(|c| c.user_id == user_id)
            .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

        let title = new_title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Title cannot be empty".to_string()));
        }

        let updated: Option<Self> = db
            .update((Self::table_name(), conversation.id.as_str()))
            .patch(PatchOp::replace("/title", title.to_string()))
            .patch(PatchOp::replace(
                "/updated_at",
                surrealdb::Datetime::from(Utc::now()),
            ))
            .await?;

        updated.ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))
    }
}
