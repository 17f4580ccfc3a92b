use common::storage::types::message::{Message, MessageRole};

use crate::oracle::TranscriptEntry;

/// Builds the opening transcript for a turn: the system instruction, the
/// persisted history in replay order, then the new user message.
///
/// Past tool traffic is flattened: only user and assistant text is replayed,
/// so tool rows and assistant rows without text are left out.
pub fn assemble_transcript(
    system_prompt: &str,
    history: &[Message],
    user_message: &str,
) -> Vec<TranscriptEntry> {
    let mut ordered = history.to_vec();
    Message::sort_chronologically(&mut ordered);

    let mut transcript = Vec::with_capacity(ordered.len().saturating_add(2));
    transcript.push(TranscriptEntry::System(system_prompt.to_string()));

    for message in ordered {
        match message.role {
            MessageRole::User => transcript.push(TranscriptEntry::User(message.content)),
            MessageRole::Assistant if !message.content.is_empty() => {
                transcript.push(TranscriptEntry::Assistant {
                    content: Some(message.content),
                    tool_calls: Vec::new(),
                });
            }
            MessageRole::Assistant | MessageRole::Tool | MessageRole::System => {}
        }
    }

    transcript.push(TranscriptEntry::User(user_message.to_string()));
    transcript
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use common::storage::types::message::ToolCallRecord;
    use serde_json::json;

    fn message(role: MessageRole, content: &str, offset_secs: i64, ordinal: i64) -> Message {
        let mut message = Message::new(
            "conv".into(),
            "user".into(),
            role,
            content.into(),
            None,
            ordinal,
        );
        message.created_at = Utc::now() + Duration::seconds(offset_secs);
        message
    }

    #[test]
    fn test_replay_follows_timestamps_not_input_order() {
        let history = vec![
            message(MessageRole::User, "third", 3, 0),
            message(MessageRole::User, "first", 1, 0),
            message(MessageRole::Assistant, "second", 2, 0),
        ];

        let transcript = assemble_transcript("sys", &history, "new");

        assert_eq!(
            transcript,
            vec![
                TranscriptEntry::System("sys".into()),
                TranscriptEntry::User("first".into()),
                TranscriptEntry::Assistant {
                    content: Some("second".into()),
                    tool_calls: vec![],
                },
                TranscriptEntry::User("third".into()),
                TranscriptEntry::User("new".into()),
            ]
        );
    }

    #[test]
    fn test_equal_timestamps_fall_back_to_ordinal() {
        let now = Utc::now();
        let mut later = message(MessageRole::Assistant, "reply", 0, 1);
        let mut earlier = message(MessageRole::User, "question", 0, 0);
        later.created_at = now;
        earlier.created_at = now;

        let transcript = assemble_transcript("sys", &[later, earlier], "next");

        assert_eq!(transcript[1], TranscriptEntry::User("question".into()));
        assert_eq!(
            transcript[2],
            TranscriptEntry::Assistant {
                content: Some("reply".into()),
                tool_calls: vec![],
            }
        );
    }

    #[test]
    fn test_tool_traffic_is_flattened() {
        let mut call_turn = message(MessageRole::Assistant, "", 1, 1);
        call_turn.tool_calls = Some(vec![ToolCallRecord {
            id: "call_1".into(),
            name: "add_task".into(),
            arguments: json!({"title": "milk"}),
            result: Some("Task created with ID: 1".into()),
        }]);
        let history = vec![
            message(MessageRole::User, "add milk", 0, 0),
            call_turn,
            message(MessageRole::Tool, "Task created with ID: 1", 2, 2),
            message(MessageRole::Assistant, "Added milk.", 3, 3),
        ];

        let transcript = assemble_transcript("sys", &history, "thanks");

        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript[1], TranscriptEntry::User("add milk".into()));
        assert_eq!(
            transcript[2],
            TranscriptEntry::Assistant {
                content: Some("Added milk.".into()),
                tool_calls: vec![],
            }
        );
        assert_eq!(transcript[3], TranscriptEntry::User("thanks".into()));
    }
}
