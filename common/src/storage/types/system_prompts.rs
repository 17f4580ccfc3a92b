pub static DEFAULT_CHAT_SYSTEM_PROMPT: &str = r#"You are a helpful task management assistant. You can manage tasks using the provided tools. Always confirm actions. Use UUIDs for IDs provided by tools."#;

/// Returned to the user when the tool-calling rounds run out before the model produced an answer.
pub static TOOL_ROUNDS_EXHAUSTED_RESPONSE: &str =
    "I've completed the requested actions, but ran out of steps before writing a summary. Ask me to list your tasks to see the current state.";
