pub mod gemini;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    utils::config::{AppConfig, LlmProviderKind},
};
use serde::Serialize;
use serde_json::Value;

pub use gemini::GeminiOracle;
pub use openai::OpenAiOracle;

/// A tool as offered to the model: name, description and a JSON schema for its arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One call the model asked for. `id` pairs the call with its result on the next round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Provider-neutral transcript the loop builds up during a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEntry {
    System(String),
    User(String),
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResult {
        call_id: String,
        name: String,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum OracleReply {
    FinalText(String),
    ToolCalls(Vec<ToolCallRequest>),
}

#[async_trait]
pub trait Oracle: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs one round against the model. Errors abort the turn and are never retried here.
    async fn respond(
        &self,
        transcript: &[TranscriptEntry],
        tools: &[ToolDefinition],
    ) -> Result<OracleReply, AppError>;
}

/// Builds the oracle selected by `llm_provider`.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn Oracle>, AppError> {
    let oracle: Arc<dyn Oracle> = match config.llm_provider {
        LlmProviderKind::OpenAI => Arc::new(OpenAiOracle::from_config(config)),
        LlmProviderKind::Gemini => Arc::new(GeminiOracle::from_config(config)?),
    };

    Ok(oracle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_picks_provider() {
        let mut config = AppConfig::for_tests();
        assert_eq!(from_config(&config).unwrap().name(), "openai");

        config.llm_provider = LlmProviderKind::Gemini;
        config.gemini_api_key = "gemini-key".to_string();
        assert_eq!(from_config(&config).unwrap().name(), "gemini");
    }
}
