use common::{
    error::AppError,
    storage::types::system_prompts::{DEFAULT_CHAT_SYSTEM_PROMPT, TOOL_ROUNDS_EXHAUSTED_RESPONSE},
    utils::config::AppConfig,
};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
    oracle::{Oracle, OracleReply, TranscriptEntry},
    tools::ToolRegistry,
};

pub const DEFAULT_MAX_ROUNDS: usize = 5;

/// Used when the model ends the turn without saying anything.
const EMPTY_REPLY_RESPONSE: &str = "Done.";

#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    pub max_rounds: usize,
    pub system_prompt: String,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            system_prompt: DEFAULT_CHAT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl AgentLoopConfig {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_rounds: config.max_tool_rounds.max(1),
            ..Self::default()
        }
    }
}

/// One executed tool call as reported back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationRecord {
    pub call_id: String,
    pub tool: String,
    pub args: Value,
    pub result: String,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub response: String,
    pub tool_calls: Vec<ToolInvocationRecord>,
    /// Entries produced during the turn, in order, after the seeded transcript.
    pub generated: Vec<TranscriptEntry>,
    pub rounds: usize,
    pub exhausted: bool,
}

/// Drives one turn: ask the oracle, run any requested tools in order, feed
/// the results back, and stop on plain text or after `max_rounds` round-trips.
pub struct AgentLoop {
    config: AgentLoopConfig,
}

impl AgentLoop {
    pub fn new(config: AgentLoopConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AgentLoopConfig {
        &self.config
    }

    #[instrument(skip_all, fields(oracle = oracle.name(), user_id = registry.user_id()))]
    pub async fn run(
        &self,
        oracle: &dyn Oracle,
        registry: &ToolRegistry,
        mut transcript: Vec<TranscriptEntry>,
    ) -> Result<TurnOutcome, AppError> {
        let tools = ToolRegistry::list_tools();
        let seeded = transcript.len();
        let mut invocations = Vec::new();
        let mut rounds = 0;

        while rounds < self.config.max_rounds {
            rounds += 1;
            let calls = match oracle.respond(&transcript, &tools).await? {
                OracleReply::FinalText(text) => {
                    let response = if text.trim().is_empty() {
                        EMPTY_REPLY_RESPONSE.to_string()
                    } else {
                        text
                    };
                    transcript.push(TranscriptEntry::Assistant {
                        content: Some(response.clone()),
                        tool_calls: Vec::new(),
                    });
                    info!(rounds, tool_calls = invocations.len(), "turn finished");
                    return Ok(TurnOutcome {
                        response,
                        tool_calls: invocations,
                        generated: transcript.split_off(seeded),
                        rounds,
                        exhausted: false,
                    });
                }
                OracleReply::ToolCalls(calls) => calls,
            };

            debug!(round = rounds, count = calls.len(), "executing tool calls");
            transcript.push(TranscriptEntry::Assistant {
                content: None,
                tool_calls: calls.clone(),
            });

            for call in calls {
                let output = registry.call_tool(&call.name, &call.arguments).await;
                transcript.push(TranscriptEntry::ToolResult {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    content: output.content.clone(),
                });
                invocations.push(ToolInvocationRecord {
                    call_id: call.id,
                    tool: call.name,
                    args: call.arguments,
                    result: output.content,
                    success: output.success,
                });
            }
        }

        warn!(
            rounds,
            tool_calls = invocations.len(),
            "tool rounds exhausted without a final answer"
        );
        let response = TOOL_ROUNDS_EXHAUSTED_RESPONSE.to_string();
        transcript.push(TranscriptEntry::Assistant {
            content: Some(response.clone()),
            tool_calls: Vec::new(),
        });

        Ok(TurnOutcome {
            response,
            tool_calls: invocations,
            generated: transcript.split_off(seeded),
            rounds,
            exhausted: true,
        })
    }
}
