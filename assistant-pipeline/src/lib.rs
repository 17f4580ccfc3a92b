pub mod agent_loop;
pub mod chat;
pub mod history;
pub mod oracle;
pub mod tools;

pub use agent_loop::{AgentLoop, AgentLoopConfig, ToolInvocationRecord, TurnOutcome};
pub use chat::{ChatPipeline, ChatTurnResult};
pub use oracle::{Oracle, OracleReply, ToolCallRequest, ToolDefinition, TranscriptEntry};
pub use tools::ToolRegistry;
