use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessage,
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolChoiceOption,
        ChatCompletionToolType, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, FunctionCall, FunctionObjectArgs,
    },
    Client,
};
use async_trait::async_trait;
use common::{error::AppError, utils::config::AppConfig};
use serde_json::Value;
use tracing::{debug, error, instrument};

use super::{Oracle, OracleReply, ToolCallRequest, ToolDefinition, TranscriptEntry};

pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Chat-completions oracle for OpenAI and compatible endpoints.
pub struct OpenAiOracle {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiOracle {
    pub fn new(client: Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        );
        let model = config
            .chat_model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Self::new(client, model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Tool schemas are JSON schema already; they only need wrapping.
pub fn translate_tools(tools: &[ToolDefinition]) -> Result<Vec<ChatCompletionTool>, OpenAIError> {
    tools
        .iter()
        .map(|tool| {
            ChatCompletionToolArgs::default()
                .r#type(ChatCompletionToolType::Function)
                .function(
                    FunctionObjectArgs::default()
                        .name(tool.name.clone())
                        .description(tool.description.clone())
                        .parameters(tool.parameters.clone())
                        .build()?,
                )
                .build()
        })
        .collect()
}

pub fn translate_transcript(
    transcript: &[TranscriptEntry],
) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
    let mut messages = Vec::with_capacity(transcript.len());

    for entry in transcript {
        let message: ChatCompletionRequestMessage = match entry {
            TranscriptEntry::System(text) => {
                ChatCompletionRequestSystemMessage::from(text.clone()).into()
            }
            TranscriptEntry::User(text) => {
                ChatCompletionRequestUserMessage::from(text.clone()).into()
            }
            TranscriptEntry::Assistant {
                content,
                tool_calls,
            } => {
                let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                if let Some(content) = content {
                    builder.content(content.clone());
                }
                if !tool_calls.is_empty() {
                    builder.tool_calls(
                        tool_calls
                            .iter()
                            .map(|call| ChatCompletionMessageToolCall {
                                id: call.id.clone(),
                                r#type: ChatCompletionToolType::Function,
                                function: FunctionCall {
                                    name: call.name.clone(),
                                    arguments: call.arguments.to_string(),
                                },
                            })
                            .collect::<Vec<_>>(),
                    );
                }
                builder.build()?.into()
            }
            TranscriptEntry::ToolResult {
                call_id, content, ..
            } => ChatCompletionRequestToolMessageArgs::default()
                .content(content.clone())
                .tool_call_id(call_id.clone())
                .build()?
                .into(),
        };
        messages.push(message);
    }

    Ok(messages)
}

/// Unparseable argument strings are passed through as a JSON string so the
/// registry reports them as invalid instead of the turn failing. An empty
/// string means the tool was called without arguments.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

pub fn interpret_response(response: CreateChatCompletionResponse) -> Result<OracleReply, AppError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| AppError::Oracle("No choices in completion response".into()))?;

    let tool_calls: Vec<ToolCallRequest> = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCallRequest {
            arguments: parse_arguments(&call.function.arguments),
            id: call.id,
            name: call.function.name,
        })
        .collect();

    if tool_calls.is_empty() {
        Ok(OracleReply::FinalText(message.content.unwrap_or_default()))
    } else {
        Ok(OracleReply::ToolCalls(tool_calls))
    }
}

fn map_openai_error(err: OpenAIError) -> AppError {
    match &err {
        OpenAIError::ApiError(api_error) => {
            let code = api_error.code.as_deref().unwrap_or_default();
            let kind = api_error.r#type.as_deref().unwrap_or_default();
            if matches!(code, "rate_limit_exceeded" | "insufficient_quota")
                || kind == "insufficient_quota"
            {
                AppError::OracleUnavailable(api_error.message.clone())
            } else {
                AppError::Oracle(api_error.message.clone())
            }
        }
        OpenAIError::Reqwest(_) => AppError::OracleUnavailable(err.to_string()),
        _ => AppError::Oracle(err.to_string()),
    }
}

impl OpenAiOracle {
    fn build_request(
        &self,
        transcript: &[TranscriptEntry],
        tools: &[ToolDefinition],
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .messages(translate_transcript(transcript)?);
        if !tools.is_empty() {
            builder
                .tools(translate_tools(tools)?)
                .tool_choice(ChatCompletionToolChoiceOption::Auto);
        }
        builder.build()
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    fn name(&self) -> &'static str {
        "openai"
    }

    #[instrument(skip_all, fields(model = %self.model, entries = transcript.len()))]
    async fn respond(
        &self,
        transcript: &[TranscriptEntry],
        tools: &[ToolDefinition],
    ) -> Result<OracleReply, AppError> {
        let request = self.build_request(transcript, tools)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            error!(error = %e, "OpenAI completion failed");
            map_openai_error(e)
        })?;

        let reply = interpret_response(response)?;
        debug!(?reply, "OpenAI round completed");
        Ok(reply)
    }
}
