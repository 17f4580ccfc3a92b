use std::time::Duration;

use async_trait::async_trait;
use common::{error::AppError, utils::config::AppConfig};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::{Oracle, OracleReply, ToolCallRequest, ToolDefinition, TranscriptEntry};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Schema keywords the function-declaration endpoint rejects.
const UNSUPPORTED_SCHEMA_KEYS: [&str; 4] = ["additionalProperties", "$schema", "default", "title"];

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
enum ContentPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
    /// Part kinds the assistant has no use for, such as inline data or code execution.
    Other(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct GeminiTool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

/// Oracle backed by the Gemini `generateContent` endpoint.
pub struct GeminiOracle {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiOracle {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, AppError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: API_BASE_URL.to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let model = config
            .chat_model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self::new(config.gemini_api_key.clone(), model)
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }
}

/// Rewrites a JSON schema into the subset Gemini accepts: type names are
/// upper-cased and unsupported keywords dropped. Property names are kept as is.
pub fn sanitize_schema(schema: &Value) -> Value {
    let Value::Object(map) = schema else {
        return schema.clone();
    };

    let mut sanitized = Map::new();
    for (key, value) in map {
        if UNSUPPORTED_SCHEMA_KEYS.contains(&key.as_str()) {
            continue;
        }
        let value = match key.as_str() {
            "type" => value
                .as_str()
                .map_or_else(|| value.clone(), |t| Value::String(t.to_uppercase())),
            "properties" => match value {
                Value::Object(properties) => Value::Object(
                    properties
                        .iter()
                        .map(|(name, property)| (name.clone(), sanitize_schema(property)))
                        .collect(),
                ),
                other => other.clone(),
            },
            "items" => sanitize_schema(value),
            _ => value.clone(),
        };
        sanitized.insert(key.clone(), value);
    }

    Value::Object(sanitized)
}

fn translate_tools(tools: &[ToolDefinition]) -> Vec<GeminiTool> {
    if tools.is_empty() {
        return Vec::new();
    }

    vec![GeminiTool {
        function_declarations: tools
            .iter()
            .map(|tool| FunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: sanitize_schema(&tool.parameters),
            })
            .collect(),
    }]
}

/// Splits the transcript into `contents` and the separate system instruction.
/// Consecutive tool results are grouped into one turn, matching the call turn before them.
fn translate_transcript(
    transcript: &[TranscriptEntry],
) -> (Vec<GeminiContent>, Option<GeminiContent>) {
    let mut contents: Vec<GeminiContent> = Vec::new();
    let mut system_instruction = None;
    let mut previous_was_tool_result = false;

    for entry in transcript {
        let is_tool_result = matches!(entry, TranscriptEntry::ToolResult { .. });
        match entry {
            TranscriptEntry::System(text) => {
                system_instruction = Some(GeminiContent {
                    role: None,
                    parts: vec![ContentPart::Text { text: text.clone() }],
                });
            }
            TranscriptEntry::User(text) => contents.push(GeminiContent {
                role: Some("user".to_string()),
                parts: vec![ContentPart::Text { text: text.clone() }],
            }),
            TranscriptEntry::Assistant {
                content,
                tool_calls,
            } => {
                let mut parts: Vec<ContentPart> = content
                    .iter()
                    .filter(|text| !text.is_empty())
                    .map(|text| ContentPart::Text { text: text.clone() })
                    .collect();
                parts.extend(tool_calls.iter().map(|call| ContentPart::FunctionCall {
                    function_call: FunctionCall {
                        name: call.name.clone(),
                        args: call.arguments.clone(),
                    },
                }));
                contents.push(GeminiContent {
                    role: Some("model".to_string()),
                    parts,
                });
            }
            TranscriptEntry::ToolResult { name, content, .. } => {
                let part = ContentPart::FunctionResponse {
                    function_response: FunctionResponse {
                        name: name.clone(),
                        response: json!({ "result": content }),
                    },
                };
                match contents.last_mut() {
                    Some(last) if previous_was_tool_result => last.parts.push(part),
                    _ => contents.push(GeminiContent {
                        role: Some("user".to_string()),
                        parts: vec![part],
                    }),
                }
            }
        }
        previous_was_tool_result = is_tool_result;
    }

    (contents, system_instruction)
}

fn interpret_response(response: GeminiResponse) -> Result<OracleReply, AppError> {
    if let Some(error) = response.error {
        return Err(AppError::Oracle(format!("Gemini API error: {}", error.message)));
    }

    let parts = response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .ok_or_else(|| AppError::Oracle("No content in Gemini response".into()))?;

    let mut text = String::new();
    let mut calls = Vec::new();
    for part in parts {
        match part {
            ContentPart::Text { text: chunk } => text.push_str(&chunk),
            ContentPart::FunctionCall { function_call } => calls.push(ToolCallRequest {
                id: format!("call_{}", Uuid::new_v4().simple()),
                name: function_call.name,
                arguments: function_call.args,
            }),
            ContentPart::FunctionResponse { .. } => {
                return Err(AppError::Oracle(
                    "Unexpected function response in model output".into(),
                ));
            }
            ContentPart::Other(_) => debug!("skipping unsupported response part"),
        }
    }

    if calls.is_empty() {
        Ok(OracleReply::FinalText(text))
    } else {
        Ok(OracleReply::ToolCalls(calls))
    }
}

fn map_api_error(status: u16, body: &str) -> AppError {
    let message = serde_json::from_str::<GeminiResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .map_or_else(|| body.to_owned(), |e| e.message);

    match status {
        429 => AppError::OracleUnavailable(format!("AI service quota exceeded: {message}")),
        503 => AppError::OracleUnavailable(message),
        _ => AppError::Oracle(format!("Gemini API error ({status}): {message}")),
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    fn name(&self) -> &'static str {
        "gemini"
    }

    #[instrument(skip_all, fields(model = %self.model, entries = transcript.len()))]
    async fn respond(
        &self,
        transcript: &[TranscriptEntry],
        tools: &[ToolDefinition],
    ) -> Result<OracleReply, AppError> {
        let (contents, system_instruction) = translate_transcript(transcript);
        let request = GeminiRequest {
            contents,
            system_instruction,
            tools: translate_tools(tools),
        };

        let response = self
            .client
            .post(self.build_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Gemini request failed");
                AppError::OracleUnavailable(format!("Gemini request failed: {e}"))
            })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            error!(status = %status, "Gemini API error");
            return Err(map_api_error(status.as_u16(), &body));
        }

        let parsed: GeminiResponse = serde_json::from_str(&body)?;
        let reply = interpret_response(parsed)?;
        debug!(?reply, "Gemini round completed");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_schema_uppercases_and_strips() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "title": "AddTask",
            "additionalProperties": false,
            "properties": {
                "title": {"type": "string", "title": "Title"},
                "status": {"type": "string", "enum": ["all", "pending"], "default": "all"},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["title"]
        });

        let sanitized = sanitize_schema(&schema);

        assert_eq!(
            sanitized,
            json!({
                "type": "OBJECT",
                "properties": {
                    "title": {"type": "STRING"},
                    "status": {"type": "STRING", "enum": ["all", "pending"]},
                    "tags": {"type": "ARRAY", "items": {"type": "STRING"}}
                },
                "required": ["title"]
            })
        );
    }

    #[test]
    fn test_translate_transcript_splits_system_and_groups_results() {
        let transcript = vec![
            TranscriptEntry::System("system".into()),
            TranscriptEntry::User("hi".into()),
            TranscriptEntry::Assistant {
                content: None,
                tool_calls: vec![
                    ToolCallRequest {
                        id: "a".into(),
                        name: "list_tasks".into(),
                        arguments: json!({}),
                    },
                    ToolCallRequest {
                        id: "b".into(),
                        name: "add_task".into(),
                        arguments: json!({"title": "x"}),
                    },
                ],
            },
            TranscriptEntry::ToolResult {
                call_id: "a".into(),
                name: "list_tasks".into(),
                content: "No tasks found.".into(),
            },
            TranscriptEntry::ToolResult {
                call_id: "b".into(),
                name: "add_task".into(),
                content: "Task created with ID: 1".into(),
            },
        ];

        let (contents, system) = translate_transcript(&transcript);

        assert_eq!(
            system.map(|s| s.parts),
            Some(vec![ContentPart::Text {
                text: "system".into()
            }])
        );
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1].role.as_deref(), Some("model"));
        assert_eq!(contents[1].parts.len(), 2);
        assert_eq!(contents[2].role.as_deref(), Some("user"));
        assert_eq!(contents[2].parts.len(), 2);
    }

    #[test]
    fn test_interpret_response_synthesizes_call_ids() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"functionCall": {"name": "complete_task", "args": {"task_id": "1"}}},
                        {"functionCall": {"name": "list_tasks", "args": {}}}
                    ]
                }
            }]
        }))
        .unwrap();

        match interpret_response(response).unwrap() {
            OracleReply::ToolCalls(calls) => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].name, "complete_task");
                assert_eq!(calls[0].arguments, json!({"task_id": "1"}));
                assert_ne!(calls[0].id, calls[1].id);
            }
            OracleReply::FinalText(_) => panic!("Expected tool calls"),
        }
    }

    #[test]
    fn test_interpret_response_text() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Done."}]}}]
        }))
        .unwrap();

        assert_eq!(
            interpret_response(response).unwrap(),
            OracleReply::FinalText("Done.".into())
        );
    }

    #[test]
    fn test_interpret_response_skips_unknown_parts() {
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        {"inlineData": {"mimeType": "image/png", "data": "AAAA"}},
                        {"text": "Here you go."},
                        {"executableCode": {"language": "PYTHON", "code": "print(1)"}}
                    ]
                }
            }]
        }))
        .expect("unknown parts should not break deserialization");

        assert_eq!(
            interpret_response(response).unwrap(),
            OracleReply::FinalText("Here you go.".into())
        );
    }

    #[test]
    fn test_map_api_error_quota() {
        let body = r#"{"error": {"message": "Resource has been exhausted"}}"#;
        assert!(matches!(
            map_api_error(429, body),
            AppError::OracleUnavailable(_)
        ));
        assert!(matches!(map_api_error(400, body), AppError::Oracle(_)));
    }
}
