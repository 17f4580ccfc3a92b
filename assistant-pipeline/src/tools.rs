use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::task::{
            parse_task_id, NewTask, Task, TaskChanges, TaskFilter, TaskStatus, MAX_PAGE_SIZE,
        },
    },
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::oracle::ToolDefinition;

pub const ADD_TASK: &str = "add_task";
pub const LIST_TASKS: &str = "list_tasks";
pub const COMPLETE_TASK: &str = "complete_task";
pub const DELETE_TASK: &str = "delete_task";
pub const UPDATE_TASK: &str = "update_task";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddTaskArgs {
    title: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum StatusFilter {
    #[default]
    All,
    Pending,
    Completed,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListTasksArgs {
    #[serde(default)]
    status: StatusFilter,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskIdArgs {
    task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateTaskArgs {
    task_id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Outcome of one tool invocation. Failures are carried as text, never as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub success: bool,
}

impl ToolOutput {
    fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
        }
    }

    fn failed(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: false,
        }
    }
}

/// Task tools bound to one user. Every call is scoped to `user_id`.
pub struct ToolRegistry {
    db: Arc<SurrealDbClient>,
    user_id: String,
}

impl ToolRegistry {
    pub fn new(db: Arc<SurrealDbClient>, user_id: impl Into<String>) -> Self {
        Self {
            db,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn list_tools() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: ADD_TASK.to_string(),
                description: "Create a new task for the user.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": "string", "description": "Short title of the task"},
                        "description": {"type": "string", "description": "Optional longer description"}
                    },
                    "required": ["title"],
                    "additionalProperties": false
                }),
            },
            ToolDefinition {
                name: LIST_TASKS.to_string(),
                description:
                    "List tasks for the user. Status can be 'all', 'pending', or 'completed'."
                        .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "status": {
                            "type": "string",
                            "enum": ["all", "pending", "completed"],
                            "default": "all"
                        }
                    },
                    "additionalProperties": false
                }),
            },
            ToolDefinition {
                name: COMPLETE_TASK.to_string(),
                description: "Mark a task as completed.".to_string(),
                parameters: task_id_schema(),
            },
            ToolDefinition {
                name: DELETE_TASK.to_string(),
                description: "Permanently remove a task.".to_string(),
                parameters: task_id_schema(),
            },
            ToolDefinition {
                name: UPDATE_TASK.to_string(),
                description: "Update task details. Fields that are left out stay unchanged."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "task_id": {"type": "string", "description": "UUID of the task"},
                        "title": {"type": "string"},
                        "description": {"type": "string"}
                    },
                    "required": ["task_id"],
                    "additionalProperties": false
                }),
            },
        ]
    }

    /// Runs a tool by exact name. Never fails: unknown tools, bad arguments and
    /// store errors all come back as a descriptive result string.
    pub async fn call_tool(&self, name: &str, arguments: &Value) -> ToolOutput {
        match self.dispatch(name, arguments).await {
            Ok(output) => {
                debug!(tool = name, success = output.success, "tool executed");
                output
            }
            Err(err) => {
                warn!(tool = name, error = %err, "tool execution failed");
                ToolOutput::failed(format!("Error executing tool {name}: {err}"))
            }
        }
    }

    async fn dispatch(&self, name: &str, arguments: &Value) -> Result<ToolOutput, AppError> {
        match name {
            ADD_TASK => self.add_task(parse_args(name, arguments)?).await,
            LIST_TASKS => self.list_tasks(parse_args(name, arguments)?).await,
            COMPLETE_TASK => self.complete_task(parse_args(name, arguments)?).await,
            DELETE_TASK => self.delete_task(parse_args(name, arguments)?).await,
            UPDATE_TASK => self.update_task(parse_args(name, arguments)?).await,
            unknown => Ok(ToolOutput::failed(format!("Error: Unknown tool '{unknown}'."))),
        }
    }

    async fn add_task(&self, args: AddTaskArgs) -> Result<ToolOutput, AppError> {
        let task = Task::create(
            &self.user_id,
            NewTask {
                title: args.title,
                description: args.description,
                ..NewTask::default()
            },
            &self.db,
        )
        .await?;

        Ok(ToolOutput::ok(format!("Task created with ID: {}", task.id)))
    }

    async fn list_tasks(&self, args: ListTasksArgs) -> Result<ToolOutput, AppError> {
        let status = match args.status {
            StatusFilter::All => None,
            StatusFilter::Pending => Some(TaskStatus::Pending),
            StatusFilter::Completed => Some(TaskStatus::Completed),
        };
        let filter = TaskFilter {
            status,
            priority: None,
        };

        // Walk every page so the listing never stops silently at the page size.
        let mut tasks = Vec::new();
        loop {
            let page =
                Task::list_for_user(&self.user_id, filter, tasks.len(), MAX_PAGE_SIZE, &self.db)
                    .await?;
            let fetched = page.items.len();
            tasks.extend(page.items);
            let listed = i64::try_from(tasks.len()).unwrap_or(i64::MAX);
            if fetched < MAX_PAGE_SIZE || listed >= page.total {
                break;
            }
        }

        if tasks.is_empty() {
            return Ok(ToolOutput::ok("No tasks found."));
        }

        let listing = tasks
            .iter()
            .map(|task| format!("[{}] {} (ID: {})", task.status, task.title, task.id))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ToolOutput::ok(listing))
    }

    async fn complete_task(&self, args: TaskIdArgs) -> Result<ToolOutput, AppError> {
        let Ok(task_id) = parse_task_id(&args.task_id) else {
            return Ok(invalid_id());
        };

        Ok(
            match Task::complete_owned(&task_id, &self.user_id, &self.db).await? {
                Some(task) => ToolOutput::ok(format!("Task '{}' marked as completed.", task.title)),
                None => not_found(&args.task_id),
            },
        )
    }

    async fn delete_task(&self, args: TaskIdArgs) -> Result<ToolOutput, AppError> {
        let Ok(task_id) = parse_task_id(&args.task_id) else {
            return Ok(invalid_id());
        };

        Ok(
            match Task::delete_owned(&task_id, &self.user_id, &self.db).await? {
                Some(task) => ToolOutput::ok(format!("Task '{}' deleted.", task.title)),
                None => not_found(&args.task_id),
            },
        )
    }

    async fn update_task(&self, args: UpdateTaskArgs) -> Result<ToolOutput, AppError> {
        let Ok(task_id) = parse_task_id(&args.task_id) else {
            return Ok(invalid_id());
        };

        let changes = TaskChanges {
            title: args.title.filter(|t| !t.trim().is_empty()),
            description: args.description.filter(|d| !d.is_empty()),
            ..TaskChanges::default()
        };

        Ok(
            match Task::update_owned(&task_id, &self.user_id, changes, &self.db).await? {
                Some(task) => ToolOutput::ok(format!("Task '{}' updated.", task.title)),
                None => not_found(&args.task_id),
            },
        )
    }
}

fn task_id_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "task_id": {"type": "string", "description": "UUID of the task"}
        },
        "required": ["task_id"],
        "additionalProperties": false
    })
}

/// A missing argument object is treated as `{}` so tools without required fields still run.
fn parse_args<T: DeserializeOwned>(name: &str, arguments: &Value) -> Result<T, AppError> {
    let arguments = if arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        arguments.clone()
    };

    serde_json::from_value(arguments).map_err(|e| {
        warn!(tool = name, error = %e, "rejected tool arguments");
        AppError::Validation(format!("invalid arguments: {e}"))
    })
}

fn invalid_id() -> ToolOutput {
    ToolOutput::failed("Error: Invalid ID format.")
}

fn not_found(task_id: &str) -> ToolOutput {
    ToolOutput::failed(format!("Task with ID {task_id} not found."))
}
