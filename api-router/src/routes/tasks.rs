use axum::{
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use common::storage::types::{
    task::{
        parse_task_id, NewTask, Task, TaskChanges, TaskFilter, TaskPriority, TaskStatus,
        MAX_PAGE_SIZE,
    },
    user::User,
};
use serde::{Deserialize, Serialize};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub status_filter: Option<TaskStatus>,
    pub priority_filter: Option<TaskPriority>,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub items: Vec<Task>,
    pub total: i64,
    pub skip: i64,
    pub limit: i64,
}

pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
}

fn task_not_found() -> ApiError {
    ApiError::NotFound("Task not found".to_string())
}

pub async fn list_tasks(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let skip = usize::try_from(query.skip)
        .map_err(|_| ApiError::ValidationError("Skip must be zero or greater".to_string()))?;
    let limit = usize::try_from(query.limit)
        .ok()
        .filter(|limit| (1..=MAX_PAGE_SIZE).contains(limit))
        .ok_or_else(|| {
            ApiError::ValidationError(format!("Limit must be between 1 and {MAX_PAGE_SIZE}"))
        })?;

    let filter = TaskFilter {
        status: query.status_filter,
        priority: query.priority_filter,
    };
    let page = Task::list_for_user(&user.id, filter, skip, limit, &state.db).await?;

    Ok(Json(TaskListResponse {
        items: page.items,
        total: page.total,
        skip: query.skip,
        limit: query.limit,
    }))
}

pub async fn create_task(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(input): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = Task::create(
        &user.id,
        NewTask {
            title: input.title,
            description: input.description,
            priority: input.priority.unwrap_or_default(),
            due_date: input.due_date,
        },
        &state.db,
    )
    .await?;

    tracing::info!(user_id = %user.id, task_id = %task.id, "Task created");
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    Task::get_owned(&id, &user.id, &state.db)
        .await?
        .map(Json)
        .ok_or_else(task_not_found)
}

pub async fn update_task(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Json(changes): Json<TaskChanges>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&id)?;
    Task::update_owned(&id, &user.id, changes, &state.db)
        .await?
        .map(Json)
        .ok_or_else(task_not_found)
}

pub async fn delete_task(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_task_id(&id)?;
    Task::delete_owned(&id, &user.id, &state.db)
        .await?
        .ok_or_else(task_not_found)?;

    tracing::info!(user_id = %user.id, task_id = %id, "Task deleted");
    Ok(StatusCode::NO_CONTENT)
}
