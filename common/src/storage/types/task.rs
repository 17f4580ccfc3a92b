use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const TITLE_MAX_CHARS: usize = 500;
pub const DESCRIPTION_MAX_CHARS: usize = 2000;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
}

#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Completed => write!(f, "completed"),
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::High => write!(f, "high"),
        }
    }
}

stored_object!(Task, "task", {
    user_id: String,
    title: String,
    description: Option<String>,
    status: TaskStatus,
    priority: TaskPriority,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    due_date: Option<DateTime<Utc>>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    completed_at: Option<DateTime<Utc>>
});

/// Fields accepted when creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
}

#[derive(Debug, Clone)]
pub struct TaskPage {
    pub items: Vec<Task>,
    pub total: i64,
}

#[derive(Deserialize)]
struct CountResult {
    count: i64,
}

fn validate_title(title: &str) -> Result<String, AppError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Task title cannot be empty".into()));
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(AppError::Validation(format!(
            "Task title cannot exceed {TITLE_MAX_CHARS} characters"
        )));
    }
    Ok(title.to_owned())
}

fn validate_description(description: &str) -> Result<(), AppError> {
    if description.chars().count() > DESCRIPTION_MAX_CHARS {
        return Err(AppError::Validation(format!(
            "Task description cannot exceed {DESCRIPTION_MAX_CHARS} characters"
        )));
    }
    Ok(())
}

/// Task ids are UUIDs; anything else is rejected before touching the store.
pub fn parse_task_id(task_id: &str) -> Result<String, AppError> {
    Uuid::parse_str(task_id.trim())
        .map(|id| id.to_string())
        .map_err(|_| AppError::Validation("Invalid task ID format".into()))
}

impl Task {
    pub async fn create(
        user_id: &str,
        new_task: NewTask,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let title = validate_title(&new_task.title)?;
        if let Some(description) = &new_task.description {
            validate_description(description)?;
        }

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id: user_id.to_owned(),
            title,
            description: new_task.description,
            status: TaskStatus::Pending,
            priority: new_task.priority,
            due_date: new_task.due_date,
            completed_at: None,
        };

        db.store_item(task)
            .await?
            .ok_or_else(|| AppError::InternalError("Task failed to create".into()))
    }

    /// Returns the task only when it exists and belongs to `user_id`.
    pub async fn get_owned(
        task_id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let task: Option<Task> = db.get_item(task_id).await?;
        Ok(task.filter(|t| t.user_id == user_id))
    }

    pub async fn list_for_user(
        user_id: &str,
        filter: TaskFilter,
        skip: usize,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<TaskPage, AppError> {
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(AppError::Validation(format!(
                "Limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let mut conditions = String::from("user_id = $user_id");
        if filter.status.is_some() {
            conditions.push_str(" AND status = $status");
        }
        if filter.priority.is_some() {
            conditions.push_str(" AND priority = $priority");
        }

        let mut response = db
            .client
            .query(format!(
                "SELECT * FROM type::table($table) WHERE {conditions} ORDER BY created_at DESC, id DESC LIMIT $limit START $skip;
                SELECT count() AS count FROM type::table($table) WHERE {conditions} GROUP ALL;"
            ))
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_owned()))
            .bind(("status", filter.status))
            .bind(("priority", filter.priority))
            .bind(("limit", limit))
            .bind(("skip", skip))
            .await?;

        let items: Vec<Task> = response.take(0)?;
        let count: Option<CountResult> = response.take(1)?;

        Ok(TaskPage {
            items,
            total: count.map_or(0, |c| c.count),
        })
    }

    pub async fn update_owned(
        task_id: &str,
        user_id: &str,
        changes: TaskChanges,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let Some(mut task) = Self::get_owned(task_id, user_id, db).await? else {
            return Ok(None);
        };

        if let Some(title) = changes.title {
            task.title = validate_title(&title)?;
        }
        if let Some(description) = changes.description {
            validate_description(&description)?;
            task.description = Some(description);
        }
        if let Some(priority) = changes.priority {
            task.priority = priority;
        }
        if let Some(due_date) = changes.due_date {
            task.due_date = Some(due_date);
        }
        if let Some(status) = changes.status {
            match status {
                TaskStatus::Completed if task.status != TaskStatus::Completed => {
                    task.completed_at = Some(Utc::now());
                }
                TaskStatus::Pending => task.completed_at = None,
                TaskStatus::Completed => {}
            }
            task.status = status;
        }
        task.updated_at = Utc::now();

        Self::save(task, db).await.map(Some)
    }

    /// Marks the task completed; a task that is already completed is left as is.
    pub async fn complete_owned(
        task_id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let Some(task) = Self::get_owned(task_id, user_id, db).await? else {
            return Ok(None);
        };
        if task.status == TaskStatus::Completed {
            return Ok(Some(task));
        }

        Self::update_owned(
            task_id,
            user_id,
            TaskChanges {
                status: Some(TaskStatus::Completed),
                ..TaskChanges::default()
            },
            db,
        )
        .await
    }

    pub async fn delete_owned(
        task_id: &str,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        if Self::get_owned(task_id, user_id, db).await?.is_none() {
            return Ok(None);
        }

        Ok(db.delete_item::<Task>(task_id).await?)
    }

    async fn save(task: Task, db: &SurrealDbClient) -> Result<Self, AppError> {
        let updated: Option<Task> = db
            .client
            .query(
                "UPDATE type::thing($table, $id) SET
                title = $title,
                description = $description,
                status = $status,
                priority = $priority,
                due_date = $due_date,
                completed_at = $completed_at,
                updated_at = $updated_at
                RETURN AFTER",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", task.id.clone()))
            .bind(("title", task.title))
            .bind(("description", task.description))
            .bind(("status", task.status))
            .bind(("priority", task.priority))
            .bind(("due_date", task.due_date.map(surrealdb::Datetime::from)))
            .bind(("completed_at", task.completed_at.map(surrealdb::Datetime::from)))
            .bind(("updated_at", surrealdb::Datetime::from(task.updated_at)))
            .await?
            .take(0)?;

        updated.ok_or_else(|| AppError::NotFound("Task not found".into()))
    }
}
