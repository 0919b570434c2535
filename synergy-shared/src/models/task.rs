/// Task model and database operations
///
/// Tasks are the cards on a project's board. A task belongs to exactly one
/// project for its whole life and its status is always one of the three
/// board columns.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE task_status AS ENUM ('todo', 'in_progress', 'done');
/// CREATE TYPE task_priority AS ENUM ('low', 'medium', 'high');
///
/// CREATE TABLE tasks (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
///     title VARCHAR(255) NOT NULL,
///     description TEXT,
///     status task_status NOT NULL DEFAULT 'todo',
///     priority task_priority,
///     due_date DATE,
///     assignee UUID REFERENCES profiles(id) ON DELETE SET NULL,
///     created_by UUID REFERENCES profiles(id) ON DELETE SET NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use synergy_shared::models::task::{NewTask, Task, TaskStatus};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// let task = Task::create(&pool, Uuid::new_v4(), &NewTask::new(Uuid::new_v4(), "Write docs")).await?;
/// Task::update_status(&pool, task.id, TaskStatus::InProgress).await?;
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

const TASK_COLUMNS: &str = "id, project_id, title, description, status, priority, due_date, \
                            assignee, created_by, created_at, updated_at";

/// Board column a task sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started
    Todo,

    /// Being worked on
    InProgress,

    /// Finished
    Done,
}

impl TaskStatus {
    /// All statuses in board order
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done];

    /// Wire/database name
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }

    /// Column heading shown on the board
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "To-Do",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Done => "Done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Optional task priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
        }
    }
}

/// A task on a project board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    /// Unique task ID
    pub id: Uuid,

    /// Owning project, fixed at creation
    pub project_id: Uuid,

    pub title: String,

    pub description: Option<String>,

    pub status: TaskStatus,

    pub priority: Option<TaskPriority>,

    pub due_date: Option<NaiveDate>,

    /// User the task is assigned to
    pub assignee: Option<Uuid>,

    /// User who created the task (null if that user was removed)
    pub created_by: Option<Uuid>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Input for creating a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewTask {
    pub project_id: Uuid,

    #[validate(length(min = 1, max = 255, message = "title must be 1-255 characters"))]
    pub title: String,

    pub description: Option<String>,

    /// Column the task starts in (the column whose "Add Task" was used)
    #[serde(default = "default_status")]
    pub status: TaskStatus,

    pub priority: Option<TaskPriority>,

    pub due_date: Option<NaiveDate>,

    pub assignee: Option<Uuid>,
}

fn default_status() -> TaskStatus {
    TaskStatus::Todo
}

impl NewTask {
    /// Creates a to-do task draft with only a title
    pub fn new(project_id: Uuid, title: impl Into<String>) -> Self {
        NewTask {
            project_id,
            title: title.into(),
            description: None,
            status: default_status(),
            priority: None,
            due_date: None,
            assignee: None,
        }
    }

    /// Returns a copy with the title trimmed and a blank description dropped
    pub fn normalized(&self) -> Self {
        NewTask {
            title: self.title.trim().to_string(),
            description: self
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            ..self.clone()
        }
    }
}

/// Partial update of a task's editable fields
///
/// `None` leaves a field untouched. For clearable fields `Some(None)` clears
/// the value. On the wire a missing key leaves the field untouched and an
/// explicit `null` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub priority: Option<Option<TaskPriority>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Option<Uuid>>,
}

/// Marks a key that is present, keeping `null` as `Some(None)`
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl TaskPatch {
    /// Status-only patch
    pub fn status(status: TaskStatus) -> Self {
        TaskPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
            && self.assignee.is_none()
    }

    /// Applies the patch to a local copy
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(assignee) = self.assignee {
            task.assignee = assignee;
        }
    }
}

/// Row of the "my tasks" list: an open task assigned to the current user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AssignedTask {
    pub id: Uuid,
    pub project_id: Uuid,
    pub project_name: Option<String>,
    pub title: String,
    pub status: TaskStatus,
    pub due_date: Option<NaiveDate>,
}

/// Task counts per status for one project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub todo: i64,
    pub in_progress: i64,
    pub done: i64,
}

impl Task {
    /// Inserts a task and returns the stored row
    pub async fn create(pool: &PgPool, created_by: Uuid, data: &NewTask) -> Result<Self, sqlx::Error> {
        let sql = format!(
            "INSERT INTO tasks (project_id, title, description, status, priority, due_date, assignee, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {}",
            TASK_COLUMNS
        );

        sqlx::query_as::<_, Task>(&sql)
            .bind(data.project_id)
            .bind(&data.title)
            .bind(&data.description)
            .bind(data.status)
            .bind(data.priority)
            .bind(data.due_date)
            .bind(data.assignee)
            .bind(created_by)
            .fetch_one(pool)
            .await
    }

    /// Finds a task by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS);
        sqlx::query_as::<_, Task>(&sql).bind(id).fetch_optional(pool).await
    }

    /// Lists a project's tasks, oldest first
    pub async fn list_by_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE project_id = $1 ORDER BY created_at ASC, id ASC",
            TASK_COLUMNS
        );
        sqlx::query_as::<_, Task>(&sql).bind(project_id).fetch_all(pool).await
    }

    /// Moves a task to another column
    ///
    /// Returns `None` if the task no longer exists.
    pub async fn update_status(
        pool: &PgPool,
        id: Uuid,
        status: TaskStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        Self::update(pool, id, &TaskPatch::status(status)).await
    }

    /// Applies a partial update
    ///
    /// Only the fields present in the patch are written. Returns `None` if the
    /// task no longer exists.
    pub async fn update(pool: &PgPool, id: Uuid, patch: &TaskPatch) -> Result<Option<Self>, sqlx::Error> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE tasks SET updated_at = NOW()");

        if let Some(title) = &patch.title {
            query.push(", title = ").push_bind(title.clone());
        }
        if let Some(description) = &patch.description {
            query.push(", description = ").push_bind(description.clone());
        }
        if let Some(status) = patch.status {
            query.push(", status = ").push_bind(status);
        }
        if let Some(priority) = patch.priority {
            query.push(", priority = ").push_bind(priority);
        }
        if let Some(due_date) = patch.due_date {
            query.push(", due_date = ").push_bind(due_date);
        }
        if let Some(assignee) = patch.assignee {
            query.push(", assignee = ").push_bind(assignee);
        }

        query.push(" WHERE id = ").push_bind(id);
        query.push(" RETURNING ").push(TASK_COLUMNS);

        query.build_query_as::<Task>().fetch_optional(pool).await
    }

    /// Deletes a task
    ///
    /// Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Open tasks assigned to a user, soonest due first, undated last
    pub async fn list_assigned_open(pool: &PgPool, user_id: Uuid) -> Result<Vec<AssignedTask>, sqlx::Error> {
        sqlx::query_as::<_, AssignedTask>(
            r#"
            SELECT t.id, t.project_id, p.name AS project_name, t.title, t.status, t.due_date
            FROM tasks t
            LEFT JOIN projects p ON p.id = t.project_id
            WHERE t.assignee = $1 AND t.status <> 'done'
            ORDER BY t.due_date ASC NULLS LAST, t.created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Counts a project's tasks per status
    pub async fn count_by_status(pool: &PgPool, project_id: Uuid) -> Result<StatusCounts, sqlx::Error> {
        let rows: Vec<(TaskStatus, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM tasks WHERE project_id = $1 GROUP BY status",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match status {
                TaskStatus::Todo => counts.todo = count,
                TaskStatus::InProgress => counts.in_progress = count,
                TaskStatus::Done => counts.done = count,
            }
        }

        Ok(counts)
    }
}
