/// Shared fixtures for the view-level integration tests
///
/// Every test runs against `MemoryRemote`, so nothing here needs a database
/// or Redis.

use chrono::{Duration, Utc};
use std::sync::Arc;
use synergy_shared::models::{Profile, Project, Task, TaskStatus};
use synergy_sync::remote::MemoryRemote;
use synergy_sync::{ProjectView, SessionContext, SyncSettings};
use uuid::Uuid;

pub struct TestContext {
    pub remote: Arc<MemoryRemote>,
    pub owner: Profile,
    pub project: Project,
    pub view: Arc<ProjectView>,
}

impl TestContext {
    /// Seeds an owner and a project; the view is not opened yet
    pub fn new() -> Self {
        Self::with_settings(SyncSettings::default())
    }

    pub fn with_settings(settings: SyncSettings) -> Self {
        let remote = Arc::new(MemoryRemote::new());
        let owner = remote.add_profile(Some("Ada Lovelace"), "ada@example.com");
        let project = remote.add_project(owner.id, "Launch");
        let view = Arc::new(ProjectView::new(
            remote.clone(),
            SessionContext::new(owner.id),
            settings,
        ));

        TestContext {
            remote,
            owner,
            project,
            view,
        }
    }

    pub fn session(&self) -> SessionContext {
        SessionContext::new(self.owner.id)
    }

    /// Stores a task directly on the remote, `age` minutes old
    pub fn seed_task(&self, title: &str, status: TaskStatus, age: i64) -> Task {
        seed_task(&self.remote, self.project.id, title, status, age)
    }
}

pub fn seed_task(remote: &MemoryRemote, project_id: Uuid, title: &str, status: TaskStatus, age: i64) -> Task {
    let created_at = Utc::now() - Duration::minutes(age);
    let task = Task {
        id: Uuid::new_v4(),
        project_id,
        title: title.to_string(),
        description: None,
        status,
        priority: None,
        due_date: None,
        assignee: None,
        created_by: None,
        created_at,
        updated_at: created_at,
    };
    remote.insert_task(task.clone());
    task
}

/// Lets spawned listener tasks drain their queues
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Ids of the tasks in the view's store, in store order
pub async fn task_ids(view: &ProjectView) -> Vec<Uuid> {
    view.task_snapshot().await.items.iter().map(|t| t.id).collect()
}
