/// Project View
///
/// One open project as the presentation layer sees it: the task board, the
/// chat, live updates for both and transient notifications. All writes go
/// through the mutation engine; all remote changes arrive through the
/// listeners.
///
/// # Switching projects
///
/// `open` stops the previous listeners before anything else, resets both
/// stores, subscribes to the new project and only then loads, so no change
/// committed after the load can be missed. Responses and events that belong
/// to a project that is no longer open are dropped.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use synergy_sync::board::DropTarget;
/// use synergy_sync::config::SyncSettings;
/// use synergy_sync::context::SessionContext;
/// use synergy_sync::remote::MemoryRemote;
/// use synergy_sync::view::ProjectView;
/// use synergy_shared::models::{NewTask, TaskStatus};
///
/// # async fn example() -> anyhow::Result<()> {
/// let remote = Arc::new(MemoryRemote::new());
/// let owner = remote.add_profile(Some("Ada"), "ada@example.com");
/// let project = remote.add_project(owner.id, "Launch");
///
/// let view = ProjectView::new(remote, SessionContext::new(owner.id), SyncSettings::default());
/// view.open(project.id).await?;
///
/// let task = view
///     .create_task(NewTask::new(project.id, "Write release notes"))
///     .await
///     .map_err(|rejected| rejected.error)?;
/// view.drop_task(task.id, DropTarget::Column(TaskStatus::Done)).await?;
///
/// assert_eq!(view.board().await.count(TaskStatus::Done), 1);
/// # Ok(())
/// # }
/// ```

use crate::board::{resolve_drop, BoardColumns, DropTarget, ProjectProgress};
use crate::config::SyncSettings;
use crate::context::SessionContext;
use crate::error::{Rejected, SyncError, SyncResult};
use crate::listener::{AuthorResolver, ChangeHandler, ConnectionState, ListenerHandle, MergeById, RealtimeListener};
use crate::mutation::MutationEngine;
use crate::notify::Notifier;
use crate::remote::{with_timeout, RemoteDataService, RemoteResult};
use crate::store::{Entity, EntityStore, StoreSnapshot};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use synergy_shared::events::Topic;
use synergy_shared::models::{
    AssignedTask, MemberProfile, Membership, Message, NewMessage, NewProject, NewTask, Profile,
    Project, Task, TaskPatch, TaskStatus,
};
use tokio::sync::{watch, Mutex};
use uuid::Uuid;
use validator::Validate;

#[derive(Default)]
struct Listeners {
    tasks: Option<ListenerHandle>,
    messages: Option<ListenerHandle>,
}

impl Listeners {
    async fn stop(&mut self) {
        if let Some(listener) = self.tasks.take() {
            listener.stop().await;
        }
        if let Some(listener) = self.messages.take() {
            listener.stop().await;
        }
    }
}

/// Facade over the stores, engine and listeners of one open project
pub struct ProjectView {
    remote: Arc<dyn RemoteDataService>,
    session: SessionContext,
    settings: SyncSettings,
    notifier: Notifier,
    tasks: Arc<EntityStore<Task>>,
    messages: Arc<EntityStore<Message>>,
    engine: MutationEngine,
    listeners: Mutex<Listeners>,
    /// Bumped by every open and close
    generation: AtomicU64,
}

impl ProjectView {
    pub fn new(remote: Arc<dyn RemoteDataService>, session: SessionContext, settings: SyncSettings) -> Self {
        let notifier = Notifier::new(settings.notification_ttl);
        let tasks = Arc::new(EntityStore::new());
        let messages = Arc::new(EntityStore::new());
        let engine = MutationEngine::new(
            remote.clone(),
            tasks.clone(),
            messages.clone(),
            notifier.clone(),
            settings,
        );

        ProjectView {
            remote,
            session,
            settings,
            notifier,
            tasks,
            messages,
            engine,
            listeners: Mutex::new(Listeners::default()),
            generation: AtomicU64::new(0),
        }
    }

    async fn call<T, F>(&self, call: F) -> RemoteResult<T>
    where
        F: Future<Output = RemoteResult<T>>,
    {
        with_timeout(self.settings.remote_timeout, call).await
    }

    async fn listen<T, H>(&self, topic: Topic, store: Arc<EntityStore<T>>, handler: H) -> Option<ListenerHandle>
    where
        T: Entity + DeserializeOwned,
        H: ChangeHandler<T>,
    {
        match RealtimeListener::start(self.remote.clone(), topic, store, handler).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                tracing::warn!(error = %e, "Live updates unavailable");
                self.notifier
                    .warning("Live updates unavailable, changes by others appear after a reload");
                None
            }
        }
    }

    /// Opens `project_id`, replacing whatever project was open
    ///
    /// A failed subscription is not fatal: the view works without live
    /// updates and reports `ConnectionState::Disconnected`.
    ///
    /// # Errors
    ///
    /// `SyncError::Fetch` if the first load of either collection failed. The
    /// store keeps its error flag set until a later load succeeds.
    pub async fn open(&self, project_id: Uuid) -> SyncResult<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut listeners = self.listeners.lock().await;
            listeners.stop().await;

            self.tasks.reset(Some(project_id)).await;
            self.messages.reset(Some(project_id)).await;

            listeners.tasks = self
                .listen(Topic::tasks(project_id), self.tasks.clone(), MergeById)
                .await;
            let resolver = AuthorResolver::new(self.remote.clone(), self.settings.remote_timeout);
            listeners.messages = self
                .listen(Topic::messages(project_id), self.messages.clone(), resolver)
                .await;
        }

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(project_id = %project_id, "Open superseded before load");
            return Ok(());
        }

        tracing::info!(
            project_id = %project_id,
            user_id = %self.session.user_id,
            remote = self.remote.name(),
            "Opening project"
        );

        let (tasks, messages) = tokio::join!(
            self.tasks.load(project_id, self.call(self.remote.list_tasks(project_id))),
            self.messages.load(project_id, self.call(self.remote.list_messages(project_id))),
        );

        let mut first_error = None;
        for result in [tasks.map(|_| ()), messages.map(|_| ())] {
            if let Err(e) = result {
                self.notifier.error(e.to_string());
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stops live updates and empties both stores
    pub async fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        let mut listeners = self.listeners.lock().await;
        listeners.stop().await;
        self.tasks.reset(None).await;
        self.messages.reset(None).await;

        tracing::debug!("Project view closed");
    }

    /// Reloads both collections of the open project
    pub async fn refresh(&self) -> SyncResult<()> {
        let Some(project_id) = self.tasks.current_project().await else {
            return Err(SyncError::Invalid("no project is open".to_string()));
        };

        self.tasks
            .load(project_id, self.call(self.remote.list_tasks(project_id)))
            .await?;
        self.messages
            .load(project_id, self.call(self.remote.list_messages(project_id)))
            .await?;
        Ok(())
    }

    pub async fn current_project(&self) -> Option<Uuid> {
        self.tasks.current_project().await
    }

    pub fn session(&self) -> SessionContext {
        self.session
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    // Tasks

    pub async fn create_task(&self, draft: NewTask) -> Result<Task, Rejected<NewTask>> {
        self.engine.create_task(&self.session, draft).await
    }

    pub async fn update_status(&self, id: Uuid, status: TaskStatus) -> SyncResult<Task> {
        self.engine.update_status(id, status).await
    }

    pub async fn update_fields(&self, id: Uuid, patch: TaskPatch) -> SyncResult<Task> {
        self.engine.update_fields(id, patch).await
    }

    pub async fn delete_task(&self, id: Uuid) -> SyncResult<()> {
        self.engine.delete_task(id).await
    }

    /// Handles a card dropped on a column or on another card
    ///
    /// Returns the updated task, or `None` when the drop changes nothing and
    /// no write was issued.
    pub async fn drop_task(&self, dragged: Uuid, target: DropTarget) -> SyncResult<Option<Task>> {
        let tasks = self.tasks.items().await;
        let Some(change) = resolve_drop(&tasks, dragged, target) else {
            tracing::trace!(task_id = %dragged, target = ?target, "Drop without status change");
            return Ok(None);
        };

        tracing::debug!(task_id = %change.task_id, from = %change.from, to = %change.to, "Task dropped");
        self.engine
            .update_status(change.task_id, change.to)
            .await
            .map(Some)
    }

    pub async fn board(&self) -> BoardColumns {
        BoardColumns::partition(&self.tasks.items().await)
    }

    pub async fn progress(&self) -> ProjectProgress {
        ProjectProgress::from_tasks(&self.tasks.items().await)
    }

    pub async fn task_snapshot(&self) -> StoreSnapshot<Task> {
        self.tasks.snapshot().await
    }

    /// Fires whenever the board's contents or flags change
    pub fn watch_tasks(&self) -> watch::Receiver<u64> {
        self.tasks.watch()
    }

    // Chat

    pub async fn send_message(&self, draft: NewMessage) -> Result<Message, Rejected<NewMessage>> {
        self.engine.send_message(&self.session, draft).await
    }

    pub async fn message_snapshot(&self) -> StoreSnapshot<Message> {
        self.messages.snapshot().await
    }

    pub fn watch_messages(&self) -> watch::Receiver<u64> {
        self.messages.watch()
    }

    /// Combined live-update state of both collections
    pub async fn connection_state(&self) -> ConnectionState {
        let listeners = self.listeners.lock().await;
        let states: Vec<ConnectionState> = [&listeners.tasks, &listeners.messages]
            .into_iter()
            .map(|l| l.as_ref().map_or(ConnectionState::Disconnected, ListenerHandle::state))
            .collect();

        if states.contains(&ConnectionState::Disconnected) {
            ConnectionState::Disconnected
        } else if states.iter().all(|s| *s == ConnectionState::Live) {
            ConnectionState::Live
        } else {
            ConnectionState::Connecting
        }
    }

    // Projects, members and profile

    pub async fn projects(&self) -> SyncResult<Vec<Project>> {
        self.call(self.remote.list_projects(&self.session))
            .await
            .map_err(|source| SyncError::Remote {
                operation: "list_projects",
                source,
            })
    }

    pub async fn create_project(&self, draft: NewProject) -> SyncResult<Project> {
        draft
            .validate()
            .map_err(|e| SyncError::Invalid(e.to_string()))?;

        let project = self
            .call(self.remote.create_project(&self.session, &draft))
            .await
            .map_err(|source| {
                self.notifier.error(format!("Could not create project: {}", source));
                SyncError::Remote {
                    operation: "create_project",
                    source,
                }
            })?;

        self.notifier.success(format!("Project \"{}\" created", project.name));
        Ok(project)
    }

    /// Progress of any project, from server-side counts
    pub async fn project_progress(&self, project_id: Uuid) -> SyncResult<ProjectProgress> {
        self.call(self.remote.project_progress(project_id))
            .await
            .map(ProjectProgress::from)
            .map_err(|source| SyncError::Remote {
                operation: "project_progress",
                source,
            })
    }

    /// Open tasks assigned to the session user across all projects
    pub async fn my_tasks(&self) -> SyncResult<Vec<AssignedTask>> {
        self.call(self.remote.list_assigned_tasks(&self.session))
            .await
            .map_err(|source| SyncError::Remote {
                operation: "list_assigned_tasks",
                source,
            })
    }

    pub async fn members(&self, project_id: Uuid) -> SyncResult<Vec<MemberProfile>> {
        self.call(self.remote.list_members(project_id))
            .await
            .map_err(|source| SyncError::Remote {
                operation: "list_members",
                source,
            })
    }

    pub async fn add_member(&self, project_id: Uuid, user_id: Uuid) -> SyncResult<Membership> {
        match self
            .call(self.remote.add_member(&self.session, project_id, user_id))
            .await
        {
            Ok(membership) => {
                self.notifier.success("Member added");
                Ok(membership)
            }
            Err(source) => {
                tracing::warn!(project_id = %project_id, user_id = %user_id, error = %source, "Add member rejected");
                self.notifier.error(format!("Could not add member: {}", source));
                Err(SyncError::Remote {
                    operation: "add_member",
                    source,
                })
            }
        }
    }

    pub async fn profile(&self) -> SyncResult<Option<Profile>> {
        self.call(self.remote.find_profile(self.session.user_id))
            .await
            .map_err(|source| SyncError::Remote {
                operation: "find_profile",
                source,
            })
    }

    /// Sets or clears the session user's display name
    pub async fn update_display_name(&self, name: Option<&str>) -> SyncResult<Profile> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        if name.is_some_and(|n| n.chars().count() > 255) {
            return Err(SyncError::Invalid("name must be at most 255 characters".to_string()));
        }

        self.call(self.remote.update_display_name(&self.session, name))
            .await
            .map_err(|source| SyncError::Remote {
                operation: "update_display_name",
                source,
            })
    }
}
