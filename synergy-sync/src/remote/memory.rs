/// In-memory Remote Data Service
///
/// Keeps every table in process and fans changes out to subscribers the
/// same way the PostgreSQL implementation does through Redis. Used by the
/// integration tests and for running the core without infrastructure.
///
/// # Failure injection
///
/// - `fail_next(op, n)`: the next `n` calls of `op` fail with `Unavailable`
/// - `set_offline(true)`: every call fails until switched back
/// - `set_latency(d)`: every call sleeps `d` before touching state, which
///   keeps optimistic writes in flight long enough to observe them
///
/// Published task rows carry the full record. Published message rows carry
/// only the raw row without the author's profile, as a database-level change
/// feed would.
///
/// # Example
///
/// ```
/// use synergy_sync::context::SessionContext;
/// use synergy_sync::remote::{MemoryRemote, RemoteDataService, RemoteOp};
/// use synergy_shared::models::NewTask;
///
/// # async fn example() {
/// let remote = MemoryRemote::new();
/// let owner = remote.add_profile(Some("Ada"), "ada@example.com");
/// let project = remote.add_project(owner.id, "Launch");
///
/// remote.fail_next(RemoteOp::CreateTask, 1);
/// let session = SessionContext::new(owner.id);
/// assert!(remote.create_task(&session, &NewTask::new(project.id, "Brief")).await.is_err());
/// assert!(remote.create_task(&session, &NewTask::new(project.id, "Brief")).await.is_ok());
/// # }
/// ```

use super::{ChangeSubscription, RemoteDataService, RemoteError, RemoteResult};
use crate::context::SessionContext;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use synergy_shared::events::{ChangeKind, RawChange, Table, Topic};
use synergy_shared::models::{
    AssignedTask, MemberProfile, MemberRole, Membership, Message, NewMessage, NewProject, NewTask,
    Profile, ProfileSummary, Project, StatusCounts, Task, TaskPatch, TaskStatus,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const SUBSCRIBER_BUFFER: usize = 256;

/// Remote operations, for failure injection and call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    ListProjects,
    CreateProject,
    ProjectProgress,
    ListTasks,
    ListAssignedTasks,
    CreateTask,
    UpdateTask,
    DeleteTask,
    ListMessages,
    CreateMessage,
    ListMembers,
    AddMember,
    FindProfile,
    UpdateDisplayName,
    Subscribe,
}

#[derive(Default)]
struct MemoryState {
    profiles: HashMap<Uuid, Profile>,
    projects: Vec<Project>,
    memberships: Vec<Membership>,
    tasks: Vec<Task>,
    messages: Vec<Message>,
    subscribers: Vec<(Topic, mpsc::Sender<RawChange>)>,
    pending_failures: HashMap<RemoteOp, usize>,
    calls: HashMap<RemoteOp, usize>,
    offline: bool,
    latency: Option<Duration>,
    ack_delay: Option<Duration>,
}

impl MemoryState {
    fn publish(&mut self, change: RawChange) {
        self.subscribers.retain(|(_, tx)| !tx.is_closed());

        for (topic, tx) in &self.subscribers {
            if !topic.accepts(&change) {
                continue;
            }
            if let Err(e) = tx.try_send(change.clone()) {
                tracing::warn!(channel = %topic.channel(), error = %e, "Dropping change for slow subscriber");
            }
        }
    }

    fn publish_row<T: serde::Serialize>(&mut self, table: Table, kind: ChangeKind, project_id: Uuid, row: &T) {
        match RawChange::from_row(table, kind, project_id, row) {
            Ok(change) => self.publish(change),
            Err(e) => tracing::error!(table = %table, error = %e, "Failed to encode change"),
        }
    }

    fn role_of(&self, project_id: Uuid, user_id: Uuid) -> Option<MemberRole> {
        self.memberships
            .iter()
            .find(|m| m.project_id == project_id && m.user_id == user_id)
            .map(|m| m.role)
    }
}

/// Remote Data Service held entirely in memory
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call, waits out the latency and applies injected failures
    async fn enter(&self, op: RemoteOp) -> RemoteResult<()> {
        let latency = {
            let mut state = self.lock();
            *state.calls.entry(op).or_default() += 1;
            state.latency
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if state.offline {
            return Err(RemoteError::Unavailable("remote is offline".to_string()));
        }
        if let Some(remaining) = state.pending_failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Unavailable(format!("injected {:?} failure", op)));
            }
        }
        Ok(())
    }

    // Failure injection

    /// Makes the next `times` calls of `op` fail
    pub fn fail_next(&self, op: RemoteOp, times: usize) {
        *self.lock().pending_failures.entry(op).or_default() += times;
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Holds back task update acknowledgments after the change is committed
    /// and published
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        self.lock().ack_delay = delay;
    }

    // Inspection

    /// How many times `op` was called, failed calls included
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Subscriptions whose receiver is still alive
    pub fn active_subscriptions(&self) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }

    pub fn task(&self, id: Uuid) -> Option<Task> {
        self.lock().tasks.iter().find(|t| t.id == id).cloned()
    }

    pub fn tasks_in(&self, project_id: Uuid) -> Vec<Task> {
        self.lock()
            .tasks
            .iter()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect()
    }

    pub fn messages_in(&self, project_id: Uuid) -> Vec<Message> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect()
    }

    // Seeding

    pub fn add_profile(&self, name: Option<&str>, email: &str) -> Profile {
        let profile = Profile {
            id: Uuid::new_v4(),
            name: name.map(str::to_string),
            email: email.to_string(),
            avatar_url: None,
            updated_at: Utc::now(),
        };
        self.lock().profiles.insert(profile.id, profile.clone());
        profile
    }

    /// Creates a project with `owner` as its owner member
    pub fn add_project(&self, owner: Uuid, name: &str) -> Project {
        let mut state = self.lock();
        insert_project(&mut state, owner, &NewProject::new(name))
    }

    /// Stores a task without publishing a change
    pub fn insert_task(&self, task: Task) {
        let mut state = self.lock();
        state.tasks.retain(|t| t.id != task.id);
        state.tasks.push(task);
    }

    /// Publishes an arbitrary change to matching subscribers
    pub fn emit(&self, change: RawChange) {
        self.lock().publish(change);
    }
}

fn insert_project(state: &mut MemoryState, owner: Uuid, draft: &NewProject) -> Project {
    let now = Utc::now();
    let project = Project {
        id: Uuid::new_v4(),
        name: draft.name.clone(),
        description: draft.description.clone(),
        created_by: owner,
        created_at: now,
        updated_at: now,
    };
    state.projects.push(project.clone());
    state.memberships.push(Membership {
        project_id: project.id,
        user_id: owner,
        role: MemberRole::Owner,
        joined_at: now,
    });
    project
}

#[async_trait]
impl RemoteDataService for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_projects(&self, session: &SessionContext) -> RemoteResult<Vec<Project>> {
        self.enter(RemoteOp::ListProjects).await?;
        let state = self.lock();

        let mut projects: Vec<Project> = state
            .projects
            .iter()
            .filter(|p| state.role_of(p.id, session.user_id).is_some())
            .cloned()
            .collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    async fn create_project(&self, session: &SessionContext, draft: &NewProject) -> RemoteResult<Project> {
        self.enter(RemoteOp::CreateProject).await?;
        let mut state = self.lock();
        Ok(insert_project(&mut state, session.user_id, draft))
    }

    async fn project_progress(&self, project_id: Uuid) -> RemoteResult<StatusCounts> {
        self.enter(RemoteOp::ProjectProgress).await?;
        let state = self.lock();

        let mut counts = StatusCounts::default();
        for task in state.tasks.iter().filter(|t| t.project_id == project_id) {
            match task.status {
                TaskStatus::Todo => counts.todo += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Done => counts.done += 1,
            }
        }
        Ok(counts)
    }

    async fn list_tasks(&self, project_id: Uuid) -> RemoteResult<Vec<Task>> {
        self.enter(RemoteOp::ListTasks).await?;
        let state = self.lock();

        let mut tasks: Vec<Task> = state
            .tasks
            .iter()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn list_assigned_tasks(&self, session: &SessionContext) -> RemoteResult<Vec<AssignedTask>> {
        self.enter(RemoteOp::ListAssignedTasks).await?;
        let state = self.lock();

        let mut open: Vec<&Task> = state
            .tasks
            .iter()
            .filter(|t| t.assignee == Some(session.user_id) && t.status != TaskStatus::Done)
            .collect();
        open.sort_by(|a, b| match (a.due_date, b.due_date) {
            (Some(x), Some(y)) => x.cmp(&y).then(a.created_at.cmp(&b.created_at)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.created_at.cmp(&b.created_at),
        });

        Ok(open
            .into_iter()
            .map(|t| AssignedTask {
                id: t.id,
                project_id: t.project_id,
                project_name: state
                    .projects
                    .iter()
                    .find(|p| p.id == t.project_id)
                    .map(|p| p.name.clone()),
                title: t.title.clone(),
                status: t.status,
                due_date: t.due_date,
            })
            .collect())
    }

    async fn create_task(&self, session: &SessionContext, draft: &NewTask) -> RemoteResult<Task> {
        self.enter(RemoteOp::CreateTask).await?;
        let mut state = self.lock();

        if !state.projects.iter().any(|p| p.id == draft.project_id) {
            return Err(RemoteError::NotFound {
                entity: "project",
                id: draft.project_id,
            });
        }

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            project_id: draft.project_id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            status: draft.status,
            priority: draft.priority,
            due_date: draft.due_date,
            assignee: draft.assignee,
            created_by: Some(session.user_id),
            created_at: now,
            updated_at: now,
        };
        state.tasks.push(task.clone());
        state.publish_row(Table::Tasks, ChangeKind::Insert, task.project_id, &task);

        Ok(task)
    }

    async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> RemoteResult<Task> {
        self.enter(RemoteOp::UpdateTask).await?;

        let (task, ack_delay) = {
            let mut state = self.lock();

            let task = state
                .tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(RemoteError::NotFound { entity: "task", id })?;
            patch.apply_to(task);
            // Revisions must strictly increase even within one clock tick
            let now = Utc::now();
            task.updated_at = if now > task.updated_at {
                now
            } else {
                task.updated_at + chrono::Duration::microseconds(1)
            };
            let task = task.clone();

            state.publish_row(Table::Tasks, ChangeKind::Update, task.project_id, &task);
            (task, state.ack_delay)
        };

        if let Some(delay) = ack_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(task)
    }

    async fn delete_task(&self, id: Uuid) -> RemoteResult<()> {
        self.enter(RemoteOp::DeleteTask).await?;
        let mut state = self.lock();

        let index = state
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(RemoteError::NotFound { entity: "task", id })?;
        let task = state.tasks.remove(index);

        state.publish(RawChange::deleted(Table::Tasks, task.project_id, id));
        Ok(())
    }

    async fn list_messages(&self, project_id: Uuid) -> RemoteResult<Vec<Message>> {
        self.enter(RemoteOp::ListMessages).await?;
        let state = self.lock();

        Ok(state
            .messages
            .iter()
            .filter(|m| m.project_id == project_id)
            .map(|m| Message {
                author_profile: state.profiles.get(&m.author).map(ProfileSummary::from),
                ..m.clone()
            })
            .collect())
    }

    async fn create_message(&self, session: &SessionContext, draft: &NewMessage) -> RemoteResult<Message> {
        self.enter(RemoteOp::CreateMessage).await?;
        let mut state = self.lock();

        if draft.content.trim().is_empty() {
            return Err(RemoteError::Rejected("message content is empty".to_string()));
        }

        let row = Message {
            id: Uuid::new_v4(),
            project_id: draft.project_id,
            author: session.user_id,
            content: draft.content.clone(),
            created_at: Utc::now(),
            author_profile: None,
        };
        state.messages.push(row.clone());
        state.publish_row(Table::Messages, ChangeKind::Insert, row.project_id, &row);

        Ok(Message {
            author_profile: state.profiles.get(&row.author).map(ProfileSummary::from),
            ..row
        })
    }

    async fn list_members(&self, project_id: Uuid) -> RemoteResult<Vec<MemberProfile>> {
        self.enter(RemoteOp::ListMembers).await?;
        let state = self.lock();

        let mut members: Vec<MemberProfile> = state
            .memberships
            .iter()
            .filter(|m| m.project_id == project_id)
            .map(|m| {
                let profile = state.profiles.get(&m.user_id);
                MemberProfile {
                    user_id: m.user_id,
                    name: profile.and_then(|p| p.name.clone()),
                    email: profile.map(|p| p.email.clone()),
                    role: m.role,
                    joined_at: m.joined_at,
                }
            })
            .collect();
        members.sort_by_key(|m| (m.role != MemberRole::Owner, m.joined_at));
        Ok(members)
    }

    async fn add_member(
        &self,
        session: &SessionContext,
        project_id: Uuid,
        user_id: Uuid,
    ) -> RemoteResult<Membership> {
        self.enter(RemoteOp::AddMember).await?;
        let mut state = self.lock();

        let can_add = state
            .role_of(project_id, session.user_id)
            .map(|role| role.can_add_members())
            .unwrap_or(false);
        if !can_add {
            return Err(RemoteError::Rejected(
                "only the project owner can add members".to_string(),
            ));
        }
        if !state.profiles.contains_key(&user_id) {
            return Err(RemoteError::NotFound {
                entity: "profile",
                id: user_id,
            });
        }
        if state.role_of(project_id, user_id).is_some() {
            return Err(RemoteError::Rejected(
                "user is already a member of this project".to_string(),
            ));
        }

        let membership = Membership {
            project_id,
            user_id,
            role: MemberRole::Member,
            joined_at: Utc::now(),
        };
        state.memberships.push(membership.clone());
        Ok(membership)
    }

    async fn find_profile(&self, user_id: Uuid) -> RemoteResult<Option<Profile>> {
        self.enter(RemoteOp::FindProfile).await?;
        Ok(self.lock().profiles.get(&user_id).cloned())
    }

    async fn update_display_name(
        &self,
        session: &SessionContext,
        name: Option<&str>,
    ) -> RemoteResult<Profile> {
        self.enter(RemoteOp::UpdateDisplayName).await?;
        let mut state = self.lock();

        let profile = state
            .profiles
            .get_mut(&session.user_id)
            .ok_or(RemoteError::NotFound {
                entity: "profile",
                id: session.user_id,
            })?;
        profile.name = name.map(str::to_string);
        profile.updated_at = Utc::now();
        Ok(profile.clone())
    }

    async fn subscribe(&self, topic: Topic) -> RemoteResult<ChangeSubscription> {
        self.enter(RemoteOp::Subscribe).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.lock().subscribers.push((topic, tx));

        tracing::debug!(channel = %topic.channel(), "Memory subscription opened");
        Ok(ChangeSubscription::new(topic, rx, CancellationToken::new()))
    }
}
