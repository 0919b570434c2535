/// Remote Data Service
///
/// The system of record for projects, tasks, messages, memberships and
/// profiles, plus the change-subscription primitive. The sync core only
/// talks to it through the `RemoteDataService` trait.
///
/// # Implementations
///
/// - **PgRemote**: PostgreSQL rows plus Redis pub/sub change fanout
/// - **MemoryRemote**: in-process store with failure injection, for tests
///   and demos
///
/// # Example
///
/// ```
/// use synergy_sync::remote::{MemoryRemote, RemoteDataService};
///
/// # async fn example() -> Result<(), synergy_sync::remote::RemoteError> {
/// let remote = MemoryRemote::new();
/// let tasks = remote.list_tasks(uuid::Uuid::new_v4()).await?;
/// assert!(tasks.is_empty());
/// # Ok(())
/// # }
/// ```

pub mod memory;
pub mod postgres;

pub use memory::{MemoryRemote, RemoteOp};
pub use postgres::PgRemote;

use crate::context::SessionContext;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use synergy_shared::events::{RawChange, Topic};
use synergy_shared::models::{
    AssignedTask, MemberProfile, Membership, Message, NewMessage, NewProject, NewTask, Profile,
    Project, StatusCounts, Task, TaskPatch, TaskStatus,
};
use synergy_shared::redis::ChangeFeedError;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

/// Remote service errors
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Change feed error: {0}")]
    Feed(#[from] ChangeFeedError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// The service refused the request (permissions, constraints)
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote service unavailable: {0}")]
    Unavailable(String),
}

/// Remote result type alias
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Runs a remote call, bounded by `timeout` when one is set
pub async fn with_timeout<T, F>(timeout: Option<Duration>, call: F) -> RemoteResult<T>
where
    F: Future<Output = RemoteResult<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| RemoteError::Timeout(limit))?,
        None => call.await,
    }
}

/// A live change subscription
///
/// Yields raw changes for its topic in arrival order. Dropping it releases
/// the underlying subscription.
pub struct ChangeSubscription {
    topic: Topic,
    rx: mpsc::Receiver<RawChange>,
    _guard: DropGuard,
}

impl ChangeSubscription {
    /// Wraps a change channel; `cancel` fires when the subscription is dropped
    pub fn new(topic: Topic, rx: mpsc::Receiver<RawChange>, cancel: CancellationToken) -> Self {
        ChangeSubscription {
            topic,
            rx,
            _guard: cancel.drop_guard(),
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Next change for this topic, `None` once the feed has closed
    pub async fn next(&mut self) -> Option<RawChange> {
        loop {
            let change = self.rx.recv().await?;
            if self.topic.accepts(&change) {
                return Some(change);
            }
        }
    }
}

/// Remote Data Service contract
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    /// Implementation name, for logs
    fn name(&self) -> &str;

    // Projects

    async fn list_projects(&self, session: &SessionContext) -> RemoteResult<Vec<Project>>;

    /// Creates a project owned by the session user
    async fn create_project(&self, session: &SessionContext, draft: &NewProject) -> RemoteResult<Project>;

    async fn project_progress(&self, project_id: Uuid) -> RemoteResult<StatusCounts>;

    // Tasks

    /// A project's tasks, oldest first
    async fn list_tasks(&self, project_id: Uuid) -> RemoteResult<Vec<Task>>;

    /// Open tasks assigned to the session user, soonest due first
    async fn list_assigned_tasks(&self, session: &SessionContext) -> RemoteResult<Vec<AssignedTask>>;

    async fn create_task(&self, session: &SessionContext, draft: &NewTask) -> RemoteResult<Task>;

    /// Applies a partial update, `NotFound` if the task is gone
    async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> RemoteResult<Task>;

    async fn update_task_status(&self, id: Uuid, status: TaskStatus) -> RemoteResult<Task> {
        self.update_task(id, &TaskPatch::status(status)).await
    }

    async fn delete_task(&self, id: Uuid) -> RemoteResult<()>;

    // Chat

    /// A project's messages with author profiles, oldest first
    async fn list_messages(&self, project_id: Uuid) -> RemoteResult<Vec<Message>>;

    async fn create_message(&self, session: &SessionContext, draft: &NewMessage) -> RemoteResult<Message>;

    // Members and profiles

    async fn list_members(&self, project_id: Uuid) -> RemoteResult<Vec<MemberProfile>>;

    /// Adds a member; only project owners may do this
    async fn add_member(
        &self,
        session: &SessionContext,
        project_id: Uuid,
        user_id: Uuid,
    ) -> RemoteResult<Membership>;

    async fn find_profile(&self, user_id: Uuid) -> RemoteResult<Option<Profile>>;

    async fn update_display_name(
        &self,
        session: &SessionContext,
        name: Option<&str>,
    ) -> RemoteResult<Profile>;

    // Realtime

    /// Subscribes to changes; the subscription is live when this returns
    async fn subscribe(&self, topic: Topic) -> RemoteResult<ChangeSubscription>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use synergy_shared::events::Table;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_maps_elapsed() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, RemoteError>(1)
        };

        let result = with_timeout(Some(Duration::from_secs(1)), slow).await;
        assert!(matches!(result, Err(RemoteError::Timeout(d)) if d == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_with_timeout_disabled() {
        let result = with_timeout(None, async { Ok::<_, RemoteError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_subscription_skips_foreign_changes() {
        let project_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let mut subscription = ChangeSubscription::new(Topic::tasks(project_id), rx, cancel.clone());

        let foreign = RawChange::deleted(Table::Tasks, Uuid::new_v4(), Uuid::new_v4());
        let ours = RawChange::deleted(Table::Tasks, project_id, Uuid::new_v4());
        tx.send(foreign).await.unwrap();
        tx.send(ours.clone()).await.unwrap();

        assert_eq!(subscription.next().await, Some(ours));

        drop(subscription);
        assert!(cancel.is_cancelled());
    }
}
