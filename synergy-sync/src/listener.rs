/// Realtime Change Listener
///
/// Subscribes to one collection of one project and merges every change into
/// the matching Entity Store by id, in arrival order. Payloads are parsed at
/// this boundary; malformed ones are logged and skipped.
///
/// # Lifecycle
///
/// ```text
/// start() ── subscribe ──► Live ── change ─► parse ─► prepare ─► store.apply
///    │                      │
///    └─ subscribe failed    ├─ stop()/drop ─► Disconnected (subscription released)
///       (SyncError)         └─ feed closed ─► Disconnected
/// ```
///
/// A `ChangeHandler` may enrich events before they are applied. Chat uses
/// `AuthorResolver` to attach the author's profile; a failed lookup leaves
/// the raw author id in place.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use synergy_sync::listener::{MergeById, RealtimeListener};
/// use synergy_sync::remote::{MemoryRemote, RemoteDataService};
/// use synergy_sync::store::EntityStore;
/// use synergy_shared::events::Topic;
/// use synergy_shared::models::Task;
///
/// # async fn example(project_id: uuid::Uuid) -> Result<(), synergy_sync::error::SyncError> {
/// let remote: Arc<dyn RemoteDataService> = Arc::new(MemoryRemote::new());
/// let store = Arc::new(EntityStore::<Task>::new());
/// store.reset(Some(project_id)).await;
///
/// let listener = RealtimeListener::start(remote, Topic::tasks(project_id), store, MergeById).await?;
/// // ...
/// listener.stop().await;
/// # Ok(())
/// # }
/// ```

use crate::error::{SyncError, SyncResult};
use crate::remote::{with_timeout, ChangeSubscription, RemoteDataService};
use crate::store::{Entity, EntityStore};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use synergy_shared::events::{ChangeEvent, Topic};
use synergy_shared::models::{Message, ProfileSummary};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Realtime connection status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Live,
    Disconnected,
}

/// Hook run on each parsed event before it reaches the store
#[async_trait]
pub trait ChangeHandler<T>: Send + Sync + 'static {
    async fn prepare(&self, event: ChangeEvent<T>) -> ChangeEvent<T>;
}

/// Applies events as delivered
pub struct MergeById;

#[async_trait]
impl<T: Entity> ChangeHandler<T> for MergeById {
    async fn prepare(&self, event: ChangeEvent<T>) -> ChangeEvent<T> {
        event
    }
}

/// Attaches the author's profile to inserted messages
///
/// Lookups are cached per author for the life of the resolver.
pub struct AuthorResolver {
    remote: Arc<dyn RemoteDataService>,
    timeout: Option<Duration>,
    cache: Mutex<HashMap<Uuid, ProfileSummary>>,
}

impl AuthorResolver {
    pub fn new(remote: Arc<dyn RemoteDataService>, timeout: Option<Duration>) -> Self {
        AuthorResolver {
            remote,
            timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn resolve(&self, author: Uuid) -> Option<ProfileSummary> {
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&author)
            .cloned();
        if cached.is_some() {
            return cached;
        }

        match with_timeout(self.timeout, self.remote.find_profile(author)).await {
            Ok(Some(profile)) => {
                let summary = ProfileSummary::from(&profile);
                self.cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(author, summary.clone());
                Some(summary)
            }
            Ok(None) => {
                tracing::debug!(author = %author, "Author has no profile");
                None
            }
            Err(e) => {
                tracing::warn!(author = %author, error = %e, "Author lookup failed, showing raw id");
                None
            }
        }
    }
}

#[async_trait]
impl ChangeHandler<Message> for AuthorResolver {
    async fn prepare(&self, event: ChangeEvent<Message>) -> ChangeEvent<Message> {
        match event {
            ChangeEvent::Insert(mut message) if message.author_profile.is_none() => {
                message.author_profile = self.resolve(message.author).await;
                ChangeEvent::Insert(message)
            }
            other => other,
        }
    }
}

/// Starts change listeners
pub struct RealtimeListener;

impl RealtimeListener {
    /// Subscribes to `topic` and spawns the merge loop into `store`
    ///
    /// The subscription is live when this returns, so a load issued
    /// afterwards cannot miss changes.
    ///
    /// # Errors
    ///
    /// `SyncError::Subscription` if the subscription cannot be established.
    pub async fn start<T, H>(
        remote: Arc<dyn RemoteDataService>,
        topic: Topic,
        store: Arc<EntityStore<T>>,
        handler: H,
    ) -> SyncResult<ListenerHandle>
    where
        T: Entity + DeserializeOwned,
        H: ChangeHandler<T>,
    {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let subscription = remote.subscribe(topic).await.map_err(|e| {
            tracing::warn!(channel = %topic.channel(), error = %e, "Subscription failed");
            SyncError::Subscription {
                channel: topic.channel(),
                reason: e.to_string(),
            }
        })?;
        state_tx.send_replace(ConnectionState::Live);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(merge_loop(subscription, store, handler, cancel.clone(), state_tx));

        Ok(ListenerHandle {
            topic,
            cancel,
            task: Some(task),
            state: state_rx,
        })
    }
}

async fn merge_loop<T, H>(
    mut subscription: ChangeSubscription,
    store: Arc<EntityStore<T>>,
    handler: H,
    cancel: CancellationToken,
    state: watch::Sender<ConnectionState>,
) where
    T: Entity + DeserializeOwned,
    H: ChangeHandler<T>,
{
    let topic = subscription.topic();
    let channel = topic.channel();
    tracing::info!(channel = %channel, "Listening for changes");

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!(channel = %channel, "Listener stopped");
                break;
            }
            change = subscription.next() => {
                let Some(raw) = change else {
                    tracing::warn!(channel = %channel, "Change subscription dropped");
                    break;
                };

                let event = match ChangeEvent::<T>::parse(&raw, topic.table) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "Discarding malformed change");
                        continue;
                    }
                };

                let event = handler.prepare(event).await;

                if store.current_project().await != Some(topic.project_id) {
                    tracing::debug!(channel = %channel, "Dropping change for project that is no longer open");
                    continue;
                }

                let outcome = store.apply(event).await;
                tracing::trace!(channel = %channel, outcome = ?outcome, "Change merged");
            }
        }
    }

    state.send_replace(ConnectionState::Disconnected);
}

/// Running listener; stops when stopped explicitly or dropped
pub struct ListenerHandle {
    topic: Topic,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: watch::Receiver<ConnectionState>,
}

impl ListenerHandle {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stops the loop and waits for the subscription to be released
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(channel = %self.topic.channel(), error = %e, "Listener task failed");
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionContext;
    use crate::remote::{MemoryRemote, RemoteOp};
    use serde_json::json;
    use synergy_shared::events::RawChange;
    use synergy_shared::models::{NewMessage, NewTask, Task};

    async fn wait_for<F>(mut check: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_merges_remote_insert() {
        let remote = Arc::new(MemoryRemote::new());
        let owner = remote.add_profile(Some("Ada"), "ada@example.com");
        let project = remote.add_project(owner.id, "Launch");
        let store = Arc::new(EntityStore::<Task>::new());
        store.reset(Some(project.id)).await;

        let listener = RealtimeListener::start(remote.clone(), Topic::tasks(project.id), store.clone(), MergeById)
            .await
            .unwrap();
        assert_eq!(listener.state(), ConnectionState::Live);

        let session = SessionContext::new(owner.id);
        let task = remote
            .create_task(&session, &NewTask::new(project.id, "From elsewhere"))
            .await
            .unwrap();

        let mut revisions = store.watch();
        revisions.changed().await.unwrap();
        assert_eq!(store.get(task.id).await, Some(task));

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_change_is_skipped() {
        let remote = Arc::new(MemoryRemote::new());
        let project_id = Uuid::new_v4();
        let store = Arc::new(EntityStore::<Task>::new());
        store.reset(Some(project_id)).await;

        let listener = RealtimeListener::start(remote.clone(), Topic::tasks(project_id), store.clone(), MergeById)
            .await
            .unwrap();

        remote.emit(RawChange {
            table: "tasks".to_string(),
            kind: "insert".to_string(),
            project_id,
            record: json!({ "id": "not-a-uuid" }),
        });
        remote.emit(RawChange {
            table: "tasks".to_string(),
            kind: "upsert".to_string(),
            project_id,
            record: json!({}),
        });

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(store.is_empty().await);
        assert_eq!(listener.state(), ConnectionState::Live);
    }

    #[tokio::test]
    async fn test_subscription_failure_is_reported() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail_next(RemoteOp::Subscribe, 1);
        let store = Arc::new(EntityStore::<Task>::new());

        let result = RealtimeListener::start(remote, Topic::tasks(Uuid::new_v4()), store, MergeById).await;
        assert!(matches!(result, Err(SyncError::Subscription { .. })));
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(EntityStore::<Task>::new());

        let listener = RealtimeListener::start(remote.clone(), Topic::tasks(Uuid::new_v4()), store, MergeById)
            .await
            .unwrap();
        assert_eq!(remote.active_subscriptions(), 1);

        drop(listener);
        let remote_check = remote.clone();
        wait_for(move || remote_check.active_subscriptions() == 0).await;
    }

    #[tokio::test]
    async fn test_author_resolution_falls_back_to_raw_id() {
        let remote = Arc::new(MemoryRemote::new());
        let author = remote.add_profile(Some("Ada"), "ada@example.com");
        let project = remote.add_project(author.id, "Launch");
        let store = Arc::new(EntityStore::<Message>::new());
        store.reset(Some(project.id)).await;

        let resolver = AuthorResolver::new(remote.clone(), None);
        let listener = RealtimeListener::start(remote.clone(), Topic::messages(project.id), store.clone(), resolver)
            .await
            .unwrap();

        let session = SessionContext::new(author.id);
        remote.fail_next(RemoteOp::FindProfile, 1);
        let first = remote
            .create_message(&session, &NewMessage::new(project.id, "first"))
            .await
            .unwrap();
        let second = remote
            .create_message(&session, &NewMessage::new(project.id, "second"))
            .await
            .unwrap();

        let mut revisions = store.watch();
        while store.len().await < 2 {
            revisions.changed().await.unwrap();
        }

        let first = store.get(first.id).await.unwrap();
        assert_eq!(first.author_label(), author.id.to_string());
        let second = store.get(second.id).await.unwrap();
        assert_eq!(second.author_label(), "Ada");

        listener.stop().await;
    }

    #[tokio::test]
    async fn test_changes_for_closed_project_are_dropped() {
        let remote = Arc::new(MemoryRemote::new());
        let owner = remote.add_profile(None, "owner@example.com");
        let project = remote.add_project(owner.id, "Old");
        let store = Arc::new(EntityStore::<Task>::new());
        store.reset(Some(project.id)).await;

        let listener = RealtimeListener::start(remote.clone(), Topic::tasks(project.id), store.clone(), MergeById)
            .await
            .unwrap();

        store.reset(Some(Uuid::new_v4())).await;
        let session = SessionContext::new(owner.id);
        remote
            .create_task(&session, &NewTask::new(project.id, "Late"))
            .await
            .unwrap();

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(store.is_empty().await);

        listener.stop().await;
    }
}
