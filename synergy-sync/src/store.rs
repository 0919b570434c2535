/// Entity Store
///
/// In-memory working copy of one collection (tasks or messages) of the
/// currently open project. The remote service stays the system of record;
/// a store is a disposable cache rebuilt by `load`.
///
/// All mutation goes through a handful of id-keyed operations so realtime
/// events and local optimistic writes can interleave freely:
///
/// ```text
///  load ──────────────► replace contents (guarded by load epoch)
///  apply(event) ──────► merge insert/update/delete by id
///  insert_provisional ► optimistic create with a temporary id
///  reconcile ─────────► temporary id → server row, deduplicated
///  begin_write ───────► optimistic field change, registers a write ticket
///  end_write ─────────► acknowledgment for the latest ticket only
///  remove_local ──────► optimistic delete
/// ```
///
/// Ordering follows the server: ascending creation time, ties in arrival
/// order.
///
/// While a write ticket is outstanding for an id, realtime updates for that
/// id are ignored so an echo of an older write cannot undo a newer local
/// change. Rows carrying a revision (`updated_at` for tasks) are also never
/// replaced by an older revision.
///
/// # Example
///
/// ```
/// use synergy_sync::store::{EntityStore, ApplyOutcome};
/// use synergy_shared::events::ChangeEvent;
/// use synergy_shared::models::Task;
/// use uuid::Uuid;
///
/// # async fn example(task: Task) {
/// let store: EntityStore<Task> = EntityStore::new();
/// store.reset(Some(task.project_id)).await;
///
/// let outcome = store.apply(ChangeEvent::Insert(task.clone())).await;
/// assert_eq!(outcome, ApplyOutcome::Inserted);
/// assert_eq!(store.apply(ChangeEvent::Insert(task)).await, ApplyOutcome::Unchanged);
/// # }
/// ```

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteResult;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::future::Future;
use synergy_shared::events::ChangeEvent;
use synergy_shared::models::{Message, Task};
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

/// A row the store can hold
pub trait Entity: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Collection name, for logs and errors
    const COLLECTION: &'static str;

    fn id(&self) -> Uuid;

    fn project_id(&self) -> Uuid;

    fn created_at(&self) -> DateTime<Utc>;

    /// Server revision; a row never replaces one with a newer revision
    fn revision(&self) -> Option<DateTime<Utc>> {
        None
    }
}

impl Entity for Task {
    const COLLECTION: &'static str = "tasks";

    fn id(&self) -> Uuid {
        self.id
    }

    fn project_id(&self) -> Uuid {
        self.project_id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn revision(&self) -> Option<DateTime<Utc>> {
        Some(self.updated_at)
    }
}

impl Entity for Message {
    const COLLECTION: &'static str = "messages";

    fn id(&self) -> Uuid {
        self.id
    }

    fn project_id(&self) -> Uuid {
        self.project_id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Result of merging one change event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Updated,
    Removed,
    /// Same id and fields were already present
    Unchanged,
    Ignored(IgnoreReason),
}

impl ApplyOutcome {
    /// Whether the store contents changed
    pub fn changed(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Inserted | ApplyOutcome::Updated | ApplyOutcome::Removed
        )
    }
}

/// Why an event was not merged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No project is open
    NoProject,
    /// The row belongs to another project
    OtherProject,
    /// Update or delete for an id that is not in the store
    UnknownId,
    /// A local write for this id is still in flight
    PendingWrite,
    /// The row is older than the one held
    Outdated,
}

/// Result of a `load`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Contents replaced with this many rows
    Loaded(usize),
    /// A newer reset or load superseded this one; the response was dropped
    Stale,
}

/// Handle identifying one optimistic write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteTicket(u64);

/// Read-only view of a store for presentation
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot<T> {
    pub project_id: Option<Uuid>,
    pub items: Vec<T>,
    pub loading: bool,
    pub error: Option<String>,
}

struct StoreState<T> {
    project_id: Option<Uuid>,
    items: Vec<T>,
    loading: bool,
    error: Option<String>,
    /// Bumped by every reset and load start
    epoch: u64,
    /// Latest write ticket per id
    pending: HashMap<Uuid, WriteTicket>,
    /// Newest remote row held back by a pending write, applied when it settles
    deferred: HashMap<Uuid, T>,
    /// Temporary ids of optimistic creates
    provisional: HashSet<Uuid>,
    next_ticket: u64,
}

impl<T> Default for StoreState<T> {
    fn default() -> Self {
        StoreState {
            project_id: None,
            items: Vec::new(),
            loading: false,
            error: None,
            epoch: 0,
            pending: HashMap::new(),
            deferred: HashMap::new(),
            provisional: HashSet::new(),
            next_ticket: 0,
        }
    }
}

impl<T: Entity> StoreState<T> {
    fn position(&self, id: Uuid) -> Option<usize> {
        self.items.iter().position(|e| e.id() == id)
    }

    fn insert_ordered(&mut self, entity: T) {
        let created_at = entity.created_at();
        let at = self.items.partition_point(|e| e.created_at() <= created_at);
        self.items.insert(at, entity);
    }

    fn replace_at(&mut self, index: usize, entity: T) {
        if self.items[index].created_at() == entity.created_at() {
            self.items[index] = entity;
        } else {
            self.items.remove(index);
            self.insert_ordered(entity);
        }
    }

    fn upsert(&mut self, entity: T) {
        match self.position(entity.id()) {
            Some(index) => self.replace_at(index, entity),
            None => self.insert_ordered(entity),
        }
    }

    /// Merges a remote row over the one at `index`
    fn merge_at(&mut self, index: usize, entity: T) -> ApplyOutcome {
        if self.pending.contains_key(&entity.id()) {
            self.defer(entity);
            return ApplyOutcome::Ignored(IgnoreReason::PendingWrite);
        }
        if is_older(&entity, &self.items[index]) {
            return ApplyOutcome::Ignored(IgnoreReason::Outdated);
        }
        if self.items[index] == entity {
            return ApplyOutcome::Unchanged;
        }
        self.replace_at(index, entity);
        ApplyOutcome::Updated
    }

    fn defer(&mut self, entity: T) {
        let keep = match self.deferred.get(&entity.id()) {
            Some(held) => !is_older(&entity, held),
            None => true,
        };
        if keep {
            self.deferred.insert(entity.id(), entity);
        }
    }

    fn forget(&mut self, id: Uuid) {
        self.pending.remove(&id);
        self.deferred.remove(&id);
    }

    fn clear(&mut self, project_id: Option<Uuid>) {
        self.project_id = project_id;
        self.items.clear();
        self.pending.clear();
        self.deferred.clear();
        self.provisional.clear();
        self.error = None;
    }
}

fn is_older<T: Entity>(incoming: &T, held: &T) -> bool {
    matches!((incoming.revision(), held.revision()), (Some(new), Some(old)) if new < old)
}

fn is_newer<T: Entity>(incoming: &T, held: &T) -> bool {
    matches!((incoming.revision(), held.revision()), (Some(new), Some(old)) if new > old)
}

/// Working copy of one collection of the open project
pub struct EntityStore<T> {
    state: RwLock<StoreState<T>>,
    revision: watch::Sender<u64>,
}

impl<T: Entity> Default for EntityStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> EntityStore<T> {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        EntityStore {
            state: RwLock::new(StoreState::default()),
            revision,
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Receiver that changes whenever the contents or flags change
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Switches to another project (or none), dropping all contents
    ///
    /// Any load still in flight for the previous project is discarded when it
    /// completes.
    pub async fn reset(&self, project_id: Option<Uuid>) {
        {
            let mut state = self.state.write().await;
            state.clear(project_id);
            state.loading = project_id.is_some();
            state.epoch += 1;
        }
        self.bump();

        tracing::debug!(collection = T::COLLECTION, project_id = ?project_id, "Store reset");
    }

    /// Replaces the contents with a full fetch for `project_id`
    ///
    /// Switches the store to `project_id` first if another project is open.
    /// When a later reset or load overtakes this one the response is dropped
    /// and `LoadOutcome::Stale` returned. On failure the previous contents stay
    /// and the error flag is set.
    pub async fn load<F>(&self, project_id: Uuid, fetch: F) -> SyncResult<LoadOutcome>
    where
        F: Future<Output = RemoteResult<Vec<T>>>,
    {
        let epoch = {
            let mut state = self.state.write().await;
            if state.project_id != Some(project_id) {
                state.clear(Some(project_id));
            }
            state.loading = true;
            state.error = None;
            state.epoch += 1;
            state.epoch
        };
        self.bump();

        let result = fetch.await;

        let mut state = self.state.write().await;
        if state.epoch != epoch || state.project_id != Some(project_id) {
            tracing::debug!(
                collection = T::COLLECTION,
                project_id = %project_id,
                "Discarding superseded load"
            );
            return Ok(LoadOutcome::Stale);
        }
        state.loading = false;

        match result {
            Ok(rows) => {
                let mut fresh = StoreState::<T>::default();
                for row in rows.into_iter().filter(|r| r.project_id() == project_id) {
                    fresh.upsert(row);
                }

                // Optimistic rows the server does not reflect yet survive a reload
                let local: Vec<T> = state
                    .items
                    .iter()
                    .filter(|e| state.pending.contains_key(&e.id()) || state.provisional.contains(&e.id()))
                    .cloned()
                    .collect();
                for entity in local {
                    fresh.upsert(entity);
                }

                state.items = fresh.items;
                state.error = None;
                let count = state.items.len();
                drop(state);
                self.bump();

                tracing::debug!(
                    collection = T::COLLECTION,
                    project_id = %project_id,
                    count = count,
                    "Store loaded"
                );
                Ok(LoadOutcome::Loaded(count))
            }
            Err(e) => {
                state.error = Some(e.to_string());
                drop(state);
                self.bump();

                tracing::warn!(
                    collection = T::COLLECTION,
                    project_id = %project_id,
                    error = %e,
                    "Load failed, keeping previous contents"
                );
                Err(SyncError::Fetch {
                    collection: T::COLLECTION,
                    project_id,
                    source: e,
                })
            }
        }
    }

    /// Merges an externally observed change
    ///
    /// Idempotent: delivering the same event twice leaves the same state.
    pub async fn apply(&self, event: ChangeEvent<T>) -> ApplyOutcome {
        let outcome = {
            let mut state = self.state.write().await;
            let Some(project_id) = state.project_id else {
                return ApplyOutcome::Ignored(IgnoreReason::NoProject);
            };

            match event {
                ChangeEvent::Insert(entity) => {
                    if entity.project_id() != project_id {
                        ApplyOutcome::Ignored(IgnoreReason::OtherProject)
                    } else {
                        match state.position(entity.id()) {
                            Some(index) => state.merge_at(index, entity),
                            None => {
                                state.insert_ordered(entity);
                                ApplyOutcome::Inserted
                            }
                        }
                    }
                }
                ChangeEvent::Update(entity) => {
                    if entity.project_id() != project_id {
                        ApplyOutcome::Ignored(IgnoreReason::OtherProject)
                    } else {
                        match state.position(entity.id()) {
                            Some(index) => state.merge_at(index, entity),
                            None => ApplyOutcome::Ignored(IgnoreReason::UnknownId),
                        }
                    }
                }
                ChangeEvent::Delete { id } => match state.position(id) {
                    Some(index) => {
                        state.items.remove(index);
                        state.forget(id);
                        ApplyOutcome::Removed
                    }
                    None => ApplyOutcome::Ignored(IgnoreReason::UnknownId),
                },
            }
        };

        match outcome {
            ApplyOutcome::Ignored(reason) => {
                tracing::debug!(collection = T::COLLECTION, reason = ?reason, "Change not merged");
            }
            outcome if outcome.changed() => self.bump(),
            _ => {}
        }

        outcome
    }

    /// Inserts or replaces a row of the open project
    ///
    /// Returns `false` if the row belongs to another project.
    pub async fn upsert_local(&self, entity: T) -> bool {
        {
            let mut state = self.state.write().await;
            if state.project_id != Some(entity.project_id()) {
                tracing::debug!(
                    collection = T::COLLECTION,
                    id = %entity.id(),
                    "Ignoring local upsert for project that is not open"
                );
                return false;
            }
            state.upsert(entity);
        }
        self.bump();
        true
    }

    /// Inserts an optimistic row under a temporary id
    ///
    /// The row survives reloads until `reconcile` or `remove_local`.
    pub async fn insert_provisional(&self, entity: T) -> bool {
        let id = entity.id();
        if !self.upsert_local(entity).await {
            return false;
        }
        self.state.write().await.provisional.insert(id);
        true
    }

    /// Removes a row, returning it if it was present
    pub async fn remove_local(&self, id: Uuid) -> Option<T> {
        let removed = {
            let mut state = self.state.write().await;
            state.forget(id);
            state.provisional.remove(&id);
            let index = state.position(id)?;
            state.items.remove(index)
        };
        self.bump();
        Some(removed)
    }

    /// Replaces a temporary row with the confirmed server row
    ///
    /// If a realtime insert already delivered the server row, the temporary
    /// row is dropped and only one copy remains. Returns `false` if the
    /// project was switched in the meantime.
    pub async fn reconcile(&self, temp_id: Uuid, confirmed: T) -> bool {
        {
            let mut state = self.state.write().await;
            state.provisional.remove(&temp_id);

            if state.project_id != Some(confirmed.project_id()) {
                if let Some(index) = state.position(temp_id) {
                    state.items.remove(index);
                }
                return false;
            }

            if let Some(index) = state.position(temp_id) {
                state.items.remove(index);
            }

            match state.position(confirmed.id()) {
                Some(index) => {
                    if !is_older(&confirmed, &state.items[index]) {
                        state.replace_at(index, confirmed);
                    }
                }
                None => state.insert_ordered(confirmed),
            }
        }
        self.bump();
        true
    }

    /// Applies an optimistic change to a row and registers a write ticket
    ///
    /// Returns `None` if the row is not in the store.
    pub async fn begin_write<F>(&self, id: Uuid, change: F) -> Option<WriteTicket>
    where
        F: FnOnce(&mut T),
    {
        let ticket = {
            let mut state = self.state.write().await;
            let index = state.position(id)?;
            change(&mut state.items[index]);

            state.next_ticket += 1;
            let ticket = WriteTicket(state.next_ticket);
            state.pending.insert(id, ticket);
            ticket
        };
        self.bump();
        Some(ticket)
    }

    /// Settles a write
    ///
    /// Only the latest ticket for an id is honored: its confirmed row replaces
    /// the optimistic one and realtime updates for the id resume. A remote row
    /// that arrived during the write and is newer than the acknowledgment wins
    /// over it. Returns `false` for a superseded ticket, whose row is discarded.
    pub async fn end_write(&self, id: Uuid, ticket: WriteTicket, confirmed: Option<T>) -> bool {
        {
            let mut state = self.state.write().await;
            if state.pending.get(&id) != Some(&ticket) {
                tracing::debug!(
                    collection = T::COLLECTION,
                    id = %id,
                    "Discarding acknowledgment of superseded write"
                );
                return false;
            }
            state.pending.remove(&id);
            let deferred = state.deferred.remove(&id);

            if let (Some(confirmed), Some(index)) = (confirmed, state.position(id)) {
                if is_older(&confirmed, &state.items[index]) {
                    tracing::debug!(collection = T::COLLECTION, id = %id, "Acknowledgment older than held row");
                } else {
                    state.replace_at(index, confirmed);
                }
            }

            if let (Some(newer), Some(index)) = (deferred, state.position(id)) {
                if is_newer(&newer, &state.items[index]) {
                    tracing::debug!(
                        collection = T::COLLECTION,
                        id = %id,
                        "Applying remote change held back by the write"
                    );
                    state.replace_at(index, newer);
                }
            }
        }
        self.bump();
        true
    }

    pub async fn has_pending_write(&self, id: Uuid) -> bool {
        self.state.read().await.pending.contains_key(&id)
    }

    pub async fn current_project(&self) -> Option<Uuid> {
        self.state.read().await.project_id
    }

    pub async fn get(&self, id: Uuid) -> Option<T> {
        let state = self.state.read().await;
        state.position(id).map(|index| state.items[index].clone())
    }

    pub async fn items(&self) -> Vec<T> {
        self.state.read().await.items.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.items.is_empty()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.loading
    }

    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    pub async fn snapshot(&self) -> StoreSnapshot<T> {
        let state = self.state.read().await;
        StoreSnapshot {
            project_id: state.project_id,
            items: state.items.clone(),
            loading: state.loading,
            error: state.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteError;
    use chrono::Duration;
    use synergy_shared::models::TaskStatus;

    fn task(project_id: Uuid, title: &str, minutes: i64) -> Task {
        let at = DateTime::parse_from_rfc3339("2025-09-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::minutes(minutes);
        Task {
            id: Uuid::new_v4(),
            project_id,
            title: title.to_string(),
            description: None,
            status: TaskStatus::Todo,
            priority: None,
            due_date: None,
            assignee: None,
            created_by: None,
            created_at: at,
            updated_at: at,
        }
    }

    async fn open_store(project_id: Uuid, tasks: Vec<Task>) -> EntityStore<Task> {
        let store = EntityStore::new();
        store.load(project_id, async { Ok(tasks) }).await.unwrap();
        store
    }

    fn titles(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.title.as_str()).collect()
    }

    #[tokio::test]
    async fn test_load_orders_by_creation() {
        let project_id = Uuid::new_v4();
        let late = task(project_id, "late", 10);
        let early = task(project_id, "early", 0);

        let store = open_store(project_id, vec![late, early]).await;
        let snapshot = store.snapshot().await;

        assert_eq!(titles(&snapshot.items), vec!["early", "late"]);
        assert!(!snapshot.loading);
        assert_eq!(snapshot.project_id, Some(project_id));
    }

    #[tokio::test]
    async fn test_failed_load_keeps_contents() {
        let project_id = Uuid::new_v4();
        let store = open_store(project_id, vec![task(project_id, "kept", 0)]).await;

        let result = store
            .load(project_id, async {
                Err(RemoteError::Unavailable("network down".to_string()))
            })
            .await;

        assert!(matches!(result, Err(SyncError::Fetch { collection: "tasks", .. })));
        let snapshot = store.snapshot().await;
        assert_eq!(titles(&snapshot.items), vec!["kept"]);
        assert!(snapshot.error.unwrap().contains("network down"));
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn test_stale_load_is_discarded() {
        let project_a = Uuid::new_v4();
        let project_b = Uuid::new_v4();
        let store = EntityStore::<Task>::new();

        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let stale_rows = vec![task(project_a, "from A", 0)];

        let slow_load = store.load(project_a, async move {
            let _ = gate.await;
            Ok(stale_rows)
        });

        let switch = async {
            store.reset(Some(project_b)).await;
            store
                .load(project_b, async { Ok(vec![task(project_b, "from B", 0)]) })
                .await
                .unwrap();
            let _ = release.send(());
        };

        let (outcome, _) = tokio::join!(slow_load, switch);
        assert_eq!(outcome.unwrap(), LoadOutcome::Stale);

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.project_id, Some(project_b));
        assert_eq!(titles(&snapshot.items), vec!["from B"]);
    }

    #[tokio::test]
    async fn test_apply_insert_keeps_order_and_dedups() {
        let project_id = Uuid::new_v4();
        let store = open_store(
            project_id,
            vec![task(project_id, "first", 0), task(project_id, "third", 20)],
        )
        .await;

        let second = task(project_id, "second", 10);
        assert_eq!(store.apply(ChangeEvent::Insert(second.clone())).await, ApplyOutcome::Inserted);
        assert_eq!(store.apply(ChangeEvent::Insert(second)).await, ApplyOutcome::Unchanged);

        assert_eq!(titles(&store.items().await), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_apply_update_and_delete_of_unknown_id() {
        let project_id = Uuid::new_v4();
        let store = open_store(project_id, vec![task(project_id, "only", 0)]).await;

        let stranger = task(project_id, "stranger", 5);
        assert_eq!(
            store.apply(ChangeEvent::Update(stranger.clone())).await,
            ApplyOutcome::Ignored(IgnoreReason::UnknownId)
        );
        assert_eq!(
            store.apply(ChangeEvent::Delete { id: stranger.id }).await,
            ApplyOutcome::Ignored(IgnoreReason::UnknownId)
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_apply_ignores_other_project() {
        let project_id = Uuid::new_v4();
        let store = open_store(project_id, vec![]).await;

        let foreign = task(Uuid::new_v4(), "foreign", 0);
        assert_eq!(
            store.apply(ChangeEvent::Insert(foreign)).await,
            ApplyOutcome::Ignored(IgnoreReason::OtherProject)
        );
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_last_update_wins() {
        let project_id = Uuid::new_v4();
        let original = task(project_id, "v0", 0);
        let store = open_store(project_id, vec![original.clone()]).await;

        let updates: Vec<Task> = (1..=5)
            .map(|step| Task {
                title: format!("v{}", step),
                updated_at: original.updated_at + Duration::seconds(step),
                ..original.clone()
            })
            .collect();
        for update in &updates {
            store.apply(ChangeEvent::Update(update.clone())).await;
        }
        let last = updates[4].clone();
        // Redelivery of the final event changes nothing
        assert_eq!(store.apply(ChangeEvent::Update(last.clone())).await, ApplyOutcome::Unchanged);

        assert_eq!(store.items().await, vec![last]);
    }

    #[tokio::test]
    async fn test_older_revision_is_ignored() {
        let project_id = Uuid::new_v4();
        let original = task(project_id, "v0", 0);
        let newer = Task {
            status: TaskStatus::Done,
            updated_at: original.updated_at + Duration::seconds(5),
            ..original.clone()
        };
        let store = open_store(project_id, vec![newer.clone()]).await;

        let echo = Task {
            status: TaskStatus::InProgress,
            updated_at: original.updated_at + Duration::seconds(1),
            ..original
        };
        assert_eq!(
            store.apply(ChangeEvent::Update(echo)).await,
            ApplyOutcome::Ignored(IgnoreReason::Outdated)
        );
        assert_eq!(store.get(newer.id).await.unwrap().status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_pending_write_blocks_realtime_update() {
        let project_id = Uuid::new_v4();
        let original = task(project_id, "card", 0);
        let id = original.id;
        let store = open_store(project_id, vec![original.clone()]).await;

        let ticket = store
            .begin_write(id, |t| t.status = TaskStatus::Done)
            .await
            .unwrap();

        let echo = Task {
            status: TaskStatus::InProgress,
            updated_at: original.updated_at + Duration::seconds(1),
            ..original.clone()
        };
        assert_eq!(
            store.apply(ChangeEvent::Update(echo)).await,
            ApplyOutcome::Ignored(IgnoreReason::PendingWrite)
        );
        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Done);

        let confirmed = Task {
            status: TaskStatus::Done,
            updated_at: original.updated_at + Duration::seconds(2),
            ..original
        };
        assert!(store.end_write(id, ticket, Some(confirmed.clone())).await);
        assert!(!store.has_pending_write(id).await);
        assert_eq!(store.get(id).await, Some(confirmed));
    }

    #[tokio::test]
    async fn test_newer_remote_row_wins_over_pending_ack() {
        let project_id = Uuid::new_v4();
        let original = task(project_id, "orig", 0);
        let id = original.id;
        let store = open_store(project_id, vec![original.clone()]).await;

        let ticket = store
            .begin_write(id, |t| t.status = TaskStatus::Done)
            .await
            .unwrap();

        // Another writer commits after our write
        let theirs = Task {
            title: "renamed by someone else".to_string(),
            status: TaskStatus::Done,
            updated_at: original.updated_at + Duration::seconds(2),
            ..original.clone()
        };
        assert_eq!(
            store.apply(ChangeEvent::Update(theirs.clone())).await,
            ApplyOutcome::Ignored(IgnoreReason::PendingWrite)
        );

        let ours = Task {
            status: TaskStatus::Done,
            updated_at: original.updated_at + Duration::seconds(1),
            ..original
        };
        assert!(store.end_write(id, ticket, Some(ours)).await);
        assert_eq!(store.get(id).await, Some(theirs));
    }

    #[tokio::test]
    async fn test_held_back_row_survives_superseded_ack() {
        let project_id = Uuid::new_v4();
        let original = task(project_id, "orig", 0);
        let id = original.id;
        let store = open_store(project_id, vec![original.clone()]).await;

        let first = store.begin_write(id, |t| t.status = TaskStatus::InProgress).await.unwrap();
        let second = store.begin_write(id, |t| t.status = TaskStatus::Done).await.unwrap();

        let theirs = Task {
            title: "renamed".to_string(),
            status: TaskStatus::Done,
            updated_at: original.updated_at + Duration::seconds(5),
            ..original.clone()
        };
        let older = Task {
            title: "stale rename".to_string(),
            updated_at: original.updated_at + Duration::seconds(3),
            ..original.clone()
        };
        store.apply(ChangeEvent::Update(theirs.clone())).await;
        store.apply(ChangeEvent::Update(older)).await;

        let ack = |status, secs| Task {
            status,
            updated_at: original.updated_at + Duration::seconds(secs),
            ..original.clone()
        };
        assert!(!store.end_write(id, first, Some(ack(TaskStatus::InProgress, 1))).await);
        assert!(store.end_write(id, second, Some(ack(TaskStatus::Done, 2))).await);
        assert_eq!(store.get(id).await, Some(theirs));
    }

    #[tokio::test]
    async fn test_older_ack_does_not_replace_newer_row() {
        let project_id = Uuid::new_v4();
        let original = task(project_id, "orig", 0);
        let id = original.id;
        let store = open_store(project_id, vec![original.clone()]).await;

        let ticket = store.begin_write(id, |t| t.status = TaskStatus::Done).await.unwrap();
        let stale = Task {
            status: TaskStatus::Done,
            updated_at: original.updated_at - Duration::seconds(1),
            ..original.clone()
        };
        assert!(store.end_write(id, ticket, Some(stale)).await);

        let held = store.get(id).await.unwrap();
        assert_eq!(held.updated_at, original.updated_at);
        assert_eq!(held.status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_failed_write_still_applies_held_back_row() {
        let project_id = Uuid::new_v4();
        let original = task(project_id, "orig", 0);
        let id = original.id;
        let store = open_store(project_id, vec![original.clone()]).await;

        let ticket = store.begin_write(id, |t| t.status = TaskStatus::Done).await.unwrap();
        let theirs = Task {
            status: TaskStatus::InProgress,
            updated_at: original.updated_at + Duration::seconds(1),
            ..original
        };
        store.apply(ChangeEvent::Update(theirs.clone())).await;

        assert!(store.end_write(id, ticket, None).await);
        assert_eq!(store.get(id).await, Some(theirs));
    }

    #[tokio::test]
    async fn test_superseded_ack_is_discarded() {
        let project_id = Uuid::new_v4();
        let original = task(project_id, "card", 0);
        let id = original.id;
        let store = open_store(project_id, vec![original.clone()]).await;

        let first = store.begin_write(id, |t| t.status = TaskStatus::InProgress).await.unwrap();
        let second = store.begin_write(id, |t| t.status = TaskStatus::Done).await.unwrap();

        let first_ack = Task {
            status: TaskStatus::InProgress,
            ..original.clone()
        };
        assert!(!store.end_write(id, first, Some(first_ack)).await);
        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Done);

        let second_ack = Task {
            status: TaskStatus::Done,
            ..original
        };
        assert!(store.end_write(id, second, Some(second_ack)).await);
        assert_eq!(store.get(id).await.unwrap().status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_reconcile_replaces_temporary_row() {
        let project_id = Uuid::new_v4();
        let store = open_store(project_id, vec![task(project_id, "older", 0)]).await;

        let temp = task(project_id, "new card", 30);
        store.insert_provisional(temp.clone()).await;

        let server = Task {
            id: Uuid::new_v4(),
            ..temp.clone()
        };
        assert!(store.reconcile(temp.id, server.clone()).await);

        let items = store.items().await;
        assert_eq!(items.len(), 2);
        assert!(store.get(temp.id).await.is_none());
        assert_eq!(items[1], server);
    }

    #[tokio::test]
    async fn test_reconcile_after_realtime_insert_leaves_one_copy() {
        let project_id = Uuid::new_v4();
        let store = open_store(project_id, vec![]).await;

        let temp = task(project_id, "new card", 0);
        store.insert_provisional(temp.clone()).await;

        let server = Task {
            id: Uuid::new_v4(),
            ..temp.clone()
        };
        store.apply(ChangeEvent::Insert(server.clone())).await;
        assert_eq!(store.len().await, 2);

        store.reconcile(temp.id, server.clone()).await;
        assert_eq!(store.items().await, vec![server]);
    }

    #[tokio::test]
    async fn test_provisional_row_survives_reload() {
        let project_id = Uuid::new_v4();
        let existing = task(project_id, "existing", 0);
        let store = open_store(project_id, vec![existing.clone()]).await;

        let temp = task(project_id, "in flight", 10);
        store.insert_provisional(temp.clone()).await;

        store.load(project_id, async { Ok(vec![existing]) }).await.unwrap();
        assert!(store.get(temp.id).await.is_some());

        store.remove_local(temp.id).await;
        assert_eq!(titles(&store.items().await), vec!["existing"]);
    }

    #[tokio::test]
    async fn test_watch_notifies_on_change() {
        let project_id = Uuid::new_v4();
        let store = open_store(project_id, vec![]).await;
        let mut rx = store.watch();
        let _ = rx.borrow_and_update();

        store.apply(ChangeEvent::Insert(task(project_id, "card", 0))).await;
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let project_id = Uuid::new_v4();
        let store = open_store(project_id, vec![task(project_id, "card", 0)]).await;

        store.reset(None).await;
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.project_id, None);
        assert!(snapshot.items.is_empty());
        assert!(!snapshot.loading);
        assert_eq!(
            store.apply(ChangeEvent::Insert(task(project_id, "late", 1))).await,
            ApplyOutcome::Ignored(IgnoreReason::NoProject)
        );
    }
}
