/// Optimistic Mutation Engine
///
/// Applies every user mutation to the local store first, then confirms it
/// with the remote service. One contract per operation kind:
///
/// | Operation      | Local first             | On success                 | On failure                          |
/// |----------------|-------------------------|----------------------------|-------------------------------------|
/// | create task    | insert under temp id    | reconcile with server row  | remove temp row, error, input back  |
/// | update status  | set status              | apply latest ack           | full reload, warning                |
/// | update fields  | apply patch             | apply latest ack           | full reload, warning                |
/// | delete task    | remove row              | nothing                    | full reload, warning                |
/// | send message   | insert under temp id    | reconcile with server row  | remove temp row, error, input back  |
///
/// Remote writes for the same entity run one at a time in issue order, so
/// the last write issued is the last write persisted. Writes to different
/// entities run concurrently.

use crate::config::SyncSettings;
use crate::context::SessionContext;
use crate::error::{Rejected, SyncError, SyncResult};
use crate::notify::Notifier;
use crate::remote::{with_timeout, RemoteDataService, RemoteResult};
use crate::store::EntityStore;
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use synergy_shared::models::{Message, NewMessage, NewTask, Task, TaskPatch, TaskStatus};
use tokio::sync::oneshot::{self, error::TryRecvError};
use uuid::Uuid;
use validator::Validate;

/// Per-entity FIFO lanes for remote writes
///
/// Each lane is a chain of turns: joining is synchronous and links the new
/// turn behind the previous one, so queue order is join order.
#[derive(Default)]
struct WriteLanes {
    tails: Mutex<HashMap<Uuid, oneshot::Receiver<()>>>,
}

/// A place in an entity's lane; dropping it lets the next turn run
struct LaneTurn {
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

impl LaneTurn {
    /// Waits until every turn queued before this one has finished
    async fn ready(&mut self) {
        if let Some(previous) = self.previous.as_mut() {
            // Nothing is ever sent; the earlier turn closes the channel when dropped
            let _ = previous.await;
            self.previous = None;
        }
    }
}

impl WriteLanes {
    fn join(&self, id: Uuid) -> LaneTurn {
        let (done, tail) = oneshot::channel();
        let mut tails = self.tails.lock().unwrap_or_else(PoisonError::into_inner);
        // Drop lanes whose last turn has finished
        tails.retain(|_, rx| matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        let previous = tails.insert(id, tail);
        LaneTurn {
            previous,
            _done: done,
        }
    }
}

/// Applies mutations optimistically against the task and message stores
pub struct MutationEngine {
    remote: Arc<dyn RemoteDataService>,
    tasks: Arc<EntityStore<Task>>,
    messages: Arc<EntityStore<Message>>,
    notifier: Notifier,
    settings: SyncSettings,
    lanes: WriteLanes,
}

impl MutationEngine {
    pub fn new(
        remote: Arc<dyn RemoteDataService>,
        tasks: Arc<EntityStore<Task>>,
        messages: Arc<EntityStore<Message>>,
        notifier: Notifier,
        settings: SyncSettings,
    ) -> Self {
        MutationEngine {
            remote,
            tasks,
            messages,
            notifier,
            settings,
            lanes: WriteLanes::default(),
        }
    }

    async fn call<T, F>(&self, call: F) -> RemoteResult<T>
    where
        F: Future<Output = RemoteResult<T>>,
    {
        with_timeout(self.settings.remote_timeout, call).await
    }

    /// Creates a task with an immediate placeholder on the board
    ///
    /// # Errors
    ///
    /// Returns the untouched draft with the error so the form can be
    /// refilled. The placeholder is gone by then.
    pub async fn create_task(
        &self,
        session: &SessionContext,
        draft: NewTask,
    ) -> Result<Task, Rejected<NewTask>> {
        let normalized = draft.normalized();
        if let Err(e) = normalized.validate() {
            self.notifier.error(format!("Task not created: {}", e));
            return Err(Rejected::new(draft, SyncError::Invalid(e.to_string())));
        }

        let now = Utc::now();
        let placeholder = Task {
            id: Uuid::new_v4(),
            project_id: normalized.project_id,
            title: normalized.title.clone(),
            description: normalized.description.clone(),
            status: normalized.status,
            priority: normalized.priority,
            due_date: normalized.due_date,
            assignee: normalized.assignee,
            created_by: Some(session.user_id),
            created_at: now,
            updated_at: now,
        };
        let temp_id = placeholder.id;
        self.tasks.insert_provisional(placeholder).await;

        match self.call(self.remote.create_task(session, &normalized)).await {
            Ok(task) => {
                self.tasks.reconcile(temp_id, task.clone()).await;
                tracing::info!(task_id = %task.id, project_id = %task.project_id, "Task created");
                Ok(task)
            }
            Err(e) => {
                self.tasks.remove_local(temp_id).await;
                tracing::warn!(project_id = %normalized.project_id, error = %e, "Task create rejected");
                self.notifier.error(format!("Could not create task: {}", e));
                Err(Rejected::new(
                    draft,
                    SyncError::Mutation {
                        operation: "create_task",
                        entity_id: temp_id,
                        source: e,
                    },
                ))
            }
        }
    }

    /// Moves a task to another column
    ///
    /// Returns the task as it stands after the write settles. Setting the
    /// status a task already has issues no remote write.
    pub async fn update_status(&self, id: Uuid, status: TaskStatus) -> SyncResult<Task> {
        let current = self.task_on_board(id).await?;
        if current.status == status {
            return Ok(current);
        }

        self.write_task(id, "update_status", TaskPatch::status(status))
            .await
    }

    /// Edits task fields, shown immediately and reconciled with the server row
    pub async fn update_fields(&self, id: Uuid, patch: TaskPatch) -> SyncResult<Task> {
        if patch.is_empty() {
            return Err(SyncError::Invalid("nothing to update".to_string()));
        }

        let mut patch = patch;
        if let Some(title) = patch.title.as_mut() {
            *title = title.trim().to_string();
            if title.is_empty() || title.chars().count() > 255 {
                return Err(SyncError::Invalid("title must be 1-255 characters".to_string()));
            }
        }
        if let Some(Some(description)) = patch.description.as_ref() {
            if description.trim().is_empty() {
                patch.description = Some(None);
            }
        }

        self.task_on_board(id).await?;
        self.write_task(id, "update_fields", patch).await
    }

    /// Removes a task from the board and then from the remote service
    pub async fn delete_task(&self, id: Uuid) -> SyncResult<()> {
        self.task_on_board(id).await?;
        self.tasks.remove_local(id).await;

        let mut turn = self.lanes.join(id);
        turn.ready().await;
        match self.call(self.remote.delete_task(id)).await {
            Ok(()) => {
                tracing::info!(task_id = %id, "Task deleted");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "Task delete rejected, resyncing");
                self.notifier
                    .warning(format!("Could not delete task, board reloaded: {}", e));
                self.resync_tasks().await;
                Err(SyncError::Mutation {
                    operation: "delete_task",
                    entity_id: id,
                    source: e,
                })
            }
        }
    }

    /// Posts a chat message with an immediate local copy
    pub async fn send_message(
        &self,
        session: &SessionContext,
        draft: NewMessage,
    ) -> Result<Message, Rejected<NewMessage>> {
        let checked = match draft.checked(self.settings.message_max_len) {
            Ok(checked) => checked,
            Err(reason) => return Err(Rejected::new(draft, SyncError::Invalid(reason))),
        };

        let placeholder = Message {
            id: Uuid::new_v4(),
            project_id: checked.project_id,
            author: session.user_id,
            content: checked.content.clone(),
            created_at: Utc::now(),
            author_profile: None,
        };
        let temp_id = placeholder.id;
        self.messages.insert_provisional(placeholder).await;

        match self.call(self.remote.create_message(session, &checked)).await {
            Ok(message) => {
                self.messages.reconcile(temp_id, message.clone()).await;
                tracing::debug!(message_id = %message.id, project_id = %message.project_id, "Message sent");
                Ok(message)
            }
            Err(e) => {
                self.messages.remove_local(temp_id).await;
                tracing::warn!(project_id = %checked.project_id, error = %e, "Message rejected");
                self.notifier.error(format!("Message not sent: {}", e));
                Err(Rejected::new(
                    draft,
                    SyncError::Mutation {
                        operation: "send_message",
                        entity_id: temp_id,
                        source: e,
                    },
                ))
            }
        }
    }

    /// Reloads the task store from the remote service
    pub async fn resync_tasks(&self) {
        let Some(project_id) = self.tasks.current_project().await else {
            return;
        };
        if let Err(e) = self
            .tasks
            .load(project_id, self.call(self.remote.list_tasks(project_id)))
            .await
        {
            tracing::warn!(project_id = %project_id, error = %e, "Task resync failed");
        }
    }

    async fn task_on_board(&self, id: Uuid) -> SyncResult<Task> {
        self.tasks
            .get(id)
            .await
            .ok_or_else(|| SyncError::Invalid(format!("task {} is not on the board", id)))
    }

    /// Optimistic patch, remote write in the entity's lane, then settle
    async fn write_task(&self, id: Uuid, operation: &'static str, patch: TaskPatch) -> SyncResult<Task> {
        // The lane is joined under the same store lock that issues the ticket
        let mut turn = None;
        let ticket = self
            .tasks
            .begin_write(id, |task| {
                patch.apply_to(task);
                turn = Some(self.lanes.join(id));
            })
            .await;
        let (Some(ticket), Some(mut turn)) = (ticket, turn) else {
            return Err(SyncError::Invalid(format!("task {} is not on the board", id)));
        };

        turn.ready().await;
        let result = self.call(self.remote.update_task(id, &patch)).await;

        match result {
            Ok(task) => {
                if !self.tasks.end_write(id, ticket, Some(task.clone())).await {
                    tracing::debug!(task_id = %id, operation, "Newer local write pending");
                }
                tracing::debug!(task_id = %id, operation, status = %task.status, "Task write confirmed");
                Ok(task)
            }
            Err(e) => {
                self.tasks.end_write(id, ticket, None).await;
                tracing::warn!(task_id = %id, operation, error = %e, "Task write rejected, resyncing");
                self.notifier
                    .warning(format!("Could not save change, board reloaded: {}", e));
                self.resync_tasks().await;
                Err(SyncError::Mutation {
                    operation,
                    entity_id: id,
                    source: e,
                })
            }
        }
    }
}
