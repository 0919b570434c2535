/// Transient user notifications
///
/// Failures at the fetch/mutation boundary end up here as short messages
/// instead of reaching the caller's render path. Each notice expires on its
/// own after the configured TTL and can be dismissed earlier.
///
/// The presentation layer either polls `active()` or follows the broadcast
/// stream from `subscribe()`. Receivers that fall behind get `Lagged` and
/// should re-read `active()`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_BUFFER: usize = 64;

/// Severity of a notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A message shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Notice lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeEvent {
    Shown(Notice),
    Dismissed(u64),
}

struct NotifierInner {
    next_id: AtomicU64,
    active: Mutex<Vec<Notice>>,
    ttl: Duration,
    events: broadcast::Sender<NoticeEvent>,
}

impl NotifierInner {
    fn active(&self) -> MutexGuard<'_, Vec<Notice>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dismiss(&self, id: u64) -> bool {
        let removed = {
            let mut active = self.active();
            let before = active.len();
            active.retain(|n| n.id != id);
            active.len() != before
        };
        if removed {
            let _ = self.events.send(NoticeEvent::Dismissed(id));
        }
        removed
    }
}

/// Queue of active notices, cheap to clone
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

impl Notifier {
    /// Creates a notifier; a zero `ttl` keeps notices until dismissed
    pub fn new(ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Notifier {
            inner: Arc::new(NotifierInner {
                next_id: AtomicU64::new(1),
                active: Mutex::new(Vec::new()),
                ttl,
                events,
            }),
        }
    }

    /// Shows a notice and schedules its expiry
    pub fn push(&self, level: NoticeLevel, message: impl Into<String>) -> u64 {
        let notice = Notice {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            level,
            message: message.into(),
            created_at: Utc::now(),
        };
        let id = notice.id;

        self.inner.active().push(notice.clone());
        let _ = self.inner.events.send(NoticeEvent::Shown(notice));

        if !self.inner.ttl.is_zero() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let inner = Arc::downgrade(&self.inner);
                    let ttl = self.inner.ttl;
                    handle.spawn(async move {
                        tokio::time::sleep(ttl).await;
                        if let Some(inner) = inner.upgrade() {
                            inner.dismiss(id);
                        }
                    });
                }
                Err(_) => tracing::debug!(id = id, "No runtime, notice will not expire"),
            }
        }

        id
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.push(NoticeLevel::Info, message)
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.push(NoticeLevel::Success, message)
    }

    pub fn warning(&self, message: impl Into<String>) -> u64 {
        self.push(NoticeLevel::Warning, message)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.push(NoticeLevel::Error, message)
    }

    /// Removes a notice; `false` if it already expired
    pub fn dismiss(&self, id: u64) -> bool {
        self.inner.dismiss(id)
    }

    /// Notices currently shown, oldest first
    pub fn active(&self) -> Vec<Notice> {
        self.inner.active().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NoticeEvent> {
        self.inner.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_notice_expires_after_ttl() {
        let notifier = Notifier::new(Duration::from_secs(5));
        notifier.error("Could not create task");
        assert_eq!(notifier.active().len(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(notifier.active().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(notifier.active().is_empty());
    }

    #[tokio::test]
    async fn test_dismiss_and_events() {
        let notifier = Notifier::new(Duration::ZERO);
        let mut events = notifier.subscribe();

        let first = notifier.warning("Resyncing board");
        let second = notifier.success("Saved");
        assert_ne!(first, second);

        assert!(notifier.dismiss(first));
        assert!(!notifier.dismiss(first));

        let active = notifier.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].level, NoticeLevel::Success);

        assert!(matches!(events.recv().await.unwrap(), NoticeEvent::Shown(n) if n.id == first));
        assert!(matches!(events.recv().await.unwrap(), NoticeEvent::Shown(n) if n.id == second));
        assert_eq!(events.recv().await.unwrap(), NoticeEvent::Dismissed(first));
    }

    #[test]
    fn test_push_without_runtime() {
        let notifier = Notifier::new(Duration::from_secs(5));
        notifier.info("hello");
        assert_eq!(notifier.active()[0].message, "hello");
    }
}
