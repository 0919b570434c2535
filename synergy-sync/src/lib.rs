//! # SynergySphere Sync Core
//!
//! Keeps a local view of one project's tasks and chat consistent with the
//! remote data service under concurrent edits, drag-and-drop and pushed
//! change notifications.
//!
//! ## Modules
//!
//! - `store`: Entity Store, the in-memory working copy of one collection
//! - `mutation`: Optimistic Mutation Engine (local first, confirm, roll back or resync)
//! - `listener`: Realtime Change Listener merging pushed changes by id
//! - `board`: Board Reducer (status columns, drop resolution, progress)
//! - `view`: `ProjectView`, the facade the presentation layer drives
//! - `remote`: Remote Data Service trait with PostgreSQL and in-memory implementations
//! - `notify`: transient user notifications
//! - `config`, `context`, `error`
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use synergy_sync::{ProjectView, SessionContext, SyncSettings};
//! use synergy_sync::remote::MemoryRemote;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let remote = Arc::new(MemoryRemote::new());
//! let owner = remote.add_profile(None, "owner@example.com");
//! let project = remote.add_project(owner.id, "Launch");
//!
//! let view = ProjectView::new(remote, SessionContext::new(owner.id), SyncSettings::default());
//! view.open(project.id).await?;
//! println!("{} tasks", view.board().await.total());
//! # Ok(())
//! # }
//! ```

pub mod board;
pub mod config;
pub mod context;
pub mod error;
pub mod listener;
pub mod mutation;
pub mod notify;
pub mod remote;
pub mod store;
pub mod view;

pub use config::{SyncConfig, SyncSettings};
pub use context::SessionContext;
pub use error::{Rejected, SyncError, SyncResult};
pub use view::ProjectView;
