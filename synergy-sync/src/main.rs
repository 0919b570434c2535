//! # SynergySphere Sync
//!
//! Opens one project against PostgreSQL and Redis and logs the board as it
//! changes, live updates included.
//!
//! ## Usage
//!
//! ```bash
//! SYNERGY_USER_ID=... SYNERGY_PROJECT_ID=... cargo run -p synergy-sync
//! ```

use anyhow::Context;
use std::env;
use std::sync::Arc;
use synergy_shared::db::migrations::{ensure_database_exists, run_migrations};
use synergy_shared::db::pool::{close_pool, create_pool};
use synergy_shared::models::TaskStatus;
use synergy_shared::redis::RedisClient;
use synergy_sync::notify::NoticeEvent;
use synergy_sync::remote::PgRemote;
use synergy_sync::{ProjectView, SessionContext, SyncConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

fn uuid_var(name: &str) -> anyhow::Result<Uuid> {
    let value = env::var(name).with_context(|| format!("{} environment variable is required", name))?;
    Uuid::parse_str(&value).with_context(|| format!("{} must be a UUID", name))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "synergy_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("SynergySphere sync v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = SyncConfig::from_env()?;
    let user_id = uuid_var("SYNERGY_USER_ID")?;
    let project_id = uuid_var("SYNERGY_PROJECT_ID")?;

    ensure_database_exists(&config.database.url).await?;
    let pool = create_pool(config.database.clone()).await?;
    run_migrations(&pool).await?;
    let redis = RedisClient::new(config.redis.clone()).await?;

    let remote = Arc::new(PgRemote::new(pool.clone(), redis));
    let view = ProjectView::new(remote, SessionContext::new(user_id), config.settings);

    if let Err(e) = view.open(project_id).await {
        tracing::warn!(project_id = %project_id, error = %e, "Initial load failed");
    }

    let mut board_changes = view.watch_tasks();
    let mut notices = view.notifier().subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received, exiting...");
                break;
            }
            changed = board_changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let board = view.board().await;
                let progress = board.progress();
                tracing::info!(
                    todo = board.count(TaskStatus::Todo),
                    in_progress = board.count(TaskStatus::InProgress),
                    done = board.count(TaskStatus::Done),
                    percent = progress.percent(),
                    phase = %progress.phase(),
                    connection = ?view.connection_state().await,
                    "Board updated"
                );
            }
            notice = notices.recv() => {
                if let Ok(NoticeEvent::Shown(notice)) = notice {
                    tracing::info!(level = ?notice.level, message = %notice.message, "Notice");
                }
            }
        }
    }

    view.close().await;
    close_pool(pool).await;

    Ok(())
}
