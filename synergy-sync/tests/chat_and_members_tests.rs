/// Chat, membership and profile flows through `ProjectView`
///
/// Run with: cargo test -p synergy-sync --test chat_and_members_tests

mod common;

use common::{settle, TestContext};
use std::sync::Arc;
use synergy_shared::models::{NewMessage, NewTask, TaskStatus};
use synergy_sync::notify::NoticeLevel;
use synergy_sync::remote::{RemoteDataService, RemoteOp};
use synergy_sync::{ProjectView, SessionContext, SyncError, SyncSettings};

#[tokio::test]
async fn test_sent_message_appears_once_with_author() {
    let ctx = TestContext::new();
    ctx.view.open(ctx.project.id).await.unwrap();

    let sent = ctx
        .view
        .send_message(NewMessage::new(ctx.project.id, "  Morning all  "))
        .await
        .unwrap();
    settle().await;

    let messages = ctx.view.message_snapshot().await.items;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, sent.id);
    assert_eq!(messages[0].content, "Morning all");
    assert_eq!(messages[0].author_label(), "Ada Lovelace");
}

#[tokio::test]
async fn test_incoming_message_gets_author_profile() {
    let ctx = TestContext::new();
    let grace = ctx.remote.add_profile(Some("Grace Hopper"), "grace@example.com");
    ctx.view
        .add_member(ctx.project.id, grace.id)
        .await
        .unwrap();
    ctx.view.open(ctx.project.id).await.unwrap();

    ctx.remote
        .create_message(&SessionContext::new(grace.id), &NewMessage::new(ctx.project.id, "Hi"))
        .await
        .unwrap();
    settle().await;

    let messages = ctx.view.message_snapshot().await.items;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].author, grace.id);
    assert_eq!(messages[0].author_label(), "Grace Hopper");
}

#[tokio::test]
async fn test_failed_author_lookup_shows_raw_id() {
    let ctx = TestContext::new();
    let grace = ctx.remote.add_profile(None, "grace@example.com");
    ctx.view.open(ctx.project.id).await.unwrap();

    ctx.remote.fail_next(RemoteOp::FindProfile, 1);
    ctx.remote
        .create_message(&SessionContext::new(grace.id), &NewMessage::new(ctx.project.id, "Hi"))
        .await
        .unwrap();
    settle().await;

    let messages = ctx.view.message_snapshot().await.items;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].author_label(), grace.id.to_string());
}

#[tokio::test]
async fn test_failed_send_returns_draft() {
    let ctx = TestContext::new();
    ctx.view.open(ctx.project.id).await.unwrap();
    ctx.remote.fail_next(RemoteOp::CreateMessage, 1);

    let draft = NewMessage::new(ctx.project.id, "Please retry me");
    let rejected = ctx.view.send_message(draft.clone()).await.unwrap_err();

    assert_eq!(rejected.input, draft);
    assert!(ctx.view.message_snapshot().await.items.is_empty());
    assert!(ctx
        .view
        .notifier()
        .active()
        .iter()
        .any(|n| n.level == NoticeLevel::Error));
}

#[tokio::test]
async fn test_overlong_message_is_rejected_locally() {
    let settings = SyncSettings {
        message_max_len: 10,
        ..SyncSettings::default()
    };
    let ctx = TestContext::with_settings(settings);
    ctx.view.open(ctx.project.id).await.unwrap();

    let rejected = ctx
        .view
        .send_message(NewMessage::new(ctx.project.id, "x".repeat(11)))
        .await
        .unwrap_err();

    assert!(matches!(rejected.error, SyncError::Invalid(_)));
    assert_eq!(ctx.remote.calls(RemoteOp::CreateMessage), 0);
}

#[tokio::test]
async fn test_only_owner_adds_members() {
    let ctx = TestContext::new();
    let grace = ctx.remote.add_profile(Some("Grace"), "grace@example.com");
    let linus = ctx.remote.add_profile(Some("Linus"), "linus@example.com");

    ctx.view.add_member(ctx.project.id, grace.id).await.unwrap();
    let members = ctx.view.members(ctx.project.id).await.unwrap();
    assert_eq!(members.len(), 2);

    let grace_view = ProjectView::new(
        ctx.remote.clone(),
        SessionContext::new(grace.id),
        SyncSettings::default(),
    );
    let err = grace_view
        .add_member(ctx.project.id, linus.id)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Remote { operation: "add_member", .. }));
    assert!(grace_view
        .notifier()
        .active()
        .iter()
        .any(|n| n.level == NoticeLevel::Error));

    let duplicate = ctx.view.add_member(ctx.project.id, grace.id).await;
    assert!(duplicate.is_err());
    assert_eq!(ctx.view.members(ctx.project.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_my_tasks_lists_open_assignments() {
    let ctx = TestContext::new();
    let view = Arc::clone(&ctx.view);
    view.open(ctx.project.id).await.unwrap();

    let mut mine = NewTask::new(ctx.project.id, "Mine");
    mine.assignee = Some(ctx.owner.id);
    let mine = view.create_task(mine).await.unwrap();

    let mut finished = NewTask::new(ctx.project.id, "Finished");
    finished.assignee = Some(ctx.owner.id);
    finished.status = TaskStatus::Done;
    view.create_task(finished).await.unwrap();

    view.create_task(NewTask::new(ctx.project.id, "Unassigned"))
        .await
        .unwrap();

    let assigned = view.my_tasks().await.unwrap();
    assert_eq!(assigned.len(), 1);
    assert_eq!(assigned[0].id, mine.id);
    assert_eq!(assigned[0].project_name.as_deref(), Some("Launch"));
}

#[tokio::test]
async fn test_profile_round_trip() {
    let ctx = TestContext::new();

    let profile = ctx.view.profile().await.unwrap().unwrap();
    assert_eq!(profile.email, "ada@example.com");

    ctx.view.update_display_name(Some("Countess")).await.unwrap();
    let profile = ctx.view.profile().await.unwrap().unwrap();
    assert_eq!(profile.name.as_deref(), Some("Countess"));
}
