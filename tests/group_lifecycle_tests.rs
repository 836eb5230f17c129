// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Group lifecycle tests: activation, reconciliation, countdowns, realtime
//! filtering, join and admin actions.

use chrono::{TimeDelta, Utc};
use hadal_hub::backend::RealtimeEvent;
use hadal_hub::models::{
    AdminAction, AdminRole, EnglishLevel, GroupChange, GroupRow, GroupStatus, NoticeKind,
};
use hadal_hub::services::{
    AdminOutcome, GroupLifecycleController, GroupTimings, JoinOutcome, ReconcileTrigger, Viewer,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{count, scheduled_group, test_group, test_profile, MockBackend, ScriptedConfirmer};

fn viewer(level: EnglishLevel, role: Option<AdminRole>) -> Viewer {
    Viewer {
        user_id: "user-1".to_string(),
        level,
        role,
    }
}

fn controller(mock: &Arc<MockBackend>, viewer: Viewer) -> Arc<GroupLifecycleController> {
    GroupLifecycleController::new(
        mock.clone(),
        Some(mock.clone()),
        viewer,
        GroupTimings::default(),
    )
}

fn row(id: &str, level: EnglishLevel, status: GroupStatus) -> GroupRow {
    GroupRow {
        id: Some(id.to_string()),
        level: Some(level),
        status: Some(status),
    }
}

#[tokio::test]
async fn test_due_scheduled_group_becomes_active() {
    let mock = MockBackend::new();
    mock.insert_group(scheduled_group(
        "g1",
        EnglishLevel::Beginner,
        Utc::now() - TimeDelta::seconds(1),
    ));
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, None));

    groups.request_reconciliation(ReconcileTrigger::Initial).await;
    assert_eq!(groups.board().groups[0].status, GroupStatus::Scheduled);

    groups.poll_activation().await;
    let board = groups.board();
    assert_eq!(board.groups.len(), 1);
    assert_eq!(board.groups[0].id, "g1");
    assert_eq!(board.groups[0].status, GroupStatus::Active);
    assert!(board.last_refreshed.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_countdown_and_poll_share_one_activation() {
    let mock = MockBackend::new();
    mock.insert_group(scheduled_group(
        "g1",
        EnglishLevel::Beginner,
        Utc::now() - TimeDelta::seconds(1),
    ));
    mock.insert_group(scheduled_group(
        "g2",
        EnglishLevel::Beginner,
        Utc::now() + TimeDelta::hours(1),
    ));
    *mock.activate_delay.lock() = Duration::from_millis(500);
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, None));

    tokio::join!(groups.poll_activation(), groups.on_countdown_complete("g1"));

    assert_eq!(count(&mock.calls.activate), 1);
    assert_eq!(mock.group("g1").unwrap().status, GroupStatus::Active);
    assert_eq!(mock.group("g2").unwrap().status, GroupStatus::Scheduled);
    let board = groups.board();
    let g1 = board.groups.iter().find(|g| g.id == "g1").unwrap();
    assert_eq!(g1.status, GroupStatus::Active);

    // Once idle, the next poll activates again
    groups.poll_activation().await;
    assert_eq!(count(&mock.calls.activate), 2);
}

#[tokio::test]
async fn test_fetch_filter_follows_viewer_level() {
    let mock = MockBackend::new();
    mock.insert_group(test_group("b1", EnglishLevel::Beginner, GroupStatus::Waiting));
    mock.insert_group(test_group("a1", EnglishLevel::Advanced, GroupStatus::Active));
    mock.insert_group(test_group("c1", EnglishLevel::Beginner, GroupStatus::Closed));

    let learner = controller(&mock, viewer(EnglishLevel::Beginner, None));
    learner.request_reconciliation(ReconcileTrigger::Initial).await;
    let ids: Vec<_> = learner.board().groups.into_iter().map(|g| g.id).collect();
    assert_eq!(ids, vec!["b1".to_string()]);
    let filter = mock.last_filter.lock().clone().unwrap();
    assert_eq!(filter.level, Some(EnglishLevel::Beginner));
    assert!(!filter.statuses.contains(&GroupStatus::Closed));

    let admin = controller(&mock, viewer(EnglishLevel::Beginner, Some(AdminRole::Admin)));
    admin.request_reconciliation(ReconcileTrigger::Initial).await;
    assert_eq!(admin.board().groups.len(), 2);
    assert_eq!(mock.last_filter.lock().clone().unwrap().level, None);
}

#[tokio::test]
async fn test_other_level_realtime_update_is_ignored() {
    let mock = MockBackend::new();
    mock.insert_group(test_group("b1", EnglishLevel::Beginner, GroupStatus::Waiting));
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, None));
    groups.request_reconciliation(ReconcileTrigger::Initial).await;
    let before = groups.board().groups;
    let fetches = count(&mock.calls.fetch_groups);

    let handled = groups
        .handle_change(GroupChange::Update {
            old: row("a1", EnglishLevel::Advanced, GroupStatus::Waiting),
            new: row("a1", EnglishLevel::Advanced, GroupStatus::Active),
        })
        .await;

    assert!(!handled);
    assert_eq!(count(&mock.calls.fetch_groups), fetches);
    assert_eq!(groups.board().groups, before);
}

#[tokio::test]
async fn test_group_moving_out_of_level_is_reconciled() {
    let mock = MockBackend::new();
    mock.insert_group(test_group("b1", EnglishLevel::Beginner, GroupStatus::Waiting));
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, None));
    groups.request_reconciliation(ReconcileTrigger::Initial).await;
    assert_eq!(groups.board().groups.len(), 1);

    mock.update_group("b1", |g| g.level = EnglishLevel::Advanced);
    let handled = groups
        .handle_change(GroupChange::Update {
            old: row("b1", EnglishLevel::Beginner, GroupStatus::Waiting),
            new: row("b1", EnglishLevel::Advanced, GroupStatus::Waiting),
        })
        .await;

    assert!(handled, "Old level matches the viewer, so the change applies");
    assert!(groups.board().groups.is_empty());
}

#[tokio::test]
async fn test_relevant_changes_trigger_reconciliation() {
    let mock = MockBackend::new();
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, None));

    assert!(
        groups
            .handle_change(GroupChange::Update {
                old: row("b1", EnglishLevel::Beginner, GroupStatus::Waiting),
                new: row("b1", EnglishLevel::Beginner, GroupStatus::Active),
            })
            .await
    );
    assert!(
        !groups
            .handle_change(GroupChange::Update {
                old: row("b1", EnglishLevel::Beginner, GroupStatus::Active),
                new: row("b1", EnglishLevel::Beginner, GroupStatus::Active),
            })
            .await,
        "Updates without a status change are ignored"
    );
    assert!(
        groups
            .handle_change(GroupChange::Insert(row(
                "b2",
                EnglishLevel::Beginner,
                GroupStatus::Waiting
            )))
            .await
    );
    // Key-only delete carries no level and is always applied
    assert!(
        groups
            .handle_change(GroupChange::Delete {
                old: GroupRow {
                    id: Some("a9".to_string()),
                    ..GroupRow::default()
                },
            })
            .await
    );
    assert_eq!(count(&mock.calls.fetch_groups), 3);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_reconciliations_are_coalesced() {
    let mock = MockBackend::new();
    *mock.fetch_delay.lock() = Duration::from_secs(1);
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, None));

    let (first, second, third) = tokio::join!(
        groups.request_reconciliation(ReconcileTrigger::Poll),
        groups.request_reconciliation(ReconcileTrigger::Realtime),
        groups.request_reconciliation(ReconcileTrigger::Countdown),
    );

    assert!(first);
    assert!(!second);
    assert!(!third);
    assert_eq!(count(&mock.calls.fetch_groups), 2);

    // Idle again: the next request fetches directly
    assert!(groups.request_reconciliation(ReconcileTrigger::Poll).await);
    assert_eq!(count(&mock.calls.fetch_groups), 3);
}

#[tokio::test]
async fn test_countdown_fires_once() {
    let mock = MockBackend::new();
    let start = Utc::now();
    mock.insert_group(scheduled_group(
        "s1",
        EnglishLevel::Beginner,
        start + TimeDelta::seconds(2),
    ));
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, None));
    groups.request_reconciliation(ReconcileTrigger::Initial).await;

    assert!(groups.tick_countdowns(start).is_empty());
    assert_eq!(
        groups.countdown_label("s1", start).as_deref(),
        Some("00:02")
    );
    assert_eq!(
        groups.tick_countdowns(start + TimeDelta::seconds(2)),
        vec!["s1".to_string()]
    );
    assert!(groups.tick_countdowns(start + TimeDelta::seconds(3)).is_empty());
    assert!(groups.tick_countdowns(start + TimeDelta::seconds(4)).is_empty());
}

#[tokio::test]
async fn test_countdown_completion_activates_and_drops_countdown() {
    let mock = MockBackend::new();
    mock.insert_group(scheduled_group(
        "s1",
        EnglishLevel::Beginner,
        Utc::now() - TimeDelta::milliseconds(10),
    ));
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, None));
    groups.request_reconciliation(ReconcileTrigger::Initial).await;
    assert!(groups.countdown_label("s1", Utc::now()).is_some());

    groups.on_countdown_complete("s1").await;
    assert_eq!(groups.board().groups[0].status, GroupStatus::Active);
    assert!(groups.countdown_label("s1", Utc::now()).is_none());
}

#[tokio::test]
async fn test_fetch_failure_keeps_board_and_sets_sync_error() {
    let mock = MockBackend::new();
    mock.insert_group(test_group("b1", EnglishLevel::Beginner, GroupStatus::Waiting));
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, None));
    groups.request_reconciliation(ReconcileTrigger::Initial).await;

    mock.fail_fetch_groups.store(true, Ordering::SeqCst);
    groups.request_reconciliation(ReconcileTrigger::Poll).await;
    let board = groups.board();
    assert_eq!(board.groups.len(), 1);
    assert!(board.sync_error.is_some());

    mock.fail_fetch_groups.store(false, Ordering::SeqCst);
    groups.request_reconciliation(ReconcileTrigger::Poll).await;
    assert!(groups.board().sync_error.is_none());
}

#[tokio::test]
async fn test_join_requires_confirmation() {
    let mock = MockBackend::new();
    mock.insert_group(test_group("b1", EnglishLevel::Beginner, GroupStatus::Waiting));
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, None));
    groups.request_reconciliation(ReconcileTrigger::Initial).await;

    let decline = ScriptedConfirmer::decline();
    assert_eq!(groups.join_group("b1", &decline).await, JoinOutcome::Cancelled);
    assert_eq!(count(&mock.calls.join_group), 0);

    let accept = ScriptedConfirmer::accept();
    let outcome = groups.join_group("b1", &accept).await;
    let JoinOutcome::Entered(route) = outcome else {
        panic!("expected to enter the chat, got {outcome:?}");
    };
    assert_eq!(route.path(), "/debate/b1");
    assert!(accept.prompts.lock()[0]
        .message
        .contains("Should homework be banned?"));
    assert!(groups.board().groups[0].has_participant("user-1"));

    // Already a participant: straight in, no prompt
    let again = ScriptedConfirmer::accept();
    assert!(matches!(
        groups.join_group("b1", &again).await,
        JoinOutcome::Entered(_)
    ));
    assert_eq!(again.prompt_count(), 0);
}

#[tokio::test]
async fn test_join_refused_when_full() {
    let mock = MockBackend::new();
    let mut group = test_group("b1", EnglishLevel::Beginner, GroupStatus::Active);
    group.max_participants = 1;
    group.participants.insert("someone-else".to_string());
    mock.insert_group(group);
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, None));
    groups.request_reconciliation(ReconcileTrigger::Initial).await;
    let fetches = count(&mock.calls.fetch_groups);

    let outcome = groups.join_group("b1", &ScriptedConfirmer::accept()).await;
    let JoinOutcome::Failed(notice) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(notice.kind, NoticeKind::Error);
    assert_eq!(groups.board().notice, Some(notice));
    assert_eq!(count(&mock.calls.fetch_groups), fetches);

    groups.dismiss_notice();
    assert!(groups.board().notice.is_none());
}

#[tokio::test]
async fn test_join_network_error_is_retryable() {
    let mock = MockBackend::new();
    mock.insert_group(test_group("b1", EnglishLevel::Beginner, GroupStatus::Waiting));
    mock.fail_join.store(true, Ordering::SeqCst);
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, None));
    groups.request_reconciliation(ReconcileTrigger::Initial).await;

    let outcome = groups.join_group("b1", &ScriptedConfirmer::accept()).await;
    assert!(matches!(outcome, JoinOutcome::Failed(notice) if notice.retryable));
}

#[tokio::test]
async fn test_admin_role_lookup_fails_closed() {
    let mock = MockBackend::new();
    mock.set_admin_role("user-1", AdminRole::SuperAdmin);
    mock.fail_admin_role.store(true, Ordering::SeqCst);
    mock.insert_group(test_group("b1", EnglishLevel::Beginner, GroupStatus::Active));

    let profile = test_profile("user-1", EnglishLevel::Beginner);
    let resolved = Viewer::resolve(&profile, mock.as_ref()).await;
    assert_eq!(resolved.role, None);

    let groups = controller(&mock, resolved);
    let confirmer = ScriptedConfirmer::accept();
    let outcome = groups
        .admin_action("b1", AdminAction::Close, &confirmer)
        .await;
    assert!(matches!(outcome, AdminOutcome::Denied(_)));
    assert_eq!(confirmer.prompt_count(), 0);
    assert_eq!(count(&mock.calls.admin_manage), 0);
}

#[tokio::test]
async fn test_admin_role_resolves_when_lookup_succeeds() {
    let mock = MockBackend::new();
    mock.set_admin_role("user-1", AdminRole::Moderator);
    let profile = test_profile("user-1", EnglishLevel::Advanced);

    let resolved = Viewer::resolve(&profile, mock.as_ref()).await;
    assert_eq!(resolved.role, Some(AdminRole::Moderator));
    assert_eq!(resolved.level, EnglishLevel::Advanced);
}

#[tokio::test]
async fn test_moderator_cannot_delete() {
    let mock = MockBackend::new();
    mock.insert_group(test_group("b1", EnglishLevel::Beginner, GroupStatus::Active));
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, Some(AdminRole::Moderator)));

    let outcome = groups
        .admin_action("b1", AdminAction::Delete, &ScriptedConfirmer::accept())
        .await;
    assert!(matches!(outcome, AdminOutcome::Denied(_)));
    assert!(mock.group("b1").is_some());
}

#[tokio::test]
async fn test_admin_delete_is_confirmed_as_irreversible() {
    let mock = MockBackend::new();
    mock.insert_group(test_group("b1", EnglishLevel::Intermediate, GroupStatus::Active));
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, Some(AdminRole::Admin)));
    groups.request_reconciliation(ReconcileTrigger::Initial).await;
    assert_eq!(groups.board().groups.len(), 1);

    let decline = ScriptedConfirmer::decline();
    assert_eq!(
        groups.admin_action("b1", AdminAction::Delete, &decline).await,
        AdminOutcome::Cancelled
    );
    let prompt = decline.prompts.lock()[0].clone();
    assert!(prompt.destructive);
    assert!(prompt.message.contains("cannot be undone"));
    assert!(prompt.message.contains("Debate b1"));
    assert_eq!(count(&mock.calls.admin_manage), 0);

    let outcome = groups
        .admin_action("b1", AdminAction::Delete, &ScriptedConfirmer::accept())
        .await;
    assert_eq!(outcome, AdminOutcome::Completed("Group deleted".to_string()));
    assert_eq!(count(&mock.calls.admin_manage), 1);
    assert!(groups.board().groups.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_realtime_changes_and_resubscribe() {
    let mock = MockBackend::new();
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, None));
    let task = tokio::spawn(groups.clone().run_realtime());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(count(&mock.calls.subscribe_groups), 1);
    assert_eq!(count(&mock.calls.fetch_groups), 1, "Catch-up fetch after subscribing");

    assert!(
        mock.push_realtime(RealtimeEvent::Change(GroupChange::Insert(row(
            "b1",
            EnglishLevel::Beginner,
            GroupStatus::Waiting
        ))))
        .await
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(count(&mock.calls.fetch_groups), 2);

    mock.push_realtime(RealtimeEvent::Closed("server restart".to_string()))
        .await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(count(&mock.calls.subscribe_groups), 2);
    assert_eq!(count(&mock.calls.fetch_groups), 3);

    task.abort();
}

#[tokio::test(start_paused = true)]
async fn test_realtime_gives_up_after_repeated_failures() {
    let mock = MockBackend::new();
    mock.fail_subscribe_groups.store(true, Ordering::SeqCst);
    let groups = controller(&mock, viewer(EnglishLevel::Beginner, None));

    let started = tokio::time::Instant::now();
    groups.clone().run_realtime().await;

    // One initial attempt plus ten retries: 1+2+4+8+16+30*5 seconds of waiting
    assert_eq!(count(&mock.calls.subscribe_groups), 11);
    assert!(started.elapsed() >= Duration::from_secs(181));
    let notice = groups.board().notice.expect("paused notice");
    assert_eq!(notice.kind, NoticeKind::Info);
}

#[tokio::test(start_paused = true)]
async fn test_started_tasks_poll_until_shutdown() {
    let mock = MockBackend::new();
    mock.insert_group(scheduled_group(
        "s1",
        EnglishLevel::Beginner,
        Utc::now() - TimeDelta::seconds(1),
    ));
    let groups = GroupLifecycleController::new(
        mock.clone(),
        None,
        viewer(EnglishLevel::Beginner, None),
        GroupTimings::default(),
    );

    let tasks = groups.clone().start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(count(&mock.calls.activate) >= 1);
    assert_eq!(groups.board().groups[0].status, GroupStatus::Active);

    tasks.shutdown();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let polls = count(&mock.calls.activate);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(count(&mock.calls.activate), polls);
}
