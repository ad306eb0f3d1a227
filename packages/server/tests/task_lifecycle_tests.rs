//! Task lifecycle integration tests: dispatch, claim, completion, cancel,
//! decline, retry and the stale sweep, all over in-memory stores.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dispatch_core::common::{Actor, DispatchError, TaskStatus};
use dispatch_core::domains::tasks::actions::{
    cancel_task, claim_task, complete_task, decline_task, list_events, resume_pending_dispatches,
    retry_task, run_dispatch, start_task, sweep_stale_tasks,
};
use dispatch_core::domains::tasks::state::{ensure_transition, forced_transition_allowed};
use dispatch_core::domains::tasks::{StatusChange, TaskEvent};
use dispatch_core::kernel::TestDependencies;
use dispatch_core::DispatchConfig;
use test_context::test_context;

use crate::common::{
    admin, helper_identity, orphaned_task, requester, seed_helper, submit_task, HelperSeed,
    TestHarness, HYDERABAD, TAP_REPAIR,
};

// ============================================================================
// Helpers
// ============================================================================

/// Every recorded pair is either a whitelisted edge or a forced cancel, and
/// each event starts where the previous one ended.
fn assert_valid_walk(events: &[TaskEvent]) {
    assert!(!events.is_empty(), "a task always has its creation event");
    assert_eq!(events[0].from_status, None);
    assert_eq!(events[0].to_status, TaskStatus::Created);

    for pair in events.windows(2) {
        let from = pair[1].from_status.expect("only the creation event lacks a from");
        assert_eq!(from, pair[0].to_status, "events must chain");
        let to = pair[1].to_status;
        assert!(
            ensure_transition(from, to).is_ok() || forced_transition_allowed(from, to),
            "{} -> {} is not a legal edge",
            from,
            to
        );
    }
}

fn statuses(events: &[TaskEvent]) -> Vec<TaskStatus> {
    events.iter().map(|e| e.to_status).collect()
}

// ============================================================================
// Dispatch
// ============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn hyderabad_tap_repair_is_dispatched_to_the_only_helper(ctx: &mut TestHarness) {
    let helper = seed_helper(&ctx.deps, HelperSeed::default()).await;
    let owner = requester();

    let task = submit_task(&ctx.deps, &owner, HYDERABAD, TAP_REPAIR).await;
    assert_eq!(task.status, TaskStatus::Created);

    run_dispatch(&ctx.deps, task.id).await.unwrap();

    let task = ctx.deps.tasks.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Dispatched);
    assert_eq!(task.dispatch_candidates.len(), 1);

    let candidate = &task.dispatch_candidates[0];
    assert_eq!(candidate.helper_id, helper.id);
    assert_eq!(candidate.skill_match, 1.0);
    assert!(candidate.score > 0.0);

    let events = list_events(&ctx.deps, &owner, task.id).await.unwrap();
    assert_eq!(
        statuses(&events),
        vec![TaskStatus::Created, TaskStatus::Matching, TaskStatus::Dispatched]
    );
    assert_valid_walk(&events);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn no_helpers_fails_the_task_instead_of_hanging(ctx: &mut TestHarness) {
    let owner = requester();
    let task = submit_task(&ctx.deps, &owner, HYDERABAD, TAP_REPAIR).await;

    run_dispatch(&ctx.deps, task.id).await.unwrap();

    let task = ctx.deps.tasks.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure_reason.as_deref(), Some("no_helpers_available"));

    let events = list_events(&ctx.deps, &owner, task.id).await.unwrap();
    assert_eq!(
        statuses(&events),
        vec![TaskStatus::Created, TaskStatus::Matching, TaskStatus::Failed]
    );
    assert_valid_walk(&events);
    assert_eq!(ctx.broker.publish_count_for("dispatch.task.failed"), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn nearer_ring_is_offered_before_distant_helpers(ctx: &mut TestHarness) {
    let near = seed_helper(&ctx.deps, HelperSeed::at(17.4509, 78.391)).await;
    let farther = seed_helper(&ctx.deps, HelperSeed::at(17.468, 78.391)).await;
    let distant = seed_helper(&ctx.deps, HelperSeed::at(17.9, 78.391)).await;

    let task = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;
    run_dispatch(&ctx.deps, task.id).await.unwrap();

    let task = ctx.deps.tasks.find_by_id(task.id).await.unwrap().unwrap();
    let offered: Vec<_> = task.dispatch_candidates.iter().map(|c| c.helper_id).collect();

    assert!(!offered.contains(&distant.id));
    assert_eq!(offered.first(), Some(&near.id));
    if offered.len() > 1 {
        assert_eq!(offered[1], farther.id);
    }
}

#[tokio::test]
async fn background_pool_dispatches_submitted_tasks() {
    let ctx = TestHarness::new(TestDependencies::new());
    ctx.start_dispatch_workers();
    seed_helper(&ctx.deps, HelperSeed::default()).await;

    let task = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;

    let task = ctx.wait_for_status(task.id, TaskStatus::Dispatched).await;
    assert_eq!(task.dispatch_candidates.len(), 1);
}

#[tokio::test]
async fn saturated_queue_fails_the_task_through_matching() {
    let config = DispatchConfig {
        dispatch_queue_capacity: 1,
        ..DispatchConfig::default()
    };
    let ctx = TestHarness::new(TestDependencies::new().with_config(config));

    submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;
    let overflow = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;

    let task = ctx.deps.tasks.find_by_id(overflow.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure_reason.as_deref(), Some("dispatch_unavailable"));

    let events = ctx.deps.tasks.list_events(overflow.id).await.unwrap();
    assert_eq!(
        statuses(&events),
        vec![TaskStatus::Created, TaskStatus::Matching, TaskStatus::Failed]
    );
    assert_valid_walk(&events);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn unfinished_dispatches_are_resumed_on_startup(ctx: &mut TestHarness) {
    seed_helper(&ctx.deps, HelperSeed::default()).await;
    let owner = requester();

    let queued = orphaned_task(&ctx.deps, &owner, HYDERABAD, TAP_REPAIR).await;
    let mid_match = orphaned_task(&ctx.deps, &owner, HYDERABAD, TAP_REPAIR).await;
    ctx.deps
        .tasks
        .transition(
            mid_match.id,
            StatusChange::new(TaskStatus::Created, TaskStatus::Matching, Actor::System),
        )
        .await
        .unwrap();

    ctx.start_dispatch_workers();
    assert_eq!(resume_pending_dispatches(&ctx.deps).await.unwrap(), 2);

    for task_id in [queued.id, mid_match.id] {
        let task = ctx.wait_for_status(task_id, TaskStatus::Dispatched).await;
        assert_eq!(task.dispatch_candidates.len(), 1);
        assert_valid_walk(&ctx.deps.tasks.list_events(task_id).await.unwrap());
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn repeated_dispatch_of_the_same_task_is_harmless(ctx: &mut TestHarness) {
    seed_helper(&ctx.deps, HelperSeed::default()).await;
    let task = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;

    run_dispatch(&ctx.deps, task.id).await.unwrap();
    run_dispatch(&ctx.deps, task.id).await.unwrap();

    let events = ctx.deps.tasks.list_events(task.id).await.unwrap();
    assert_eq!(
        statuses(&events),
        vec![TaskStatus::Created, TaskStatus::Matching, TaskStatus::Dispatched]
    );
}

// ============================================================================
// Claim
// ============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn concurrent_claims_have_exactly_one_winner(ctx: &mut TestHarness) {
    let mut helpers = Vec::new();
    for _ in 0..8 {
        helpers.push(seed_helper(&ctx.deps, HelperSeed::default()).await);
    }
    let task = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;
    run_dispatch(&ctx.deps, task.id).await.unwrap();

    let deps = Arc::new(ctx.deps.clone());
    let handles: Vec<_> = helpers
        .iter()
        .map(|helper| {
            let deps = deps.clone();
            let user = helper_identity(helper);
            let task_id = task.id;
            tokio::spawn(async move { claim_task(&deps, &user, task_id).await })
        })
        .collect();

    let mut winners = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(DispatchError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected claim error: {:?}", other),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(conflicts, helpers.len() - 1);

    // Losers were released and are free for other work
    let task = ctx.deps.tasks.find_by_id(task.id).await.unwrap().unwrap();
    let winner_id = task.helper_id.unwrap();
    for helper in &helpers {
        let stored = ctx.deps.helpers.find_by_id(helper.id).await.unwrap().unwrap();
        if helper.id == winner_id {
            assert_eq!(stored.current_task_id, Some(task.id));
        } else {
            assert!(stored.current_task_id.is_none());
        }
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn occupied_helper_cannot_claim_a_second_task(ctx: &mut TestHarness) {
    let helper = seed_helper(&ctx.deps, HelperSeed::default()).await;
    let user = helper_identity(&helper);

    let first = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;
    let second = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;
    run_dispatch(&ctx.deps, first.id).await.unwrap();
    run_dispatch(&ctx.deps, second.id).await.unwrap();

    claim_task(&ctx.deps, &user, first.id).await.unwrap();
    let err = claim_task(&ctx.deps, &user, second.id).await.unwrap_err();
    assert!(matches!(err, DispatchError::Conflict(_)));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn unverified_helper_cannot_claim(ctx: &mut TestHarness) {
    seed_helper(&ctx.deps, HelperSeed::default()).await;
    let pending = seed_helper(
        &ctx.deps,
        HelperSeed {
            verification: dispatch_core::domains::helpers::VerificationStatus::Pending,
            ..HelperSeed::default()
        },
    )
    .await;

    let task = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;
    run_dispatch(&ctx.deps, task.id).await.unwrap();

    let err = claim_task(&ctx.deps, &helper_identity(&pending), task.id)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Forbidden(_)));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn requester_cannot_claim(ctx: &mut TestHarness) {
    seed_helper(&ctx.deps, HelperSeed::default()).await;
    let owner = requester();
    let task = submit_task(&ctx.deps, &owner, HYDERABAD, TAP_REPAIR).await;
    run_dispatch(&ctx.deps, task.id).await.unwrap();

    let err = claim_task(&ctx.deps, &owner, task.id).await.unwrap_err();
    assert!(matches!(err, DispatchError::Forbidden(_)));
}

// ============================================================================
// Start / complete
// ============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn full_lifecycle_frees_the_helper_and_records_a_valid_walk(ctx: &mut TestHarness) {
    let helper = seed_helper(&ctx.deps, HelperSeed::default()).await;
    let user = helper_identity(&helper);
    let owner = requester();

    let task = submit_task(&ctx.deps, &owner, HYDERABAD, TAP_REPAIR).await;
    run_dispatch(&ctx.deps, task.id).await.unwrap();

    let accepted = claim_task(&ctx.deps, &user, task.id).await.unwrap();
    assert_eq!(accepted.status, TaskStatus::Accepted);
    assert_eq!(accepted.helper_id, Some(helper.id));
    assert!(ctx.deps.location.destination(task.id).is_some());

    let started = start_task(&ctx.deps, &user, task.id).await.unwrap();
    assert_eq!(started.status, TaskStatus::InProgress);
    assert!(started.started_at.is_some());

    let completed = complete_task(&ctx.deps, &user, task.id).await.unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
    assert!(completed.finished_at.is_some());

    let stored = ctx.deps.helpers.find_by_id(helper.id).await.unwrap().unwrap();
    assert!(stored.current_task_id.is_none());
    assert_eq!(stored.completed_task_count, helper.completed_task_count + 1);
    assert!(ctx.deps.location.destination(task.id).is_none());

    let events = list_events(&ctx.deps, &owner, task.id).await.unwrap();
    assert_eq!(
        statuses(&events),
        vec![
            TaskStatus::Created,
            TaskStatus::Matching,
            TaskStatus::Dispatched,
            TaskStatus::Accepted,
            TaskStatus::InProgress,
            TaskStatus::Completed,
        ]
    );
    assert_valid_walk(&events);
    assert_eq!(ctx.broker.publish_count_for("dispatch.task.completed"), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn only_the_assigned_helper_may_complete(ctx: &mut TestHarness) {
    let assigned = seed_helper(&ctx.deps, HelperSeed::default()).await;
    let other = seed_helper(&ctx.deps, HelperSeed::default()).await;

    let task = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;
    run_dispatch(&ctx.deps, task.id).await.unwrap();
    claim_task(&ctx.deps, &helper_identity(&assigned), task.id)
        .await
        .unwrap();
    start_task(&ctx.deps, &helper_identity(&assigned), task.id)
        .await
        .unwrap();

    let err = complete_task(&ctx.deps, &helper_identity(&other), task.id)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Forbidden(_)));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn completing_before_starting_is_an_invalid_transition(ctx: &mut TestHarness) {
    let helper = seed_helper(&ctx.deps, HelperSeed::default()).await;
    let user = helper_identity(&helper);

    let task = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;
    run_dispatch(&ctx.deps, task.id).await.unwrap();
    claim_task(&ctx.deps, &user, task.id).await.unwrap();

    let err = complete_task(&ctx.deps, &user, task.id).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::InvalidTransition {
            from: TaskStatus::Accepted,
            to: TaskStatus::Completed
        }
    ));
}

// ============================================================================
// Cancel
// ============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn cancel_releases_the_helper(ctx: &mut TestHarness) {
    let helper = seed_helper(&ctx.deps, HelperSeed::default()).await;
    let owner = requester();

    let task = submit_task(&ctx.deps, &owner, HYDERABAD, TAP_REPAIR).await;
    run_dispatch(&ctx.deps, task.id).await.unwrap();
    claim_task(&ctx.deps, &helper_identity(&helper), task.id)
        .await
        .unwrap();

    let cancelled = cancel_task(&ctx.deps, &owner, task.id, Some("changed my mind".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.helper_id.is_none());
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("changed my mind"));
    assert_eq!(cancelled.cancelled_by, Some(owner.user_id));

    let stored = ctx.deps.helpers.find_by_id(helper.id).await.unwrap().unwrap();
    assert!(stored.current_task_id.is_none());

    let events = list_events(&ctx.deps, &owner, task.id).await.unwrap();
    assert_valid_walk(&events);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn strangers_cannot_cancel_but_admins_can(ctx: &mut TestHarness) {
    let task = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;

    let err = cancel_task(&ctx.deps, &requester(), task.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Forbidden(_)));

    let cancelled = cancel_task(&ctx.deps, &admin(), task.id, None).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    let err = cancel_task(&ctx.deps, &admin(), task.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidTransition { .. }));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn cancelled_while_queued_is_left_alone_by_matching(ctx: &mut TestHarness) {
    seed_helper(&ctx.deps, HelperSeed::default()).await;
    let owner = requester();
    let task = submit_task(&ctx.deps, &owner, HYDERABAD, TAP_REPAIR).await;

    cancel_task(&ctx.deps, &owner, task.id, None).await.unwrap();
    run_dispatch(&ctx.deps, task.id).await.unwrap();

    let task = ctx.deps.tasks.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
}

// ============================================================================
// Decline / retry
// ============================================================================

#[test_context(TestHarness)]
#[tokio::test]
async fn task_fails_once_every_candidate_declines(ctx: &mut TestHarness) {
    let first = seed_helper(&ctx.deps, HelperSeed::default()).await;
    let second = seed_helper(&ctx.deps, HelperSeed::default()).await;

    let task = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;
    run_dispatch(&ctx.deps, task.id).await.unwrap();

    let after_first = decline_task(&ctx.deps, &helper_identity(&first), task.id)
        .await
        .unwrap();
    assert_eq!(after_first.status, TaskStatus::Dispatched);

    // Declining twice is harmless
    decline_task(&ctx.deps, &helper_identity(&first), task.id)
        .await
        .unwrap();

    let after_second = decline_task(&ctx.deps, &helper_identity(&second), task.id)
        .await
        .unwrap();
    assert_eq!(after_second.status, TaskStatus::Failed);
    assert_eq!(
        after_second.failure_reason.as_deref(),
        Some("all_candidates_declined")
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn helper_not_offered_cannot_decline(ctx: &mut TestHarness) {
    seed_helper(&ctx.deps, HelperSeed::default()).await;
    let outsider = seed_helper(&ctx.deps, HelperSeed::at(17.9, 78.391)).await;

    let task = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;
    run_dispatch(&ctx.deps, task.id).await.unwrap();

    let err = decline_task(&ctx.deps, &helper_identity(&outsider), task.id)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Forbidden(_)));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn failed_task_can_be_retried_once_helpers_appear(ctx: &mut TestHarness) {
    let owner = requester();
    let task = submit_task(&ctx.deps, &owner, HYDERABAD, TAP_REPAIR).await;
    run_dispatch(&ctx.deps, task.id).await.unwrap();

    seed_helper(&ctx.deps, HelperSeed::default()).await;

    let retried = retry_task(&ctx.deps, &owner, task.id).await.unwrap();
    assert_eq!(retried.status, TaskStatus::Matching);

    run_dispatch(&ctx.deps, task.id).await.unwrap();
    let task = ctx.deps.tasks.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Dispatched);

    let events = list_events(&ctx.deps, &owner, task.id).await.unwrap();
    assert_eq!(
        statuses(&events),
        vec![
            TaskStatus::Created,
            TaskStatus::Matching,
            TaskStatus::Failed,
            TaskStatus::Matching,
            TaskStatus::Dispatched,
        ]
    );
    assert_valid_walk(&events);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn retry_is_rejected_outside_failed(ctx: &mut TestHarness) {
    let owner = requester();
    let task = submit_task(&ctx.deps, &owner, HYDERABAD, TAP_REPAIR).await;

    let err = retry_task(&ctx.deps, &owner, task.id).await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidTransition { .. }));
}

// ============================================================================
// Stale sweep
// ============================================================================

#[tokio::test]
async fn stale_dispatch_is_timed_out() {
    let config = DispatchConfig {
        task_dispatch_timeout: Some(Duration::from_secs(60)),
        ..DispatchConfig::default()
    };
    let ctx = TestHarness::new(TestDependencies::new().with_config(config));
    seed_helper(&ctx.deps, HelperSeed::default()).await;

    let stale = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;
    let fresh = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;
    run_dispatch(&ctx.deps, stale.id).await.unwrap();
    run_dispatch(&ctx.deps, fresh.id).await.unwrap();

    ctx.tasks
        .set_updated_at(stale.id, Utc::now() - chrono::Duration::minutes(5));

    assert_eq!(sweep_stale_tasks(&ctx.deps).await.unwrap(), 1);

    let stale = ctx.deps.tasks.find_by_id(stale.id).await.unwrap().unwrap();
    assert_eq!(stale.status, TaskStatus::Failed);
    assert_eq!(stale.failure_reason.as_deref(), Some("dispatch_timeout"));

    let fresh = ctx.deps.tasks.find_by_id(fresh.id).await.unwrap().unwrap();
    assert_eq!(fresh.status, TaskStatus::Dispatched);
}

#[tokio::test]
async fn task_never_picked_up_is_timed_out() {
    let config = DispatchConfig {
        task_dispatch_timeout: Some(Duration::from_secs(60)),
        ..DispatchConfig::default()
    };
    let ctx = TestHarness::new(TestDependencies::new().with_config(config));

    let orphan = orphaned_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;
    ctx.tasks
        .set_updated_at(orphan.id, Utc::now() - chrono::Duration::minutes(5));

    assert_eq!(sweep_stale_tasks(&ctx.deps).await.unwrap(), 1);

    let task = ctx.deps.tasks.find_by_id(orphan.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure_reason.as_deref(), Some("dispatch_timeout"));

    let events = ctx.deps.tasks.list_events(orphan.id).await.unwrap();
    assert_eq!(
        statuses(&events),
        vec![TaskStatus::Created, TaskStatus::Matching, TaskStatus::Failed]
    );
    assert_valid_walk(&events);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn sweep_is_disabled_without_a_timeout(ctx: &mut TestHarness) {
    let task = submit_task(&ctx.deps, &requester(), HYDERABAD, TAP_REPAIR).await;
    ctx.tasks
        .set_updated_at(task.id, Utc::now() - chrono::Duration::days(1));

    assert_eq!(sweep_stale_tasks(&ctx.deps).await.unwrap(), 0);
}
