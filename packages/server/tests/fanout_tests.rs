//! Broker consumers: retry, dead-lettering, exactly-once settlement, push
//! fallback and the presence mirror.

mod common;

use std::time::Duration;

use bytes::Bytes;
use dispatch_core::common::{AuthUser, HelperId, SessionId};
use dispatch_core::domains::fanout::DispatchEvent;
use dispatch_core::domains::presence::{actions as presence, DeviceInfo};
use dispatch_core::domains::tasks::actions::{claim_task, complete_task, run_dispatch, start_task};
use dispatch_core::domains::tasks::Task;
use dispatch_core::kernel::test_dependencies::MockLedgerService;
use dispatch_core::kernel::{BaseBroker, TestDependencies};
use dispatch_core::DispatchConfig;
use test_context::test_context;

use crate::common::{
    helper_identity, requester, seed_helper, submit_task, HelperSeed, TestHarness, HYDERABAD,
    TAP_REPAIR,
};

const COMPLETED_QUEUE: &str = "dispatch-task-completed";
const STATUS_SUBJECT: &str = "dispatch.status.changed";
const STATUS_QUEUE: &str = "dispatch-status-changed";

/// Walk a fresh task from submission to COMPLETED.
async fn completed_task(ctx: &TestHarness, owner: &AuthUser) -> Task {
    let helper = seed_helper(&ctx.deps, HelperSeed::default()).await;
    let user = helper_identity(&helper);
    let task = submit_task(&ctx.deps, owner, HYDERABAD, TAP_REPAIR).await;
    run_dispatch(&ctx.deps, task.id).await.unwrap();
    claim_task(&ctx.deps, &user, task.id).await.unwrap();
    start_task(&ctx.deps, &user, task.id).await.unwrap();
    complete_task(&ctx.deps, &user, task.id).await.unwrap()
}

#[tokio::test]
async fn settlement_survives_transient_ledger_failures() {
    let ctx = TestHarness::new(TestDependencies::new().mock_ledger(MockLedgerService::new().failing(2)));
    ctx.start_consumers().await;

    let task = completed_task(&ctx, &requester()).await;

    assert!(ctx.wait_until(|| ctx.ledger.recorded().len() == 1).await);
    assert_eq!(ctx.ledger.attempts(), 3);
    assert_eq!(ctx.ledger.recorded()[0].task_id, task.id);
    assert_eq!(ctx.ledger.recorded()[0].idempotency_key, task.id.to_string());

    let stats = ctx.deps.consumer_stats.for_queue(COMPLETED_QUEUE).unwrap();
    assert_eq!(stats.nacked, 2);
    assert_eq!(stats.acked, 1);
    assert!(ctx.broker.dead_letters().is_empty());
}

#[tokio::test]
async fn redelivered_completion_settles_once() {
    let ctx = TestHarness::new(TestDependencies::new());
    ctx.start_consumers().await;

    completed_task(&ctx, &requester()).await;
    assert!(ctx.wait_until(|| ctx.ledger.recorded().len() == 1).await);

    // Same event again, as a broker redelivery after a lost ack would do
    let original = ctx.broker.messages_for_subject("dispatch.task.completed")[0].clone();
    ctx.broker
        .publish(&original.subject, original.payload)
        .await
        .unwrap();

    assert!(ctx.wait_until(|| ctx.ledger.attempts() == 2).await);
    assert_eq!(ctx.ledger.recorded().len(), 1);
}

#[tokio::test]
async fn poison_event_is_dead_lettered_after_max_deliver() {
    let config = DispatchConfig {
        broker_max_deliver: 3,
        ..DispatchConfig::default()
    };
    let ctx = TestHarness::new(
        TestDependencies::new()
            .with_config(config)
            .mock_ledger(MockLedgerService::new().failing(100)),
    );
    ctx.start_consumers().await;

    completed_task(&ctx, &requester()).await;

    assert!(ctx.wait_until(|| ctx.broker.dead_letters().len() == 1).await);
    let dead = &ctx.broker.dead_letters()[0];
    assert_eq!(dead.queue, COMPLETED_QUEUE);
    assert_eq!(dead.attempts, 3);
    assert_eq!(ctx.ledger.attempts(), 3);
    assert!(ctx.ledger.recorded().is_empty());
    assert_eq!(ctx.deps.consumer_stats.dead_lettered_total(), 1);
}

#[tokio::test]
async fn malformed_payload_is_terminated_without_retry() {
    let ctx = TestHarness::new(TestDependencies::new());
    ctx.start_consumers().await;

    ctx.broker
        .publish("dispatch.task.started", Bytes::from_static(b"{not json"))
        .await
        .unwrap();

    assert!(ctx.wait_until(|| ctx.broker.dead_letters().len() == 1).await);
    let stats = ctx.deps.consumer_stats.for_queue("dispatch-task-started").unwrap();
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.nacked, 0);
    assert_eq!(ctx.broker.dead_letters()[0].attempts, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn offline_requester_gets_a_push(ctx: &mut TestHarness) {
    ctx.start_consumers().await;
    let owner = requester();

    completed_task(ctx, &owner).await;

    assert!(
        ctx.wait_until(|| ctx
            .push
            .sent_to(owner.user_id)
            .iter()
            .any(|n| n.title == "Task completed"))
            .await
    );
    let push = ctx
        .push
        .sent_to(owner.user_id)
        .into_iter()
        .find(|n| n.title == "Task completed")
        .unwrap();
    assert_eq!(push.data["event"], "task:completed");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn connected_requester_is_not_pushed(ctx: &mut TestHarness) {
    ctx.start_consumers().await;
    let owner = requester();
    presence::connect(&ctx.deps, &owner, SessionId::new(), DeviceInfo::default()).await;

    completed_task(ctx, &owner).await;

    assert!(ctx.wait_until(|| ctx.ledger.recorded().len() == 1).await);
    assert!(ctx.push.sent_to(owner.user_id).is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn helper_presence_is_mirrored_into_the_store(ctx: &mut TestHarness) {
    ctx.start_consumers().await;
    let helper = seed_helper(
        &ctx.deps,
        HelperSeed {
            online: false,
            ..HelperSeed::default()
        },
    )
    .await;
    let user = helper_identity(&helper);
    let session = SessionId::new();

    presence::connect(&ctx.deps, &user, session, DeviceInfo::default()).await;
    assert!(wait_for_online(ctx, helper.id, true).await);

    presence::disconnect(&ctx.deps, user.user_id, session).await;
    assert!(wait_for_online(ctx, helper.id, false).await);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn older_presence_change_redelivered_late_is_ignored(ctx: &mut TestHarness) {
    ctx.start_consumers().await;
    let helper = seed_helper(
        &ctx.deps,
        HelperSeed {
            online: false,
            ..HelperSeed::default()
        },
    )
    .await;
    let user = helper_identity(&helper);

    presence::connect(&ctx.deps, &user, SessionId::new(), DeviceInfo::default()).await;
    assert!(wait_for_online(ctx, helper.id, true).await);

    // An offline change from before the connect, arriving after it
    let online = ctx.broker.messages_for_subject(STATUS_SUBJECT)[0].clone();
    let mut stale: DispatchEvent = serde_json::from_slice(&online.payload).unwrap();
    let earlier = stale.timestamp - chrono::Duration::seconds(30);
    stale.payload["status"] = serde_json::json!("offline");
    stale.payload["at"] = serde_json::to_value(earlier).unwrap();
    stale.timestamp = earlier;
    ctx.broker
        .publish(STATUS_SUBJECT, Bytes::from(serde_json::to_vec(&stale).unwrap()))
        .await
        .unwrap();

    assert!(
        ctx.wait_until(|| ctx
            .deps
            .consumer_stats
            .for_queue(STATUS_QUEUE)
            .map(|s| s.acked >= 2)
            .unwrap_or(false))
            .await
    );
    let stored = ctx.deps.helpers.find_by_id(helper.id).await.unwrap().unwrap();
    assert!(stored.is_online);
}

async fn wait_for_online(ctx: &TestHarness, helper_id: HelperId, online: bool) -> bool {
    for _ in 0..200 {
        let helper = ctx.deps.helpers.find_by_id(helper_id).await.unwrap().unwrap();
        if helper.is_online == online {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
