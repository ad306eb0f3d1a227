//! Presence actions and the `status:changed` events they publish.

mod common;

use dispatch_core::common::SessionId;
use dispatch_core::domains::fanout::DispatchEvent;
use dispatch_core::domains::presence::{actions as presence, ActivityStatus, DeviceInfo, PresenceStatus};
use test_context::test_context;

use crate::common::{requester, TestHarness};

const STATUS_SUBJECT: &str = "dispatch.status.changed";

fn status_events(ctx: &TestHarness) -> Vec<DispatchEvent> {
    ctx.broker
        .messages_for_subject(STATUS_SUBJECT)
        .iter()
        .map(|m| serde_json::from_slice(&m.payload).unwrap())
        .collect()
}

#[test_context(TestHarness)]
#[tokio::test]
async fn reconnecting_the_same_session_is_idempotent(ctx: &mut TestHarness) {
    let user = requester();
    let session = SessionId::new();

    presence::connect(&ctx.deps, &user, session, DeviceInfo::default()).await;
    presence::connect(&ctx.deps, &user, session, DeviceInfo::default()).await;

    assert_eq!(ctx.broker.publish_count_for(STATUS_SUBJECT), 1);
    let snapshot = ctx.deps.presence.snapshot(user.user_id).unwrap();
    assert_eq!(snapshot.session_count, 1);
    assert_eq!(snapshot.activity, Some(ActivityStatus::Available));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn user_stays_online_until_last_session_closes(ctx: &mut TestHarness) {
    let user = requester();
    let phone = SessionId::new();
    let laptop = SessionId::new();

    presence::connect(&ctx.deps, &user, phone, DeviceInfo::default()).await;
    presence::connect(&ctx.deps, &user, laptop, DeviceInfo::default()).await;
    presence::disconnect(&ctx.deps, user.user_id, phone).await;

    assert!(ctx.deps.presence.is_online(user.user_id));
    assert_eq!(ctx.broker.publish_count_for(STATUS_SUBJECT), 1);

    presence::disconnect(&ctx.deps, user.user_id, laptop).await;

    assert!(!ctx.deps.presence.is_online(user.user_id));
    let events = status_events(ctx);
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].payload["status"], "offline");
    assert_eq!(events[1].actor_id, Some(user.user_id));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn activity_changes_are_published_only_when_they_differ(ctx: &mut TestHarness) {
    let user = requester();
    presence::connect(&ctx.deps, &user, SessionId::new(), DeviceInfo::default()).await;

    presence::set_activity(&ctx.deps, user.user_id, ActivityStatus::Busy).await;
    presence::set_activity(&ctx.deps, user.user_id, ActivityStatus::Busy).await;

    let events = status_events(ctx);
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].payload["activity"], "busy");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn go_offline_drops_every_session(ctx: &mut TestHarness) {
    let user = requester();
    presence::connect(&ctx.deps, &user, SessionId::new(), DeviceInfo::default()).await;
    presence::connect(&ctx.deps, &user, SessionId::new(), DeviceInfo::default()).await;

    presence::go_offline(&ctx.deps, user.user_id).await;

    assert!(!ctx.deps.presence.has_live_session(user.user_id));
    assert!(ctx.deps.presence.connections_for(user.user_id).is_empty());
    let snapshot = ctx.deps.presence.snapshot(user.user_id).unwrap();
    assert_eq!(snapshot.status, PresenceStatus::Offline);
    assert_eq!(snapshot.activity, None);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn rest_heartbeat_marks_user_online(ctx: &mut TestHarness) {
    let user = requester();

    presence::heartbeat(&ctx.deps, &user).await;

    assert!(ctx.deps.presence.is_online(user.user_id));
    assert!(!ctx.deps.presence.has_live_session(user.user_id));
    assert_eq!(ctx.broker.publish_count_for(STATUS_SUBJECT), 1);
}
