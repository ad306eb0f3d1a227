use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::models::{
    ActivityStatus, Connection, DeviceInfo, PresenceChange, PresenceSnapshot, PresenceStatus,
};
use crate::common::{AuthUser, HelperId, Role, SessionId, UserId};

#[derive(Debug, Clone)]
struct UserPresence {
    role: Role,
    helper_id: Option<HelperId>,
    status: PresenceStatus,
    activity: Option<ActivityStatus>,
    sessions: HashSet<SessionId>,
    last_heartbeat_at: DateTime<Utc>,
}

impl UserPresence {
    fn new(user: &AuthUser, now: DateTime<Utc>) -> Self {
        Self {
            role: user.role,
            helper_id: user.helper_id,
            status: PresenceStatus::Offline,
            activity: None,
            sessions: HashSet::new(),
            last_heartbeat_at: now,
        }
    }

    fn change(&self, user_id: UserId, at: DateTime<Utc>) -> PresenceChange {
        PresenceChange {
            user_id,
            role: self.role,
            helper_id: self.helper_id,
            status: self.status,
            activity: self.activity,
            at,
        }
    }

    /// Returns true if the status flipped to online.
    fn come_online(&mut self) -> bool {
        if self.status == PresenceStatus::Online {
            return false;
        }
        self.status = PresenceStatus::Online;
        if self.activity.is_none() {
            self.activity = Some(ActivityStatus::Available);
        }
        true
    }

    fn go_offline(&mut self) {
        self.status = PresenceStatus::Offline;
        self.activity = None;
    }
}

/// Presence state for every known user plus their live connections.
///
/// All state is in-process; presence is rebuilt from reconnects after a
/// restart. Changes are broadcast on a channel any component can subscribe to.
pub struct PresenceService {
    users: DashMap<UserId, UserPresence>,
    connections: DashMap<SessionId, Connection>,
    changes: broadcast::Sender<PresenceChange>,
    offline_timeout: chrono::Duration,
}

impl PresenceService {
    pub fn new(offline_timeout: Duration) -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            users: DashMap::new(),
            connections: DashMap::new(),
            changes,
            offline_timeout: chrono::Duration::from_std(offline_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(90)),
        }
    }

    /// Status-change channel. Lagging subscribers miss changes, never block writers.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceChange> {
        self.changes.subscribe()
    }

    fn emit(&self, change: PresenceChange) -> PresenceChange {
        debug!(user_id = %change.user_id, status = ?change.status, "Presence changed");
        let _ = self.changes.send(change.clone());
        change
    }

    /// Register a live session. Idempotent per session; returns a change only
    /// when the user actually went from offline to online.
    pub fn set_online(
        &self,
        user: &AuthUser,
        session_id: SessionId,
        device: DeviceInfo,
        now: DateTime<Utc>,
    ) -> Option<PresenceChange> {
        self.connections
            .entry(session_id)
            .and_modify(|c| c.last_seen_at = now)
            .or_insert_with(|| Connection {
                session_id,
                user_id: user.user_id,
                role: user.role,
                device,
                connected_at: now,
                last_seen_at: now,
            });

        let change = {
            let mut presence = self
                .users
                .entry(user.user_id)
                .or_insert_with(|| UserPresence::new(user, now));
            presence.sessions.insert(session_id);
            presence.last_heartbeat_at = now;
            presence
                .come_online()
                .then(|| presence.change(user.user_id, now))
        };
        change.map(|c| self.emit(c))
    }

    /// End a session. The user goes offline only when no session remains.
    pub fn set_offline(
        &self,
        user_id: UserId,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Option<PresenceChange> {
        self.connections.remove(&session_id);

        let change = {
            let mut presence = self.users.get_mut(&user_id)?;
            presence.sessions.remove(&session_id);
            if !presence.sessions.is_empty() || presence.status == PresenceStatus::Offline {
                return None;
            }
            presence.go_offline();
            presence.change(user_id, now)
        };
        Some(self.emit(change))
    }

    /// Drop every session of `user_id` and mark them offline.
    pub fn force_offline(&self, user_id: UserId, now: DateTime<Utc>) -> Option<PresenceChange> {
        self.connections.retain(|_, c| c.user_id != user_id);

        let change = {
            let mut presence = self.users.get_mut(&user_id)?;
            presence.sessions.clear();
            if presence.status == PresenceStatus::Offline {
                return None;
            }
            presence.go_offline();
            presence.change(user_id, now)
        };
        Some(self.emit(change))
    }

    /// Sessionless liveness (REST heartbeat). Marks the user online if needed.
    pub fn touch(&self, user: &AuthUser, now: DateTime<Utc>) -> Option<PresenceChange> {
        let change = {
            let mut presence = self
                .users
                .entry(user.user_id)
                .or_insert_with(|| UserPresence::new(user, now));
            presence.last_heartbeat_at = now;
            presence
                .come_online()
                .then(|| presence.change(user.user_id, now))
        };
        change.map(|c| self.emit(c))
    }

    /// Refresh heartbeat for a user and, if given, one of their sessions.
    pub fn heartbeat(&self, user_id: UserId, session_id: Option<SessionId>, now: DateTime<Utc>) -> bool {
        if let Some(session_id) = session_id {
            if let Some(mut connection) = self.connections.get_mut(&session_id) {
                connection.last_seen_at = now;
            }
        }
        match self.users.get_mut(&user_id) {
            Some(mut presence) => {
                presence.last_heartbeat_at = now;
                true
            }
            None => false,
        }
    }

    pub fn set_activity(
        &self,
        user_id: UserId,
        activity: ActivityStatus,
        now: DateTime<Utc>,
    ) -> Option<PresenceChange> {
        let change = {
            let mut presence = self.users.get_mut(&user_id)?;
            if presence.status == PresenceStatus::Offline || presence.activity == Some(activity) {
                return None;
            }
            presence.activity = Some(activity);
            presence.change(user_id, now)
        };
        Some(self.emit(change))
    }

    pub fn snapshot(&self, user_id: UserId) -> Option<PresenceSnapshot> {
        self.users.get(&user_id).map(|p| PresenceSnapshot {
            user_id,
            role: p.role,
            helper_id: p.helper_id,
            status: p.status,
            activity: p.activity,
            session_count: p.sessions.len(),
            last_heartbeat_at: p.last_heartbeat_at,
        })
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.users
            .get(&user_id)
            .map(|p| p.status == PresenceStatus::Online)
            .unwrap_or(false)
    }

    /// Whether live delivery can reach the user right now.
    pub fn has_live_session(&self, user_id: UserId) -> bool {
        self.users
            .get(&user_id)
            .map(|p| !p.sessions.is_empty())
            .unwrap_or(false)
    }

    pub fn connections_for(&self, user_id: UserId) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.clone())
            .collect()
    }

    pub fn online_count(&self) -> usize {
        self.users
            .iter()
            .filter(|p| p.status == PresenceStatus::Online)
            .count()
    }

    /// Drop connections silent past the offline timeout, then mark offline
    /// every user whose heartbeat is stale and who has no session left.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<PresenceChange> {
        let cutoff = now - self.offline_timeout;

        let stale: Vec<(SessionId, UserId)> = self
            .connections
            .iter()
            .filter(|c| c.last_seen_at < cutoff)
            .map(|c| (c.session_id, c.user_id))
            .collect();
        for (session_id, user_id) in &stale {
            self.connections.remove(session_id);
            if let Some(mut presence) = self.users.get_mut(user_id) {
                presence.sessions.remove(session_id);
            }
        }

        let candidates: Vec<UserId> = self
            .users
            .iter()
            .filter(|p| {
                p.status == PresenceStatus::Online
                    && p.sessions.is_empty()
                    && p.last_heartbeat_at < cutoff
            })
            .map(|p| *p.key())
            .collect();

        let mut changes = Vec::new();
        for user_id in candidates {
            let change = match self.users.get_mut(&user_id) {
                // Re-check: a reconnect may have raced the scan
                Some(mut presence)
                    if presence.sessions.is_empty() && presence.last_heartbeat_at < cutoff =>
                {
                    presence.go_offline();
                    presence.change(user_id, now)
                }
                _ => continue,
            };
            changes.push(self.emit(change));
        }

        if !stale.is_empty() || !changes.is_empty() {
            info!(
                stale_sessions = stale.len(),
                went_offline = changes.len(),
                "Presence sweep"
            );
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper() -> AuthUser {
        AuthUser {
            user_id: UserId::new(),
            role: Role::Helper,
            helper_id: Some(HelperId::new()),
        }
    }

    fn service() -> PresenceService {
        PresenceService::new(Duration::from_secs(90))
    }

    #[test]
    fn test_set_online_is_idempotent() {
        let presence = service();
        let user = helper();
        let session = SessionId::new();
        let now = Utc::now();

        let first = presence.set_online(&user, session, DeviceInfo::default(), now);
        let once = presence.snapshot(user.user_id).unwrap();
        let second = presence.set_online(&user, session, DeviceInfo::default(), now);
        let twice = presence.snapshot(user.user_id).unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(once, twice);
        assert_eq!(twice.session_count, 1);
    }

    #[test]
    fn test_offline_only_after_last_session() {
        let presence = service();
        let user = helper();
        let (phone, tablet) = (SessionId::new(), SessionId::new());
        let now = Utc::now();

        presence.set_online(&user, phone, DeviceInfo::default(), now);
        presence.set_online(&user, tablet, DeviceInfo::default(), now);

        assert!(presence.set_offline(user.user_id, phone, now).is_none());
        assert!(presence.is_online(user.user_id));

        let change = presence.set_offline(user.user_id, tablet, now).unwrap();
        assert_eq!(change.status, PresenceStatus::Offline);
        assert!(!presence.is_online(user.user_id));

        // Repeated disconnects are no-ops
        assert!(presence.set_offline(user.user_id, tablet, now).is_none());
    }

    #[test]
    fn test_sweep_marks_silent_sessionless_users_offline() {
        let presence = service();
        let quiet = helper();
        let connected = helper();
        let start = Utc::now();

        presence.touch(&quiet, start);
        presence.set_online(&connected, SessionId::new(), DeviceInfo::default(), start);

        // Connected user keeps heartbeating; the quiet one vanished
        let later = start + chrono::Duration::seconds(120);
        presence.heartbeat(connected.user_id, None, later);
        for connection in presence.connections_for(connected.user_id) {
            presence.heartbeat(connected.user_id, Some(connection.session_id), later);
        }

        let changes = presence.sweep(later);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].user_id, quiet.user_id);
        assert!(presence.is_online(connected.user_id));
    }

    #[test]
    fn test_sweep_reaps_vanished_sessions() {
        let presence = service();
        let user = helper();
        let start = Utc::now();
        presence.set_online(&user, SessionId::new(), DeviceInfo::default(), start);

        let changes = presence.sweep(start + chrono::Duration::seconds(91));
        assert_eq!(changes.len(), 1);
        assert!(!presence.has_live_session(user.user_id));
    }

    #[tokio::test]
    async fn test_changes_are_broadcast() {
        let presence = service();
        let mut rx = presence.subscribe();
        let user = helper();

        presence.set_online(&user, SessionId::new(), DeviceInfo::default(), Utc::now());
        let change = rx.recv().await.unwrap();
        assert_eq!(change.status, PresenceStatus::Online);
        assert_eq!(change.activity, Some(ActivityStatus::Available));

        presence.set_activity(user.user_id, ActivityStatus::InTask, Utc::now());
        assert_eq!(rx.recv().await.unwrap().activity, Some(ActivityStatus::InTask));
    }
}
