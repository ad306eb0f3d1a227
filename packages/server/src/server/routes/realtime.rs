//! WebSocket real-time channel.
//!
//! GET /api/ws?token=JWT
//!
//! Browsers cannot set headers on a WebSocket handshake, so the token is read
//! from `?token=` and falls back to the Authorization header. Every socket is
//! subscribed to its `user:{id}` and `role:{ROLE}` rooms; task rooms are
//! joined explicitly with `join:task` and authorised per task.
//!
//! Frames are JSON `{ "event": "...", "data": { ... } }` in both directions.

use std::collections::{HashMap, HashSet, VecDeque};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Query,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};

use crate::common::{AuthUser, DispatchError, SessionId, TaskId};
use crate::domains::location::{ingest_location, IngestOutcome, LocationInput};
use crate::domains::presence::{actions as presence_actions, DeviceInfo};
use crate::domains::tasks::actions as task_actions;
use crate::kernel::{Room, ServerDeps};
use crate::server::app::AppState;
use crate::server::error::Unauthorized;
use crate::server::middleware::bearer_token;

/// Event ids remembered per socket to drop the second copy of an event that
/// reached the socket through both a task room and a user room.
const RECENT_EVENT_WINDOW: usize = 256;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    token: Option<String>,
    platform: Option<String>,
    app_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub task_id: TaskId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationMessage {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub sample: LocationInput,
}

/// Inbound client operations.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "join:task")]
    JoinTask(TaskRef),
    #[serde(rename = "leave:task")]
    LeaveTask(TaskRef),
    #[serde(rename = "location:update")]
    LocationUpdate(LocationMessage),
    #[serde(rename = "task:accept")]
    AcceptTask(TaskRef),
    #[serde(rename = "task:decline")]
    DeclineTask(TaskRef),
    #[serde(rename = "task:start")]
    StartTask(TaskRef),
    #[serde(rename = "task:complete")]
    CompleteTask(TaskRef),
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

impl ClientMessage {
    fn op(&self) -> &'static str {
        match self {
            ClientMessage::JoinTask(_) => "join:task",
            ClientMessage::LeaveTask(_) => "leave:task",
            ClientMessage::LocationUpdate(_) => "location:update",
            ClientMessage::AcceptTask(_) => "task:accept",
            ClientMessage::DeclineTask(_) => "task:decline",
            ClientMessage::StartTask(_) => "task:start",
            ClientMessage::CompleteTask(_) => "task:complete",
            ClientMessage::Heartbeat => "heartbeat",
        }
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    Extension(state): Extension<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query
        .token
        .or_else(|| bearer_token(&headers).map(str::to_string));
    let Some(token) = token else {
        return Unauthorized.into_response();
    };
    let user = match state.jwt_service.authenticate(&token) {
        Ok(user) => user,
        Err(e) => {
            debug!(error = %e, "Rejected socket token");
            return Unauthorized.into_response();
        }
    };

    let device = DeviceInfo {
        platform: query.platform,
        app_version: query.app_version,
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    ws.on_upgrade(move |socket| run_session(socket, state.deps, user, device))
}

/// Room subscriptions of one socket. Each room is pumped into the socket's
/// outbound queue by its own task.
struct Subscriptions {
    outbound: mpsc::UnboundedSender<Value>,
    rooms: HashMap<Room, JoinHandle<()>>,
}

impl Subscriptions {
    fn new(outbound: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            outbound,
            rooms: HashMap::new(),
        }
    }

    async fn join(&mut self, deps: &ServerDeps, room: Room) {
        if self.rooms.contains_key(&room) {
            return;
        }
        let rx = deps.stream_hub.subscribe(&room).await;
        let pump = tokio::spawn(forward_room(rx, self.outbound.clone()));
        self.rooms.insert(room, pump);
    }

    fn leave(&mut self, room: &Room) -> bool {
        match self.rooms.remove(room) {
            Some(pump) => {
                pump.abort();
                true
            }
            None => false,
        }
    }

    fn close(&mut self) {
        for (_, pump) in self.rooms.drain() {
            pump.abort();
        }
    }
}

async fn forward_room(rx: broadcast::Receiver<Value>, outbound: mpsc::UnboundedSender<Value>) {
    let mut events = BroadcastStream::new(rx);
    while let Some(item) = events.next().await {
        let frame = match item {
            Ok(value) => value,
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                json!({ "event": "lagged", "data": { "missed": missed } })
            }
        };
        if outbound.send(frame).is_err() {
            break;
        }
    }
}

async fn run_session(socket: WebSocket, deps: ServerDeps, user: AuthUser, device: DeviceInfo) {
    let session_id = SessionId::new();
    let (mut sink, mut inbound) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        let mut recent: VecDeque<String> = VecDeque::with_capacity(RECENT_EVENT_WINDOW);
        let mut seen: HashSet<String> = HashSet::with_capacity(RECENT_EVENT_WINDOW);

        while let Some(frame) = outbound_rx.recv().await {
            if let Some(event_id) = frame.get("eventId").and_then(Value::as_str) {
                if !seen.insert(event_id.to_string()) {
                    continue;
                }
                recent.push_back(event_id.to_string());
                if recent.len() > RECENT_EVENT_WINDOW {
                    if let Some(oldest) = recent.pop_front() {
                        seen.remove(&oldest);
                    }
                }
            }
            if sink.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
    });

    let mut subscriptions = Subscriptions::new(outbound_tx.clone());
    subscriptions.join(&deps, Room::user(user.user_id)).await;
    subscriptions.join(&deps, Room::role(user.role)).await;

    presence_actions::connect(&deps, &user, session_id, device).await;
    info!(user_id = %user.user_id, session_id = %session_id, "Socket connected");

    let _ = outbound_tx.send(json!({
        "event": "connected",
        "data": { "sessionId": session_id, "userId": user.user_id },
    }));

    while let Some(frame) = inbound.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            // Ping/pong frames are answered by the protocol layer
            Ok(_) => {
                deps.presence
                    .heartbeat(user.user_id, Some(session_id), chrono::Utc::now());
                continue;
            }
            Err(e) => {
                debug!(error = %e, "Socket read failed");
                break;
            }
        };

        deps.presence
            .heartbeat(user.user_id, Some(session_id), chrono::Utc::now());

        let message: ClientMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(e) => {
                let _ = outbound_tx.send(json!({
                    "event": "error",
                    "data": { "error": "validation_error", "message": format!("malformed frame: {}", e) },
                }));
                continue;
            }
        };

        let op = message.op();
        let reply = match handle_message(&deps, &user, &mut subscriptions, message).await {
            Ok(reply) => reply,
            Err(e) => json!({
                "event": "error",
                "data": { "op": op, "error": e.kind(), "message": e.to_string() },
            }),
        };
        if outbound_tx.send(reply).is_err() {
            break;
        }
    }

    subscriptions.close();
    drop(outbound_tx);
    writer.abort();

    presence_actions::disconnect(&deps, user.user_id, session_id).await;
    info!(user_id = %user.user_id, session_id = %session_id, "Socket disconnected");
}

fn ack(op: &str, data: Value) -> Value {
    json!({ "event": "ack", "data": { "op": op, "result": data } })
}

async fn handle_message(
    deps: &ServerDeps,
    user: &AuthUser,
    subscriptions: &mut Subscriptions,
    message: ClientMessage,
) -> Result<Value, DispatchError> {
    let op = message.op();
    match message {
        ClientMessage::JoinTask(TaskRef { task_id }) => {
            if !task_actions::can_join_room(deps, user, task_id).await? {
                return Err(DispatchError::Forbidden(
                    "not a participant of this task".to_string(),
                ));
            }
            subscriptions.join(deps, Room::task(task_id)).await;
            Ok(ack(op, json!({ "taskId": task_id })))
        }
        ClientMessage::LeaveTask(TaskRef { task_id }) => {
            let left = subscriptions.leave(&Room::task(task_id));
            Ok(ack(op, json!({ "taskId": task_id, "left": left })))
        }
        ClientMessage::LocationUpdate(LocationMessage { task_id, sample }) => {
            match ingest_location(deps, user, task_id, sample).await? {
                IngestOutcome::Accepted(update) => Ok(ack(op, serde_json::to_value(update)?)),
                IngestOutcome::Throttled { retry_after_ms } => Ok(json!({
                    "event": "location:throttled",
                    "data": { "taskId": task_id, "retryAfterMs": retry_after_ms },
                })),
            }
        }
        ClientMessage::AcceptTask(TaskRef { task_id }) => {
            let task = task_actions::claim_task(deps, user, task_id).await?;
            subscriptions.join(deps, Room::task(task_id)).await;
            Ok(ack(op, serde_json::to_value(task)?))
        }
        ClientMessage::DeclineTask(TaskRef { task_id }) => {
            let task = task_actions::decline_task(deps, user, task_id).await?;
            Ok(ack(op, json!({ "taskId": task.id, "status": task.status })))
        }
        ClientMessage::StartTask(TaskRef { task_id }) => {
            let task = task_actions::start_task(deps, user, task_id).await?;
            Ok(ack(op, serde_json::to_value(task)?))
        }
        ClientMessage::CompleteTask(TaskRef { task_id }) => {
            let task = task_actions::complete_task(deps, user, task_id).await?;
            Ok(ack(op, serde_json::to_value(task)?))
        }
        ClientMessage::Heartbeat => Ok(ack(op, json!({ "ok": true }))),
    }
}
