//! WebSocket Hub implementation
//!
//! Tracks connections per user, room subscriptions and typing state, and
//! fans messages out to them. Every frame is a JSON object `{type, data}`.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
    Extension,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::entity::chat_message::MessageView;
use crate::error::AppError;
use crate::handlers::chat;
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;

/// Global WebSocket hub instance
pub static HUB: std::sync::LazyLock<Hub> = std::sync::LazyLock::new(Hub::new);

/// Server to client events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum WsMessage {
    #[serde(rename_all = "camelCase")]
    OnlineUsers { user_ids: Vec<i32> },
    #[serde(rename_all = "camelCase")]
    RoomHistory {
        room_id: i32,
        messages: Vec<MessageView>,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined { room_id: i32, user_id: i32 },
    #[serde(rename_all = "camelCase")]
    UserLeft { room_id: i32, user_id: i32 },
    NewMessage(MessageView),
    #[serde(rename_all = "camelCase")]
    UserTyping { room_id: i32, users: Vec<i32> },
    #[serde(rename_all = "camelCase")]
    RoomDeleted { room_id: i32 },
    #[serde(rename_all = "camelCase")]
    RoomDeleteSuccess { room_id: i32 },
    AlertCreated(serde_json::Value),
    Error { message: String },
    Pong,
}

impl WsMessage {
    pub fn error(message: impl Into<String>) -> Self {
        WsMessage::Error {
            message: message.into(),
        }
    }
}

/// Client to server events
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: i32 },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: i32 },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        room_id: i32,
        content: String,
        #[serde(rename = "type")]
        message_type: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Typing { room_id: i32, is_typing: bool },
    #[serde(rename_all = "camelCase")]
    DeleteRoom { room_id: i32 },
    Ping,
}

type Sender = mpsc::UnboundedSender<WsMessage>;

#[derive(Clone)]
struct Connection {
    id: u64,
    user_id: i32,
    tx: Sender,
}

/// WebSocket Hub
pub struct Hub {
    next_id: AtomicU64,
    /// Open connections by user ID
    clients: DashMap<i32, Vec<Connection>>,
    /// Connections subscribed to each room
    rooms: DashMap<i32, Vec<Connection>>,
    /// Users currently typing in each room
    typing: DashMap<i32, BTreeSet<i32>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            clients: DashMap::new(),
            rooms: DashMap::new(),
            typing: DashMap::new(),
        }
    }

    /// Register a new connection, returning its ID
    pub fn register(&self, user_id: i32, tx: Sender) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients
            .entry(user_id)
            .or_default()
            .push(Connection { id, user_id, tx });
        tracing::debug!("WebSocket client {} registered for user {}", id, user_id);
        id
    }

    /// Unregister a connection
    ///
    /// Returns the rooms whose typing list changed when this was the user's
    /// last connection, or `None` while other connections remain.
    pub fn unregister(&self, user_id: i32, conn_id: u64) -> Option<Vec<(i32, Vec<i32>)>> {
        self.rooms.retain(|_, subscribers| {
            subscribers.retain(|c| c.id != conn_id);
            !subscribers.is_empty()
        });

        let present = match self.clients.get_mut(&user_id) {
            Some(mut conns) => {
                conns.retain(|c| c.id != conn_id);
                true
            }
            None => false,
        };
        tracing::debug!("WebSocket client {} unregistered for user {}", conn_id, user_id);

        // A connection registered concurrently keeps the entry alive
        let last = !present
            || self
                .clients
                .remove_if(&user_id, |_, conns| conns.is_empty())
                .is_some();
        if !last {
            return None;
        }

        let mut changed = Vec::new();
        self.typing.retain(|room_id, users| {
            if users.remove(&user_id) {
                changed.push((*room_id, users.iter().copied().collect()));
            }
            !users.is_empty()
        });
        Some(changed)
    }

    /// Users with at least one open connection
    pub fn online_users(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.clients.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_online(&self, user_id: i32) -> bool {
        self.clients.contains_key(&user_id)
    }

    /// Send to every connection of one user
    pub fn send_to_user(&self, user_id: i32, msg: WsMessage) {
        if let Some(conns) = self.clients.get(&user_id) {
            for conn in conns.iter() {
                let _ = conn.tx.send(msg.clone());
            }
        }
    }

    /// Send to every connection
    pub fn broadcast(&self, msg: WsMessage) {
        for conns in self.clients.iter() {
            for conn in conns.iter() {
                let _ = conn.tx.send(msg.clone());
            }
        }
    }

    /// Subscribe a connection to a room
    pub fn join_room(&self, room_id: i32, user_id: i32, conn_id: u64) {
        let Some(conn) = self
            .clients
            .get(&user_id)
            .and_then(|conns| conns.iter().find(|c| c.id == conn_id).cloned())
        else {
            return;
        };
        let mut subscribers = self.rooms.entry(room_id).or_default();
        if !subscribers.iter().any(|c| c.id == conn_id) {
            subscribers.push(conn);
        }
    }

    pub fn leave_room(&self, room_id: i32, conn_id: u64) {
        if let Some(mut subscribers) = self.rooms.get_mut(&room_id) {
            subscribers.retain(|c| c.id != conn_id);
        }
        self.rooms.remove_if(&room_id, |_, subscribers| subscribers.is_empty());
    }

    /// Users subscribed to a room through at least one connection
    pub fn room_members(&self, room_id: i32) -> Vec<i32> {
        let members: BTreeSet<i32> = self
            .rooms
            .get(&room_id)
            .map(|subs| subs.iter().map(|c| c.user_id).collect())
            .unwrap_or_default();
        members.into_iter().collect()
    }

    /// Whether a connection joined the room
    pub fn is_subscribed(&self, room_id: i32, conn_id: u64) -> bool {
        self.rooms
            .get(&room_id)
            .is_some_and(|subs| subs.iter().any(|c| c.id == conn_id))
    }

    /// Send to the room's subscribers, optionally skipping one connection
    pub fn send_to_room(&self, room_id: i32, msg: WsMessage, except: Option<u64>) {
        if let Some(subscribers) = self.rooms.get(&room_id) {
            for conn in subscribers.iter().filter(|c| Some(c.id) != except) {
                let _ = conn.tx.send(msg.clone());
            }
        }
    }

    /// Update the typing set of a room and return it
    pub fn set_typing(&self, room_id: i32, user_id: i32, is_typing: bool) -> Vec<i32> {
        let current = {
            let mut users = self.typing.entry(room_id).or_default();
            if is_typing {
                users.insert(user_id);
            } else {
                users.remove(&user_id);
            }
            users.iter().copied().collect()
        };
        self.typing.remove_if(&room_id, |_, users| users.is_empty());
        current
    }

    /// Forget subscriptions and typing state of a deleted room
    pub fn drop_room(&self, room_id: i32) {
        self.rooms.remove(&room_id);
        self.typing.remove(&room_id);
    }

    fn broadcast_online_users(&self) {
        self.broadcast(WsMessage::OnlineUsers {
            user_ids: self.online_users(),
        });
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket upgrade handler
pub async fn serve_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    current_user: Option<Extension<CurrentUser>>,
) -> Response {
    let Some(Extension(user)) = current_user else {
        return AppError::Unauthorized.into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, user: CurrentUser) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    let conn_id = HUB.register(user.id, tx.clone());
    HUB.broadcast_online_users();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Failed to encode WebSocket message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_user = user.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        dispatch(&state, &recv_user, conn_id, &tx, event).await;
                    }
                    Err(e) => {
                        tracing::debug!("Ignoring malformed WebSocket frame: {}", e);
                        let _ = tx.send(WsMessage::error("Mensagem inválida"));
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    if let Some(changed) = HUB.unregister(user.id, conn_id) {
        for (room_id, users) in changed {
            HUB.send_to_room(room_id, WsMessage::UserTyping { room_id, users }, None);
        }
        HUB.broadcast_online_users();
    }
}

/// Handle one client event
async fn dispatch(state: &AppState, user: &CurrentUser, conn_id: u64, tx: &Sender, event: ClientEvent) {
    let db = &state.db;
    match event {
        ClientEvent::Ping => {
            let _ = tx.send(WsMessage::Pong);
        }
        ClientEvent::JoinRoom { room_id } => {
            match chat::find_participant(db, room_id, user.id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    let _ = tx.send(WsMessage::error(chat::NO_ACCESS));
                    return;
                }
                Err(e) => {
                    tracing::error!("Failed to check room access: {}", e);
                    let _ = tx.send(WsMessage::error("Erro ao entrar na sala"));
                    return;
                }
            }

            HUB.join_room(room_id, user.id, conn_id);
            let limit = state.config.chat.history_limit;
            match chat::load_messages(db, room_id, limit, 0).await {
                Ok(messages) => {
                    let _ = tx.send(WsMessage::RoomHistory { room_id, messages });
                }
                Err(e) => {
                    tracing::error!("Failed to load history of room {}: {}", room_id, e);
                    let _ = tx.send(WsMessage::error("Erro ao entrar na sala"));
                    return;
                }
            }
            HUB.send_to_room(
                room_id,
                WsMessage::UserJoined {
                    room_id,
                    user_id: user.id,
                },
                Some(conn_id),
            );
        }
        ClientEvent::LeaveRoom { room_id } => {
            HUB.leave_room(room_id, conn_id);
            HUB.send_to_room(
                room_id,
                WsMessage::UserLeft {
                    room_id,
                    user_id: user.id,
                },
                None,
            );
        }
        ClientEvent::SendMessage {
            room_id,
            content,
            message_type,
        } => {
            match chat::post_message(db, room_id, user.id, &content, message_type.as_deref()).await
            {
                Ok(message) => {
                    HUB.send_to_room(room_id, WsMessage::NewMessage(message), None);
                    let users = HUB.set_typing(room_id, user.id, false);
                    HUB.send_to_room(room_id, WsMessage::UserTyping { room_id, users }, None);
                }
                Err(AppError::Forbidden(message)) | Err(AppError::BadRequest(message)) => {
                    let _ = tx.send(WsMessage::error(message));
                }
                Err(e) => {
                    tracing::error!("Failed to store chat message: {}", e);
                    let _ = tx.send(WsMessage::error("Erro ao enviar mensagem"));
                }
            }
        }
        ClientEvent::Typing { room_id, is_typing } => {
            // Joining checked the participant row already
            if !HUB.is_subscribed(room_id, conn_id) {
                let _ = tx.send(WsMessage::error(chat::NO_ACCESS));
                return;
            }
            let users = HUB.set_typing(room_id, user.id, is_typing);
            HUB.send_to_room(room_id, WsMessage::UserTyping { room_id, users }, Some(conn_id));
        }
        ClientEvent::DeleteRoom { room_id } => {
            match chat::remove_room(db, room_id, user.id, user.is_admin()).await {
                Ok(participants) => {
                    chat::announce_room_deleted(room_id, &participants);
                    let _ = tx.send(WsMessage::RoomDeleteSuccess { room_id });
                }
                Err(e @ (AppError::Forbidden(_) | AppError::NotFound(_))) => {
                    let _ = tx.send(WsMessage::error(e.to_string()));
                }
                Err(e) => {
                    tracing::error!("Failed to delete room {}: {}", room_id, e);
                    let _ = tx.send(WsMessage::error("Erro ao excluir a sala"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(hub: &Hub, user_id: i32) -> (u64, mpsc::UnboundedReceiver<WsMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (hub.register(user_id, tx), rx)
    }

    #[test]
    fn test_client_event_parsing() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"joinRoom","data":{"roomId":4}}"#).unwrap();
        assert!(matches!(event, ClientEvent::JoinRoom { room_id: 4 }));

        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"sendMessage","data":{"roomId":4,"content":"oi","type":"text"}}"#,
        )
        .unwrap();
        match event {
            ClientEvent::SendMessage {
                room_id,
                content,
                message_type,
            } => {
                assert_eq!(room_id, 4);
                assert_eq!(content, "oi");
                assert_eq!(message_type.as_deref(), Some("text"));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let event: ClientEvent = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Ping));
    }

    #[test]
    fn test_server_event_shape() {
        let json = serde_json::to_value(WsMessage::UserTyping {
            room_id: 2,
            users: vec![1, 3],
        })
        .unwrap();
        assert_eq!(json["type"], "userTyping");
        assert_eq!(json["data"]["roomId"], 2);
        assert_eq!(json["data"]["users"], serde_json::json!([1, 3]));

        let json = serde_json::to_value(WsMessage::Pong).unwrap();
        assert_eq!(json["type"], "pong");
    }

    #[test]
    fn test_online_users_and_last_connection() {
        let hub = Hub::new();
        let (a1, _rx1) = connect(&hub, 1);
        let (a2, _rx2) = connect(&hub, 1);
        let (_b, _rx3) = connect(&hub, 2);
        assert_eq!(hub.online_users(), vec![1, 2]);

        hub.set_typing(7, 1, true);
        assert!(hub.unregister(1, a1).is_none());
        assert!(hub.is_online(1));

        let changed = hub.unregister(1, a2).unwrap();
        assert_eq!(changed, vec![(7, Vec::<i32>::new())]);
        assert_eq!(hub.online_users(), vec![2]);
    }

    #[test]
    fn test_room_fanout_skips_sender() {
        let hub = Hub::new();
        let (a, mut rx_a) = connect(&hub, 1);
        let (b, mut rx_b) = connect(&hub, 2);
        let (_c, mut rx_c) = connect(&hub, 3);
        hub.join_room(5, 1, a);
        hub.join_room(5, 2, b);
        assert_eq!(hub.room_members(5), vec![1, 2]);

        hub.send_to_room(5, WsMessage::UserJoined { room_id: 5, user_id: 1 }, Some(a));
        assert!(rx_a.try_recv().is_err());
        assert!(matches!(rx_b.try_recv(), Ok(WsMessage::UserJoined { .. })));
        assert!(rx_c.try_recv().is_err());

        hub.leave_room(5, b);
        assert_eq!(hub.room_members(5), vec![1]);
        hub.drop_room(5);
        assert!(hub.room_members(5).is_empty());
    }

    #[test]
    fn test_typing_set() {
        let hub = Hub::new();
        assert_eq!(hub.set_typing(1, 10, true), vec![10]);
        assert_eq!(hub.set_typing(1, 11, true), vec![10, 11]);
        assert_eq!(hub.set_typing(1, 10, false), vec![11]);
        assert_eq!(hub.set_typing(1, 11, false), Vec::<i32>::new());
        assert!(hub.typing.is_empty());

        // clearing a user who never typed leaves no entry behind
        assert!(hub.set_typing(2, 10, false).is_empty());
        assert!(hub.typing.is_empty());
    }

    #[test]
    fn test_reconnect_keeps_new_connection() {
        let hub = Hub::new();
        let (old, _rx_old) = connect(&hub, 1);
        let (_new, mut rx_new) = connect(&hub, 1);

        assert!(hub.unregister(1, old).is_none());
        assert!(hub.is_online(1));
        hub.send_to_user(1, WsMessage::Pong);
        assert!(matches!(rx_new.try_recv(), Ok(WsMessage::Pong)));
    }

    #[test]
    fn test_unregister_of_unknown_connection_keeps_user() {
        let hub = Hub::new();
        let (_a, mut rx) = connect(&hub, 1);
        assert!(hub.unregister(1, 999).is_none());
        hub.send_to_user(1, WsMessage::Pong);
        assert!(matches!(rx.try_recv(), Ok(WsMessage::Pong)));
    }

    #[test]
    fn test_last_connection_clears_rooms_and_typing() {
        let hub = Hub::new();
        let (a, _rx) = connect(&hub, 1);
        hub.join_room(4, 1, a);
        hub.set_typing(4, 1, true);
        assert!(hub.is_subscribed(4, a));

        assert_eq!(hub.unregister(1, a).unwrap(), vec![(4, Vec::<i32>::new())]);
        assert!(!hub.is_subscribed(4, a));
        assert!(hub.rooms.is_empty());
        assert!(hub.typing.is_empty());
    }

    #[test]
    fn test_typing_requires_joined_room() {
        let hub = Hub::new();
        let (a, _rx_a) = connect(&hub, 1);
        let (b, _rx_b) = connect(&hub, 2);
        hub.join_room(6, 1, a);
        assert!(hub.is_subscribed(6, a));
        assert!(!hub.is_subscribed(6, b));
        assert!(!hub.is_subscribed(7, a));
    }
}
