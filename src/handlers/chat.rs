//! Chat handlers
//!
//! REST side of the chat: rooms, history, read markers and unread counts.
//! The room and message helpers here are shared with the WebSocket session.

use std::collections::{BTreeSet, HashMap};

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Extension, Json,
};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::entity::chat_message::{self, MessageView};
use crate::entity::user::{self, UserSummary};
use crate::entity::{chat_room, chat_room_participant};
use crate::error::{AppError, AppResult, OptionExt};
use crate::middleware::{CurrentUser, DbConn};
use crate::ws::{WsMessage, HUB};

use super::{require_one_of, require_text, Created};

pub const NO_ACCESS: &str = "Você não tem acesso a esta sala";
const NO_DELETE: &str = "Você não tem permissão para excluir esta sala";
const RESOURCE: &str = "Sala";

const ROOM_TYPES: [&str; 3] = ["channel", "direct", "team"];
const VISIBILITIES: [&str; 2] = ["public", "private"];
const DEFAULT_MESSAGE_LIMIT: u64 = 50;
const MAX_MESSAGE_LIMIT: u64 = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    #[serde(flatten)]
    pub user: UserSummary,
    pub online: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    #[serde(flatten)]
    pub room: chat_room::Model,
    pub participant_ids: Vec<i32>,
    pub unread_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoom {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub room_type: Option<String>,
    pub visibility: Option<String>,
    #[serde(default)]
    pub participant_ids: Vec<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl MessageQuery {
    /// Resolve `(limit, offset)`, rejecting offsets Postgres cannot bind
    pub fn window(&self) -> AppResult<(u64, u64)> {
        let limit = self
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_MESSAGE_LIMIT)
            .min(MAX_MESSAGE_LIMIT);
        let offset = self.offset.unwrap_or(0);
        if offset > i64::MAX as u64 {
            return Err(AppError::BadRequest("Offset inválido".to_string()));
        }
        Ok((limit, offset))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadResponse {
    pub total: u64,
    pub rooms: HashMap<i32, u64>,
}

pub async fn find_participant<C: ConnectionTrait>(
    db: &C,
    room_id: i32,
    user_id: i32,
) -> Result<Option<chat_room_participant::Model>, DbErr> {
    chat_room_participant::Entity::find()
        .filter(chat_room_participant::Column::RoomId.eq(room_id))
        .filter(chat_room_participant::Column::UserId.eq(user_id))
        .one(db)
        .await
}

/// Fail with 403 unless the user takes part in the room
pub async fn require_participant<C: ConnectionTrait>(
    db: &C,
    room_id: i32,
    user_id: i32,
) -> AppResult<chat_room_participant::Model> {
    find_participant(db, room_id, user_id)
        .await?
        .ok_or_else(|| AppError::Forbidden(NO_ACCESS.to_string()))
}

async fn with_authors<C: ConnectionTrait>(
    db: &C,
    messages: Vec<chat_message::Model>,
) -> Result<Vec<MessageView>, DbErr> {
    let ids: BTreeSet<i32> = messages.iter().map(|m| m.user_id).collect();
    let authors: HashMap<i32, user::Model> = user::Entity::find()
        .filter(user::Column::Id.is_in(ids))
        .all(db)
        .await?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    Ok(messages
        .into_iter()
        .map(|message| {
            let (username, full_name) = authors
                .get(&message.user_id)
                .map(|u| (u.username.clone(), u.full_name.clone()))
                .unwrap_or_default();
            MessageView {
                message,
                username,
                full_name,
            }
        })
        .collect())
}

/// Page of room messages in chronological order, newest page first
pub async fn load_messages<C: ConnectionTrait>(
    db: &C,
    room_id: i32,
    limit: u64,
    offset: u64,
) -> Result<Vec<MessageView>, DbErr> {
    let mut messages = chat_message::Entity::find()
        .filter(chat_message::Column::RoomId.eq(room_id))
        .order_by_desc(chat_message::Column::CreatedAt)
        .order_by_desc(chat_message::Column::Id)
        .limit(limit)
        .offset(offset)
        .all(db)
        .await?;
    messages.reverse();
    with_authors(db, messages).await
}

/// Store a message from a participant and bump the room activity
pub async fn post_message(
    db: &DatabaseConnection,
    room_id: i32,
    user_id: i32,
    content: &str,
    message_type: Option<&str>,
) -> AppResult<MessageView> {
    if content.trim().is_empty() {
        return Err(AppError::BadRequest("Mensagem vazia".to_string()));
    }
    require_participant(db, room_id, user_id).await?;

    let now = crate::db::now();
    let message = chat_message::ActiveModel {
        room_id: Set(room_id),
        user_id: Set(user_id),
        content: Set(content.to_string()),
        message_type: Set(message_type.unwrap_or("text").to_string()),
        is_system: Set(false),
        parent_id: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        edited_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await?;

    chat_room::Entity::update_many()
        .col_expr(chat_room::Column::LastMessageAt, Expr::value(Some(now)))
        .col_expr(chat_room::Column::UpdatedAt, Expr::value(now))
        .filter(chat_room::Column::Id.eq(room_id))
        .exec(db)
        .await?;

    let mut views = with_authors(db, vec![message]).await?;
    views
        .pop()
        .ok_or_else(|| AppError::Internal("message lost after insert".to_string()))
}

/// Delete a room and return the ids of its former participants
///
/// Only the creator or an administrator may delete.
pub async fn remove_room(
    db: &DatabaseConnection,
    room_id: i32,
    user_id: i32,
    is_admin: bool,
) -> AppResult<Vec<i32>> {
    let room = chat_room::Entity::find_by_id(room_id)
        .one(db)
        .await?
        .ok_or_not_found(RESOURCE)?;
    if room.created_by != Some(user_id) && !is_admin {
        return Err(AppError::Forbidden(NO_DELETE.to_string()));
    }

    let txn = db.begin().await?;
    let participants: Vec<i32> = chat_room_participant::Entity::find()
        .filter(chat_room_participant::Column::RoomId.eq(room_id))
        .all(&txn)
        .await?
        .into_iter()
        .map(|p| p.user_id)
        .collect();
    chat_message::Entity::delete_many()
        .filter(chat_message::Column::RoomId.eq(room_id))
        .exec(&txn)
        .await?;
    chat_room_participant::Entity::delete_many()
        .filter(chat_room_participant::Column::RoomId.eq(room_id))
        .exec(&txn)
        .await?;
    chat_room::Entity::delete_by_id(room_id).exec(&txn).await?;
    txn.commit().await?;

    tracing::info!("Chat room {} deleted by user {}", room_id, user_id);
    Ok(participants)
}

/// Tell former participants and room subscribers that a room is gone
pub fn announce_room_deleted(room_id: i32, participants: &[i32]) {
    for user_id in participants {
        HUB.send_to_user(*user_id, WsMessage::RoomDeleted { room_id });
    }
    HUB.drop_room(room_id);
}

/// Messages by others created after the participant last looked at the room
pub async fn unread_count<C: ConnectionTrait>(
    db: &C,
    participant: &chat_room_participant::Model,
) -> Result<u64, DbErr> {
    let mut query = chat_message::Entity::find()
        .filter(chat_message::Column::RoomId.eq(participant.room_id))
        .filter(chat_message::Column::UserId.ne(participant.user_id));
    if let Some(seen) = participant.last_seen_at {
        query = query.filter(chat_message::Column::CreatedAt.gt(seen));
    }
    query.count(db).await
}

async fn memberships<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
) -> Result<Vec<chat_room_participant::Model>, DbErr> {
    chat_room_participant::Entity::find()
        .filter(chat_room_participant::Column::UserId.eq(user_id))
        .all(db)
        .await
}

/// GET /api/chat/users
pub async fn list_chat_users(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
) -> AppResult<Json<Vec<ChatUser>>> {
    let online: BTreeSet<i32> = HUB.online_users().into_iter().collect();
    let users = user::Entity::find()
        .filter(user::Column::Active.eq(true))
        .filter(user::Column::Id.ne(current_user.id))
        .order_by_asc(user::Column::FullName)
        .all(&*db)
        .await?
        .into_iter()
        .map(|u| ChatUser {
            online: online.contains(&u.id),
            user: u.into(),
        })
        .collect();
    Ok(Json(users))
}

/// GET /api/chat/rooms
pub async fn list_rooms(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
) -> AppResult<Json<Vec<RoomView>>> {
    let mine = memberships(&*db, current_user.id).await?;
    let room_ids: Vec<i32> = mine.iter().map(|p| p.room_id).collect();
    if room_ids.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let rooms = chat_room::Entity::find()
        .filter(chat_room::Column::Id.is_in(room_ids.clone()))
        .filter(chat_room::Column::Archived.eq(false))
        .order_by_desc(chat_room::Column::UpdatedAt)
        .all(&*db)
        .await?;

    let mut members: HashMap<i32, Vec<i32>> = HashMap::new();
    for p in chat_room_participant::Entity::find()
        .filter(chat_room_participant::Column::RoomId.is_in(room_ids))
        .all(&*db)
        .await?
    {
        members.entry(p.room_id).or_default().push(p.user_id);
    }

    let mut views = Vec::with_capacity(rooms.len());
    for room in rooms {
        let unread = match mine.iter().find(|p| p.room_id == room.id) {
            Some(participant) => unread_count(&*db, participant).await?,
            None => 0,
        };
        views.push(RoomView {
            participant_ids: members.remove(&room.id).unwrap_or_default(),
            unread_count: unread,
            room,
        });
    }
    Ok(Json(views))
}

/// POST /api/chat/rooms
pub async fn create_room(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreateRoom>,
) -> AppResult<Created<RoomView>> {
    require_text("name", &req.name, "Nome da sala é obrigatório")?;
    let room_type = req.room_type.unwrap_or_else(|| "channel".to_string());
    require_one_of("type", &room_type, &ROOM_TYPES)?;
    let visibility = req.visibility.unwrap_or_else(|| "public".to_string());
    require_one_of("visibility", &visibility, &VISIBILITIES)?;

    let members: BTreeSet<i32> = req
        .participant_ids
        .into_iter()
        .filter(|id| *id != current_user.id)
        .collect();

    let now = crate::db::now();
    let txn = db.begin().await?;
    let room = chat_room::ActiveModel {
        name: Set(req.name.trim().to_string()),
        description: Set(req.description),
        is_group: Set(room_type != "direct"),
        room_type: Set(room_type),
        visibility: Set(visibility),
        created_by: Set(Some(current_user.id)),
        created_at: Set(now),
        updated_at: Set(now),
        last_message_at: Set(None),
        read_only: Set(false),
        archived: Set(false),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let owner = std::iter::once((current_user.id, true));
    let others = members.iter().map(|id| (*id, false));
    for (user_id, is_owner) in owner.chain(others) {
        chat_room_participant::ActiveModel {
            room_id: Set(room.id),
            user_id: Set(user_id),
            is_admin: Set(is_owner),
            is_owner: Set(is_owner),
            is_moderator: Set(false),
            joined_at: Set(now),
            last_seen_at: Set(Some(now)),
            muted: Set(false),
            ..Default::default()
        }
        .insert(&txn)
        .await?;
    }
    txn.commit().await?;

    let mut participant_ids = vec![current_user.id];
    participant_ids.extend(members);
    Ok(Created(RoomView {
        room,
        participant_ids,
        unread_count: 0,
    }))
}

/// GET /api/chat/rooms/:id/messages
pub async fn list_messages(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(room_id): Path<i32>,
    Query(query): Query<MessageQuery>,
) -> AppResult<Json<Vec<MessageView>>> {
    require_participant(&*db, room_id, current_user.id).await?;
    let (limit, offset) = query.window()?;
    let messages = load_messages(&*db, room_id, limit, offset).await?;
    Ok(Json(messages))
}

/// POST /api/chat/rooms/:id/read
pub async fn mark_room_read(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(room_id): Path<i32>,
) -> AppResult<StatusCode> {
    let participant = require_participant(&*db, room_id, current_user.id).await?;
    let mut active: chat_room_participant::ActiveModel = participant.into();
    active.last_seen_at = Set(Some(crate::db::now()));
    active.update(&*db).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/chat/unread
pub async fn get_unread(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
) -> AppResult<Json<UnreadResponse>> {
    let mut rooms = HashMap::new();
    for participant in memberships(&*db, current_user.id).await? {
        let count = unread_count(&*db, &participant).await?;
        if count > 0 {
            rooms.insert(participant.room_id, count);
        }
    }
    Ok(Json(UnreadResponse {
        total: rooms.values().sum(),
        rooms,
    }))
}

/// DELETE /api/chat/rooms/:id
pub async fn delete_room(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(room_id): Path<i32>,
) -> AppResult<StatusCode> {
    let participants = remove_room(&db, room_id, current_user.id, current_user.is_admin()).await?;
    announce_room_deleted(room_id, &participants);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn room(created_by: i32) -> chat_room::Model {
        let now = crate::db::now();
        chat_room::Model {
            id: 3,
            name: "Geral".into(),
            description: None,
            room_type: "channel".into(),
            visibility: "public".into(),
            is_group: true,
            created_by: Some(created_by),
            created_at: now,
            updated_at: now,
            last_message_at: None,
            read_only: false,
            archived: false,
        }
    }

    fn participant(user_id: i32) -> chat_room_participant::Model {
        chat_room_participant::Model {
            id: user_id,
            room_id: 3,
            user_id,
            is_admin: false,
            is_owner: false,
            is_moderator: false,
            joined_at: crate::db::now(),
            last_seen_at: None,
            muted: false,
        }
    }

    #[tokio::test]
    async fn test_non_participant_is_refused() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<chat_room_participant::Model>::new()])
            .into_connection();
        let err = require_participant(&db, 3, 42).await.unwrap_err();
        match err {
            AppError::Forbidden(message) => assert_eq!(message, NO_ACCESS),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_only_creator_or_admin_deletes_room() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![room(1)]])
            .into_connection();
        let err = remove_room(&db, 3, 2, false).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![room(1)]])
            .append_query_results([vec![participant(1), participant(2)]])
            .append_exec_results([
                MockExecResult { last_insert_id: 0, rows_affected: 4 },
                MockExecResult { last_insert_id: 0, rows_affected: 2 },
                MockExecResult { last_insert_id: 0, rows_affected: 1 },
            ])
            .into_connection();
        let participants = remove_room(&db, 3, 2, true).await.unwrap();
        assert_eq!(participants, vec![1, 2]);
    }

    #[test]
    fn test_message_window() {
        assert_eq!(MessageQuery::default().window().unwrap(), (DEFAULT_MESSAGE_LIMIT, 0));

        let query = MessageQuery { limit: Some(5000), offset: Some(20) };
        assert_eq!(query.window().unwrap(), (MAX_MESSAGE_LIMIT, 20));

        let query = MessageQuery { limit: Some(0), offset: Some(i64::MAX as u64) };
        assert_eq!(query.window().unwrap(), (DEFAULT_MESSAGE_LIMIT, i64::MAX as u64));

        let query = MessageQuery { limit: None, offset: Some(u64::MAX) };
        assert!(matches!(query.window(), Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let err = post_message(&db, 3, 1, "   ", None).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
