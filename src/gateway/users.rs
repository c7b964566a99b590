use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;

use crate::{
    chat::BroadcasterHandle,
    domain::{normalize_name, Registry, Room},
    message::{Message, CREATE_ROOM_EVENT},
    AppResult, AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{user}/rooms", get(list_rooms_with_user))
        .route("/{user}/rooms/{room}", post(create_room))
        .route("/{user}/rooms/{room}/membership", put(join_room).delete(leave_room))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoomWithUser {
    room: Arc<Room>,
    user_is_participant: bool,
}

#[debug_handler(state = AppState)]
pub(crate) async fn list_rooms_with_user(
    Path(user_name): Path<String>,
    State(registry): State<Arc<Registry>>,
) -> Json<Vec<RoomWithUser>> {
    let user_name = normalize_name(&user_name);
    let mut rooms: Vec<RoomWithUser> = registry
        .list_participants_for_all_rooms()
        .into_iter()
        .map(|participation| RoomWithUser {
            user_is_participant: participation.participants.iter().any(|u| u.name == user_name),
            room: participation.room,
        })
        .collect();
    rooms.sort_by(|a, b| a.room.name.cmp(&b.room.name));
    Json(rooms)
}

/// Creates the room, then tells every live client so they can refresh their
/// room lists.
#[debug_handler(state = AppState)]
pub(crate) async fn create_room(
    Path((user_name, room_name)): Path<(String, String)>,
    State(registry): State<Arc<Registry>>,
    State(broadcaster): State<BroadcasterHandle>,
) -> AppResult<(StatusCode, Json<Arc<Room>>)> {
    let room = registry.create_room(&room_name, &user_name)?;
    let creator = room.creator.clone().unwrap_or_default();
    tracing::info!(user = %creator, room = %room.name, "user created and joined room");

    broadcaster
        .publish(Message::notification(creator, room.name.clone(), CREATE_ROOM_EVENT))
        .await?;

    Ok((StatusCode::CREATED, Json(room)))
}

#[debug_handler(state = AppState)]
pub(crate) async fn join_room(
    Path((user_name, room_name)): Path<(String, String)>,
    State(registry): State<Arc<Registry>>,
) -> AppResult<StatusCode> {
    registry.join_room(&user_name, &room_name)?;
    tracing::info!(user = %normalize_name(&user_name), room = %normalize_name(&room_name), "user joined room");
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
pub(crate) async fn leave_room(
    Path((user_name, room_name)): Path<(String, String)>,
    State(registry): State<Arc<Registry>>,
) -> AppResult<StatusCode> {
    registry.leave_room(&user_name, &room_name)?;
    tracing::info!(user = %normalize_name(&user_name), room = %normalize_name(&room_name), "user left room");
    Ok(StatusCode::NO_CONTENT)
}
