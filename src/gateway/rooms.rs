use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, routing::get, Json, Router};

use crate::{
    domain::{normalize_name, Registry, RegistryError, Room},
    message::{HistoryStore, Message},
    AppResult, AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_rooms))
        .route("/{room}/messages", get(room_history))
}

#[debug_handler(state = AppState)]
pub(crate) async fn list_rooms(
    State(registry): State<Arc<Registry>>,
) -> Json<Vec<Arc<Room>>> {
    let mut rooms = registry.list_rooms();
    rooms.sort_by(|a, b| a.name.cmp(&b.name));
    Json(rooms)
}

#[debug_handler(state = AppState)]
pub(crate) async fn room_history(
    Path(room_name): Path<String>,
    State(registry): State<Arc<Registry>>,
    State(history): State<Arc<dyn HistoryStore>>,
) -> AppResult<Json<Vec<Message>>> {
    let Some(room) = registry.find_room(&room_name) else {
        return Err(RegistryError::UnknownRoom(normalize_name(&room_name)).into());
    };

    Ok(Json(history.get_messages(&room.name).await?))
}
