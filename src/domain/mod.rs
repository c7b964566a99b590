mod error;
mod repo;

use std::sync::Arc;

use serde::Serialize;

pub use error::RegistryError;
pub use repo::Registry;

/// Room every registry starts with. It has no creator and is never deleted.
pub const DEFAULT_ROOM: &str = "general";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    pub name: String,
    pub creator: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomParticipation {
    pub room: Arc<Room>,
    pub participants: Vec<Arc<User>>,
}

/// User and room names are compared case-insensitively.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}
