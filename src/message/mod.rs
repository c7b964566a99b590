mod sqlite;
mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub use sqlite::SqliteStore;
pub use store::{HistoryError, HistoryStore, InMemoryStore};

/// Value carried by the notification sent when a room is created.
pub const CREATE_ROOM_EVENT: &str = "create-room";

/// Unit of exchange between clients and the server.
///
/// `server_time` is assigned by the broadcaster when it accepts the message;
/// whatever a client puts in `serverTime` is discarded on decode.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub is_notification: bool,
    #[serde(default)]
    pub value: String,
    #[serde(
        default,
        skip_deserializing,
        serialize_with = "time::serde::rfc3339::option::serialize"
    )]
    pub server_time: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidMessage {
    #[error("message has no author")]
    MissingAuthor,
    #[error("message has no destination room")]
    MissingRoom,
}

impl Message {
    pub fn new(user: impl Into<String>, room: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            room: room.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn notification(user: impl Into<String>, room: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            is_notification: true,
            ..Self::new(user, room, event)
        }
    }

    /// Notifications may come from the system itself; everything else needs
    /// an author and a destination.
    pub fn validate(&self) -> Result<(), InvalidMessage> {
        if self.is_notification {
            return Ok(());
        }
        if self.user.is_empty() {
            return Err(InvalidMessage::MissingAuthor);
        }
        if self.room.is_empty() {
            return Err(InvalidMessage::MissingRoom);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn decode_discards_client_time() {
        let msg: Message = serde_json::from_value(json!({
            "user": "ultron",
            "room": "tower",
            "isNotification": false,
            "value": "Bow to me, minion!",
            "serverTime": "1999-01-01T00:00:00Z",
        }))
        .unwrap();

        assert_eq!(msg, Message::new("ultron", "tower", "Bow to me, minion!"));
        assert_eq!(msg.server_time, None);
    }

    #[test]
    fn decode_tolerates_missing_fields() {
        let msg: Message = serde_json::from_str(r#"{"value":"hi"}"#).unwrap();
        assert_eq!(msg.user, "");
        assert!(!msg.is_notification);
    }

    #[test]
    fn encode_uses_wire_names() {
        let mut msg = Message::new("jarvis", "tower", "Never!!!");
        msg.server_time = Some(datetime!(2024-05-01 12:30:00 UTC));

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "user": "jarvis",
                "room": "tower",
                "isNotification": false,
                "value": "Never!!!",
                "serverTime": "2024-05-01T12:30:00Z",
            })
        );
    }

    #[test]
    fn validation() {
        assert_eq!(Message::new("", "tower", "x").validate(), Err(InvalidMessage::MissingAuthor));
        assert_eq!(Message::new("jarvis", "", "x").validate(), Err(InvalidMessage::MissingRoom));
        assert_eq!(Message::new("jarvis", "tower", "").validate(), Ok(()));
        assert_eq!(Message::notification("", "", CREATE_ROOM_EVENT).validate(), Ok(()));
    }
}
