use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use super::Message;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("history writer is no longer running")]
    WriterClosed,
    #[error("history writer is {0} messages behind, message dropped")]
    WriterBacklogged(usize),
}

/// Per-room message chronology.
///
/// `save_message` is called from inside the broadcaster's dispatch and must
/// not wait on I/O; implementations backed by a database hand the write off.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    fn save_message(&self, room: &str, message: &Message) -> Result<(), HistoryError>;

    async fn get_messages(&self, room: &str) -> Result<Vec<Message>, HistoryError>;
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    history: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryStore {
    fn save_message(&self, room: &str, message: &Message) -> Result<(), HistoryError> {
        // TODO: cap each room's history; it grows for as long as the process runs.
        self.history
            .write()
            .entry(room.to_owned())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn get_messages(&self, room: &str) -> Result<Vec<Message>, HistoryError> {
        Ok(self.history.read().get(room).cloned().unwrap_or_default())
    }
}
