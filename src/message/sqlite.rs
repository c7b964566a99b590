use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{HistoryError, HistoryStore, Message};

/// Saves waiting for the writer. Past this the database is not keeping up
/// and new messages are left out of history rather than queued.
const WRITE_BACKLOG: usize = 1024;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    room TEXT NOT NULL,
    author TEXT NOT NULL,
    is_notification BOOLEAN NOT NULL,
    body TEXT NOT NULL,
    server_time INTEGER
)";

type MessageRow = (String, String, bool, String, Option<i64>);

/// History kept in an append-only SQLite table.
///
/// Inserts go through a single writer task, which keeps per-room order and
/// lets `save_message` return without touching the database.
pub struct SqliteStore {
    pool: SqlitePool,
    writer: mpsc::Sender<(String, Message)>,
}

impl SqliteStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, HistoryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, HistoryError> {
        sqlx::query(SCHEMA).execute(&pool).await?;

        let (writer, rx) = mpsc::channel(WRITE_BACKLOG);
        tokio::spawn(write_loop(pool.clone(), rx));

        Ok(Self { pool, writer })
    }
}

async fn write_loop(pool: SqlitePool, mut rx: mpsc::Receiver<(String, Message)>) {
    while let Some((room, msg)) = rx.recv().await {
        let server_time = msg
            .server_time
            .and_then(|t| i64::try_from(t.unix_timestamp_nanos()).ok());

        let result = sqlx::query("INSERT INTO messages (room,author,is_notification,body,server_time) VALUES (?,?,?,?,?)")
            .bind(&room)
            .bind(&msg.user)
            .bind(msg.is_notification)
            .bind(&msg.value)
            .bind(server_time)
            .execute(&pool)
            .await;

        if let Err(e) = result {
            tracing::warn!(room = %room, user = %msg.user, error = %e, "failed to persist message");
        }
    }
    tracing::debug!("history writer stopped");
}

#[async_trait]
impl HistoryStore for SqliteStore {
    fn save_message(&self, room: &str, message: &Message) -> Result<(), HistoryError> {
        self.writer
            .try_send((room.to_owned(), message.clone()))
            .map_err(|e| match e {
                TrySendError::Full(_) => HistoryError::WriterBacklogged(WRITE_BACKLOG),
                TrySendError::Closed(_) => HistoryError::WriterClosed,
            })
    }

    async fn get_messages(&self, room: &str) -> Result<Vec<Message>, HistoryError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT author,room,is_notification,body,server_time FROM messages WHERE room=? ORDER BY id",
        )
        .bind(room)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user, room, is_notification, value, server_time)| Message {
                user,
                room,
                is_notification,
                value,
                server_time: server_time
                    .and_then(|n| OffsetDateTime::from_unix_timestamp_nanos(n.into()).ok()),
            })
            .collect())
    }
}
