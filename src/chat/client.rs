use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::User;
use crate::message::Message;

use super::broadcaster::BroadcasterHandle;

/// A connection's outbound queue holds a single message. A client that has
/// not taken the previous one by the next push is considered gone.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 1;

/// The broadcaster's view of one connection.
///
/// It holds the only sender of the connection's outbound queue, so dropping
/// it closes the queue and lets the writer shut the socket.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: Uuid,
    pub user: Arc<User>,
    send: mpsc::Sender<Arc<Message>>,
}

impl ClientHandle {
    pub fn new(user: Arc<User>) -> (Self, mpsc::Receiver<Arc<Message>>) {
        let (send, queue) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let handle = Self {
            id: Uuid::now_v7(),
            user,
            send,
        };
        (handle, queue)
    }

    /// Pushes without waiting. `false` means the queue was full or closed.
    pub fn try_send(&self, msg: Arc<Message>) -> bool {
        self.send.try_send(msg).is_ok()
    }
}

/// One user's WebSocket session.
pub struct UserSocket {
    user: Arc<User>,
    broadcaster: BroadcasterHandle,
}

impl UserSocket {
    pub fn new(user: Arc<User>, broadcaster: BroadcasterHandle) -> Self {
        Self { user, broadcaster }
    }

    /// Registers with the broadcaster and pumps messages both ways until the
    /// connection ends.
    pub async fn serve(self, socket: WebSocket) {
        let (client, queue) = ClientHandle::new(self.user.clone());
        let conn_id = client.id;
        let (sink, stream) = socket.split();

        if let Err(e) = self.broadcaster.register(client).await {
            tracing::warn!(user = %self.user.name, error = %e, "could not register connection");
            return;
        }

        let writer = tokio::spawn(write_loop(conn_id, sink, queue));
        read_loop(&self.user, conn_id, &self.broadcaster, stream).await;

        if let Err(e) = writer.await {
            tracing::warn!(user = %self.user.name, conn_id = %conn_id, error = %e, "writer task failed");
        }
        tracing::info!(user = %self.user.name, conn_id = %conn_id, "connection finished");
    }
}

/// Forwards decoded messages to the broadcaster until the transport closes,
/// then unregisters the connection.
pub(crate) async fn read_loop<S>(user: &User, conn_id: Uuid, broadcaster: &BroadcasterHandle, mut stream: S)
where
    S: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        let decoded = match frame {
            Ok(WsMessage::Text(text)) => serde_json::from_str::<Message>(text.as_str()),
            Ok(WsMessage::Binary(data)) => serde_json::from_slice::<Message>(&data),
            Ok(WsMessage::Close(frame)) => {
                tracing::info!(user = %user.name, conn_id = %conn_id, reason = ?frame, "client closed connection");
                break;
            }
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => continue,
            Err(e) => {
                tracing::info!(user = %user.name, conn_id = %conn_id, error = %e, "connection closed while reading");
                break;
            }
        };

        let msg = match decoded {
            // notifications only originate on the server
            Ok(msg) => Message { is_notification: false, ..msg },
            Err(e) => {
                tracing::warn!(user = %user.name, conn_id = %conn_id, error = %e, "could not decode message");
                continue;
            }
        };

        if broadcaster.publish(msg).await.is_err() {
            tracing::info!(user = %user.name, conn_id = %conn_id, "broadcaster stopped, closing connection");
            break;
        }
    }

    // a no-op if the broadcaster already dropped this connection
    let _ = broadcaster.unregister(conn_id).await;
}

/// Writes queued messages to the transport. When the broadcaster closes the
/// queue, sends a close frame and returns.
pub(crate) async fn write_loop<K>(conn_id: Uuid, mut sink: K, mut queue: mpsc::Receiver<Arc<Message>>)
where
    K: Sink<WsMessage> + Unpin,
    K::Error: Display,
{
    while let Some(msg) = queue.recv().await {
        let text = match serde_json::to_string(&*msg) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, error = %e, "could not encode message");
                continue;
            }
        };

        if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
            tracing::info!(conn_id = %conn_id, error = %e, "connection closed while writing");
            return;
        }
    }

    let close = WsMessage::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: "".into(),
    }));
    if let Err(e) = sink.send(close).await {
        tracing::debug!(conn_id = %conn_id, error = %e, "close frame not sent");
    }
    let _ = sink.close().await;
}
