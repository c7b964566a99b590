//! The broadcaster: one task that owns every live connection.
//!
//! Nothing else touches the live set. Connections, HTTP handlers and tests
//! talk to it through a cloneable [`BroadcasterHandle`], and each event is
//! handled to completion before the next one is picked up.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{normalize_name, Registry};
use crate::message::{HistoryStore, Message};

use super::client::ClientHandle;

/// Publishing is a handoff: a reader waits until the broadcaster has room.
const MESSAGE_INTAKE_CAPACITY: usize = 1;
const CONTROL_INTAKE_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BroadcasterError {
    #[error("user {0} is already connected")]
    AlreadyRegistered(String),
    #[error("broadcaster is not running")]
    Closed,
}

type RegisteredQuery = (String, oneshot::Sender<bool>);

pub(crate) struct Intake {
    pub(crate) register: mpsc::Receiver<ClientHandle>,
    pub(crate) unregister: mpsc::Receiver<Uuid>,
    pub(crate) messages: mpsc::Receiver<Message>,
    pub(crate) queries: mpsc::Receiver<RegisteredQuery>,
}

/// Way in to the broadcaster's event loop.
#[derive(Debug, Clone)]
pub struct BroadcasterHandle {
    register: mpsc::Sender<ClientHandle>,
    unregister: mpsc::Sender<Uuid>,
    message: mpsc::Sender<Message>,
    query: mpsc::Sender<RegisteredQuery>,
}

impl BroadcasterHandle {
    pub(crate) fn channel() -> (Self, Intake) {
        let (register, register_rx) = mpsc::channel(CONTROL_INTAKE_CAPACITY);
        let (unregister, unregister_rx) = mpsc::channel(CONTROL_INTAKE_CAPACITY);
        let (message, message_rx) = mpsc::channel(MESSAGE_INTAKE_CAPACITY);
        let (query, query_rx) = mpsc::channel(CONTROL_INTAKE_CAPACITY);

        (
            Self { register, unregister, message, query },
            Intake {
                register: register_rx,
                unregister: unregister_rx,
                messages: message_rx,
                queries: query_rx,
            },
        )
    }

    pub async fn register(&self, client: ClientHandle) -> Result<(), BroadcasterError> {
        self.register.send(client).await.map_err(|_| BroadcasterError::Closed)
    }

    pub async fn unregister(&self, conn_id: Uuid) -> Result<(), BroadcasterError> {
        self.unregister.send(conn_id).await.map_err(|_| BroadcasterError::Closed)
    }

    pub async fn publish(&self, msg: Message) -> Result<(), BroadcasterError> {
        self.message.send(msg).await.map_err(|_| BroadcasterError::Closed)
    }

    /// Whether a live connection for this user is currently registered.
    pub async fn is_registered(&self, user_name: &str) -> Result<bool, BroadcasterError> {
        let (reply, answer) = oneshot::channel();
        self.query
            .send((normalize_name(user_name), reply))
            .await
            .map_err(|_| BroadcasterError::Closed)?;
        answer.await.map_err(|_| BroadcasterError::Closed)
    }
}

/// State that only the event loop touches.
struct LiveSet {
    clients: HashMap<Uuid, ClientHandle>,
    registry: Arc<Registry>,
    history: Arc<dyn HistoryStore>,
}

impl LiveSet {
    fn register(&mut self, client: ClientHandle) {
        if self.is_registered(&client.user.name) {
            tracing::warn!(user = %client.user.name, conn_id = %client.id, "user already has a live connection");
        }
        tracing::info!(user = %client.user.name, conn_id = %client.id, "client registered with broadcaster");
        self.clients.insert(client.id, client);
    }

    /// Dropping the handle closes the client's outbound queue.
    fn unregister(&mut self, conn_id: Uuid) {
        if let Some(client) = self.clients.remove(&conn_id) {
            tracing::info!(user = %client.user.name, conn_id = %conn_id, "client unregistered from broadcaster");
        }
    }

    fn is_registered(&self, user_name: &str) -> bool {
        self.clients.values().any(|c| c.user.name == user_name)
    }

    fn publish(&mut self, mut msg: Message) {
        msg.user = normalize_name(&msg.user);
        msg.room = normalize_name(&msg.room);
        if let Err(e) = msg.validate() {
            tracing::warn!(user = %msg.user, room = %msg.room, error = %e, "dropping invalid message");
            return;
        }

        msg.server_time = Some(OffsetDateTime::now_utc());
        if !msg.is_notification {
            if let Err(e) = self.history.save_message(&msg.room, &msg) {
                tracing::warn!(room = %msg.room, error = %e, "failed to save message to history");
            }
        }

        let recipients: Vec<Uuid> = if msg.is_notification {
            self.clients.keys().copied().collect()
        } else {
            let participants = match self.registry.list_participants(&msg.room) {
                Ok(users) => users,
                Err(e) => {
                    tracing::warn!(user = %msg.user, room = %msg.room, error = %e, "message has no recipients");
                    return;
                }
            };
            let names: HashSet<&str> = participants.iter().map(|u| u.name.as_str()).collect();
            self.clients
                .values()
                .filter(|c| names.contains(c.user.name.as_str()))
                .map(|c| c.id)
                .collect()
        };

        let msg = Arc::new(msg);
        let mut delivered = 0usize;
        for conn_id in recipients {
            let Some(client) = self.clients.get(&conn_id) else {
                continue;
            };
            if client.try_send(msg.clone()) {
                delivered += 1;
                continue;
            }

            tracing::warn!(user = %client.user.name, conn_id = %conn_id, "client not keeping up, disconnecting");
            self.clients.remove(&conn_id);
        }

        tracing::debug!(
            user = %msg.user,
            room = %msg.room,
            notification = msg.is_notification,
            delivered,
            "message dispatched"
        );
    }
}

pub struct Broadcaster {
    intake: Intake,
    live: LiveSet,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>, history: Arc<dyn HistoryStore>) -> (Self, BroadcasterHandle) {
        let (handle, intake) = BroadcasterHandle::channel();
        let broadcaster = Self {
            intake,
            live: LiveSet {
                clients: HashMap::new(),
                registry,
                history,
            },
        };
        (broadcaster, handle)
    }

    /// Runs until `cancel` fires or every handle has been dropped.
    ///
    /// Cancellation is only noticed between events.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("broadcaster started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(clients = self.live.clients.len(), "stopping broadcaster");
                    return;
                }
                Some(client) = self.intake.register.recv() => self.live.register(client),
                Some(conn_id) = self.intake.unregister.recv() => self.live.unregister(conn_id),
                Some((user, reply)) = self.intake.queries.recv() => {
                    let _ = reply.send(self.live.is_registered(&user));
                }
                msg = self.intake.messages.recv() => match msg {
                    Some(msg) => self.live.publish(msg),
                    None => {
                        tracing::info!("all broadcaster handles dropped, stopping");
                        return;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::Receiver;

    use super::*;
    use crate::domain::User;
    use crate::message::{InMemoryStore, CREATE_ROOM_EVENT};

    struct Fixture {
        live: LiveSet,
        registry: Arc<Registry>,
        history: Arc<InMemoryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(Registry::new());
            let history = Arc::new(InMemoryStore::new());
            let (broadcaster, _handle) = Broadcaster::new(registry.clone(), history.clone());
            Self {
                live: broadcaster.live,
                registry,
                history,
            }
        }

        fn connect(&mut self, name: &str) -> (Uuid, Receiver<Arc<Message>>) {
            let (user, _) = self.registry.find_or_create_user(name);
            let (client, queue) = ClientHandle::new(user);
            let id = client.id;
            self.live.register(client);
            (id, queue)
        }
    }

    /// a and b share room x, c sits alone in y.
    fn three_users() -> (Fixture, [Receiver<Arc<Message>>; 3]) {
        let mut fx = Fixture::new();
        let (_, a) = fx.connect("a");
        let (_, b) = fx.connect("b");
        let (_, c) = fx.connect("c");
        fx.registry.create_room("x", "a").unwrap();
        fx.registry.join_room("b", "x").unwrap();
        fx.registry.create_room("y", "c").unwrap();
        (fx, [a, b, c])
    }

    #[test]
    fn room_message_reaches_only_room_members() {
        let (mut fx, [mut a, mut b, mut c]) = three_users();

        fx.live.publish(Message::new("a", "x", "hi"));

        assert_eq!(b.try_recv().unwrap().value, "hi");
        assert_eq!(a.try_recv().unwrap().value, "hi");
        assert!(c.try_recv().is_err());
    }

    #[test]
    fn notification_reaches_everyone() {
        let mut fx = Fixture::new();
        let (_, mut member) = fx.connect("jarvis");
        let (_, mut loner) = fx.connect("ultron");
        fx.registry.create_room("tower", "jarvis").unwrap();

        fx.live.publish(Message::notification("jarvis", "tower", CREATE_ROOM_EVENT));

        for queue in [&mut member, &mut loner] {
            let msg = queue.try_recv().unwrap();
            assert!(msg.is_notification);
            assert_eq!(msg.value, CREATE_ROOM_EVENT);
        }
    }

    #[test]
    fn system_notification_without_author_is_delivered() {
        let mut fx = Fixture::new();
        let (_, mut queue) = fx.connect("jarvis");

        fx.live.publish(Message::notification("", "", "maintenance"));

        assert_eq!(queue.try_recv().unwrap().value, "maintenance");
    }

    #[test]
    fn slow_recipient_is_dropped() {
        let (mut fx, [mut a, mut b, _c]) = three_users();

        fx.live.publish(Message::new("a", "x", "first"));
        // a drains, b does not
        a.try_recv().unwrap();
        fx.live.publish(Message::new("a", "x", "second"));

        assert!(!fx.live.is_registered("b"));
        assert!(fx.live.is_registered("a"));
        assert_eq!(b.try_recv().unwrap().value, "first");
        assert!(matches!(b.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));

        assert_eq!(a.try_recv().unwrap().value, "second");
        fx.live.publish(Message::new("a", "x", "third"));
        assert_eq!(a.try_recv().unwrap().value, "third");
        assert_eq!(fx.live.clients.len(), 2);
    }

    #[test]
    fn recipient_with_closed_queue_is_dropped() {
        let mut fx = Fixture::new();
        let (_, queue) = fx.connect("jarvis");
        drop(queue);

        fx.live.publish(Message::notification("", "", "ping"));

        assert!(fx.live.clients.is_empty());
    }

    #[test]
    fn server_time_is_assigned_on_acceptance() {
        let (mut fx, [_a, mut b, _c]) = three_users();
        let mut msg = Message::new("a", "x", "hi");
        msg.server_time = Some(OffsetDateTime::UNIX_EPOCH);

        let before = OffsetDateTime::now_utc();
        fx.live.publish(msg);
        let after = OffsetDateTime::now_utc();

        let stamped = b.try_recv().unwrap().server_time.unwrap();
        assert!(before <= stamped && stamped <= after);
    }

    #[tokio::test]
    async fn accepted_messages_are_persisted_with_their_timestamp() {
        let (mut fx, [_a, mut b, _c]) = three_users();

        fx.live.publish(Message::new("a", "x", "hi"));

        let delivered = b.try_recv().unwrap();
        let stored = fx.history.get_messages("x").await.unwrap();
        assert_eq!(stored, vec![(*delivered).clone()]);
    }

    #[tokio::test]
    async fn invalid_message_is_neither_delivered_nor_persisted() {
        let (mut fx, [mut a, mut b, _c]) = three_users();

        fx.live.publish(Message::new("", "x", "anonymous"));
        fx.live.publish(Message::new("a", "", "nowhere"));

        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_err());
        assert!(fx.history.get_messages("x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn names_are_normalized_before_dispatch() {
        let (mut fx, [mut a, mut b, _c]) = three_users();

        fx.live.publish(Message::new(" A ", "X", "shouting"));
        fx.live.publish(Message::new("a", "   ", "into the void"));

        let delivered = b.try_recv().unwrap();
        assert_eq!((delivered.user.as_str(), delivered.room.as_str()), ("a", "x"));
        assert_eq!(a.try_recv().unwrap().value, "shouting");
        assert!(a.try_recv().is_err());

        let stored = fx.history.get_messages("x").await.unwrap();
        assert_eq!(stored, vec![(*delivered).clone()]);
        assert!(fx.history.get_messages("X").await.unwrap().is_empty());
        assert!(fx.history.get_messages("   ").await.unwrap().is_empty());
        assert!(fx.history.get_messages("").await.unwrap().is_empty());
    }

    #[test]
    fn second_connection_for_a_user_is_still_tracked() {
        let mut fx = Fixture::new();
        let (first, _q1) = fx.connect("jarvis");
        let (second, _q2) = fx.connect("jarvis");

        assert_eq!(fx.live.clients.len(), 2);
        fx.live.unregister(first);
        assert!(fx.live.is_registered("jarvis"));
        fx.live.unregister(second);
        assert!(!fx.live.is_registered("jarvis"));
    }

    #[tokio::test]
    async fn notifications_stay_out_of_history() {
        let (mut fx, _queues) = three_users();

        fx.live.publish(Message::notification("a", "x", CREATE_ROOM_EVENT));

        assert!(fx.history.get_messages("x").await.unwrap().is_empty());
    }

    #[test]
    fn recipients_follow_membership_at_dispatch_time() {
        let (mut fx, [_a, mut b, _c]) = three_users();
        let msg = Message::new("a", "x", "after you left");

        fx.registry.leave_room("b", "x").unwrap();
        fx.live.publish(msg);

        assert!(b.try_recv().is_err());
    }

    #[test]
    fn message_to_unknown_room_is_not_delivered() {
        let (mut fx, [mut a, _b, _c]) = three_users();

        fx.live.publish(Message::new("a", "atlantis", "hello?"));

        assert!(a.try_recv().is_err());
    }

    #[test]
    fn unregister_closes_queue_and_tolerates_repeats() {
        let mut fx = Fixture::new();
        let (id, mut queue) = fx.connect("jarvis");

        fx.live.unregister(id);
        fx.live.unregister(id);

        assert!(!fx.live.is_registered("jarvis"));
        assert!(matches!(queue.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
    }

    #[tokio::test]
    async fn run_serves_handle_until_cancelled() {
        let registry = Arc::new(Registry::new());
        let (broadcaster, handle) = Broadcaster::new(registry.clone(), Arc::new(InMemoryStore::new()));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(broadcaster.run(cancel.clone()));

        let user = Arc::new(User { name: "jarvis".into() });
        let (client, mut queue) = ClientHandle::new(user);
        let id = client.id;
        handle.register(client).await.unwrap();
        // register and query travel on different channels
        tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.is_registered("Jarvis").await.unwrap() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        handle.publish(Message::notification("", "", "hello")).await.unwrap();
        let msg = tokio::time::timeout(Duration::from_secs(5), queue.recv()).await.unwrap().unwrap();
        assert_eq!(msg.value, "hello");
        assert!(msg.server_time.is_some());

        handle.unregister(id).await.unwrap();
        assert!(tokio::time::timeout(Duration::from_secs(5), queue.recv()).await.unwrap().is_none());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert_eq!(handle.publish(Message::default()).await, Err(BroadcasterError::Closed));
        assert_eq!(handle.is_registered("jarvis").await, Err(BroadcasterError::Closed));
    }

    #[tokio::test]
    async fn run_stops_when_handles_are_dropped() {
        let (broadcaster, handle) = Broadcaster::new(Arc::new(Registry::new()), Arc::new(InMemoryStore::new()));
        let task = tokio::spawn(broadcaster.run(CancellationToken::new()));

        drop(handle);

        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }
}
