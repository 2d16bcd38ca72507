use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use scdio_types::events::{GatewayEvent, Room};

/// One broadcast: the event, the room it is scoped to and optionally the
/// connection that caused it (which does not get an echo).
#[derive(Debug, Clone)]
pub struct Envelope {
    pub room: Room,
    pub event: GatewayEvent,
    pub except: Option<Uuid>,
}

impl Envelope {
    pub fn is_for(&self, conn_id: Uuid, rooms: &Rooms) -> bool {
        self.except != Some(conn_id) && rooms.contains(self.room)
    }
}

/// Rooms a single connection has joined. `Global` is implicit.
#[derive(Debug, Default, Clone)]
pub struct Rooms {
    joined: HashSet<Room>,
}

impl Rooms {
    pub fn contains(&self, room: Room) -> bool {
        room == Room::Global || self.joined.contains(&room)
    }

    pub fn join(&mut self, room: Room) {
        if room != Room::Global {
            self.joined.insert(room);
        }
    }

    pub fn leave(&mut self, room: Room) {
        self.joined.remove(&room);
    }
}

/// Fans gateway events out to connected clients and tracks who is online.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection receives every envelope and filters by its rooms.
    broadcast_tx: broadcast::Sender<Arc<Envelope>>,

    /// user_id -> (username, open connection count)
    online_users: RwLock<HashMap<i64, (String, usize)>>,

    /// Targeted replies: conn_id -> sender
    connections: RwLock<HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.inner.broadcast_tx.subscribe()
    }

    pub fn broadcast(&self, room: Room, event: GatewayEvent) {
        self.send_envelope(Envelope {
            room,
            event,
            except: None,
        });
    }

    /// Like `broadcast`, skipping the originating connection.
    pub fn broadcast_except(&self, room: Room, event: GatewayEvent, conn_id: Uuid) {
        self.send_envelope(Envelope {
            room,
            event,
            except: Some(conn_id),
        });
    }

    fn send_envelope(&self, envelope: Envelope) {
        // Err only means nobody is connected.
        if self.inner.broadcast_tx.send(Arc::new(envelope)).is_err() {
            debug!("No gateway subscribers, event dropped");
        }
    }

    /// Register a targeted channel for a new connection. Returns (conn_id, receiver).
    pub async fn register_connection(&self) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(conn_id, tx);
        (conn_id, rx)
    }

    pub async fn unregister_connection(&self, conn_id: Uuid) {
        self.inner.connections.write().await.remove(&conn_id);
    }

    /// Send an event to one connection only.
    pub async fn send_to(&self, conn_id: Uuid, event: GatewayEvent) {
        if let Some(tx) = self.inner.connections.read().await.get(&conn_id) {
            let _ = tx.send(event);
        }
    }

    /// Count a new connection for the user. On the first one, broadcasts
    /// presence `online` and returns true.
    pub async fn user_online(&self, user_id: i64, username: &str) -> bool {
        let first = {
            let mut online = self.inner.online_users.write().await;
            let entry = online.entry(user_id).or_insert_with(|| (username.to_string(), 0));
            entry.1 += 1;
            entry.1 == 1
        };

        if first {
            self.broadcast(
                Room::Global,
                GatewayEvent::UserPresence {
                    user_id,
                    username: username.to_string(),
                    status: "online".into(),
                },
            );
        }
        first
    }

    /// Drop one connection for the user. When it was the last one, broadcasts
    /// presence `offline` and returns true.
    pub async fn user_offline(&self, user_id: i64) -> bool {
        let gone = {
            let mut online = self.inner.online_users.write().await;
            match online.get_mut(&user_id) {
                Some(entry) if entry.1 > 1 => {
                    entry.1 -= 1;
                    None
                }
                Some(_) => online.remove(&user_id).map(|(name, _)| name),
                None => None,
            }
        };

        match gone {
            Some(username) => {
                self.broadcast(
                    Room::Global,
                    GatewayEvent::UserPresence {
                        user_id,
                        username,
                        status: "offline".into(),
                    },
                );
                true
            }
            None => false,
        }
    }

    pub async fn online_users(&self) -> Vec<(i64, String)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(id, (name, _))| (*id, name.clone()))
            .collect()
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.inner.online_users.read().await.contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rooms_always_include_global() {
        let mut rooms = Rooms::default();
        assert!(rooms.contains(Room::Global));
        assert!(!rooms.contains(Room::Channel(1)));

        rooms.join(Room::Channel(1));
        assert!(rooms.contains(Room::Channel(1)));
        assert!(!rooms.contains(Room::Server(1)));

        rooms.leave(Room::Channel(1));
        rooms.leave(Room::Global);
        assert!(!rooms.contains(Room::Channel(1)));
        assert!(rooms.contains(Room::Global));
    }

    #[test]
    fn test_envelope_skips_origin() {
        let origin = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut rooms = Rooms::default();
        rooms.join(Room::Channel(5));

        let envelope = Envelope {
            room: Room::Channel(5),
            event: GatewayEvent::error("x"),
            except: Some(origin),
        };
        assert!(!envelope.is_for(origin, &rooms));
        assert!(envelope.is_for(other, &rooms));
        assert!(!envelope.is_for(other, &Rooms::default()));
    }

    #[tokio::test]
    async fn test_presence_counts_connections() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        assert!(dispatcher.user_online(1, "aiko").await);
        assert!(!dispatcher.user_online(1, "aiko").await);
        assert!(dispatcher.is_online(1).await);

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.room, Room::Global);
        assert!(matches!(
            &envelope.event,
            GatewayEvent::UserPresence { user_id: 1, status, .. } if status == "online"
        ));

        assert!(!dispatcher.user_offline(1).await);
        assert!(dispatcher.is_online(1).await);
        assert!(dispatcher.user_offline(1).await);
        assert!(!dispatcher.is_online(1).await);
        assert!(!dispatcher.user_offline(1).await);

        let envelope = rx.recv().await.unwrap();
        assert!(matches!(
            &envelope.event,
            GatewayEvent::UserPresence { status, .. } if status == "offline"
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_targeted_send() {
        let dispatcher = Dispatcher::new();
        let (conn_id, mut rx) = dispatcher.register_connection().await;

        dispatcher.send_to(conn_id, GatewayEvent::error("hello")).await;
        assert!(matches!(rx.recv().await, Some(GatewayEvent::Error { error }) if error == "hello"));

        dispatcher.unregister_connection(conn_id).await;
        assert!(rx.recv().await.is_none());
    }
}
