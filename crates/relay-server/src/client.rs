use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use relay_core::{ConnectionId, RoomTransport, ServerEvent, SessionCode};

use crate::protocol;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// A connected WebSocket client.
pub struct Client {
    pub id: ConnectionId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    /// Milliseconds since the registry epoch at the last pong.
    last_pong: AtomicU64,
    client_type: Mutex<Option<String>>,
    close: CancellationToken,
}

impl Client {
    fn new(id: ConnectionId, tx: mpsc::Sender<String>, now_ms: u64) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_ms),
            client_type: Mutex::new(None),
            close: CancellationToken::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn client_type(&self) -> Option<String> {
        self.client_type.lock().clone()
    }

    fn try_send(&self, message: String) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    msg_len = msg.len(),
                    "Send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Registry of all connected WebSocket clients and their session rooms.
pub struct ClientRegistry {
    clients: DashMap<ConnectionId, Arc<Client>>,
    rooms: DashMap<SessionCode, HashSet<ConnectionId>>,
    max_send_queue: usize,
    epoch: Instant,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            rooms: DashMap::new(),
            max_send_queue,
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Register a new client and return its ID + outbound queue.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let client = Arc::new(Client::new(id.clone(), tx, self.now_ms()));
        self.clients.insert(id.clone(), client);
        (id, rx)
    }

    /// Remove a client and all of its room memberships.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let Some((_, client)) = self.clients.remove(id) else {
            return false;
        };
        client.connected.store(false, Ordering::Relaxed);
        self.rooms.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
        true
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    pub fn set_client_type(&self, id: &ConnectionId, client_type: impl Into<String>) -> bool {
        match self.clients.get(id) {
            Some(client) => {
                *client.client_type.lock() = Some(client_type.into());
                true
            }
            None => false,
        }
    }

    pub fn record_pong(&self, id: &ConnectionId) {
        if let Some(client) = self.clients.get(id) {
            client.last_pong.store(self.now_ms(), Ordering::Relaxed);
        }
    }

    fn is_alive(&self, client: &Client) -> bool {
        let last = client.last_pong.load(Ordering::Relaxed);
        self.now_ms().saturating_sub(last) < CLIENT_TIMEOUT.as_millis() as u64
    }

    /// Send a pre-encoded frame to one client.
    pub fn send_raw(&self, id: &ConnectionId, message: String) -> bool {
        match self.clients.get(id) {
            Some(client) => client.try_send(message),
            None => false,
        }
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    pub fn room_members(&self, room: &SessionCode) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Signal clients that stopped answering pings to close. Their connection tasks run the
    /// normal disconnect path.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<Arc<Client>> = self
            .clients
            .iter()
            .filter(|entry| !self.is_alive(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for client in &dead {
            client.close.cancel();
            tracing::info!(connection_id = %client.id, "Closing dead client");
        }
        dead.len()
    }

    /// Ask every client to close.
    pub fn close_all(&self) {
        for entry in self.clients.iter() {
            entry.value().close.cancel();
        }
    }
}

impl RoomTransport for ClientRegistry {
    fn join(&self, connection: &ConnectionId, room: &SessionCode) {
        if self.clients.contains_key(connection) {
            self.rooms
                .entry(room.clone())
                .or_default()
                .insert(connection.clone());
        }
    }

    fn leave(&self, connection: &ConnectionId, room: &SessionCode) {
        let now_empty = match self.rooms.get_mut(room) {
            Some(mut members) => {
                members.remove(connection);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
    }

    fn send_to(&self, connection: &ConnectionId, event: &ServerEvent) -> bool {
        match protocol::encode_event(event) {
            Some(frame) => self.send_raw(connection, frame),
            None => false,
        }
    }

    fn send_to_room(
        &self,
        room: &SessionCode,
        event: &ServerEvent,
        except: Option<&ConnectionId>,
    ) -> usize {
        let Some(frame) = protocol::encode_event(event) else {
            return 0;
        };
        self.room_members(room)
            .iter()
            .filter(|member| Some(*member) != except)
            .filter(|member| self.send_raw(member, frame.clone()))
            .count()
    }

    fn send_to_all(&self, event: &ServerEvent) -> usize {
        let Some(frame) = protocol::encode_event(event) else {
            return 0;
        };
        self.clients
            .iter()
            .filter(|entry| entry.value().try_send(frame.clone()))
            .count()
    }
}

/// Drive one WebSocket connection until it closes.
///
/// A writer task forwards queued frames and sends a ping every [`HEARTBEAT_INTERVAL`]. Inbound
/// text frames are handed to `on_message` one at a time, so a client's frames are processed in
/// order. Returns once either side stops or the client is told to close. A frame already being
/// dispatched is allowed to finish; only the wait for the next frame is cut short.
pub async fn handle_ws_connection<F, Fut>(
    socket: WebSocket,
    client_id: ConnectionId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ClientRegistry>,
    on_message: F,
) where
    F: Fn(ConnectionId, String) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let Some(client) = registry.get(&client_id) else {
        return;
    };
    let close = client.close.clone();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_cid, "Sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader_cid = client_id.clone();
    let reader_registry = Arc::clone(&registry);
    let stop_reading = close.child_token();
    let reader_stop = stop_reading.clone();
    let mut reader = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = reader_stop.cancelled() => break,
                msg = ws_rx.next() => msg,
            };
            match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    on_message(reader_cid.clone(), text.as_str().to_owned()).await
                }
                Some(Ok(WsMessage::Pong(_))) => reader_registry.record_pong(&reader_cid),
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    });

    let reader_finished = tokio::select! {
        _ = &mut writer => false,
        _ = &mut reader => true,
        _ = close.cancelled() => {
            tracing::debug!(connection_id = %client_id, "Connection closed by server");
            false
        },
    };
    writer.abort();
    stop_reading.cancel();
    if !reader_finished {
        let _ = reader.await;
    }

    client.connected.store(false, Ordering::Relaxed);
}

/// Start a background task that periodically closes dead clients.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed, "Dead client cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn decode(frame: String) -> Value {
        serde_json::from_str(&frame).unwrap()
    }

    #[test]
    fn registry_register_and_unregister() {
        let registry = ClientRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_eq!(registry.count(), 2);
        assert!(id1.as_str().starts_with("conn_"));

        assert!(registry.unregister(&id1));
        assert!(!registry.unregister(&id1));
        assert_eq!(registry.count(), 1);

        registry.unregister(&id2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn room_send_skips_sender_and_outsiders() {
        let registry = ClientRegistry::new(32);
        let (a, mut rx_a) = registry.register();
        let (b, mut rx_b) = registry.register();
        let (_c, mut rx_c) = registry.register();
        let room = SessionCode::from_number(1);
        registry.join(&a, &room);
        registry.join(&b, &room);

        let event = ServerEvent::SessionStale { code: room.clone() };
        assert_eq!(registry.send_to_room(&room, &event, Some(&a)), 1);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(decode(rx_b.try_recv().unwrap())["event"], "session-stale");
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn leave_and_unregister_clean_rooms() {
        let registry = ClientRegistry::new(32);
        let (a, _rx_a) = registry.register();
        let (b, _rx_b) = registry.register();
        let room = SessionCode::from_number(2);
        registry.join(&a, &room);
        registry.join(&b, &room);

        registry.leave(&a, &room);
        assert_eq!(registry.room_members(&room), vec![b.clone()]);
        registry.unregister(&b);
        assert!(registry.room_members(&room).is_empty());
        assert!(registry.rooms.is_empty());
    }

    #[test]
    fn unknown_connection_cannot_join() {
        let registry = ClientRegistry::new(32);
        let room = SessionCode::from_number(3);
        registry.join(&ConnectionId::from_raw("conn_ghost"), &room);
        assert!(registry.room_members(&room).is_empty());
    }

    #[test]
    fn broadcast_reaches_everyone() {
        let registry = ClientRegistry::new(32);
        let (_a, mut rx_a) = registry.register();
        let (_b, mut rx_b) = registry.register();
        let sent = registry.send_to_all(&ServerEvent::ClientCount { count: 2 });
        assert_eq!(sent, 2);
        assert_eq!(decode(rx_a.try_recv().unwrap())["data"]["count"], 2);
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn send_to_full_queue_drops() {
        let registry = ClientRegistry::new(2);
        let (id, _rx) = registry.register();

        assert!(registry.send_raw(&id, "msg1".into()));
        assert!(registry.send_raw(&id, "msg2".into()));
        assert!(!registry.send_raw(&id, "msg3".into()));
    }

    #[test]
    fn send_to_nonexistent_client() {
        let registry = ClientRegistry::new(32);
        assert!(!registry.send_raw(&ConnectionId::from_raw("conn_nobody"), "x".into()));
    }

    #[test]
    fn client_type_is_recorded() {
        let registry = ClientRegistry::new(32);
        let (id, _rx) = registry.register();
        assert!(registry.set_client_type(&id, "display"));
        assert_eq!(registry.get(&id).unwrap().client_type().as_deref(), Some("display"));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_clients_are_told_to_close() {
        let registry = ClientRegistry::new(32);
        let (quiet, _rx1) = registry.register();
        let (chatty, _rx2) = registry.register();

        tokio::time::advance(Duration::from_secs(60)).await;
        registry.record_pong(&chatty);
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(registry.cleanup_dead_clients(), 1);
        assert!(registry.get(&quiet).unwrap().close.is_cancelled());
        assert!(!registry.get(&chatty).unwrap().close.is_cancelled());
    }
}
