use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::events::ServerEvent;
use crate::ids::{ConnectionId, SessionCode};
use crate::transport::RoomTransport;

/// In-memory transport that records every delivery, for deterministic tests.
#[derive(Default)]
pub struct MockTransport {
    inner: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    connections: HashSet<ConnectionId>,
    rooms: HashMap<SessionCode, HashSet<ConnectionId>>,
    delivered: Vec<(ConnectionId, ServerEvent)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live connection so room and broadcast sends can reach it.
    pub fn connect(&self, connection: &ConnectionId) {
        self.inner.lock().connections.insert(connection.clone());
    }

    pub fn disconnect(&self, connection: &ConnectionId) {
        let mut state = self.inner.lock();
        state.connections.remove(connection);
        for members in state.rooms.values_mut() {
            members.remove(connection);
        }
    }

    /// Events delivered to one connection, in delivery order.
    pub fn received(&self, connection: &ConnectionId) -> Vec<ServerEvent> {
        self.inner
            .lock()
            .delivered
            .iter()
            .filter(|(to, _)| to == connection)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Names of events delivered to one connection, in delivery order.
    pub fn received_names(&self, connection: &ConnectionId) -> Vec<&'static str> {
        self.received(connection).iter().map(ServerEvent::event_name).collect()
    }

    pub fn members(&self, room: &SessionCode) -> Vec<ConnectionId> {
        let mut members: Vec<_> = self
            .inner
            .lock()
            .rooms
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        members
    }

    pub fn total_delivered(&self) -> usize {
        self.inner.lock().delivered.len()
    }

    pub fn clear(&self) {
        self.inner.lock().delivered.clear();
    }
}

impl RoomTransport for MockTransport {
    fn join(&self, connection: &ConnectionId, room: &SessionCode) {
        self.inner
            .lock()
            .rooms
            .entry(room.clone())
            .or_default()
            .insert(connection.clone());
    }

    fn leave(&self, connection: &ConnectionId, room: &SessionCode) {
        let mut state = self.inner.lock();
        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(connection);
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }
    }

    fn send_to(&self, connection: &ConnectionId, event: &ServerEvent) -> bool {
        let mut state = self.inner.lock();
        if !state.connections.contains(connection) {
            return false;
        }
        state.delivered.push((connection.clone(), event.clone()));
        true
    }

    fn send_to_room(
        &self,
        room: &SessionCode,
        event: &ServerEvent,
        except: Option<&ConnectionId>,
    ) -> usize {
        let mut state = self.inner.lock();
        let mut targets: Vec<ConnectionId> = state
            .rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| Some(*m) != except && state.connections.contains(*m))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        targets.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        let count = targets.len();
        for target in targets {
            state.delivered.push((target, event.clone()));
        }
        count
    }

    fn send_to_all(&self, event: &ServerEvent) -> usize {
        let mut state = self.inner.lock();
        let targets: Vec<ConnectionId> = state.connections.iter().cloned().collect();
        let count = targets.len();
        for target in targets {
            state.delivered.push((target, event.clone()));
        }
        count
    }
}
