use crate::events::ServerEvent;
use crate::ids::{ConnectionId, SessionCode};

/// Room and multicast primitives of the real-time transport.
///
/// Sends are fire-and-forget: a full or closed per-connection queue drops the event. Events sent
/// to one room from one caller are delivered to each member in call order.
pub trait RoomTransport: Send + Sync {
    /// Add a connection to a session room. Joining a room twice is a no-op.
    fn join(&self, connection: &ConnectionId, room: &SessionCode);

    /// Remove a connection from a session room. Leaving a room it is not in is a no-op.
    fn leave(&self, connection: &ConnectionId, room: &SessionCode);

    /// Send directly to one connection. Returns `false` if it was not delivered.
    fn send_to(&self, connection: &ConnectionId, event: &ServerEvent) -> bool;

    /// Multicast to a room, optionally skipping the sender. Returns the number of recipients.
    fn send_to_room(
        &self,
        room: &SessionCode,
        event: &ServerEvent,
        except: Option<&ConnectionId>,
    ) -> usize;

    /// Multicast to every live connection.
    fn send_to_all(&self, event: &ServerEvent) -> usize;
}
