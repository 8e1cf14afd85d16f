use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use relay_core::{ConnectionId, Role, RoomTransport, SessionCode};

use crate::mirror::StoreMirror;

/// The session and role a connection is currently bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub code: SessionCode,
    pub role: Role,
}

/// Per-connection session bindings, kept in step with transport room membership.
///
/// A connection is bound to at most one session. Rebinding leaves the previous room before
/// joining the new one.
pub struct ConnectionRegistry {
    bindings: DashMap<ConnectionId, Binding>,
    transport: Arc<dyn RoomTransport>,
    mirror: StoreMirror,
}

impl ConnectionRegistry {
    pub fn new(transport: Arc<dyn RoomTransport>, mirror: StoreMirror) -> Self {
        Self {
            bindings: DashMap::new(),
            transport,
            mirror,
        }
    }

    /// Bind `connection` to `code` in `role`, returning the binding it replaced.
    pub fn bind(&self, connection: &ConnectionId, code: &SessionCode, role: Role) -> Option<Binding> {
        let binding = Binding {
            code: code.clone(),
            role,
        };
        let previous = self.bindings.insert(connection.clone(), binding);

        if let Some(prev) = &previous {
            if prev.code != *code {
                self.transport.leave(connection, &prev.code);
            }
            if prev.code != *code || prev.role != role {
                self.mirror.presence_removed(&prev.code, prev.role, connection);
            }
        }
        self.transport.join(connection, code);
        self.mirror.presence_added(code, role, connection);
        debug!(connection = %connection, code = %code, %role, "connection bound");
        previous
    }

    /// Drop the binding of `connection` and leave its room.
    pub fn unbind(&self, connection: &ConnectionId) -> Option<Binding> {
        let (_, binding) = self.bindings.remove(connection)?;
        self.transport.leave(connection, &binding.code);
        self.mirror.presence_removed(&binding.code, binding.role, connection);
        debug!(connection = %connection, code = %binding.code, role = %binding.role, "connection unbound");
        Some(binding)
    }

    pub fn binding(&self, connection: &ConnectionId) -> Option<Binding> {
        self.bindings.get(connection).map(|b| b.value().clone())
    }

    /// Connections bound to `code`, sorted by id.
    pub fn members(&self, code: &SessionCode) -> Vec<(ConnectionId, Role)> {
        let mut members: Vec<_> = self
            .bindings
            .iter()
            .filter(|entry| entry.value().code == *code)
            .map(|entry| (entry.key().clone(), entry.value().role))
            .collect();
        members.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        members
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
