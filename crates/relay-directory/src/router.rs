use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use relay_core::{now_ms, ConnectionId, Role, RoomTransport, ServerEvent};
use relay_telemetry::{names, MetricsRecorder};

use crate::directory::SessionDirectory;
use crate::registry::ConnectionRegistry;

/// Producer events that fan out to a session's displays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    StreamingText,
    FinalTranslation,
}

impl StreamKind {
    pub fn from_event(name: &str) -> Option<Self> {
        match name {
            "streaming-text" => Some(Self::StreamingText),
            "final-translation" => Some(Self::FinalTranslation),
            _ => None,
        }
    }

    fn relayed(self, payload: Map<String, Value>) -> ServerEvent {
        match self {
            Self::StreamingText => ServerEvent::StreamingText(payload),
            Self::FinalTranslation => ServerEvent::FinalTranslation(payload),
        }
    }

    fn receipt(self, timestamp: i64) -> ServerEvent {
        match self {
            Self::StreamingText => ServerEvent::TextReceived {
                message: "Streaming text received".into(),
                timestamp,
            },
            Self::FinalTranslation => ServerEvent::TranslationReceived {
                message: "Final translation received".into(),
                timestamp,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Multicast to `recipients` room members and acknowledged to the sender.
    Delivered { recipients: usize },
    /// The sender is not bound to any session.
    Unbound,
    /// The sender is a display, or no longer the session's control.
    NotControl,
}

/// Role-filtered multicast from a session's control connection to the rest of its room.
pub struct BroadcastRouter {
    directory: SessionDirectory,
    registry: Arc<ConnectionRegistry>,
    transport: Arc<dyn RoomTransport>,
    metrics: Arc<MetricsRecorder>,
}

impl BroadcastRouter {
    pub fn new(
        directory: SessionDirectory,
        registry: Arc<ConnectionRegistry>,
        transport: Arc<dyn RoomTransport>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            directory,
            registry,
            transport,
            metrics,
        }
    }

    /// Relay a producer event. Anything not from the current control connection is dropped
    /// silently.
    pub fn route(&self, sender: &ConnectionId, kind: StreamKind, payload: Value) -> RouteOutcome {
        let Some(binding) = self.registry.binding(sender) else {
            return self.dropped(sender, kind, RouteOutcome::Unbound);
        };
        if binding.role != Role::Control || !self.directory.is_control(&binding.code, sender) {
            return self.dropped(sender, kind, RouteOutcome::NotControl);
        }

        let timestamp = now_ms();
        let mut stamped = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        stamped.insert("code".into(), Value::String(binding.code.to_string()));
        stamped.insert("receivedAt".into(), Value::from(timestamp));

        let recipients =
            self.transport
                .send_to_room(&binding.code, &kind.relayed(stamped), Some(sender));
        self.transport.send_to(sender, &kind.receipt(timestamp));
        self.metrics.counter_inc(names::EVENTS_ROUTED, 1);
        trace!(code = %binding.code, ?kind, recipients, "event routed");
        RouteOutcome::Delivered { recipients }
    }

    fn dropped(&self, sender: &ConnectionId, kind: StreamKind, outcome: RouteOutcome) -> RouteOutcome {
        self.metrics.counter_inc(names::EVENTS_DROPPED, 1);
        debug!(connection = %sender, ?kind, ?outcome, "dropping event from non-control connection");
        outcome
    }
}
