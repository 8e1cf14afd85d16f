//! Client event handlers.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{debug, info};

use relay_core::{
    now_ms, ConnectionId, DirectoryError, Role, RoomTransport, ServerEvent, SessionCode,
    SessionSnapshot,
};
use relay_directory::{DirectoryConfig, RouteOutcome, SessionHub, StreamKind};
use relay_store::SharedStore;
use relay_telemetry::{names, MetricsRecorder};
use relay_translate::TranslationService;

use crate::client::ClientRegistry;
use crate::protocol::{self, AckFrame, ClientFrame};

const WELCOME_MESSAGE: &str = "Connected to translation server";

/// Shared state available to all event and HTTP handlers.
pub struct HandlerState {
    pub hub: SessionHub,
    pub clients: Arc<ClientRegistry>,
    pub translation: Arc<TranslationService>,
    pub metrics: Arc<MetricsRecorder>,
    pub started_at: Instant,
}

impl HandlerState {
    pub fn new(
        directory: DirectoryConfig,
        clients: Arc<ClientRegistry>,
        store: Option<Arc<dyn SharedStore>>,
        translation: Arc<TranslationService>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let transport: Arc<dyn RoomTransport> = Arc::clone(&clients) as Arc<dyn RoomTransport>;
        let hub = SessionHub::new(directory, transport, store, Arc::clone(&metrics));
        Self {
            hub,
            clients,
            translation,
            metrics,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// A client connected: greet it.
pub fn connected(state: &HandlerState, connection: &ConnectionId) {
    state.metrics.gauge_add(names::CONNECTIONS_OPEN, 1);
    info!(connection_id = %connection, "client connected");
    state.clients.send_to(
        connection,
        &ServerEvent::Welcome {
            message: WELCOME_MESSAGE.into(),
            client_id: connection.clone(),
            timestamp: now_ms(),
        },
    );
}

/// A client's socket is gone: release its session binding and forget it.
pub fn disconnected(state: &HandlerState, connection: &ConnectionId) {
    state.hub.disconnect(connection);
    if state.clients.unregister(connection) {
        state.metrics.gauge_add(names::CONNECTIONS_OPEN, -1);
    }
    info!(connection_id = %connection, "client disconnected");
    broadcast_client_count(state);
}

/// Dispatch one inbound text frame.
pub async fn dispatch(state: &HandlerState, connection: &ConnectionId, raw: &str) {
    let Some(mut frame) = ClientFrame::parse(raw) else {
        debug!(connection_id = %connection, len = raw.len(), "ignoring malformed frame");
        return;
    };
    let ack = frame.ack.take();

    let reply = match frame.event.as_str() {
        "session-create" => Some(session_create(state, connection).await),
        "session-new" => Some(session_new(state, connection).await),
        "session-resume" => Some(session_resume(state, connection, &frame).await),
        "session-join" => Some(session_join(state, connection, &frame)),
        "streaming-text" | "final-translation" => {
            relay(state, connection, &frame.event, frame.data);
            None
        }
        "client-type" => {
            client_type(state, connection, &frame);
            None
        }
        other => {
            debug!(connection_id = %connection, event = other, "ignoring unknown event");
            None
        }
    };

    if let (Some(ack), Some(data)) = (ack, reply) {
        if let Some(encoded) = protocol::encode_ack(&AckFrame::new(ack, data)) {
            state.clients.send_raw(connection, encoded);
        }
    }
}

fn session_ack(snapshot: &SessionSnapshot, token: &str) -> Value {
    protocol::ack_ok(json!({
        "code": snapshot.code,
        "ttlMs": snapshot.ttl_ms,
        "expiresAt": snapshot.expires_at,
        "resumeToken": token,
    }))
}

fn failure(connection: &ConnectionId, event: &str, err: &DirectoryError) -> Value {
    debug!(connection_id = %connection, event, error = err.code(), "request rejected");
    protocol::ack_err(err)
}

/// A connection that takes a role in a session is typed by it.
fn took_role(state: &HandlerState, connection: &ConnectionId, role: Role) {
    state.clients.set_client_type(connection, role.to_string());
}

async fn session_create(state: &HandlerState, connection: &ConnectionId) -> Value {
    match state.hub.create_session(connection).await {
        Ok(created) => {
            took_role(state, connection, Role::Control);
            session_ack(&created.snapshot, created.token.expose())
        }
        Err(err) => failure(connection, "session-create", &err),
    }
}

async fn session_new(state: &HandlerState, connection: &ConnectionId) -> Value {
    match state.hub.start_new(connection).await {
        Ok(created) => {
            took_role(state, connection, Role::Control);
            session_ack(&created.snapshot, created.token.expose())
        }
        Err(err) => failure(connection, "session-new", &err),
    }
}

/// A code that does not parse cannot name a live session.
fn requested_code(frame: &ClientFrame) -> Result<SessionCode, DirectoryError> {
    frame
        .data_str("code")
        .and_then(|raw| raw.parse::<SessionCode>().ok())
        .ok_or(DirectoryError::NotFound)
}

async fn session_resume(
    state: &HandlerState,
    connection: &ConnectionId,
    frame: &ClientFrame,
) -> Value {
    let code = match requested_code(frame) {
        Ok(code) => code,
        Err(err) => return failure(connection, "session-resume", &err),
    };
    let token = frame.data.get("token").and_then(Value::as_str);
    match state.hub.resume_session(connection, &code, token).await {
        Ok(resumed) => {
            took_role(state, connection, Role::Control);
            session_ack(&resumed.snapshot, resumed.token.expose())
        }
        Err(err) => failure(connection, "session-resume", &err),
    }
}

fn session_join(state: &HandlerState, connection: &ConnectionId, frame: &ClientFrame) -> Value {
    let result = requested_code(frame).and_then(|code| state.hub.join_session(connection, &code));
    match result {
        Ok(snapshot) => {
            took_role(state, connection, Role::Display);
            protocol::ack_ok(json!({
                "code": snapshot.code,
                "status": snapshot.status,
                "hasControl": snapshot.control_connection_id.is_some(),
                "expiresAt": snapshot.expires_at,
            }))
        }
        Err(err) => failure(connection, "session-join", &err),
    }
}

fn relay(state: &HandlerState, connection: &ConnectionId, event: &str, payload: Value) {
    let Some(kind) = StreamKind::from_event(event) else {
        return;
    };
    match state.hub.route(connection, kind, payload) {
        RouteOutcome::Delivered { .. } => {}
        outcome => debug!(connection_id = %connection, ?outcome, "relay dropped"),
    }
}

fn client_type(state: &HandlerState, connection: &ConnectionId, frame: &ClientFrame) {
    let declared = frame.data_str("type").unwrap_or("unknown");
    if state.clients.set_client_type(connection, declared) {
        info!(connection_id = %connection, client_type = declared, "client type declared");
    }
    broadcast_client_count(state);
}

fn broadcast_client_count(state: &HandlerState) {
    let count = state.clients.count();
    state.clients.send_to_all(&ServerEvent::ClientCount { count });
}
