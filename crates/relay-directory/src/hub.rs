use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use relay_core::{
    ConnectionId, DirectoryError, Role, RoomTransport, ServerEvent, SessionCode, SessionSnapshot,
};
use relay_store::SharedStore;
use relay_telemetry::MetricsRecorder;

use crate::config::DirectoryConfig;
use crate::directory::{Created, ExpiryReason, Resumed, SessionDirectory};
use crate::mirror::StoreMirror;
use crate::registry::{Binding, ConnectionRegistry};
use crate::router::{BroadcastRouter, RouteOutcome, StreamKind};

/// Client-facing session operations over the directory, registry and router.
pub struct SessionHub {
    directory: SessionDirectory,
    registry: Arc<ConnectionRegistry>,
    router: BroadcastRouter,
    transport: Arc<dyn RoomTransport>,
}

impl SessionHub {
    /// Build the relay core. Must be called inside a tokio runtime when a store is given.
    pub fn new(
        config: DirectoryConfig,
        transport: Arc<dyn RoomTransport>,
        store: Option<Arc<dyn SharedStore>>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let mirror = match store {
            Some(store) => StoreMirror::new(
                store,
                config.instance_id.clone(),
                config.session_ttl,
                Arc::clone(&metrics),
            ),
            None => StoreMirror::disabled(),
        };
        let directory =
            SessionDirectory::new(config, Arc::clone(&transport), mirror, Arc::clone(&metrics));
        Self::from_directory(directory, transport, metrics)
    }

    pub fn from_directory(
        directory: SessionDirectory,
        transport: Arc<dyn RoomTransport>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::clone(&transport),
            directory.mirror().clone(),
        ));
        let router = BroadcastRouter::new(
            directory.clone(),
            Arc::clone(&registry),
            Arc::clone(&transport),
            metrics,
        );
        Self {
            directory,
            registry,
            router,
            transport,
        }
    }

    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// `session-create`: new session with `connection` as its control.
    pub async fn create_session(&self, connection: &ConnectionId) -> Result<Created, DirectoryError> {
        // No await between the directory change and the binding, or a cancelled caller leaves a
        // control the registry cannot release.
        let created = self.directory.create(connection).await?;
        let code = &created.snapshot.code;
        self.bind(connection, code, Role::Control);
        self.transport.send_to(
            connection,
            &ServerEvent::SessionCreated {
                code: code.clone(),
                ttl_ms: created.snapshot.ttl_ms,
                expires_at: created.snapshot.expires_at,
                resume_token: created.token.expose().to_owned(),
            },
        );
        Ok(created)
    }

    /// `session-new`: close the session this connection controls, then create another.
    pub async fn start_new(&self, connection: &ConnectionId) -> Result<Created, DirectoryError> {
        if let Some(current) = self.registry.binding(connection) {
            if current.role == Role::Control && self.directory.is_control(&current.code, connection) {
                self.registry.unbind(connection);
                self.directory.expire(&current.code, ExpiryReason::Superseded);
                info!(code = %current.code, connection = %connection, "session replaced");
            }
        }
        self.create_session(connection).await
    }

    /// `session-resume`: reclaim control of a live session.
    pub async fn resume_session(
        &self,
        connection: &ConnectionId,
        code: &SessionCode,
        token: Option<&str>,
    ) -> Result<Resumed, DirectoryError> {
        let resumed = self.directory.resume(code, token, connection).await?;
        self.bind(connection, code, Role::Control);
        self.transport
            .send_to_room(code, &ServerEvent::SessionResumed { code: code.clone() }, None);
        Ok(resumed)
    }

    /// `session-join`: attach as a display.
    pub fn join_session(
        &self,
        connection: &ConnectionId,
        code: &SessionCode,
    ) -> Result<SessionSnapshot, DirectoryError> {
        let snapshot = self.directory.join_as_display(code, connection)?;
        self.bind(connection, code, Role::Display);
        Ok(snapshot)
    }

    /// `streaming-text` / `final-translation` from a producer.
    pub fn route(&self, sender: &ConnectionId, kind: StreamKind, payload: Value) -> RouteOutcome {
        self.router.route(sender, kind, payload)
    }

    /// The transport lost `connection`.
    pub fn disconnect(&self, connection: &ConnectionId) {
        if let Some(previous) = self.registry.unbind(connection) {
            self.release(connection, &previous);
        }
    }

    fn bind(&self, connection: &ConnectionId, code: &SessionCode, role: Role) {
        let Some(previous) = self.registry.bind(connection, code, role) else {
            return;
        };
        if previous.code != *code || previous.role != role {
            self.release(connection, &previous);
        }
    }

    /// Undo what a binding meant to its session.
    fn release(&self, connection: &ConnectionId, binding: &Binding) {
        match binding.role {
            Role::Control => {
                self.directory.control_disconnected(&binding.code, connection);
            }
            Role::Display => self.directory.display_left(&binding.code, connection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::mock::MockTransport;
    use relay_core::SessionStatus;
    use async_trait::async_trait;
    use relay_store::{MemoryStore, SessionRecord, StoreError};
    use serde_json::json;
    use std::time::Duration;

    /// Memory store whose token writes take a while to land.
    struct SlowTokenStore {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl SharedStore for SlowTokenStore {
        fn backend(&self) -> &'static str {
            "slow"
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }

        async fn put_session(&self, record: &SessionRecord, ttl: Duration) -> Result<(), StoreError> {
            self.inner.put_session(record, ttl).await
        }

        async fn get_session(&self, code: &SessionCode) -> Result<Option<SessionRecord>, StoreError> {
            self.inner.get_session(code).await
        }

        async fn delete_session(&self, code: &SessionCode) -> Result<(), StoreError> {
            self.inner.delete_session(code).await
        }

        async fn put_token(
            &self,
            code: &SessionCode,
            fingerprint: &str,
            ttl: Duration,
        ) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.put_token(code, fingerprint, ttl).await
        }

        async fn take_token(&self, code: &SessionCode, fingerprint: &str) -> Result<bool, StoreError> {
            self.inner.take_token(code, fingerprint).await
        }

        async fn expire_token(
            &self,
            code: &SessionCode,
            fingerprint: &str,
            ttl: Duration,
        ) -> Result<bool, StoreError> {
            self.inner.expire_token(code, fingerprint, ttl).await
        }

        async fn add_presence(
            &self,
            code: &SessionCode,
            role: Role,
            connection: &ConnectionId,
            ttl: Duration,
        ) -> Result<(), StoreError> {
            self.inner.add_presence(code, role, connection, ttl).await
        }

        async fn remove_presence(
            &self,
            code: &SessionCode,
            role: Role,
            connection: &ConnectionId,
        ) -> Result<(), StoreError> {
            self.inner.remove_presence(code, role, connection).await
        }

        async fn presence(&self, code: &SessionCode, role: Role) -> Result<Vec<ConnectionId>, StoreError> {
            self.inner.presence(code, role).await
        }
    }

    fn slow_token_fixture() -> Fixture {
        fixture_with_store(Some(Arc::new(SlowTokenStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(400),
        })))
    }

    struct Fixture {
        hub: SessionHub,
        transport: Arc<MockTransport>,
    }

    fn fixture_with_store(store: Option<Arc<dyn SharedStore>>) -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let hub = SessionHub::new(
            DirectoryConfig::default(),
            Arc::clone(&transport) as Arc<dyn RoomTransport>,
            store,
            Arc::new(MetricsRecorder::new()),
        );
        Fixture { hub, transport }
    }

    fn fixture() -> Fixture {
        fixture_with_store(None)
    }

    fn connected(f: &Fixture, name: &str) -> ConnectionId {
        let id = ConnectionId::from_raw(name);
        f.transport.connect(&id);
        id
    }

    #[tokio::test]
    async fn create_sends_session_created_to_control() {
        let f = fixture();
        let control = connected(&f, "conn_ctrl");
        let created = f.hub.create_session(&control).await.unwrap();

        let received = f.transport.received(&control);
        let [ServerEvent::SessionCreated {
            code, resume_token, ..
        }] = received.as_slice()
        else {
            panic!("unexpected events: {received:?}");
        };
        assert_eq!(code, &created.snapshot.code);
        assert_eq!(resume_token, created.token.expose());
        assert_eq!(f.transport.members(code), vec![control]);
    }

    #[tokio::test]
    async fn displays_receive_only_control_stream() {
        let f = fixture();
        let control = connected(&f, "conn_ctrl");
        let display_a = connected(&f, "conn_disp_a");
        let display_b = connected(&f, "conn_disp_b");
        let code = f.hub.create_session(&control).await.unwrap().snapshot.code;
        f.hub.join_session(&display_a, &code).unwrap();
        f.hub.join_session(&display_b, &code).unwrap();
        f.transport.clear();

        f.hub.route(&control, StreamKind::StreamingText, json!({"text": "hi"}));
        f.hub.route(&display_a, StreamKind::StreamingText, json!({"text": "spoof"}));

        assert_eq!(f.transport.received_names(&display_a), vec!["streaming-text"]);
        assert_eq!(f.transport.received_names(&display_b), vec!["streaming-text"]);
        assert_eq!(f.transport.received_names(&control), vec!["text-received"]);
    }

    #[tokio::test]
    async fn reconnecting_producer_resumes_and_keeps_streaming() {
        let f = fixture();
        let control = connected(&f, "conn_ctrl");
        let display = connected(&f, "conn_disp");
        let created = f.hub.create_session(&control).await.unwrap();
        let code = created.snapshot.code.clone();
        f.hub.join_session(&display, &code).unwrap();

        f.transport.disconnect(&control);
        f.hub.disconnect(&control);
        assert_eq!(
            f.hub.directory().snapshot(&code).unwrap().status,
            SessionStatus::Stale
        );

        let control_2 = connected(&f, "conn_ctrl_2");
        f.hub
            .resume_session(&control_2, &code, Some(created.token.expose()))
            .await
            .unwrap();
        f.hub
            .route(&control_2, StreamKind::FinalTranslation, json!({"translated": "hola"}));

        assert_eq!(
            f.transport.received_names(&display),
            vec!["session-stale", "session-resumed", "final-translation"]
        );
        assert!(f.hub.directory().is_control(&code, &control_2));
    }

    #[tokio::test]
    async fn display_cannot_take_over_bound_session() {
        let f = fixture();
        let control = connected(&f, "conn_ctrl");
        let display = connected(&f, "conn_disp");
        let created = f.hub.create_session(&control).await.unwrap();
        let code = created.snapshot.code.clone();
        f.hub.join_session(&display, &code).unwrap();

        let err = f
            .hub
            .resume_session(&display, &code, Some(created.token.expose()))
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::AlreadyBound);
        assert_eq!(
            f.hub.registry().binding(&display).unwrap().role,
            Role::Display
        );
    }

    #[tokio::test]
    async fn start_new_closes_previous_session() {
        let f = fixture();
        let control = connected(&f, "conn_ctrl");
        let display = connected(&f, "conn_disp");
        let old = f.hub.create_session(&control).await.unwrap().snapshot.code;
        f.hub.join_session(&display, &old).unwrap();
        f.transport.clear();

        let fresh = f.hub.start_new(&control).await.unwrap().snapshot.code;
        assert_ne!(fresh, old);
        assert!(f.hub.directory().snapshot(&old).is_none());
        assert_eq!(f.transport.received_names(&display), vec!["session-closed"]);
        assert_eq!(f.transport.received_names(&control), vec!["session-created"]);

        f.hub.route(&control, StreamKind::StreamingText, json!({"text": "new"}));
        assert_eq!(f.transport.received_names(&display), vec!["session-closed"]);
    }

    #[tokio::test]
    async fn joining_elsewhere_releases_control() {
        let f = fixture();
        let producer = connected(&f, "conn_a");
        let other = connected(&f, "conn_b");
        let first = f.hub.create_session(&producer).await.unwrap().snapshot.code;
        let second = f.hub.create_session(&other).await.unwrap().snapshot.code;

        f.hub.join_session(&producer, &second).unwrap();
        let snapshot = f.hub.directory().snapshot(&first).unwrap();
        assert_eq!(snapshot.status, SessionStatus::Stale);
        assert_eq!(f.transport.members(&first), Vec::<ConnectionId>::new());
        assert_eq!(f.hub.directory().snapshot(&second).unwrap().display_count, 1);
    }

    #[tokio::test]
    async fn display_disconnect_updates_count() {
        let f = fixture();
        let control = connected(&f, "conn_ctrl");
        let display = connected(&f, "conn_disp");
        let code = f.hub.create_session(&control).await.unwrap().snapshot.code;
        f.hub.join_session(&display, &code).unwrap();
        f.hub.disconnect(&display);

        let snapshot = f.hub.directory().snapshot(&code).unwrap();
        assert_eq!(snapshot.display_count, 0);
        assert_eq!(snapshot.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn mirrored_presence_follows_bindings() {
        let store = Arc::new(MemoryStore::new());
        let f = fixture_with_store(Some(Arc::clone(&store) as Arc<dyn SharedStore>));
        let control = connected(&f, "conn_ctrl");
        let display = connected(&f, "conn_disp");
        let code = f.hub.create_session(&control).await.unwrap().snapshot.code;
        f.hub.join_session(&display, &code).unwrap();
        f.hub.directory().mirror().flush().await;
        assert_eq!(store.presence(&code, Role::Display).await.unwrap(), vec![display.clone()]);
        assert_eq!(store.presence(&code, Role::Control).await.unwrap(), vec![control.clone()]);

        f.hub.disconnect(&display);
        f.hub.directory().mirror().flush().await;
        assert!(store.presence(&code, Role::Display).await.unwrap().is_empty());
        assert!(store
            .ttl(&relay_store::keys::presence(&code, Role::Control))
            .is_some_and(|ttl| ttl <= Duration::from_secs(3600)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_create_still_goes_stale_on_disconnect() {
        let Fixture { hub, transport } = slow_token_fixture();
        let hub = Arc::new(hub);
        let control = ConnectionId::from_raw("conn_ctrl");
        transport.connect(&control);

        let task = tokio::spawn({
            let hub = Arc::clone(&hub);
            let control = control.clone();
            async move { hub.create_session(&control).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();
        let _ = task.await;
        hub.disconnect(&control);

        for snapshot in hub.directory().snapshots() {
            assert!(
                snapshot.status != SessionStatus::Active
                    || snapshot.control_connection_id.as_ref() != Some(&control),
                "session {} kept a dead control",
                snapshot.code
            );
        }
        assert!(hub.registry().binding(&control).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_resume_leaves_session_stale() {
        let Fixture { hub, transport } = slow_token_fixture();
        let hub = Arc::new(hub);
        let control = ConnectionId::from_raw("conn_ctrl");
        transport.connect(&control);
        let created = hub.create_session(&control).await.unwrap();
        let code = created.snapshot.code.clone();
        hub.disconnect(&control);

        let control_2 = ConnectionId::from_raw("conn_ctrl_2");
        transport.connect(&control_2);
        let task = tokio::spawn({
            let hub = Arc::clone(&hub);
            let control_2 = control_2.clone();
            let code = code.clone();
            let token = created.token.expose().to_owned();
            async move { hub.resume_session(&control_2, &code, Some(&token)).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();
        let _ = task.await;
        hub.disconnect(&control_2);

        let snapshot = hub.directory().snapshot(&code).unwrap();
        assert_eq!(snapshot.status, SessionStatus::Stale);
        assert_ne!(snapshot.control_connection_id, Some(control_2));
    }
}
