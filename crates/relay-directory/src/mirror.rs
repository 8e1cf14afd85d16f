//! Best-effort replication of directory state into the optional [`SharedStore`].
//!
//! Writes are queued to a single background task so they reach the store in the order the
//! directory produced them, and never block a directory operation. Token consumption rides the
//! same queue and is the only call that waits for its result, so it always observes every token
//! issued before it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use relay_core::{now_ms, ConnectionId, ResumeToken, Role, SessionCode, SessionSnapshot};
use relay_store::{SessionRecord, SharedStore, StoreError};
use relay_telemetry::{names, MetricsRecorder};

/// Outcome of presenting a resume token to the shared store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenCheck {
    /// The token was live and has now been consumed.
    Valid,
    /// Missing, already consumed, or never issued.
    Rejected,
    /// No store configured, or the store failed. The check passes.
    Skipped,
}

enum MirrorOp {
    PutSession {
        record: SessionRecord,
        ttl: Duration,
    },
    DeleteSession {
        code: SessionCode,
        fingerprint: Option<String>,
    },
    AddPresence {
        code: SessionCode,
        role: Role,
        connection: ConnectionId,
        ttl: Duration,
    },
    RemovePresence {
        code: SessionCode,
        role: Role,
        connection: ConnectionId,
    },
    PutToken {
        code: SessionCode,
        fingerprint: String,
        ttl: Duration,
    },
    TakeToken {
        code: SessionCode,
        fingerprint: String,
        reply: oneshot::Sender<Result<bool, StoreError>>,
    },
    ShortenToken {
        code: SessionCode,
        fingerprint: String,
        ttl: Duration,
    },
    Flush(oneshot::Sender<()>),
}

impl MirrorOp {
    fn label(&self) -> &'static str {
        match self {
            Self::PutSession { .. } => "put_session",
            Self::DeleteSession { .. } => "delete_session",
            Self::AddPresence { .. } => "add_presence",
            Self::RemovePresence { .. } => "remove_presence",
            Self::PutToken { .. } => "put_token",
            Self::TakeToken { .. } => "take_token",
            Self::ShortenToken { .. } => "shorten_token",
            Self::Flush(_) => "flush",
        }
    }
}

struct MirrorInner {
    store: Arc<dyn SharedStore>,
    tx: mpsc::UnboundedSender<MirrorOp>,
    instance: String,
    presence_ttl: Duration,
    metrics: Arc<MetricsRecorder>,
}

/// Cheap-to-clone handle to the store replication worker. A disabled mirror is a no-op.
#[derive(Clone, Default)]
pub struct StoreMirror {
    inner: Option<Arc<MirrorInner>>,
}

impl StoreMirror {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Start the replication worker. Must be called inside a tokio runtime.
    pub fn new(
        store: Arc<dyn SharedStore>,
        instance: impl Into<String>,
        presence_ttl: Duration,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(Arc::clone(&store), rx, Arc::clone(&metrics)));
        Self {
            inner: Some(Arc::new(MirrorInner {
                store,
                tx,
                instance: instance.into(),
                presence_ttl,
                metrics,
            })),
        }
    }

    pub fn backend(&self) -> Option<&'static str> {
        self.inner.as_ref().map(|inner| inner.store.backend())
    }

    pub fn session_changed(&self, snapshot: &SessionSnapshot, ttl: Duration) {
        if let Some(inner) = &self.inner {
            let record = SessionRecord::from_snapshot(snapshot, &inner.instance, now_ms());
            inner.enqueue(MirrorOp::PutSession { record, ttl });
        }
    }

    pub fn session_removed(&self, code: &SessionCode, token: Option<&ResumeToken>) {
        if let Some(inner) = &self.inner {
            inner.enqueue(MirrorOp::DeleteSession {
                code: code.clone(),
                fingerprint: token.map(ResumeToken::fingerprint),
            });
        }
    }

    pub fn presence_added(&self, code: &SessionCode, role: Role, connection: &ConnectionId) {
        if let Some(inner) = &self.inner {
            inner.enqueue(MirrorOp::AddPresence {
                code: code.clone(),
                role,
                connection: connection.clone(),
                ttl: inner.presence_ttl,
            });
        }
    }

    pub fn presence_removed(&self, code: &SessionCode, role: Role, connection: &ConnectionId) {
        if let Some(inner) = &self.inner {
            inner.enqueue(MirrorOp::RemovePresence {
                code: code.clone(),
                role,
                connection: connection.clone(),
            });
        }
    }

    /// Cut the remaining lifetime of an issued token. A consumed token stays consumed.
    pub fn shorten_token(&self, code: &SessionCode, token: &ResumeToken, ttl: Duration) {
        if let Some(inner) = &self.inner {
            inner.enqueue(MirrorOp::ShortenToken {
                code: code.clone(),
                fingerprint: token.fingerprint(),
                ttl,
            });
        }
    }

    /// Publish a freshly issued token. Failure is logged; the session keeps working locally.
    pub fn store_token(&self, code: &SessionCode, token: &ResumeToken, ttl: Duration) {
        if let Some(inner) = &self.inner {
            inner.enqueue(MirrorOp::PutToken {
                code: code.clone(),
                fingerprint: token.fingerprint(),
                ttl,
            });
        }
    }

    /// Atomically consume a presented token.
    pub async fn consume_token(&self, code: &SessionCode, candidate: Option<&str>) -> TokenCheck {
        let Some(inner) = &self.inner else {
            return TokenCheck::Skipped;
        };
        let Some(candidate) = candidate.filter(|c| !c.is_empty()) else {
            return TokenCheck::Rejected;
        };
        let (reply, outcome) = oneshot::channel();
        inner.enqueue(MirrorOp::TakeToken {
            code: code.clone(),
            fingerprint: ResumeToken::from_raw(candidate).fingerprint(),
            reply,
        });
        match outcome.await {
            Ok(Ok(true)) => TokenCheck::Valid,
            Ok(Ok(false)) => TokenCheck::Rejected,
            Ok(Err(err)) => {
                inner.failed("take_token", &err);
                warn!(code = %code, "resume token check degraded to pass, store unreachable");
                TokenCheck::Skipped
            }
            Err(_) => {
                warn!(code = %code, "resume token check degraded to pass, mirror worker gone");
                TokenCheck::Skipped
            }
        }
    }

    /// Whether another instance has a live session under this code.
    pub async fn is_claimed(&self, code: &SessionCode) -> bool {
        let Some(inner) = &self.inner else { return false };
        match inner.store.get_session(code).await {
            Ok(record) => record.is_some_and(|r| r.instance != inner.instance),
            Err(err) => {
                inner.failed("get_session", &err);
                false
            }
        }
    }

    /// The mirrored record for a session, if a store is configured and holds one.
    pub async fn mirrored(&self, code: &SessionCode) -> Result<Option<SessionRecord>, StoreError> {
        match &self.inner {
            Some(inner) => inner.store.get_session(code).await,
            None => Ok(None),
        }
    }

    /// Wait until every write queued so far has been attempted.
    pub async fn flush(&self) {
        let Some(inner) = &self.inner else { return };
        let (tx, rx) = oneshot::channel();
        inner.enqueue(MirrorOp::Flush(tx));
        let _ = rx.await;
    }
}

impl MirrorInner {
    fn enqueue(&self, op: MirrorOp) {
        let label = op.label();
        if self.tx.send(op).is_err() {
            self.metrics.counter_inc(names::STORE_FAILURES, 1);
            warn!(op = label, "store mirror worker is gone, dropping write");
        }
    }

    fn failed(&self, op: &'static str, err: &StoreError) {
        self.metrics.counter_inc(names::STORE_FAILURES, 1);
        warn!(op, error = %err, "shared store call failed");
    }
}

async fn run_worker(
    store: Arc<dyn SharedStore>,
    mut rx: mpsc::UnboundedReceiver<MirrorOp>,
    metrics: Arc<MetricsRecorder>,
) {
    debug!(backend = store.backend(), "store mirror worker started");
    while let Some(op) = rx.recv().await {
        let label = op.label();
        let result = match op {
            MirrorOp::PutSession { record, ttl } => store.put_session(&record, ttl).await,
            MirrorOp::DeleteSession { code, fingerprint } => {
                if let Some(fingerprint) = fingerprint {
                    if let Err(err) = store.take_token(&code, &fingerprint).await {
                        metrics.counter_inc(names::STORE_FAILURES, 1);
                        warn!(op = "take_token", error = %err, "shared store call failed");
                    }
                }
                store.delete_session(&code).await
            }
            MirrorOp::AddPresence {
                code,
                role,
                connection,
                ttl,
            } => store.add_presence(&code, role, &connection, ttl).await,
            MirrorOp::RemovePresence {
                code,
                role,
                connection,
            } => store.remove_presence(&code, role, &connection).await,
            MirrorOp::PutToken {
                code,
                fingerprint,
                ttl,
            } => store.put_token(&code, &fingerprint, ttl).await,
            MirrorOp::TakeToken {
                code,
                fingerprint,
                reply,
            } => {
                let _ = reply.send(store.take_token(&code, &fingerprint).await);
                Ok(())
            }
            MirrorOp::ShortenToken {
                code,
                fingerprint,
                ttl,
            } => store.expire_token(&code, &fingerprint, ttl).await.map(|_| ()),
            MirrorOp::Flush(done) => {
                let _ = done.send(());
                Ok(())
            }
        };
        if let Err(err) = result {
            metrics.counter_inc(names::STORE_FAILURES, 1);
            warn!(op = label, error = %err, "shared store call failed");
        }
    }
    debug!("store mirror worker stopped");
}
