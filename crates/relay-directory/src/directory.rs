use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use relay_core::{
    now_ms, ConnectionId, DirectoryError, ResumeToken, RoomTransport, ServerEvent, SessionCode,
    SessionSnapshot, SessionStatus,
};
use relay_telemetry::{names, MetricsRecorder};

use crate::config::DirectoryConfig;
use crate::mirror::{StoreMirror, TokenCheck};

/// Supplies candidate session codes.
pub trait CodeSource: Send {
    fn next_code(&mut self) -> SessionCode;
}

/// Uniformly random codes from an OS-seeded generator.
pub struct RandomCodes(StdRng);

impl RandomCodes {
    pub fn new() -> Self {
        Self(StdRng::from_entropy())
    }
}

impl Default for RandomCodes {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeSource for RandomCodes {
    fn next_code(&mut self) -> SessionCode {
        SessionCode::random(&mut self.0)
    }
}

/// Why a session left the directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpiryReason {
    /// The hard TTL window elapsed.
    Deadline,
    /// The control connection did not come back within the grace period.
    StaleGrace,
    /// Its control connection asked for a new session.
    Superseded,
    Shutdown,
}

impl fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Deadline => "deadline",
            Self::StaleGrace => "stale_grace",
            Self::Superseded => "superseded",
            Self::Shutdown => "shutdown",
        })
    }
}

/// A freshly created session and the token its control connection must keep.
#[derive(Debug)]
pub struct Created {
    pub snapshot: SessionSnapshot,
    pub token: ResumeToken,
}

/// A session whose control binding was reclaimed, with the replacement token.
#[derive(Debug)]
pub struct Resumed {
    pub snapshot: SessionSnapshot,
    pub token: ResumeToken,
}

#[derive(Clone, Copy, Debug)]
enum TimerKind {
    ExpiryNotice,
    HardExpiry,
    StaleGrace,
}

struct SessionEntry {
    code: SessionCode,
    control: Option<ConnectionId>,
    status: SessionStatus,
    created_at: i64,
    ttl: Duration,
    deadline: Instant,
    expires_at: i64,
    token: Option<ResumeToken>,
    displays: HashSet<ConnectionId>,
    /// Generation of the armed timers. Timers from older generations are ignored when they fire.
    epoch: u64,
    timers: Vec<JoinHandle<()>>,
}

impl SessionEntry {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            code: self.code.clone(),
            control_connection_id: self.control.clone(),
            status: self.status,
            created_at: self.created_at,
            ttl_ms: self.ttl.as_millis() as u64,
            expires_at: self.expires_at,
            has_resume_token: self.token.is_some(),
            display_count: self.displays.len(),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now > self.deadline
    }

    /// Start a new TTL window of `ttl` from `now`.
    fn set_window(&mut self, now: Instant, ttl: Duration) {
        self.ttl = ttl;
        self.deadline = now + ttl;
        self.expires_at = now_ms() + ttl.as_millis() as i64;
    }

    fn check_resumable(&self, requester: &ConnectionId, now: Instant) -> Result<(), DirectoryError> {
        if self.is_expired(now) {
            return Err(DirectoryError::Expired);
        }
        match &self.control {
            Some(current) if current != requester => Err(DirectoryError::AlreadyBound),
            _ => Ok(()),
        }
    }

    fn cancel_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

struct Inner {
    config: DirectoryConfig,
    sessions: Mutex<HashMap<SessionCode, SessionEntry>>,
    codes: Mutex<Box<dyn CodeSource>>,
    epochs: AtomicU64,
    transport: Arc<dyn RoomTransport>,
    mirror: StoreMirror,
    metrics: Arc<MetricsRecorder>,
}

/// Authoritative map from session code to session record.
///
/// All state transitions happen under one lock and never across an await. Timers hold a weak
/// reference and an epoch; re-arming bumps the epoch, so a timer that lost a race with a resume
/// finds a newer epoch and does nothing.
#[derive(Clone)]
pub struct SessionDirectory {
    inner: Arc<Inner>,
}

impl SessionDirectory {
    pub fn new(
        config: DirectoryConfig,
        transport: Arc<dyn RoomTransport>,
        mirror: StoreMirror,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self::with_code_source(config, transport, mirror, metrics, Box::new(RandomCodes::new()))
    }

    pub fn with_code_source(
        config: DirectoryConfig,
        transport: Arc<dyn RoomTransport>,
        mirror: StoreMirror,
        metrics: Arc<MetricsRecorder>,
        codes: Box<dyn CodeSource>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: config.normalized(),
                sessions: Mutex::new(HashMap::new()),
                codes: Mutex::new(codes),
                epochs: AtomicU64::new(0),
                transport,
                mirror,
                metrics,
            }),
        }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.inner.config
    }

    pub fn mirror(&self) -> &StoreMirror {
        &self.inner.mirror
    }

    /// Allocate a fresh code and bind `control` to it.
    pub async fn create(&self, control: &ConnectionId) -> Result<Created, DirectoryError> {
        let inner = &self.inner;
        let session_ttl = inner.config.session_ttl;

        for attempt in 1..=inner.config.max_code_attempts {
            let candidate = inner.codes.lock().next_code();
            if inner.sessions.lock().contains_key(&candidate) {
                debug!(code = %candidate, attempt, "session code collision");
                continue;
            }
            if inner.mirror.is_claimed(&candidate).await {
                debug!(code = %candidate, attempt, "session code claimed by another instance");
                continue;
            }

            let token = ResumeToken::generate();
            let snapshot = {
                let mut sessions = inner.sessions.lock();
                if sessions.contains_key(&candidate) {
                    continue;
                }
                let now = Instant::now();
                let created_at = now_ms();
                let mut entry = SessionEntry {
                    code: candidate.clone(),
                    control: Some(control.clone()),
                    status: SessionStatus::Active,
                    created_at,
                    ttl: session_ttl,
                    deadline: now + session_ttl,
                    expires_at: created_at + session_ttl.as_millis() as i64,
                    token: Some(token.clone()),
                    displays: HashSet::new(),
                    epoch: 0,
                    timers: Vec::new(),
                };
                inner.arm_timers(&mut entry, now, None);
                let snapshot = entry.snapshot();
                sessions.insert(candidate.clone(), entry);
                snapshot
            };

            inner.metrics.counter_inc(names::SESSIONS_CREATED, 1);
            inner.metrics.gauge_add(names::SESSIONS_LIVE, 1);
            info!(code = %candidate, connection = %control, "session created");
            inner.mirror.session_changed(&snapshot, session_ttl);
            inner.mirror.store_token(&candidate, &token, session_ttl);
            return Ok(Created { snapshot, token });
        }

        let err = DirectoryError::CreateFailed(format!(
            "no free session code after {} attempts",
            inner.config.max_code_attempts
        ));
        inner.rejected(None, &err);
        Err(err)
    }

    /// Rebind the control role of a live session to `requester` and rotate its token.
    ///
    /// The presented token is consumed in the shared store before anything changes locally, so
    /// of several concurrent resumes holding the same token at most one gets past that step.
    /// Without a store the token check always passes.
    pub async fn resume(
        &self,
        code: &SessionCode,
        token: Option<&str>,
        requester: &ConnectionId,
    ) -> Result<Resumed, DirectoryError> {
        let result = self.try_resume(code, token, requester).await;
        if let Err(err) = &result {
            self.inner.rejected(Some(code), err);
        }
        result
    }

    async fn try_resume(
        &self,
        code: &SessionCode,
        token: Option<&str>,
        requester: &ConnectionId,
    ) -> Result<Resumed, DirectoryError> {
        let inner = &self.inner;
        inner
            .sessions
            .lock()
            .get(code)
            .ok_or(DirectoryError::NotFound)?
            .check_resumable(requester, Instant::now())?;

        if inner.mirror.consume_token(code, token).await == TokenCheck::Rejected {
            return Err(DirectoryError::InvalidToken);
        }

        let session_ttl = inner.config.session_ttl;
        let new_token = ResumeToken::generate();
        let snapshot = {
            let mut sessions = inner.sessions.lock();
            let entry = sessions.get_mut(code).ok_or(DirectoryError::NotFound)?;
            let now = Instant::now();
            entry.check_resumable(requester, now)?;

            entry.control = Some(requester.clone());
            entry.status = SessionStatus::Active;
            entry.displays.remove(requester);
            entry.token = Some(new_token.clone());
            entry.set_window(now, session_ttl);
            inner.arm_timers(entry, now, None);
            entry.snapshot()
        };

        inner.metrics.counter_inc(names::SESSIONS_RESUMED, 1);
        info!(code = %code, connection = %requester, "session resumed");
        inner.mirror.session_changed(&snapshot, session_ttl);
        inner.mirror.store_token(code, &new_token, session_ttl);
        Ok(Resumed {
            snapshot,
            token: new_token,
        })
    }

    /// Record `connection` as a display of a live session and tell the control connection.
    pub fn join_as_display(
        &self,
        code: &SessionCode,
        connection: &ConnectionId,
    ) -> Result<SessionSnapshot, DirectoryError> {
        let inner = &self.inner;
        let joined = {
            let mut sessions = inner.sessions.lock();
            match sessions.get_mut(code) {
                None => Err(DirectoryError::NotFound),
                Some(entry) if entry.is_expired(Instant::now()) => Err(DirectoryError::Expired),
                Some(entry) => {
                    entry.displays.insert(connection.clone());
                    Ok((entry.snapshot(), entry.control.clone()))
                }
            }
        };

        let (snapshot, control) = joined.inspect_err(|err| inner.rejected(Some(code), err))?;
        inner.metrics.counter_inc(names::DISPLAYS_JOINED, 1);
        debug!(code = %code, connection = %connection, "display joined");
        if let Some(control) = control.filter(|c| c != connection) {
            inner.transport.send_to(
                &control,
                &ServerEvent::DisplayJoined {
                    connection_id: connection.clone(),
                },
            );
        }
        Ok(snapshot)
    }

    /// Forget a display that left or was rebound elsewhere.
    pub fn display_left(&self, code: &SessionCode, connection: &ConnectionId) {
        if let Some(entry) = self.inner.sessions.lock().get_mut(code) {
            entry.displays.remove(connection);
        }
    }

    /// Mark a session stale after its control connection went away.
    ///
    /// Does nothing unless `connection` is the session's current control. The deadline drops to
    /// `now + idle_ttl` (never later than it already was) and the stale-grace timer starts.
    pub fn control_disconnected(&self, code: &SessionCode, connection: &ConnectionId) -> bool {
        let inner = &self.inner;
        let grace = inner.config.stale_grace;
        let stale = {
            let mut sessions = inner.sessions.lock();
            let Some(entry) = sessions.get_mut(code) else {
                return false;
            };
            if entry.control.as_ref() != Some(connection) {
                return false;
            }
            let now = Instant::now();
            entry.control = None;
            entry.status = SessionStatus::Stale;
            let remaining = entry.deadline.saturating_duration_since(now);
            entry.set_window(now, remaining.min(inner.config.idle_ttl));
            inner.arm_timers(entry, now, Some(grace));
            (entry.snapshot(), entry.ttl, entry.token.clone())
        };
        let (snapshot, window, token) = stale;

        inner.metrics.counter_inc(names::SESSIONS_STALE, 1);
        info!(code = %code, connection = %connection, window_ms = snapshot.ttl_ms, "session stale");
        inner
            .transport
            .send_to_room(code, &ServerEvent::SessionStale { code: code.clone() }, None);
        inner.mirror.session_changed(&snapshot, window);
        if let Some(token) = token {
            inner.mirror.shorten_token(code, &token, grace.min(window));
        }
        true
    }

    /// Remove a session immediately and tell its room. Idempotent.
    pub fn expire(&self, code: &SessionCode, reason: ExpiryReason) -> bool {
        self.inner.close(code, None, reason)
    }

    pub fn is_control(&self, code: &SessionCode, connection: &ConnectionId) -> bool {
        self.inner
            .sessions
            .lock()
            .get(code)
            .is_some_and(|entry| entry.control.as_ref() == Some(connection))
    }

    pub fn snapshot(&self, code: &SessionCode) -> Option<SessionSnapshot> {
        self.inner.sessions.lock().get(code).map(SessionEntry::snapshot)
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<_> = self
            .inner
            .sessions
            .lock()
            .values()
            .map(SessionEntry::snapshot)
            .collect();
        all.sort_by(|a, b| a.code.cmp(&b.code));
        all
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every session and cancel every timer.
    pub fn shutdown(&self) {
        let codes: Vec<SessionCode> = self.inner.sessions.lock().keys().cloned().collect();
        for code in codes {
            self.inner.close(&code, None, ExpiryReason::Shutdown);
        }
    }
}

impl Inner {
    /// Cancel the session's timers and arm a new generation against its current deadline.
    fn arm_timers(self: &Arc<Self>, entry: &mut SessionEntry, now: Instant, grace: Option<Duration>) {
        entry.cancel_timers();
        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        entry.epoch = epoch;

        let notice = self.config.expiry_notice;
        if !notice.is_zero() {
            let at = entry
                .deadline
                .checked_sub(notice)
                .filter(|at| *at > now)
                .unwrap_or(now);
            entry
                .timers
                .push(self.spawn_timer(&entry.code, epoch, at, TimerKind::ExpiryNotice));
        }
        entry.timers.push(self.spawn_timer(
            &entry.code,
            epoch,
            entry.deadline,
            TimerKind::HardExpiry,
        ));
        if let Some(grace) = grace {
            entry
                .timers
                .push(self.spawn_timer(&entry.code, epoch, now + grace, TimerKind::StaleGrace));
        }
    }

    fn spawn_timer(
        self: &Arc<Self>,
        code: &SessionCode,
        epoch: u64,
        at: Instant,
        kind: TimerKind,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let code = code.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire(&code, epoch, kind);
            }
        })
    }

    fn fire(&self, code: &SessionCode, epoch: u64, kind: TimerKind) {
        match kind {
            TimerKind::ExpiryNotice => {
                let in_ms = {
                    let sessions = self.sessions.lock();
                    match sessions.get(code) {
                        Some(entry) if entry.epoch == epoch => entry
                            .deadline
                            .saturating_duration_since(Instant::now())
                            .as_millis() as u64,
                        _ => return,
                    }
                };
                debug!(code = %code, in_ms, "session expiring");
                self.transport.send_to_room(
                    code,
                    &ServerEvent::SessionExpiring {
                        code: code.clone(),
                        in_ms,
                    },
                    None,
                );
            }
            TimerKind::HardExpiry => {
                self.close(code, Some(epoch), ExpiryReason::Deadline);
            }
            TimerKind::StaleGrace => {
                self.close(code, Some(epoch), ExpiryReason::StaleGrace);
            }
        }
    }

    /// Remove the session if present and, when `epoch` is given, still in that generation.
    fn close(&self, code: &SessionCode, epoch: Option<u64>, reason: ExpiryReason) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock();
            match sessions.get(code) {
                Some(entry) if epoch.map_or(true, |e| e == entry.epoch) => sessions.remove(code),
                Some(_) => {
                    debug!(code = %code, %reason, "ignoring superseded timer");
                    None
                }
                None => None,
            }
        };
        let Some(mut entry) = removed else {
            return false;
        };
        entry.cancel_timers();

        self.metrics.counter_inc(names::SESSIONS_EXPIRED, 1);
        self.metrics.gauge_add(names::SESSIONS_LIVE, -1);
        info!(code = %code, %reason, displays = entry.displays.len(), "session closed");
        self.transport
            .send_to_room(code, &ServerEvent::SessionClosed { code: code.clone() }, None);
        self.mirror.session_removed(code, entry.token.as_ref());
        true
    }

    fn rejected(&self, code: Option<&SessionCode>, err: &DirectoryError) {
        self.metrics.counter_inc(names::DIRECTORY_REJECTIONS, 1);
        match err {
            DirectoryError::CreateFailed(_) => warn!(error = %err, "session create failed"),
            _ => debug!(code = ?code.map(SessionCode::as_str), reason = err.code(), "directory rejected request"),
        }
    }
}
