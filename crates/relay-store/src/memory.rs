use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use relay_core::{ConnectionId, Role, SessionCode};

use crate::error::StoreError;
use crate::keys;
use crate::record::SessionRecord;
use crate::SharedStore;

enum Value {
    Hash(SessionRecord),
    Token,
    Set(BTreeSet<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-process [`SharedStore`] with the same TTL and atomicity semantics as the Redis backend.
///
/// Used by tests and as a stand-in when several relay instances run in one process. Expiry is
/// measured on the tokio clock, so paused-time tests can drive it.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call fails with [`StoreError::Unavailable`] while unset.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL of a key, if it is live and has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".into()))
        }
    }

    fn purge_expired(entries: &mut HashMap<String, Entry>, now: Instant) {
        entries.retain(|_, e| e.is_live(now));
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn put_session(&self, record: &SessionRecord, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, now);
        entries.insert(
            keys::session(&record.code),
            Entry {
                value: Value::Hash(record.clone()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn get_session(&self, code: &SessionCode) -> Result<Option<SessionRecord>, StoreError> {
        self.check()?;
        let now = Instant::now();
        let entries = self.entries.lock();
        Ok(match entries.get(&keys::session(code)) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::Hash(record) => Some(record.clone()),
                _ => None,
            },
            _ => None,
        })
    }

    async fn delete_session(&self, code: &SessionCode) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = self.entries.lock();
        entries.remove(&keys::session(code));
        entries.remove(&keys::presence(code, Role::Control));
        entries.remove(&keys::presence(code, Role::Display));
        Ok(())
    }

    async fn put_token(
        &self,
        code: &SessionCode,
        fingerprint: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check()?;
        let now = Instant::now();
        self.entries.lock().insert(
            keys::token(code, fingerprint),
            Entry {
                value: Value::Token,
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn take_token(&self, code: &SessionCode, fingerprint: &str) -> Result<bool, StoreError> {
        self.check()?;
        let now = Instant::now();
        let removed = self.entries.lock().remove(&keys::token(code, fingerprint));
        Ok(matches!(removed, Some(entry) if matches!(entry.value, Value::Token) && entry.is_live(now)))
    }

    async fn expire_token(
        &self,
        code: &SessionCode,
        fingerprint: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(&keys::token(code, fingerprint)) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_presence(
        &self,
        code: &SessionCode,
        role: Role,
        connection: &ConnectionId,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let key = keys::presence(code, role);
        if entries.get(&key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(&key);
        }
        let entry = entries.entry(key).or_insert_with(|| Entry {
            value: Value::Set(BTreeSet::new()),
            expires_at: None,
        });
        if let Value::Set(members) = &mut entry.value {
            members.insert(connection.to_string());
        }
        entry.expires_at = Some(now + ttl);
        Ok(())
    }

    async fn remove_presence(
        &self,
        code: &SessionCode,
        role: Role,
        connection: &ConnectionId,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = self.entries.lock();
        let key = keys::presence(code, role);
        let now_empty = match entries.get_mut(&key) {
            Some(Entry { value: Value::Set(members), .. }) => {
                members.remove(connection.as_str());
                members.is_empty()
            }
            _ => false,
        };
        if now_empty {
            entries.remove(&key);
        }
        Ok(())
    }

    async fn presence(&self, code: &SessionCode, role: Role) -> Result<Vec<ConnectionId>, StoreError> {
        self.check()?;
        let now = Instant::now();
        let entries = self.entries.lock();
        Ok(match entries.get(&keys::presence(code, role)) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::Set(members) => members.iter().map(ConnectionId::from_raw).collect(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        })
    }
}
