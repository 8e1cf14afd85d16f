//! Shared state store used to mirror session metadata across relay instances.
//!
//! The relay runs fine without one. When configured, the store carries presence sets, a
//! mirrored copy of each session record, and the single-use resume tokens whose atomic
//! read-and-delete closes the cross-instance resume race.

pub mod error;
pub mod keys;
pub mod memory;
pub mod record;
pub mod redis_store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use record::SessionRecord;
pub use redis_store::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use relay_core::{ConnectionId, Role, SessionCode};

/// Key-value store with per-key TTL and set operations.
///
/// Every method may fail; callers decide whether a failure matters. Implementations must make
/// [`SharedStore::take_token`] atomic: exactly one of any number of concurrent callers holding
/// the same token observes `true`.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Write the session hash, replacing any previous copy, expiring after `ttl`.
    async fn put_session(&self, record: &SessionRecord, ttl: Duration) -> Result<(), StoreError>;

    async fn get_session(&self, code: &SessionCode) -> Result<Option<SessionRecord>, StoreError>;

    /// Remove the session hash and both presence sets.
    async fn delete_session(&self, code: &SessionCode) -> Result<(), StoreError>;

    /// Store a resume token fingerprint, expiring after `ttl`.
    async fn put_token(
        &self,
        code: &SessionCode,
        fingerprint: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Atomically read and delete a resume token. Returns whether it was present.
    async fn take_token(&self, code: &SessionCode, fingerprint: &str) -> Result<bool, StoreError>;

    /// Reset the TTL of an existing token. Never recreates a consumed or expired token.
    async fn expire_token(
        &self,
        code: &SessionCode,
        fingerprint: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn add_presence(
        &self,
        code: &SessionCode,
        role: Role,
        connection: &ConnectionId,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn remove_presence(
        &self,
        code: &SessionCode,
        role: Role,
        connection: &ConnectionId,
    ) -> Result<(), StoreError>;

    async fn presence(&self, code: &SessionCode, role: Role) -> Result<Vec<ConnectionId>, StoreError>;
}
