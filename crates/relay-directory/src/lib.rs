//! Session directory and role-scoped broadcast relay.
//!
//! [`SessionDirectory`] owns session records, their codes, TTL timers and resume tokens.
//! [`ConnectionRegistry`] binds live connections to a session in a role, [`BroadcastRouter`]
//! lets only the bound control connection publish into its room, and [`SessionHub`] wires the
//! three together behind the client-facing operations.

pub mod config;
pub mod directory;
pub mod hub;
pub mod mirror;
pub mod registry;
pub mod router;

pub use config::DirectoryConfig;
pub use directory::{CodeSource, Created, ExpiryReason, RandomCodes, Resumed, SessionDirectory};
pub use hub::SessionHub;
pub use mirror::{StoreMirror, TokenCheck};
pub use registry::{Binding, ConnectionRegistry};
pub use router::{BroadcastRouter, RouteOutcome, StreamKind};
