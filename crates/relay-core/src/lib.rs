pub mod errors;
pub mod events;
pub mod ids;
pub mod mock;
pub mod session;
pub mod transport;

pub use errors::DirectoryError;
pub use events::ServerEvent;
pub use ids::{ConnectionId, SessionCode};
pub use session::{ResumeToken, Role, SessionSnapshot, SessionStatus};
pub use transport::RoomTransport;

/// Milliseconds since the Unix epoch, used for every wire timestamp.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
