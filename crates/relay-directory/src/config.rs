use std::time::Duration;

/// Timing and identity settings for a [`crate::SessionDirectory`].
#[derive(Clone, Debug)]
pub struct DirectoryConfig {
    /// Hard window: lifetime of a session with a bound control connection.
    pub session_ttl: Duration,
    /// Window applied once the control connection drops.
    pub idle_ttl: Duration,
    /// How long a stale session waits for its producer to resume before it is closed.
    pub stale_grace: Duration,
    /// How long before the deadline `session-expiring` is sent.
    pub expiry_notice: Duration,
    /// Collision retries before `create` gives up.
    pub max_code_attempts: u32,
    /// Name of this relay process in mirrored records.
    pub instance_id: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(60 * 60),
            idle_ttl: Duration::from_secs(5 * 60),
            stale_grace: Duration::from_secs(5 * 60),
            expiry_notice: Duration::from_secs(60),
            max_code_attempts: 32,
            instance_id: format!("relay_{}", uuid::Uuid::now_v7()),
        }
    }
}

impl DirectoryConfig {
    /// Clamp inconsistent settings: the idle window never exceeds the hard window.
    pub fn normalized(mut self) -> Self {
        if self.idle_ttl > self.session_ttl {
            self.idle_ttl = self.session_ttl;
        }
        self.max_code_attempts = self.max_code_attempts.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_relay_windows() {
        let config = DirectoryConfig::default();
        assert_eq!(config.session_ttl, Duration::from_millis(3_600_000));
        assert_eq!(config.idle_ttl, Duration::from_secs(300));
        assert_eq!(config.stale_grace, Duration::from_secs(300));
        assert!(config.instance_id.starts_with("relay_"));
    }

    #[test]
    fn normalized_clamps_idle_window() {
        let config = DirectoryConfig {
            session_ttl: Duration::from_secs(10),
            idle_ttl: Duration::from_secs(60),
            max_code_attempts: 0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.idle_ttl, Duration::from_secs(10));
        assert_eq!(config.max_code_attempts, 1);
    }
}
