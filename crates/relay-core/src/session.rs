use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ids::{ConnectionId, SessionCode};

/// Role a connection holds inside a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Control,
    Display,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Control => write!(f, "control"),
            Self::Display => write!(f, "display"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Stale,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "stale" => Ok(Self::Stale),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

const TOKEN_BYTES: usize = 32;

/// Single-use secret that lets a reconnecting producer reclaim control of its session.
///
/// The raw value only ever leaves the process inside the acknowledgment sent to the current
/// control connection. Everything else (logs, shared store keys, debug views) sees either the
/// redacted `Debug` output or [`ResumeToken::fingerprint`].
pub struct ResumeToken(SecretString);

impl ResumeToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        Self(SecretString::from(encoded))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(SecretString::from(raw.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Hex SHA-256 of the token, safe to use as a storage key.
    pub fn fingerprint(&self) -> String {
        format!("{:x}", Sha256::digest(self.expose().as_bytes()))
    }}

impl Clone for ResumeToken {
    fn clone(&self) -> Self {
        Self::from_raw(self.expose().to_owned())
    }
}

impl std::fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResumeToken([REDACTED])")
    }
}

/// Point-in-time, token-free view of a session record.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub code: SessionCode,
    pub control_connection_id: Option<ConnectionId>,
    pub status: SessionStatus,
    /// Wall-clock creation time, milliseconds since epoch.
    pub created_at: i64,
    /// Length of the current TTL window.
    pub ttl_ms: u64,
    /// Wall-clock deadline of the current TTL window, milliseconds since epoch.
    pub expires_at: i64,
    pub has_resume_token: bool,
    pub display_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_unique_and_url_safe() {
        let a = ResumeToken::generate();
        let b = ResumeToken::generate();
        assert_ne!(a.expose(), b.expose());
        assert_eq!(a.expose().len(), 43);
        assert!(a
            .expose()
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || c == b'-' || c == b'_'));
    }

    #[test]
    fn debug_is_redacted() {
        let token = ResumeToken::from_raw("super-secret");
        let printed = format!("{token:?}");
        assert!(!printed.contains("super-secret"));
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let token = ResumeToken::from_raw("abc");
        assert_eq!(
            token.fingerprint(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(token.fingerprint(), token.clone().fingerprint());
    }

    #[test]
    fn status_roundtrip() {
        for status in [SessionStatus::Active, SessionStatus::Stale] {
            assert_eq!(status.to_string().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("closed".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Control).unwrap(), "\"control\"");
        assert_eq!(serde_json::to_string(&Role::Display).unwrap(), "\"display\"");
    }
}
