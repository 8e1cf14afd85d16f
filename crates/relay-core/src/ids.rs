use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Transport-assigned identity of one live connection.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Number of decimal digits in a session code.
pub const CODE_LEN: usize = 9;

/// Size of the code space (`000000000..=999999999`).
pub const CODE_SPACE: u32 = 1_000_000_000;

/// Short numeric code shared by a control connection and its displays.
///
/// Always exactly nine ASCII digits, zero-padded. Construct with [`SessionCode::random`] or by
/// parsing client input; the serde representation is the bare string and invalid strings are
/// rejected on deserialize.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(String);

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("session code must be nine decimal digits, got {0:?}")]
pub struct InvalidSessionCode(pub String);

impl SessionCode {
    /// Draw a uniformly random code. Collision checks are the caller's job.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::from_number(rng.gen_range(0..CODE_SPACE))
    }

    pub fn from_number(n: u32) -> Self {
        Self(format!("{:0width$}", n % CODE_SPACE, width = CODE_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }}

impl FromStr for SessionCode {
    type Err = InvalidSessionCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == CODE_LEN && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_owned()))
        } else {
            Err(InvalidSessionCode(s.to_owned()))
        }
    }
}

impl TryFrom<String> for SessionCode {
    type Error = InvalidSessionCode;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> Self {
        code.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn random_codes_are_nine_digits() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let code = SessionCode::random(&mut rng);
            assert_eq!(code.as_str().len(), CODE_LEN);
            assert!(code.as_str().bytes().all(|b| b.is_ascii_digit()), "got: {code}");
        }
    }

    #[test]
    fn small_numbers_are_zero_padded() {
        assert_eq!(SessionCode::from_number(123_456).as_str(), "000123456");
        assert_eq!(SessionCode::from_number(0).as_str(), "000000000");
        assert_eq!(SessionCode::from_number(999_999_999).as_str(), "999999999");
    }

    #[test]
    fn parse_rejects_malformed_codes() {
        assert!("000123456".parse::<SessionCode>().is_ok());
        assert!("12345678".parse::<SessionCode>().is_err());
        assert!("1234567890".parse::<SessionCode>().is_err());
        assert!("12345678a".parse::<SessionCode>().is_err());
        assert!("".parse::<SessionCode>().is_err());
    }

    #[test]
    fn deserialize_validates() {
        let ok: SessionCode = serde_json::from_str("\"000000042\"").unwrap();
        assert_eq!(ok.as_str(), "000000042");
        assert!(serde_json::from_str::<SessionCode>("\"42\"").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "\"000000042\"");
    }}
