//! Key layout shared by every store backend.

use relay_core::{Role, SessionCode};

const PREFIX: &str = "relay";

pub fn session(code: &SessionCode) -> String {
    format!("{PREFIX}:session:{code}")
}

pub fn token(code: &SessionCode, fingerprint: &str) -> String {
    format!("{PREFIX}:token:{code}:{fingerprint}")
}

pub fn presence(code: &SessionCode, role: Role) -> String {
    format!("{PREFIX}:presence:{code}:{role}")
}
