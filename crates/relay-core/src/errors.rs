/// Failure of a session directory operation.
///
/// Every variant is reported to the requesting client through its acknowledgment; the session
/// record is left exactly as it was before the operation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
    #[error("session already has a control connection")]
    AlreadyBound,
    #[error("resume token missing, mismatched or already used")]
    InvalidToken,
    #[error("session creation failed: {0}")]
    CreateFailed(String),
}

impl DirectoryError {
    /// Wire code carried in the `error` field of a failed acknowledgment.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::AlreadyBound => "already_has_control",
            Self::InvalidToken => "invalid_token",
            Self::CreateFailed(_) => "create_failed",
        }
    }
}
