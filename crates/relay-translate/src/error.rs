#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("Missing required parameters: text and target")]
    MissingParameters,

    #[error("LibreTranslate API error: {status} - {body}")]
    Upstream { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("failed to build http client: {0}")]
    Client(String),
}

impl TranslateError {
    /// Whether the caller, rather than the upstream service, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::MissingParameters)
    }
}

impl From<reqwest::Error> for TranslateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}
