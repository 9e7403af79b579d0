use thiserror::Error;

/// Failures the core turns into visible state.
///
/// None of these are fatal: the controller and the session layer catch them
/// and record a human-readable message in `ChatState::error`.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The backend answered with a non-success status.
    #[error("{detail}")]
    Backend { status: u16, detail: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response from backend: {0}")]
    Decode(String),

    /// A boundary that exists in the contract but has no backend yet.
    #[error("{0} not yet implemented")]
    NotImplemented(&'static str),

    #[error("conversation {0} not found")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    /// Detail sent by the backend, when there was one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ChatError::Backend { detail, .. } => Some(detail),
            _ => None,
        }
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, ChatError::NotImplemented(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ChatError::Decode(err.to_string())
        } else {
            ChatError::Network(err.to_string())
        }
    }
}
