use inkmark_contracts::session::{SessionError, SessionId};

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("no API key available (set GEMINI_API_KEY or GOOGLE_API_KEY)")]
    MissingCredential,

    #[error("generation service error: {0}")]
    Service(String),

    #[error("{0}")]
    EmptyResponse(String),

    #[error("{0}")]
    NoImage(String),

    #[error("image decode error: {0}")]
    Decode(String),

    #[error("no render context: {0}")]
    NoRenderContext(String),

    #[error("{0}")]
    Validation(String),

    #[error("session {0} is busy")]
    Busy(SessionId),

    #[error("session {0} not found")]
    SessionNotFound(SessionId),
}

impl EngineError {
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Message stored on the session after a failed operation.
    pub fn session_message(&self) -> String {
        match self {
            EngineError::Decode(_) | EngineError::NoRenderContext(_) => {
                "Could not prepare the annotated image for editing.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Rejections happen before a session is claimed and leave it untouched.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::Busy(_) | EngineError::SessionNotFound(_)
        )
    }
}

impl From<SessionError> for EngineError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(id) => EngineError::SessionNotFound(id),
            SessionError::Busy(id) => EngineError::Busy(id),
        }
    }
}
