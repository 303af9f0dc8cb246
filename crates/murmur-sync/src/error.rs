use murmur_types::ConversationKey;
use thiserror::Error;

/// Failures reported by a backend collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("channel closed")]
    Closed,
}

impl BackendError {
    /// Definitive rejections are never worth retrying.
    pub fn is_definitive(&self) -> bool {
        matches!(self, Self::Forbidden(_) | Self::NotFound(_))
    }
}

/// Errors surfaced by the engine to its caller.
///
/// Results tagged with an abandoned conversation never show up here; they are
/// dropped inside the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("failed to fetch page {page} of {key}: {source}")]
    FetchFailed {
        key: ConversationKey,
        page: u32,
        #[source]
        source: BackendError,
    },

    #[error("write failed: {0}")]
    WriteFailed(#[source] BackendError),

    #[error("subscription to {key} dropped")]
    SubscriptionDropped { key: ConversationKey },

    #[error("presence channel unavailable: {0}")]
    PresenceFailed(#[source] BackendError),

    #[error("no active conversation")]
    NoActiveConversation,

    #[error("message body is empty")]
    EmptyBody,

    #[error("session closed")]
    Closed,
}

impl SyncError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::FetchFailed { source, .. } | Self::WriteFailed(source) | Self::PresenceFailed(source) => {
                !source.is_definitive()
            }
            Self::SubscriptionDropped { .. } => true,
            Self::NoActiveConversation | Self::EmptyBody | Self::Closed => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
