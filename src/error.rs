//! Error types for the story loom.

use thiserror::Error;

/// Main error type for loom operations.
///
/// Snapshot lookups never produce one of these: a miss is `None` or an
/// empty list. Errors come from the backend, from decoding payloads and AI
/// responses, and from the on-disk pieces (element log, settings).
#[derive(Debug, Error)]
pub enum LoomError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend request failed: {0}")]
    Backend(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Stale canon state: stored version {current}, attempted {attempted}")]
    StaleCanon { current: u64, attempted: u64 },

    #[error("Sync {sync_number} already exists for chapter {chapter}")]
    SyncConflict { chapter: String, sync_number: u64 },

    /// The AI gateway answered with something unusable. The detail is kept
    /// for logs only; `Display` stays generic.
    #[error("AI response could not be used")]
    MalformedResponse { detail: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("File is locked by another process")]
    Locked,

    #[error("Subscription dropped")]
    SubscriptionDropped,
}

impl LoomError {
    /// Network or transport failure against the data backend or AI endpoint.
    pub fn is_transport(&self) -> bool {
        matches!(self, LoomError::Backend(_) | LoomError::Io(_))
    }

    /// Short text suitable for a dismissable notification.
    pub fn user_message(&self) -> String {
        match self {
            LoomError::Backend(_) | LoomError::Io(_) => {
                "Could not reach the server. Please try again.".to_string()
            }
            LoomError::MalformedResponse { .. } => "Generation failed.".to_string(),
            LoomError::NotFound { kind, .. } => format!("{kind} not found."),
            LoomError::StaleCanon { .. } | LoomError::SyncConflict { .. } => {
                "Canon was updated elsewhere. Reload and try again.".to_string()
            }
            _ => "Something went wrong.".to_string(),
        }
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        LoomError::MalformedResponse {
            detail: detail.into(),
        }
    }
}

impl From<serde_json::Error> for LoomError {
    fn from(e: serde_json::Error) -> Self {
        LoomError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for LoomError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        LoomError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for LoomError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        LoomError::Deserialization(e.to_string())
    }
}

/// Result type for loom operations.
pub type Result<T> = std::result::Result<T, LoomError>;
