use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sequence gap: expected hint {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("envelope for session {expected} carries session {got}")]
    SessionMismatch { expected: String, got: String },
}
