use thiserror::Error;

/// Error kinds surfaced by the engine and its store contract.
///
/// Each kind is a distinct variant so callers can branch on it without
/// inspecting message text.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required field was missing or out of range on insert.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A lookup by id found nothing.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A source declared an adapter type nobody knows how to build.
    #[error("unknown adapter type: {0}")]
    UnknownAdapter(String),

    /// A source could not be reached while connecting or fetching.
    #[error("connection to {source_id} failed: {reason}")]
    Connection { source_id: String, reason: String },

    /// The backing store failed underneath the contract.
    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn connection(source_id: impl Into<String>, reason: impl ToString) -> Self {
        CoreError::Connection {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
