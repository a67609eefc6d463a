use thiserror::Error;

/// Recoverable errors raised by the selection, dataset, and playback components.
///
/// None of these are fatal: the caller reports them and the interface stays interactive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExplorerError {
    #[error("no dataset loaded")]
    NoDatasetLoaded,

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("malformed step at position {position}: {reason}")]
    MalformedStep { position: usize, reason: String },

    #[error("playback session superseded by a newer run")]
    SessionSuperseded,

    #[error("playback session cancelled")]
    SessionCancelled,

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("playback interval must be a positive number of milliseconds")]
    InvalidInterval,
}

impl ExplorerError {
    /// Whether the error should be shown to the user. Superseded sessions are expected and silent.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            ExplorerError::SessionSuperseded | ExplorerError::SessionCancelled
        )
    }
}
