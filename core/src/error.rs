//! Error types for `mealprep-core`.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::EntityKind;

#[derive(Debug, Error)]
pub enum Error {
    /// No backing document yet. Callers initialize defaults instead of failing.
    #[error("store not found at {}", .0.display())]
    StoreMissing(PathBuf),

    #[error("store at {} is corrupt: {reason}", path.display())]
    StorageCorrupt { path: PathBuf, reason: String },

    /// The file was rewritten by someone else after this store loaded it.
    #[error("store at {} was changed by another process; reopen it and retry", .0.display())]
    StoreChanged(PathBuf),

    #[error("store version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A mutation would leave the document violating a boundary invariant.
    #[error("invalid document: {}", .0.join("; "))]
    InvalidDocument(Vec<String>),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("invalid week {week}: expected 1..={total}")]
    InvalidWeek { week: u32, total: u32 },

    #[error("unknown schedule template: {0}")]
    UnknownTemplate(String),

    #[error("{} recipe(s) could not be scheduled: {}", .0.len(), .0.join(", "))]
    ScheduleOverflow(Vec<String>),

    #[error("invalid recipe {id}: {}", reasons.join("; "))]
    InvalidRecipe { id: String, reasons: Vec<String> },

    #[error("invalid feedback: {0}")]
    InvalidFeedback(String),

    #[error("proposal for {recipe_id} rejected: {}", reasons.join("; "))]
    ProposalRejected {
        recipe_id: String,
        reasons: Vec<String>,
    },

    #[error("feedback {0} has already been resolved")]
    FeedbackAlreadyResolved(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("AI collaborator timed out")]
    AiCollaboratorTimeout,

    #[error("AI collaborator error: {0}")]
    AiCollaboratorError(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Collaborator failures leave the store untouched and can be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AiCollaboratorTimeout | Self::AiCollaboratorError(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
