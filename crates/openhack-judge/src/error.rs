// Error types shared by the gateway, storage, and session layers.

use thiserror::Error;

use crate::model::Judgment;
use crate::session::TeamChoice;

/// HTTP status the rotation endpoint returns once judging is over.
pub const JUDGING_FINISHED_STATUS: u16 = 410;

/// Failure reported by a [`crate::gateway::JudgeApi`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The server answered with a non-success status.
    #[error("{message} (status {status})")]
    Status { status: u16, message: String },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True iff this is the "rotation exhausted" signal.
    pub fn is_judging_finished(&self) -> bool {
        self.status() == Some(JUDGING_FINISHED_STATUS)
    }
}

/// Failure of the key-value persistence backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage lock poisoned")]
    Poisoned,
}

/// Failure of [`crate::session::JudgingSession::record_judgment`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JudgmentError {
    /// The chosen slot holds no team, so there is nothing to submit.
    #[error("no team in the {0} slot")]
    EmptySlot(TeamChoice),

    /// The judgment itself was rejected; nothing was recorded.
    #[error("failed to submit judgment: {0}")]
    Submit(ApiError),

    /// The judgment was recorded, but advancing the rotation failed.
    /// This is a terminal outcome, not something to roll back or retry.
    #[error("judgment {} recorded but rotation failed: {source}", .judgment.id)]
    Advance { judgment: Judgment, source: ApiError },
}

impl JudgmentError {
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            JudgmentError::EmptySlot(_) => None,
            JudgmentError::Submit(e) => Some(e),
            JudgmentError::Advance { source, .. } => Some(source),
        }
    }

    /// The judgment that was durably recorded, if any.
    pub fn recorded(&self) -> Option<&Judgment> {
        match self {
            JudgmentError::Advance { judgment, .. } => Some(judgment),
            _ => None,
        }
    }

    pub fn is_judging_finished(&self) -> bool {
        self.api_error().is_some_and(ApiError::is_judging_finished)
    }
}

/// Classification of a best-effort step whose failure must not propagate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    /// The step did not run. The reason is for logs and tests.
    Skipped(&'static str),
    /// The step failed; state was left at its safe default.
    Recoverable(ApiError),
}

impl StepOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, StepOutcome::Applied)
    }
}
