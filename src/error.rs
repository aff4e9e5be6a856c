//! Error types for the transformation form engine
//!
//! Most variants here are invariant guards: they fire when the surrounding UI
//! calls into the session in a way the form itself would never allow
//! (unknown ratio key, field on the wrong edit type, apply while busy).
//! Collaborator failures (ledger, persistence) have their own types because
//! they travel back to the session as events rather than as return values.

use std::fmt;

use thiserror::Error;

use crate::state::edit::{EditType, TransformField};

pub type Result<T> = std::result::Result<T, EditorError>;

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("unknown aspect ratio key: {0}")]
    UnknownRatioKey(String),

    #[error("merge input is not a key-value mapping at `{path}`")]
    MergeInputInvalid { path: String },

    #[error("field `{field}` does not apply to `{edit_type}` edits")]
    FieldNotApplicable {
        field: TransformField,
        edit_type: EditType,
    },

    #[error("apply is not available: {0}")]
    ApplyBlocked(ApplyBlock),

    #[error("save is already in progress")]
    SaveInProgress,

    #[error(transparent)]
    Form(#[from] FormError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EditorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn merge_input(path: impl Into<String>) -> Self {
        Self::MergeInputInvalid { path: path.into() }
    }
}

/// Why the Apply action is currently disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyBlock {
    /// No field edit or ratio selection has settled yet
    NothingPending,
    /// A previous apply is still being rendered
    Transforming,
    /// Not enough credits to pay the fee
    InsufficientCredits { balance: i64, fee: i64 },
}

impl fmt::Display for ApplyBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingPending => write!(f, "no pending transformation"),
            Self::Transforming => write!(f, "a transformation is already in progress"),
            Self::InsufficientCredits { balance, fee } => {
                write!(f, "insufficient credits (balance {balance}, fee {fee})")
            }
        }
    }
}

/// Form validation failures, raised before a save is dispatched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("no image has been uploaded")]
    MissingImage,
}

/// Failures reported by the credit ledger collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("credit ledger rejected the update: {0}")]
    Rejected(String),

    #[error("credit ledger unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by the persistence collaborator
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("record {0} not found")]
    NotFound(i64),

    #[error("update requested without a record id")]
    MissingRecordId,

    #[error("background task failed: {0}")]
    Task(String),
}
