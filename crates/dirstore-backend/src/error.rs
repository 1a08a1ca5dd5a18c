//! Backend error types
//!
//! Every failure of the insertion path is one of these variants, and every
//! variant maps onto exactly one [`ResultCode`].

use dirstore_common::{AddResult, EntryId, ResultCode};
use dirstore_index::IndexError;
use thiserror::Error;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, Error>;

/// Backend error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    #[error("entry {0} violates object class rules")]
    ObjectClassViolation(String),

    #[error("no such object: {dn}")]
    NoSuchObject { dn: String, matched: Option<String> },

    #[error("insufficient access to add {0}")]
    InsufficientAccess(String),

    #[error("operations error: {0}")]
    Operations(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error(transparent)]
    Common(#[from] dirstore_common::Error),
}

impl Error {
    /// Create an operations error
    pub fn operations(msg: impl Into<String>) -> Self {
        Self::Operations(msg.into())
    }

    /// Result code reported to the client
    #[must_use]
    pub const fn result_code(&self) -> ResultCode {
        match self {
            Self::AlreadyExists(_) => ResultCode::AlreadyExists,
            Self::ObjectClassViolation(_) => ResultCode::ObjectClassViolation,
            Self::NoSuchObject { .. } => ResultCode::NoSuchObject,
            Self::InsufficientAccess(_) => ResultCode::InsufficientAccess,
            Self::Operations(_) | Self::Index(_) | Self::Common(_) => ResultCode::OperationsError,
        }
    }

    /// Deepest existing ancestor, for `NoSuchObject`
    #[must_use]
    pub fn matched(&self) -> Option<&str> {
        match self {
            Self::NoSuchObject { matched, .. } => matched.as_deref(),
            _ => None,
        }
    }
}

/// Build the protocol-level result of one add attempt
#[must_use]
pub fn add_result(outcome: &Result<EntryId>) -> AddResult {
    match outcome {
        Ok(_) => AddResult::success(),
        Err(e) => AddResult {
            code: e.result_code(),
            matched: e.matched().map(str::to_string),
            // internal details stay in the logs
            message: match e.result_code() {
                ResultCode::OperationsError => String::new(),
                _ => e.to_string(),
            },
        },
    }
}
