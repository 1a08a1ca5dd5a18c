//! Error and result-code types for dirstore
//!
//! `Error` covers failures in the shared types (names, LDIF, config).
//! `ResultCode` is the outcome vocabulary a protocol layer reports back to
//! the client; every backend error maps onto exactly one code.

use crate::types::DnError;
use std::fmt;
use thiserror::Error;

/// Common result type for dirstore-common operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid distinguished name: {0}")]
    InvalidDn(#[from] DnError),

    #[error("LDIF error at line {line}: {reason}")]
    Ldif { line: usize, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create an LDIF parse error
    pub fn ldif(line: usize, reason: impl Into<String>) -> Self {
        Self::Ldif {
            line,
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Outcome of an operation as reported to the client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    OperationsError,
    NoSuchObject,
    InsufficientAccess,
    ObjectClassViolation,
    AlreadyExists,
}

impl ResultCode {
    /// LDAP numeric value
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Success => 0,
            Self::OperationsError => 1,
            Self::NoSuchObject => 32,
            Self::InsufficientAccess => 50,
            Self::ObjectClassViolation => 65,
            Self::AlreadyExists => 68,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::OperationsError => "operationsError",
            Self::NoSuchObject => "noSuchObject",
            Self::InsufficientAccess => "insufficientAccessRights",
            Self::ObjectClassViolation => "objectClassViolation",
            Self::AlreadyExists => "entryAlreadyExists",
        }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// What a protocol layer encodes for one add request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddResult {
    pub code: ResultCode,
    /// Deepest existing ancestor, only for `NoSuchObject`
    pub matched: Option<String>,
    pub message: String,
}

impl AddResult {
    #[must_use]
    pub fn success() -> Self {
        Self {
            code: ResultCode::Success,
            matched: None,
            message: String::new(),
        }
    }
}
