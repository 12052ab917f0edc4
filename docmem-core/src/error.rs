//! Error types and result types for engine operations.
//!
//! Every fallible engine operation returns [`EngineResult<T>`]. The variants are
//! symbolic so that a host layer can map them onto its own error representation
//! (protocol codes, HTTP statuses) without string matching.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised by the query, update, index, and
/// aggregation machinery.
///
/// All variants describe local, recoverable conditions: a malformed query aborts
/// only that query, an unwind error aborts only that pipeline run. The engine
/// itself never retries; retry policy belongs to the caller.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The query document combines operators ambiguously or uses an unknown
    /// `$`-operator. Carries the offending field path and a short reason.
    #[error("Malformed query at '{path}': {reason}")]
    MalformedQuery {
        /// The field path (or operator keyword) the parser was looking at.
        path: String,
        /// What was wrong with the expression.
        reason: String,
    },
    /// A value did not have the shape an operation required (e.g. a `$push`
    /// target that is not an array).
    #[error("Type mismatch on field '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        /// The field path the operation targeted.
        field: String,
        /// The shape the operation required.
        expected: &'static str,
        /// The shape actually found.
        found: &'static str,
    },
    /// Two operators in one update document target the same field path.
    #[error("Atomic update conflict on field '{0}'")]
    AtomicUpdateConflict(String),
    /// A dot-path update tried to descend through a non-document value.
    #[error("Cannot descend into non-document value at '{0}'")]
    InvalidSubfieldPath(String),
    /// A unique-index insert or update would map two documents to the same
    /// extracted key. Carries the index's key field names.
    #[error("Duplicate key for fields {0:?}")]
    DuplicateKey(Vec<String>),
    /// The `$unwind` target resolved to a non-array value.
    #[error("$unwind target '{0}' does not resolve to an array")]
    UnwindTargetNotArray(String),
    /// The named collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// Serialization/deserialization error when converting between document
    /// formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A specialized `Result` type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<BsonError> for EngineError {
    fn from(err: BsonError) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for EngineError {
    fn from(err: SerdeJsonError) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
