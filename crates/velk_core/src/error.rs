//! Error types for the fallible crate surface
//!
//! Kernel ABI operations report through [`ReturnValue`](crate::ReturnValue)
//! codes or empty handles; the checked helpers on the runtime wrap those
//! outcomes in a typed error.

use crate::uid::Uid;
use thiserror::Error;

/// Errors surfaced by the checked runtime helpers.
#[derive(Error, Debug)]
pub enum VelkError {
    /// No factory registered for the class UID
    #[error("no factory registered for class {0}")]
    UnknownClass(Uid),

    /// The created object does not expose the requested interface
    #[error("class {0} does not expose the requested interface")]
    MissingInterface(Uid),

    /// A one-shot initializer was invoked twice
    #[error("one-shot initialization violated: {0}")]
    AlreadyInitialized(&'static str),

    /// Incompatible value type for a property or any
    #[error("value type {found} is not compatible with {expected}")]
    IncompatibleType { expected: Uid, found: Uid },
}

/// Result type for checked runtime operations.
pub type Result<T> = std::result::Result<T, VelkError>;
