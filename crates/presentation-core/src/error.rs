//! Error types for the presentation core.

use crate::collection::CollectionError;
use crate::command::CommandError;
use crate::dto::DtoError;
use crate::runtime::RuntimeError;
use crate::trx::TransactionError;

/// The main error type for presentation operations.
///
/// Each subsystem has its own error enum; this type aggregates them so that
/// application code can use a single `?`-friendly result type.
#[derive(Debug, thiserror::Error)]
pub enum PresentationError {
    /// Edit transaction ordering was violated.
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// A child collection operation failed.
    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),

    /// A command could not be executed.
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Conversion between view models and data records failed.
    #[error("DTO error: {0}")]
    Dto(#[from] DtoError),

    /// The async command runtime could not be created.
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// A specialized Result type for presentation operations.
pub type Result<T> = std::result::Result<T, PresentationError>;
