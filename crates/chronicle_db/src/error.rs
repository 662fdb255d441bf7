//! Error types for the database layer.

use crate::hooks::HookKind;
use thiserror::Error;

/// Database operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// DuckDB error (connection, query, constraint, etc.)
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation detected before reaching the database
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Invalid state transition (e.g. using a finished transaction)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed call arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transaction could not be committed or rolled back
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Value could not be converted to the requested Rust type
    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    /// A transaction opened on one connection was handed to another
    #[error("Transaction {transaction} belongs to connection {owner}, not {connection}")]
    ForeignTransaction {
        transaction: u64,
        owner: u64,
        connection: u64,
    },

    /// Scope was never registered on the model
    #[error("Unknown scope '{scope}' on model {model}")]
    UnknownScope { model: String, scope: String },

    /// A lifecycle hook rejected the operation
    #[error("{hook} hook failed: {source}")]
    Hook {
        hook: HookKind,
        #[source]
        source: Box<dyn std::error::Error + 'static>,
    },
}

impl DbError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a constraint error.
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a type conversion error.
    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }
}
