//! Error types for shadow derivation and history capture.

use chronicle_db::{DbError, HookKind};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VersionError>;

#[derive(Error, Debug)]
pub enum VersionError {
    /// Options cannot produce a valid shadow model
    #[error("Configuration error: {0}")]
    Config(String),

    /// A hook fired that has no version type
    #[error("No version type mapped for hook {0}")]
    UnmappedHook(HookKind),

    /// History was requested from a model that has no shadow
    #[error("Model {0} is not versioned")]
    NotVersioned(String),

    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

impl VersionError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
