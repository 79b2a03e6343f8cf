// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use storage_contracts::{StoreError, StoreErrorKind};
use thiserror::Error;

/// Error types for collector passes
#[derive(Error, Debug)]
pub enum GcError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Lineage lock {path} could not be taken: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Lineage {0} is already being collected")]
    LockBusy(String),

    #[error("Invalid configuration {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("Parent chain of {0} loops back on itself")]
    LineageCycle(String),
}

impl GcError {
    /// Backend error kind, when the failure came from the store
    pub fn store_kind(&self) -> Option<StoreErrorKind> {
        match self {
            Self::Store(error) => Some(error.kind),
            _ => None,
        }
    }
}

/// Result type alias for collector operations
pub type Result<T> = std::result::Result<T, GcError>;
