// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("{0} binary not found in PATH")]
    BinaryNotFound(String),

    #[error("Failed to execute {command}: {reason}")]
    SpawnFailed { command: String, reason: String },
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
