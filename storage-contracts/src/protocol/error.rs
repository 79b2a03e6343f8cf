// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::{Deserialize, Serialize};
use storage_types::IdentifierError;
use thiserror::Error;

/// Normalized outcome classes of a backend call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    /// Entity or relation absent. Drives branching, never user-facing.
    NotFound,
    /// Busy/invalid-argument on protect, unprotect or unmap. Absorbed by clients.
    AlreadyInState,
    /// A name returned by the cluster did not follow the identifier grammar.
    MalformedIdentifier,
    /// The bounded unmap loop ran out of attempts.
    Timeout,
    /// Anything else the backend reported.
    Backend,
}

impl StoreErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::AlreadyInState => "already in requested state",
            Self::MalformedIdentifier => "malformed identifier",
            Self::Timeout => "timed out",
            Self::Backend => "backend failure",
        }
    }

    /// Whether this kind aborts a collection pass.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::MalformedIdentifier | Self::Timeout | Self::Backend
        )
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} on {target}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    /// Fully-qualified entity path the call was about
    pub target: String,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn not_found(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, target, message)
    }

    pub fn backend(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Backend, target, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StoreErrorKind::NotFound
    }

    pub fn is_already_in_state(&self) -> bool {
        self.kind == StoreErrorKind::AlreadyInState
    }
}

impl From<IdentifierError> for StoreError {
    fn from(error: IdentifierError) -> Self {
        let target = match &error {
            IdentifierError::MissingPool(raw)
            | IdentifierError::MissingType(raw)
            | IdentifierError::MissingSnapshot(raw)
            | IdentifierError::UnexpectedSnapshot(raw) => raw.clone(),
        };
        Self::new(StoreErrorKind::MalformedIdentifier, target, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_roundtrips() {
        let error = StoreError::backend("lxd/image_abc", "rbd rm exited with 39");
        let json = serde_json::to_string(&error).expect("serialize error");
        let parsed: StoreError = serde_json::from_str(&json).expect("deserialize error");
        assert_eq!(parsed, error);
    }

    #[test]
    fn identifier_errors_are_fatal() {
        let error: StoreError = IdentifierError::MissingPool("image_abc".to_string()).into();
        assert_eq!(error.kind, StoreErrorKind::MalformedIdentifier);
        assert_eq!(error.target, "image_abc");
        assert!(error.kind.is_fatal());
        assert!(!StoreErrorKind::NotFound.is_fatal());
    }
}
