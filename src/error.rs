//! Errors attached to modules and chunk groups during a build

use serde::{Deserialize, Serialize};

/// A failure while creating, building or resolving a module.
///
/// Errors are stored on the module that caused them (and copied onto the
/// chunk groups that contain or reference it), so they must be cheap to
/// clone and carry their context as plain strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum BuildError {
    /// A requested dependency could not be located
    #[error("Can't resolve '{request}' in '{issuer}': {reason}")]
    Resolve {
        request: String,
        issuer: String,
        reason: String,
    },

    /// Reading a module failed. Transient failures are retried.
    #[error("Failed to read {identifier}: {reason}")]
    Io {
        identifier: String,
        reason: String,
        transient: bool,
    },

    /// The module source could not be compiled
    #[error("Module build failed for {identifier}: {reason}")]
    Build { identifier: String, reason: String },
}

impl BuildError {
    pub fn resolve(request: &str, issuer: Option<&str>, reason: impl Into<String>) -> Self {
        BuildError::Resolve {
            request: request.to_string(),
            issuer: issuer.unwrap_or("<root>").to_string(),
            reason: reason.into(),
        }
    }

    pub fn build(identifier: &str, reason: impl Into<String>) -> Self {
        BuildError::Build {
            identifier: identifier.to_string(),
            reason: reason.into(),
        }
    }

    /// Map an I/O error; races with concurrent writers count as transient.
    pub fn io(identifier: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        let transient = matches!(
            err.kind(),
            ErrorKind::NotFound
                | ErrorKind::Interrupted
                | ErrorKind::WouldBlock
                | ErrorKind::TimedOut
                | ErrorKind::UnexpectedEof
        );
        BuildError::Io {
            identifier: identifier.to_string(),
            reason: err.to_string(),
            transient,
        }
    }

    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, BuildError::Io { transient: true, .. })
    }

    /// A transient error that survived every retry becomes a resolution error.
    pub fn into_resolution(self) -> Self {
        match self {
            BuildError::Io {
                identifier,
                reason,
                transient: true,
            } => BuildError::Resolve {
                request: identifier.clone(),
                issuer: identifier,
                reason: format!("{} (after retries)", reason),
            },
            other => other,
        }
    }
}
