// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error taxonomy for the recovery engine.

use thiserror::Error;

/// Errors raised by tracker, decoder, and rule operations.
///
/// Down-bin budget exhaustion is not represented here: a rejected tracker
/// update is a normal `Ok(false)`.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// A malformed token or a missing selector.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Bit-vector length mismatch at a decode, mask, or rule boundary.
    #[error("wrong size for {context}: expected {expected} bits, got {actual}")]
    WrongSize {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// The execution result lacks a capability the decoder needs.
    #[error("decoder {decoder} requires {capability} capture support")]
    UnsupportedInputType {
        decoder: String,
        capability: &'static str,
    },

    #[error("{kind} [{name}] not found")]
    NotFound { kind: &'static str, name: String },

    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Catalog inconsistency detected at load or use time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Captured failure data could not be attributed to a catalog entry.
    #[error("attribution failed: {0}")]
    Attribution(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

impl RecoveryError {
    pub fn wrong_size(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        RecoveryError::WrongSize {
            context: context.into(),
            expected,
            actual,
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        RecoveryError::NotFound {
            kind,
            name: name.into(),
        }
    }
}

impl From<serde_json::Error> for RecoveryError {
    fn from(error: serde_json::Error) -> Self {
        RecoveryError::Parse(error.to_string())
    }
}

impl From<serde_yaml::Error> for RecoveryError {
    fn from(error: serde_yaml::Error) -> Self {
        RecoveryError::Parse(error.to_string())
    }
}

/// Result type for recovery operations.
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// A fault raised by a tester collaborator while retrieving capture data.
///
/// Decoders treat this as "no failure observed".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("capture fault: {0}")]
pub struct CaptureFault(pub String);
