//! Error types for intent encoding and signer recovery.

use thiserror::Error;

use crate::signature::SignerAddress;

/// Failure to build one of the fixed-width protocol layouts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A numeric field does not fit into 8 bytes.
    #[error("{field} exceeds 64 bits")]
    Overflow { field: &'static str },

    /// A string field that gets hashed into the layout was empty.
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    /// An encoded buffer had the wrong length.
    #[error("{field} must be {expected} bytes, got {actual}")]
    Length {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Hex or decimal text could not be parsed.
    #[error("invalid {field}: {reason}")]
    Malformed { field: &'static str, reason: String },

    /// The commitment layout for this direction needs a field that was not supplied.
    #[error("{field} is required for {direction} commitments")]
    MissingField {
        field: &'static str,
        direction: &'static str,
    },
}

/// Rejection raised while recovering or authorising an intent signer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// The signature bytes are malformed or recovery failed.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Recovery worked but the signer is not the party allowed to originate this flow.
    #[error("unauthorized signer {recovered}, expected {expected}")]
    UnauthorizedSigner {
        expected: SignerAddress,
        recovered: SignerAddress,
    },

    /// The configured signature scheme name is not one we know.
    #[error("unknown signature scheme '{0}'")]
    UnknownScheme(String),

    /// An address string is not 20 bytes of hex.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The local signing key could not be loaded or used.
    #[error("signing key error: {0}")]
    Key(String),
}
