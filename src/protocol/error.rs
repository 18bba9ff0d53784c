//! meshwire error types

use thiserror::Error;

use crate::transport::TransportError;

/// Errors raised by the schema registry, the codec, and the client layer
#[derive(Error, Debug)]
pub enum Error {
    /// Type name not present in the registry
    #[error("unknown message type: {name}")]
    UnknownType {
        /// Requested or referenced type name
        name: String,
    },

    /// Schema document is structurally invalid
    #[error("invalid schema: {reason}")]
    InvalidSchema {
        /// What was wrong with the document
        reason: String,
    },

    /// A `required` field was absent
    #[error("missing required field {type_name}.{field}")]
    MissingRequiredField {
        /// Message type being encoded or decoded
        type_name: String,
        /// Field that was missing
        field: String,
    },

    /// Supplied value does not fit the declared wire type
    #[error("field {type_name}.{field} expects {expected}")]
    FieldTypeMismatch {
        /// Message type being encoded
        type_name: String,
        /// Offending field
        field: String,
        /// Declared type of the field
        expected: String,
    },

    /// Record carries a field the type does not declare
    #[error("field {field} is not declared by {type_name}")]
    UnknownField {
        /// Message type being encoded
        type_name: String,
        /// Undeclared field name
        field: String,
    },

    /// Frame could not be parsed against the descriptor
    #[error("malformed {type_name} frame: {reason}")]
    MalformedFrame {
        /// Message type being decoded
        type_name: String,
        /// Structural problem found
        reason: String,
    },

    /// Server address cannot be turned into a WebSocket URL
    #[error("invalid server address {address:?}: {reason}")]
    InvalidAddress {
        /// Address as listed in the roster
        address: String,
        /// Why it was rejected
        reason: String,
    },

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Schema document is not valid JSON
    #[error("schema JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Roster file is not valid TOML
    #[error("roster TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Public key is not valid base64
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl Error {
    pub(crate) fn malformed(type_name: &str, reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            type_name: type_name.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(type_name: &str, field: &str, expected: impl Into<String>) -> Self {
        Self::FieldTypeMismatch {
            type_name: type_name.to_owned(),
            field: field.to_owned(),
            expected: expected.into(),
        }
    }

    pub(crate) fn invalid_schema(reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            reason: reason.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
