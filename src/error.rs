//! Error handling for the restbind binding engine.
//!
//! One taxonomy enum is used across the crate, with a `Result` alias and
//! `#[from]` conversions for the load-time error sources. Failures that can
//! surface to a host application travel through the configurable
//! [`ErrorCallback`], whose default is to hand the error back unchanged.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Result type for restbind operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for spec loading, binding generation and dispatch
#[derive(Debug, Error)]
pub enum Error {
    /// The API specification itself is malformed. Fatal at load/generation
    /// time, never retried.
    #[error("Spec error: {0}")]
    Spec(String),

    /// Caller-supplied or remote-returned data fails schema validation, or a
    /// client-side argument-shape mismatch.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A declared capability (persistence, inheritance) does not satisfy its
    /// required interface. Fatal at load time.
    #[error("Capability error: {0}")]
    Capability(String),

    /// Network-level failure, subject to the client retry policy.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportFailure),

    /// Non-2xx response that does not look like a structured domain error.
    #[error("Call to {method} {url} returned unknown error ({status}): {body}")]
    UnmappedRemote {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    /// Access to a field not declared in the model's schema.
    #[error("Model '{model}' has no attribute {field}")]
    UnknownField { model: String, field: String },

    /// Invariant violation inside the engine, e.g. a handler returning
    /// nothing to send.
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error while loading a spec file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a new spec error
    pub fn spec<S: Into<String>>(msg: S) -> Self {
        Self::Spec(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new capability error
    pub fn capability<S: Into<String>>(msg: S) -> Self {
        Self::Capability(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status carried by this error when it is turned into a response
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::UnmappedRemote { status, .. } => *status,
            _ => 500,
        }
    }

    /// Uppercase error code used in the wire envelope
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Spec(_) => "INVALID_SPEC",
            Error::Validation(_) => "INVALID_PARAMETER",
            Error::Capability(_) => "INVALID_CAPABILITY",
            Error::Transport(_) => "TRANSPORT_FAILURE",
            Error::UnmappedRemote { .. } => "UNMAPPED_REMOTE_ERROR",
            Error::UnknownField { .. } => "UNKNOWN_FIELD",
            _ => "INTERNAL_SERVER_ERROR",
        }
    }
}

/// Network-level failure kinds, split the way the retry policy needs them
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportFailure {
    /// The connection was established but the response did not arrive in time
    #[error("read timeout calling {0}")]
    ReadTimeout(String),

    /// The connection itself could not be established in time
    #[error("connect timeout calling {0}")]
    ConnectTimeout(String),

    /// The transport produced no response at all
    #[error("empty response from {0}")]
    EmptyResponse(String),

    /// Anything else the transport reports
    #[error("{0}")]
    Other(String),
}

/// Wire envelope for domain errors: the status is mirrored in both the HTTP
/// status line and the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub status: u16,
    pub error: String,
    pub error_description: String,
}

impl ErrorReply {
    pub fn new<C: Into<String>, D: Into<String>>(status: u16, error: C, description: D) -> Self {
        Self {
            status,
            error: error.into(),
            error_description: description.into(),
        }
    }

    /// Build the envelope for an engine error
    pub fn from_error(e: &Error) -> Self {
        Self {
            status: e.status_code(),
            error: e.error_code().to_string(),
            error_description: e.to_string(),
        }
    }
}

/// Hook through which every externally-surfaceable failure passes before it
/// reaches the host application. Hosts install their own to convert failures
/// into their response convention.
pub type ErrorCallback = Arc<dyn Fn(Error) -> Error + Send + Sync>;

/// The default callback: hand the error back unchanged.
pub fn default_error_callback() -> ErrorCallback {
    Arc::new(|e| e)
}
