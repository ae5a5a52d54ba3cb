//! Error types for the edgequake-ieeu library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`IeeuError`]: **Fatal**: the run cannot proceed at all (missing
//!   configuration, unreadable document, malformed work items). Returned as
//!   `Err(IeeuError)` before any remote call is issued.
//!
//! * [`CallFailure`]: **Non-fatal**: a single VLM round trip failed. It never
//!   leaves the dispatcher as an error; it is classified into an
//!   [`crate::ErrorKind`] and the image is either retried or recorded in
//!   [`crate::BatchResult::failed_keys`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-ieeu library.
#[derive(Debug, Error)]
pub enum IeeuError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// A required configuration value is absent.
    #[error("Missing required config: {field}\nSet it in ~/.ieeU/settings.json or via {env}.")]
    MissingConfig { field: &'static str, env: &'static str },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The settings file exists but is not valid JSON for the expected shape.
    #[error("Failed to parse settings file '{path}': {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The settings file exists but could not be read.
    #[error("Failed to read settings file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Two work items share the same key; the result partition would be ambiguous.
    #[error("Duplicate image key '{key}' in dispatch input")]
    DuplicateKey { key: String },

    /// The Markdown document could not be read.
    #[error("Failed to read document '{path}': {source}")]
    DocumentRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The target directory does not exist.
    #[error("Directory not found: '{path}'")]
    DirectoryNotFound { path: PathBuf },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a single VLM round trip failed.
///
/// The variants carry exactly what [`crate::pipeline::classify::classify`]
/// needs: the transport-level cause, the HTTP status when one was received,
/// and the message text.
#[derive(Debug, Clone, Error)]
pub enum CallFailure {
    /// The request exceeded the per-call timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// DNS failure, connection refused or reset.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The endpoint answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// A success response whose body did not have the expected chat shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Any other client-side failure (request building, body decoding, …).
    #[error("{0}")]
    Request(String),
}

impl CallFailure {
    /// HTTP status attached to this failure, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            CallFailure::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CallFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CallFailure::Timeout(e.to_string())
        } else if e.is_connect() || is_connection_lost(&e) {
            CallFailure::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            CallFailure::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            CallFailure::Request(e.to_string())
        }
    }
}

/// True when `err` or any of its causes is a connection dropped mid-exchange:
/// a reset, abort, broken pipe or early EOF, or hyper's "incomplete message".
///
/// `reqwest` only flags `is_connect()` while the connection is being set up,
/// so losses after the request went out need the cause chain.
fn is_connection_lost(err: &(dyn std::error::Error + 'static)) -> bool {
    use std::io::ErrorKind::{BrokenPipe, ConnectionAborted, ConnectionReset, UnexpectedEof};

    let mut cause = Some(err);
    while let Some(e) = cause {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ConnectionReset | ConnectionAborted | BrokenPipe | UnexpectedEof
            ) {
                return true;
            }
        }
        if e.to_string().contains("connection closed before message completed") {
            return true;
        }
        cause = e.source();
    }
    false
}
