//! Error types for the autofill-gateway library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`StageError`]: a single pipeline stage could not complete (bad input,
//!   image download failed, inference service unreachable, undecodable
//!   reply). Each variant names its [`Stage`] so callers can tell the failure
//!   domains apart without parsing messages.
//!
//! * [`AutofillError`]: **fatal**, everything returned as `Err` from the
//!   top-level `extract*` functions. Wraps a [`StageError`] or reports a
//!   configuration problem (missing credential, invalid settings) that makes
//!   every request fail before any network call is attempted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One discrete pipeline phase, used to classify where a failure originated.
///
/// Serialised in `snake_case` (`"image_download"`, …); this string is the
/// machine-readable error code of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Missing or contradictory caller input. No network involved.
    Validation,
    /// Fetching a remote image failed or timed out.
    ImageDownload,
    /// The inference service was unreachable or timed out.
    InferenceCall,
    /// The inference reply could not be decoded at all.
    ResponseParse,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validation => "validation",
            Stage::ImageDownload => "image_download",
            Stage::InferenceCall => "inference_call",
            Stage::ResponseParse => "response_parse",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure of one pipeline stage. Terminal for the request it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StageError {
    /// Caller input was missing or malformed.
    #[error("{message}")]
    Validation { message: String },

    /// The remote image could not be fetched.
    ///
    /// `status` carries the upstream HTTP status when the server answered.
    #[error("{message}")]
    ImageDownload { message: String, status: Option<u16> },

    /// The call to the inference service failed at the transport level.
    ///
    /// `message` is `"timeout"` when the client-side deadline expired.
    #[error("{message}")]
    InferenceCall { message: String, status: Option<u16> },

    /// The inference reply body was empty, truncated or otherwise undecodable.
    #[error("{message}")]
    ResponseParse { message: String },
}

impl StageError {
    pub fn validation(message: impl Into<String>) -> Self {
        StageError::Validation {
            message: message.into(),
        }
    }

    pub fn response_parse(message: impl Into<String>) -> Self {
        StageError::ResponseParse {
            message: message.into(),
        }
    }

    /// The stage this failure belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Validation { .. } => Stage::Validation,
            StageError::ImageDownload { .. } => Stage::ImageDownload,
            StageError::InferenceCall { .. } => Stage::InferenceCall,
            StageError::ResponseParse { .. } => Stage::ResponseParse,
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> &str {
        match self {
            StageError::Validation { message }
            | StageError::ImageDownload { message, .. }
            | StageError::InferenceCall { message, .. }
            | StageError::ResponseParse { message } => message,
        }
    }

    /// Upstream HTTP status, when one was observed.
    pub fn status(&self) -> Option<u16> {
        match self {
            StageError::ImageDownload { status, .. } | StageError::InferenceCall { status, .. } => {
                *status
            }
            _ => None,
        }
    }

    /// Whether this failure is the client-side inference deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StageError::InferenceCall { message, .. } if message == "timeout")
    }

    /// HTTP-style status the gateway answers with for this failure.
    ///
    /// A download failure is the caller's bad reference (400); an inference
    /// failure is a bad gateway (502, or 504 on timeout).
    pub fn http_status(&self) -> u16 {
        match self {
            StageError::Validation { .. } | StageError::ImageDownload { .. } => 400,
            StageError::InferenceCall { .. } if self.is_timeout() => 504,
            StageError::InferenceCall { .. } | StageError::ResponseParse { .. } => 502,
        }
    }
}

/// All fatal errors returned by the autofill-gateway library.
#[derive(Debug, Error)]
pub enum AutofillError {
    // ── Pipeline errors ───────────────────────────────────────────────────
    /// A pipeline stage failed; see [`StageError::stage`].
    #[error("{} failed: {}", .0.stage(), .0)]
    Stage(#[from] StageError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// The inference credential is not configured.
    #[error("Missing {var} env var")]
    MissingCredential { var: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A schema version other than the registered one was requested.
    #[error("Unsupported schema version '{version}'")]
    UnsupportedSchemaVersion { version: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
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

impl AutofillError {
    /// The failing stage, when the error came from the pipeline.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            AutofillError::Stage(e) => Some(e.stage()),
            _ => None,
        }
    }

    /// Whether this is a configuration problem rather than a request failure.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            AutofillError::MissingCredential { .. }
                | AutofillError::InvalidConfig(_)
                | AutofillError::UnsupportedSchemaVersion { .. }
        )
    }
}

/// `outer: inner: root` so DNS, TLS and reset causes are not lost.
pub(crate) fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !msg.contains(&text) {
            msg.push_str(": ");
            msg.push_str(&text);
        }
        source = cause.source();
    }
    msg
}
