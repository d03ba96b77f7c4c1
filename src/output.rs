//! Result types returned by the extraction entry points.

use crate::config::ErrorMode;
use crate::error::{AutofillError, StageError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// What the pipeline extracted from one image.
///
/// `Structured` is the preferred outcome. `RawText` and `Envelope` are
/// degraded successes: the caller still gets everything the service said.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExtractionResult {
    /// The output text parsed as a JSON object (schema-shaped).
    Structured(Value),
    /// Output text was found but is not a JSON object.
    RawText(String),
    /// No output text anywhere; the whole reply body, verbatim.
    Envelope(String),
}

impl ExtractionResult {
    pub fn is_structured(&self) -> bool {
        matches!(self, ExtractionResult::Structured(_))
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            ExtractionResult::Structured(v) => Some(v),
            _ => None,
        }
    }

    /// Body sent to the caller: serialised JSON, or the text unchanged.
    pub fn to_body(&self) -> String {
        match self {
            ExtractionResult::Structured(v) => v.to_string(),
            ExtractionResult::RawText(s) | ExtractionResult::Envelope(s) => s.clone(),
        }
    }
}

/// Token accounting reported by the inference service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// A completed extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub result: ExtractionResult,
    /// HTTP status of the inference reply, passed through to the caller.
    pub upstream_status: u16,
    pub model: String,
    /// MIME type of the image that was sent.
    pub image_mime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Text fields cut by the local length check (dotted paths).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub truncated_fields: Vec<String>,
    pub duration_ms: u64,
}

/// Transport-agnostic reply for an HTTP front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl GatewayResponse {
    /// Success: the upstream status with the result body.
    pub fn from_extraction(extraction: &Extraction) -> Self {
        let content_type = match extraction.result {
            ExtractionResult::Structured(_) => "application/json",
            _ if looks_like_json(&extraction.result.to_body()) => "application/json",
            _ => "text/plain",
        };
        Self {
            status: extraction.upstream_status,
            content_type,
            body: extraction.result.to_body(),
        }
    }

    /// Failure: a stage-tagged JSON body or the bare message.
    pub fn from_error(error: &AutofillError, mode: ErrorMode) -> Self {
        let (status, stage, message, upstream) = match error {
            AutofillError::Stage(e) => (
                e.http_status(),
                Some(e.stage()),
                e.message().to_string(),
                e.status(),
            ),
            other => (500, None, other.to_string(), None),
        };
        match mode {
            ErrorMode::Diagnostic => {
                let mut body = json!({
                    "stage": stage.map_or("configuration", |s| s.as_str()),
                    "message": message,
                });
                if let Some(code) = upstream {
                    body["status"] = json!(code);
                }
                Self {
                    status,
                    content_type: "application/json",
                    body: body.to_string(),
                }
            }
            ErrorMode::Terse => Self {
                status,
                content_type: "text/plain",
                body: message,
            },
        }
    }

    pub fn from_stage_error(error: &StageError, mode: ErrorMode) -> Self {
        Self::from_error(&AutofillError::Stage(error.clone()), mode)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn looks_like_json(body: &str) -> bool {
    serde_json::from_str::<Value>(body).is_ok()
}
