//! Response normalization: reconcile the inference reply into one result.
//!
//! The service may answer with a flat `output_text` convenience field, with
//! only the nested `output[].content[]` items, or with something else
//! entirely (an error object, a proxy's HTML page). The candidate text is
//! located by an ordered chain of attempts, each returning `Some` or handing
//! over to the next:
//!
//! 1. top-level string `output_text`
//! 2. first `output_text` part inside the nested `output` items
//! 3. first `refusal` part inside the nested `output` items
//!
//! A candidate that parses as a JSON object is the structured result; any
//! other candidate is returned as raw text. With no candidate at all the
//! whole envelope is returned verbatim. Only an empty, truncated or
//! non-UTF-8 body is a `response_parse` failure.

use crate::error::StageError;
use crate::output::{ExtractionResult, TokenUsage};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Normalizer output: the result plus token accounting when reported.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub result: ExtractionResult,
    pub usage: Option<TokenUsage>,
}

/// One entry of the nested `output` collection.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    OutputText {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    OutputText { text: String },
    Refusal { refusal: String },
    #[serde(other)]
    Other,
}

/// Reconcile a raw reply body into an [`ExtractionResult`].
pub fn normalize(body: &[u8], status: u16) -> Result<Normalized, StageError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(StageError::response_parse(format!(
            "Inference reply body is empty (HTTP {status})"
        )));
    }
    let raw = std::str::from_utf8(body).map_err(|e| {
        StageError::response_parse(format!("Inference reply is not valid UTF-8: {e}"))
    })?;

    let envelope: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) if e.is_eof() => {
            return Err(StageError::response_parse(format!(
                "Inference reply is truncated (HTTP {status}): {e}"
            )))
        }
        Err(e) => {
            warn!("Inference reply (HTTP {}) is not JSON: {}", status, e);
            return Ok(Normalized {
                result: ExtractionResult::Envelope(raw.to_string()),
                usage: None,
            });
        }
    };

    let usage = envelope
        .get("usage")
        .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok());

    let result = match candidate_text(&envelope) {
        Some(text) => parse_candidate(text),
        None => {
            warn!("No output text in inference reply (HTTP {}); returning envelope", status);
            ExtractionResult::Envelope(raw.to_string())
        }
    };

    Ok(Normalized { result, usage })
}

fn candidate_text(envelope: &Value) -> Option<String> {
    flat_output_text(envelope)
        .or_else(|| nested_text(envelope, |part| match part {
            ContentPart::OutputText { text } => Some(text),
            _ => None,
        }))
        .or_else(|| nested_text(envelope, |part| match part {
            ContentPart::Refusal { refusal } => Some(refusal),
            _ => None,
        }))
}

fn flat_output_text(envelope: &Value) -> Option<String> {
    envelope
        .get("output_text")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// First non-blank text selected by `pick` across the nested output items.
///
/// Items that do not match a known shape are skipped, not fatal.
fn nested_text(envelope: &Value, pick: fn(ContentPart) -> Option<String>) -> Option<String> {
    let items = envelope.get("output")?.as_array()?;
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<OutputItem>(item.clone()).ok())
        .flat_map(|item| match item {
            OutputItem::Message { content } => content,
            OutputItem::OutputText { text } => vec![ContentPart::OutputText { text }],
            OutputItem::Other => Vec::new(),
        })
        .filter_map(pick)
        .find(|s| !s.trim().is_empty())
}

fn parse_candidate(text: String) -> ExtractionResult {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ Value::Object(_)) => {
            let keys = value.as_object().map_or(0, |o| o.len());
            debug!("Structured result with {} top-level keys", keys);
            ExtractionResult::Structured(value)
        }
        _ => {
            warn!("Output text is not a JSON object; returning raw text");
            ExtractionResult::RawText(text)
        }
    }
}
