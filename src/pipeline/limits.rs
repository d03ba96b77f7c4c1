//! Local enforcement of per-field character limits.
//!
//! The instruction text asks the service to respect each text field's limit
//! (counted in characters, spaces included) and to avoid line breaks, but a
//! strict schema cannot express either. [`enforce`] applies the configured
//! [`LengthPolicy`] to a structured result. Missing or non-string fields are
//! left alone: the closed shape is the service's responsibility.
//!
//! A `Reject` failure is reported as `response_parse`: the reply decoded but
//! its content breaks the contract, and no other stage owns reply content.

use crate::config::{LengthPolicy, SchemaLayout};
use crate::error::StageError;
use crate::schema::{ExtractionSchema, FieldSpec};
use serde_json::Value;
use tracing::warn;

/// Apply `policy` to every text field of `result` in place.
///
/// Returns the dotted paths of the fields that were cut.
pub fn enforce(
    result: &mut Value,
    schema: &ExtractionSchema,
    layout: SchemaLayout,
    policy: LengthPolicy,
) -> Result<Vec<String>, StageError> {
    let mut truncated = Vec::new();
    if policy == LengthPolicy::Trust {
        return Ok(truncated);
    }

    for field in schema.text_fields() {
        let Some(max) = field.max_chars() else {
            continue;
        };
        let Some(Value::String(text)) = locate(result, field, layout) else {
            continue;
        };

        let count = text.chars().count();
        let has_break = text.contains(['\n', '\r']);
        match policy {
            LengthPolicy::Trust => {}
            LengthPolicy::Reject => {
                if count > max {
                    return Err(StageError::response_parse(format!(
                        "{} exceeds {} characters ({})",
                        field.path, max, count
                    )));
                }
                if has_break {
                    return Err(StageError::response_parse(format!(
                        "{} contains a line break",
                        field.path
                    )));
                }
            }
            LengthPolicy::Truncate => {
                if has_break {
                    *text = flatten_lines(text);
                }
                if text.chars().count() > max {
                    warn!("Truncating {} from {} to {} characters", field.path, count, max);
                    *text = cut(text, max);
                    truncated.push(field.path.to_string());
                }
            }
        }
    }
    Ok(truncated)
}

fn locate<'a>(
    result: &'a mut Value,
    field: &FieldSpec,
    layout: SchemaLayout,
) -> Option<&'a mut Value> {
    match layout {
        SchemaLayout::Nested => result.pointer_mut(&format!("/{}", field.path.replace('.', "/"))),
        SchemaLayout::Flat => result.get_mut("fields")?.get_mut(field.path),
    }
}

/// Replace every line break (CRLF, LF, CR) with a single space.
fn flatten_lines(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// First `max` characters, without a dangling trailing space.
fn cut(text: &str, max: usize) -> String {
    let s: String = text.chars().take(max).collect();
    s.trim_end().to_string()
}
