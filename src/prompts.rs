//! Instruction text for schema-constrained product extraction.
//!
//! The strict JSON Schema fixes the *shape* of the answer; everything the
//! schema cannot express structurally (empty-string defaults, boolean
//! evidence threshold, how limits are counted, no line breaks, JSON only)
//! lives in the instruction text below.
//!
//! Callers can override it via [`crate::config::AutofillConfig::instructions`];
//! the constants here are used only when no override is provided.

use crate::schema::ExtractionSchema;

/// Fixed user-turn text sent next to the product image.
pub const USER_PROMPT: &str = "Complete the fields from the product image.";

/// Default instructions, without the per-field limit list.
///
/// [`default_instructions`] appends the limits rendered from the schema so
/// the two never drift apart.
pub const DEFAULT_INSTRUCTIONS: &str = "Return ONLY valid JSON that matches the schema exactly. \
Write every text value in Spanish. Do not invent or assume anything. \
Text fields: return '' (empty string) when the value cannot be determined from clear visual evidence. \
Booleans: true ONLY with clear, unambiguous visual evidence; when in doubt, false. \
Count characters including spaces; rephrase (do not cut) to respect the limits. \
No line breaks in any text value. No markdown. No prose before or after the JSON.";

/// Build the instruction text for `schema`, including its character limits.
pub fn default_instructions(schema: &ExtractionSchema) -> String {
    format!(
        "{DEFAULT_INSTRUCTIONS} Limits: {}.",
        schema.limits_summary()
    )
}
