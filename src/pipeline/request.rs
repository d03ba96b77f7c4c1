//! Extraction request builder: image + schema + instructions → request body.
//!
//! The body follows the Responses API shape: one user turn holding the fixed
//! [`USER_PROMPT`](crate::prompts::USER_PROMPT) and the image as a data-URL,
//! plus a `text.format` block of type `json_schema` with `strict: true` so
//! the service is constrained to emit exactly the schema's shape.
//!
//! Building is pure: no I/O, no validation of what the service will return.

use crate::config::SchemaLayout;
use crate::pipeline::resolve::EncodedImage;
use crate::prompts::USER_PROMPT;
use crate::schema::ExtractionSchema;
use serde::Serialize;
use serde_json::Value;

/// One outbound inference request. Built fresh per call.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRequest {
    pub model: String,
    pub instructions: String,
    pub input: Vec<InputMessage>,
    pub text: TextOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputMessage {
    pub role: &'static str,
    pub content: Vec<InputContent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContent {
    InputText { text: String },
    InputImage { image_url: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TextOptions {
    pub format: OutputFormat,
}

/// Schema-constrained output declaration.
#[derive(Debug, Clone, Serialize)]
pub struct OutputFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: &'static str,
    pub strict: bool,
    pub schema: Value,
}

/// Assemble the request for one image.
pub fn build(
    image: &EncodedImage,
    schema: &'static ExtractionSchema,
    layout: SchemaLayout,
    instructions: &str,
    model: &str,
    temperature: Option<f32>,
) -> ExtractionRequest {
    ExtractionRequest {
        model: model.to_string(),
        instructions: instructions.to_string(),
        input: vec![InputMessage {
            role: "user",
            content: vec![
                InputContent::InputText {
                    text: USER_PROMPT.to_string(),
                },
                InputContent::InputImage {
                    image_url: image.to_data_url(),
                },
            ],
        }],
        text: TextOptions {
            format: OutputFormat {
                kind: "json_schema",
                name: schema.format_name(layout),
                strict: true,
                schema: schema.json_schema(layout).clone(),
            },
        },
        temperature,
    }
}
