//! # autofill-gateway
//!
//! Turn one product photo into the structured attribute record of a retail
//! catalog form, using a vision model behind the OpenAI Responses API.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ImageRequest { image_base64 | image_url, image_mime }
//!  │
//!  ├─ 1. Validate  credential present, one image source selected
//!  ├─ 2. Resolve   inline base64 → data-URL, or download and encode
//!  ├─ 3. Request   instructions + prompt + image + strict JSON schema
//!  ├─ 4. Infer     one time-bounded POST to the inference endpoint
//!  ├─ 5. Normalize flat output_text → nested output → raw envelope
//!  └─ 6. Limits    per-field character limits (trust / truncate / reject)
//! ```
//!
//! Every failure is tagged with the [`Stage`] it occurred in, so callers can
//! tell a bad image URL from an upstream outage without reading messages.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use autofill_gateway::{extract, AutofillConfig, ImageRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credential, model and endpoint from OPENAI_API_KEY / AUTOFILL_MODEL / AUTOFILL_ENDPOINT
//!     let config = AutofillConfig::from_env();
//!     let request = ImageRequest::from_url("https://example.com/mug.jpg");
//!     let extraction = extract(&request, &config).await?;
//!     println!("{}", extraction.result.to_body());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `autofill` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when embedding the library in a server:
//! ```toml
//! autofill-gateway = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{AutofillConfig, AutofillConfigBuilder, ErrorMode, LengthPolicy, SchemaLayout};
pub use error::{AutofillError, Stage, StageError};
pub use extract::{
    extract, extract_batch, extract_reference, extract_sync, extract_to_file, respond,
    respond_json,
};
pub use output::{Extraction, ExtractionResult, GatewayResponse, TokenUsage};
pub use pipeline::resolve::{EncodedImage, ImageReference, ImageRequest};
pub use schema::{get_schema, ExtractionSchema, SCHEMA_VERSION};
