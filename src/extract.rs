//! Extraction entry points.
//!
//! [`extract`] runs the whole pipeline for one image and returns a typed
//! [`Extraction`] or a fatal [`AutofillError`]. [`respond`] and
//! [`respond_json`] wrap it for HTTP front ends: they never fail and always
//! produce a [`GatewayResponse`] with a stage-tagged error body on failure.
//!
//! Each call builds its own HTTP clients and request values; nothing is
//! shared between concurrent calls except the immutable schema.

use crate::config::AutofillConfig;
use crate::error::{AutofillError, StageError};
use crate::output::{Extraction, ExtractionResult, GatewayResponse};
use crate::pipeline::client::InferenceClient;
use crate::pipeline::resolve::{self, ImageReference, ImageRequest};
use crate::pipeline::{limits, normalize, request};
use crate::prompts::default_instructions;
use crate::schema::get_schema;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract catalog attributes from the image described by `request`.
///
/// # Errors
/// - [`AutofillError::MissingCredential`] before any I/O when no API key is set
/// - [`AutofillError::Stage`] with `validation` when neither `image_base64`
///   nor `image_url` is usable, before any I/O
/// - [`AutofillError::Stage`] with `image_download`, `inference_call` or
///   `response_parse` when that stage fails
pub async fn extract(
    request: &ImageRequest,
    config: &AutofillConfig,
) -> Result<Extraction, AutofillError> {
    let client = InferenceClient::new(config)?;
    let reference = request.to_reference()?;
    let default_mime = request.default_mime(&config.default_mime);
    run(&client, &reference, default_mime, config).await
}

/// Extract from an already-selected image source.
pub async fn extract_reference(
    reference: &ImageReference,
    config: &AutofillConfig,
) -> Result<Extraction, AutofillError> {
    let client = InferenceClient::new(config)?;
    run(&client, reference, &config.default_mime, config).await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    request: &ImageRequest,
    config: &AutofillConfig,
) -> Result<Extraction, AutofillError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AutofillError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(request, config))
}

/// Run independent extractions, at most `concurrency` at a time.
///
/// Results come back in input order.
pub async fn extract_batch(
    requests: &[ImageRequest],
    config: &AutofillConfig,
    concurrency: usize,
) -> Vec<Result<Extraction, AutofillError>> {
    stream::iter(requests.iter().map(|req| extract(req, config)))
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// Extract and write the result body to a file.
///
/// Structured results are pretty-printed JSON; degraded results are written
/// as received. Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    request: &ImageRequest,
    output_path: impl AsRef<Path>,
    config: &AutofillConfig,
) -> Result<Extraction, AutofillError> {
    let extraction = extract(request, config).await?;
    let path = output_path.as_ref();
    let write_err = |source| AutofillError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let body = match &extraction.result {
        ExtractionResult::Structured(v) => serde_json::to_string_pretty(v)
            .map_err(|e| AutofillError::Internal(format!("serialise result: {e}")))?,
        other => other.to_body(),
    };

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, body).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    Ok(extraction)
}

/// Run the pipeline and render the outcome as an HTTP-style response.
pub async fn respond(request: &ImageRequest, config: &AutofillConfig) -> GatewayResponse {
    match extract(request, config).await {
        Ok(extraction) => GatewayResponse::from_extraction(&extraction),
        Err(e) => {
            warn!("Extraction failed: {}", e);
            GatewayResponse::from_error(&e, config.error_mode)
        }
    }
}

/// Like [`respond`], starting from a raw JSON request body.
///
/// A body that is not a JSON object of the expected shape is a `validation`
/// failure. The credential is checked first so a misconfigured gateway
/// reports that regardless of input.
pub async fn respond_json(body: &[u8], config: &AutofillConfig) -> GatewayResponse {
    if let Err(e) = config.require_api_key() {
        return GatewayResponse::from_error(&e, config.error_mode);
    }
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        body
    };
    match serde_json::from_slice::<ImageRequest>(body) {
        Ok(request) => respond(&request, config).await,
        Err(e) => {
            debug!("Rejecting request body: {}", e);
            let e = StageError::validation("Invalid JSON body");
            GatewayResponse::from_stage_error(&e, config.error_mode)
        }
    }
}

async fn run(
    client: &InferenceClient,
    reference: &ImageReference,
    default_mime: &str,
    config: &AutofillConfig,
) -> Result<Extraction, AutofillError> {
    let start = Instant::now();
    let schema = get_schema(&config.schema_version)?;

    // ── Step 1: Resolve image ────────────────────────────────────────────
    let image = resolve::resolve(reference, default_mime, config.download_timeout_secs).await?;

    // ── Step 2: Build request ────────────────────────────────────────────
    let instructions = match &config.instructions {
        Some(text) => text.clone(),
        None => default_instructions(schema),
    };
    let req = request::build(
        &image,
        schema,
        config.schema_layout,
        &instructions,
        &config.model,
        config.temperature,
    );
    let image_mime = image.mime().to_string();
    drop(image);
    debug!("Request built for {} image, model {}", image_mime, config.model);

    // ── Step 3: Call inference ───────────────────────────────────────────
    let raw = client.send(&req).await?;
    drop(req);

    // ── Step 4: Normalize reply ──────────────────────────────────────────
    let normalized = normalize::normalize(&raw.body, raw.status)?;
    let mut result = normalized.result;

    // ── Step 5: Character limits ─────────────────────────────────────────
    let truncated_fields = match &mut result {
        ExtractionResult::Structured(value) => {
            limits::enforce(value, schema, config.schema_layout, config.length_policy)?
        }
        _ => Vec::new(),
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Extraction complete: HTTP {}, structured={}, {}ms",
        raw.status,
        result.is_structured(),
        duration_ms
    );

    Ok(Extraction {
        result,
        upstream_status: raw.status,
        model: config.model.clone(),
        image_mime,
        usage: normalized.usage,
        truncated_fields,
        duration_ms,
    })
}
