//! Image source resolution: inline base64 or a remote URL → canonical data-URL.
//!
//! Whatever the caller supplied, the inference request embeds exactly one
//! `data:<mime>;base64,<payload>` string with no whitespace in the payload.
//! Inline input is re-wrapped without any network access; a remote URL is
//! fetched once under a timeout and its body base64-encoded.

use crate::error::{error_chain, StageError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Some image hosts reject default HTTP client identifiers.
const DOWNLOAD_USER_AGENT: &str = "Mozilla/5.0";
const DOWNLOAD_ACCEPT: &str = "image/*,*/*;q=0.8";

/// MIME type assumed for local files with an unrecognised extension.
const LOCAL_FALLBACK_MIME: &str = "image/jpeg";

static RE_DATA_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^data:([^,]*?);base64,").unwrap());

/// Inbound request body: where the product photo comes from.
///
/// `image_base64` takes priority over `image_url` when both are present.
/// Blank strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequest {
    /// Raw base64 or a `data:` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    /// Absolute http(s) URL, used only when `image_base64` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Default MIME hint. Falls back to the configured default (`image/png`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_mime: Option<String>,
}

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl ImageRequest {
    pub fn from_base64(data: impl Into<String>) -> Self {
        Self {
            image_base64: Some(data.into()),
            ..Default::default()
        }
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            image_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.image_mime = Some(mime.into());
        self
    }

    /// The caller's MIME hint, or `fallback`.
    pub fn default_mime<'a>(&'a self, fallback: &'a str) -> &'a str {
        non_blank(&self.image_mime).unwrap_or(fallback)
    }

    /// Select the image source. Fails with `validation` before any I/O.
    pub fn to_reference(&self) -> Result<ImageReference, StageError> {
        if let Some(data) = non_blank(&self.image_base64) {
            return Ok(ImageReference::Inline {
                data: data.to_string(),
                mime: None,
            });
        }
        match non_blank(&self.image_url) {
            Some(url) => ImageReference::remote(url),
            None => Err(StageError::validation("Missing image_base64 or image_url")),
        }
    }
}

/// Where the image bytes come from. Exactly one source per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    /// Raw base64 or a `data:` URL, with an optional explicit MIME type.
    Inline { data: String, mime: Option<String> },
    /// Absolute http(s) URL.
    Remote(Url),
}

impl ImageReference {
    /// Parse and validate a remote reference.
    pub fn remote(url: &str) -> Result<Self, StageError> {
        match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                Ok(ImageReference::Remote(parsed))
            }
            _ => Err(StageError::validation(format!(
                "image_url must be an absolute http(s) URL, got '{url}'"
            ))),
        }
    }
}

/// A canonical encoded image: non-empty base64 payload plus a MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    mime: String,
    data: String,
}

impl EncodedImage {
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Base64 payload without the data-URL prefix.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// `data:<mime>;base64,<payload>`
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.data)
    }
}

/// Remove a leading `data:…;base64,` prefix if present.
pub fn strip_data_url_prefix(input: &str) -> &str {
    match RE_DATA_URL.find(input) {
        Some(m) => &input[m.end()..],
        None => input,
    }
}

/// Resolve a reference into a canonical encoded image.
///
/// Inline data keeps the media type of an existing data-URL so a canonical
/// input comes back byte-for-byte; raw payloads take the explicit hint, else
/// `default_mime`. Remote images take the server's `Content-Type`, else
/// `default_mime`.
pub async fn resolve(
    reference: &ImageReference,
    default_mime: &str,
    download_timeout_secs: u64,
) -> Result<EncodedImage, StageError> {
    match reference {
        ImageReference::Inline { data, mime } => {
            let hint = mime.as_deref().unwrap_or(default_mime);
            wrap_inline(data, hint)
        }
        ImageReference::Remote(url) => download(url, default_mime, download_timeout_secs).await,
    }
}

fn wrap_inline(input: &str, hint: &str) -> Result<EncodedImage, StageError> {
    let input = input.trim();
    let (mime, payload) = match RE_DATA_URL.captures(input) {
        Some(caps) => {
            let embedded = caps[1].split(';').next().unwrap_or("").trim();
            let rest = &input[caps.get(0).map_or(0, |m| m.end())..];
            let mime = if embedded.is_empty() { hint } else { embedded };
            (mime.to_string(), rest)
        }
        None if input.starts_with("data:") => {
            return Err(StageError::validation(
                "image_base64 data-URL must use ';base64,' encoding",
            ))
        }
        None => (hint.to_string(), input),
    };

    let data: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if data.is_empty() {
        return Err(StageError::validation("image_base64 payload is empty"));
    }

    debug!("Inline image: {} ({} bytes base64)", mime, data.len());
    Ok(EncodedImage { mime, data })
}

async fn download(
    url: &Url,
    default_mime: &str,
    timeout_secs: u64,
) -> Result<EncodedImage, StageError> {
    info!("Downloading image from: {}", url);

    let transport = |e: reqwest::Error| {
        if e.is_timeout() {
            StageError::ImageDownload {
                message: format!("Download timed out after {timeout_secs}s"),
                status: None,
            }
        } else {
            StageError::ImageDownload {
                message: format!("Could not download image_url: {}", error_chain(&e)),
                status: e.status().map(|s| s.as_u16()),
            }
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(transport)?;

    let response = client
        .get(url.clone())
        .header(USER_AGENT, DOWNLOAD_USER_AGENT)
        .header(ACCEPT, DOWNLOAD_ACCEPT)
        .send()
        .await
        .map_err(transport)?;

    let status = response.status();
    if !status.is_success() {
        return Err(StageError::ImageDownload {
            message: format!("Could not download image_url (status {})", status.as_u16()),
            status: Some(status.as_u16()),
        });
    }

    let mime = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default_mime)
        .to_string();

    let bytes = response.bytes().await.map_err(transport)?;
    if bytes.is_empty() {
        return Err(StageError::ImageDownload {
            message: "Downloaded image_url is empty".into(),
            status: Some(status.as_u16()),
        });
    }

    let data = STANDARD.encode(&bytes);
    info!("Downloaded {} bytes ({})", bytes.len(), mime);
    Ok(EncodedImage { mime, data })
}

/// Read a local image file into an inline reference.
///
/// The MIME type is guessed from the file extension.
pub async fn read_local(path: &Path) -> Result<ImageReference, StageError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        StageError::validation(format!("Could not read image file '{}': {e}", path.display()))
    })?;
    if bytes.is_empty() {
        return Err(StageError::validation(format!(
            "Image file '{}' is empty",
            path.display()
        )));
    }
    Ok(ImageReference::Inline {
        data: STANDARD.encode(&bytes),
        mime: Some(guess_mime(path).to_string()),
    })
}

/// MIME type for a file path, from its extension.
pub fn guess_mime(path: &Path) -> &'static str {
    image::ImageFormat::from_path(path)
        .map(|f| f.to_mime_type())
        .unwrap_or(LOCAL_FALLBACK_MIME)
}
