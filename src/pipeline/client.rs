//! Inference client: one time-bounded POST to the inference endpoint.
//!
//! The whole exchange (connect, send, read body) runs under a single
//! client-side deadline. Expiry drops the in-flight future, which closes the
//! connection and clears the timer; the failure is reported as
//! `inference_call` with the message `"timeout"`.
//!
//! There is no retry loop: one attempt per caller request. A non-2xx reply
//! is *not* a failure here; its status and body go to the normalizer, which
//! may still find a usable payload.

use crate::config::AutofillConfig;
use crate::error::{error_chain, AutofillError, StageError};
use crate::pipeline::request::ExtractionRequest;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Status and undecoded body of an inference reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// HTTP client bound to one endpoint and credential.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl InferenceClient {
    /// Create a client from the config.
    ///
    /// Fails with [`AutofillError::MissingCredential`] when no API key is
    /// configured, so no request is ever sent without one.
    pub fn new(config: &AutofillConfig) -> Result<Self, AutofillError> {
        let api_key = config.require_api_key()?.to_string();
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AutofillError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key,
            timeout: Duration::from_secs(config.api_timeout_secs),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one request and return the raw reply.
    pub async fn send(&self, request: &ExtractionRequest) -> Result<RawResponse, StageError> {
        info!("Calling inference endpoint {} (model {})", self.endpoint, request.model);
        let start = Instant::now();

        let call = async {
            let response = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await
                .map_err(transport_error)?;

            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    transport_error(e)
                } else {
                    StageError::response_parse(format!(
                        "Could not read inference reply: {}",
                        error_chain(&e)
                    ))
                }
            })?;

            Ok::<_, StageError>(RawResponse {
                status,
                body: body.to_vec(),
            })
        };

        match timeout(self.timeout, call).await {
            Ok(Ok(raw)) => {
                debug!(
                    "Inference reply: HTTP {}, {} bytes, {:?}",
                    raw.status,
                    raw.body.len(),
                    start.elapsed()
                );
                if !(200..300).contains(&raw.status) {
                    warn!("Inference endpoint answered HTTP {}", raw.status);
                }
                Ok(raw)
            }
            Ok(Err(e)) => {
                warn!("Inference call failed: {}", e);
                Err(e)
            }
            Err(_) => {
                warn!("Inference call timed out after {}s", self.timeout.as_secs());
                Err(StageError::InferenceCall {
                    message: "timeout".into(),
                    status: None,
                })
            }
        }
    }
}

fn transport_error(e: reqwest::Error) -> StageError {
    let message = if e.is_timeout() {
        "timeout".to_string()
    } else {
        error_chain(&e)
    };
    StageError::InferenceCall {
        message,
        status: e.status().map(|s| s.as_u16()),
    }
}
