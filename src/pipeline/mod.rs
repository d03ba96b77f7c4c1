//! Pipeline stages for product-photo extraction.
//!
//! Each submodule implements exactly one step and owns the failure
//! classification for that step, so every error leaving a stage already
//! carries its [`crate::error::Stage`].
//!
//! ## Data Flow
//!
//! ```text
//! resolve ──▶ request ──▶ client ──▶ normalize ──▶ limits
//! (data-URL)  (body)      (HTTP)     (envelope)    (char caps)
//! ```
//!
//! 1. [`resolve`] turns inline base64 or a remote URL into a canonical
//!    `data:<mime>;base64,<payload>` image; the only stage besides the
//!    client that may touch the network
//! 2. [`request`] assembles the schema-constrained inference request;
//!    pure
//! 3. [`client`] makes one time-bounded POST to the inference endpoint, no
//!    retries
//! 4. [`normalize`] reconciles the reply envelope into a structured object,
//!    raw text, or the verbatim envelope
//! 5. [`limits`] applies optional local enforcement of per-field character
//!    limits

pub mod client;
pub mod limits;
pub mod normalize;
pub mod request;
pub mod resolve;
