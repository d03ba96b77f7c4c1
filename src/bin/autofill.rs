//! CLI binary for autofill-gateway.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AutofillConfig`, runs one extraction and prints the gateway body.

use anyhow::{Context, Result};
use autofill_gateway::pipeline::resolve::read_local;
use autofill_gateway::{
    extract, extract_to_file, AutofillConfig, AutofillError, ErrorMode, Extraction,
    GatewayResponse, ImageReference, ImageRequest, LengthPolicy, SchemaLayout,
};
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Photo from a URL (stdout)
  autofill --image-url https://example.com/mug.jpg

  # Local file, result written to disk
  autofill --image-file mug.webp -o mug.json

  # Inline base64 with an explicit media type
  autofill --image-base64 "$(base64 -w0 mug.jpg)" --image-mime image/jpeg

  # Fail instead of cutting over-long fields
  autofill --image-url https://example.com/mug.jpg --length-policy reject

  # Full extraction record (status, usage, truncated fields)
  autofill --image-file mug.png --json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY      Inference API key (required)
  AUTOFILL_MODEL      Override model ID (default gpt-4o-2024-08-06)
  AUTOFILL_ENDPOINT   Override inference endpoint URL
  RUST_LOG            Log filter, e.g. autofill_gateway=debug

EXIT STATUS:
  0  the gateway response is a 2xx
  1  any failure; the body is still printed to stdout
"#;

/// Fill a product catalog record from a product photo.
#[derive(Parser, Debug)]
#[command(
    name = "autofill",
    version,
    about = "Fill a product catalog record from a product photo",
    long_about = "Send one product photo to a vision model with a strict JSON schema and print \
the structured catalog attributes. Failures are reported with the pipeline stage they occurred \
in (validation, image_download, inference_call, response_parse).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Absolute http(s) URL of the product photo.
    #[arg(long, env = "AUTOFILL_IMAGE_URL")]
    image_url: Option<String>,

    /// Inline image: raw base64 or a data: URL. Wins over --image-url.
    #[arg(long)]
    image_base64: Option<String>,

    /// Local image file; the media type is guessed from the extension.
    #[arg(long, conflicts_with = "image_base64")]
    image_file: Option<PathBuf>,

    /// Media type hint (default image/png for inline input).
    #[arg(long)]
    image_mime: Option<String>,

    /// Write the result body to this file instead of stdout.
    #[arg(short, long, env = "AUTOFILL_OUTPUT")]
    output: Option<PathBuf>,

    /// Vision model ID.
    #[arg(long, env = "AUTOFILL_MODEL")]
    model: Option<String>,

    /// Inference endpoint URL (Responses API compatible).
    #[arg(long, env = "AUTOFILL_ENDPOINT")]
    endpoint: Option<String>,

    /// Path to a text file replacing the default instructions.
    #[arg(long, env = "AUTOFILL_INSTRUCTIONS")]
    instructions_file: Option<PathBuf>,

    /// Report errors as the bare message instead of a stage-tagged JSON body.
    #[arg(long, env = "AUTOFILL_TERSE")]
    terse: bool,

    /// What to do with text fields over their character limit.
    #[arg(long, env = "AUTOFILL_LENGTH_POLICY", value_enum, default_value = "truncate")]
    length_policy: LengthPolicyArg,

    /// Shape of the requested record.
    #[arg(long, env = "AUTOFILL_LAYOUT", value_enum, default_value = "nested")]
    layout: LayoutArg,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "AUTOFILL_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Omit the temperature parameter (for models that reject it).
    #[arg(long, conflicts_with = "temperature")]
    no_temperature: bool,

    /// Image download timeout in seconds.
    #[arg(long, env = "AUTOFILL_DOWNLOAD_TIMEOUT", default_value_t = 20)]
    download_timeout: u64,

    /// Inference call timeout in seconds.
    #[arg(long, env = "AUTOFILL_API_TIMEOUT", default_value_t = 30)]
    api_timeout: u64,

    /// Print the full extraction record as JSON instead of the body.
    #[arg(long)]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "AUTOFILL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "AUTOFILL_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum LengthPolicyArg {
    Trust,
    Truncate,
    Reject,
}

impl From<LengthPolicyArg> for LengthPolicy {
    fn from(v: LengthPolicyArg) -> Self {
        match v {
            LengthPolicyArg::Trust => LengthPolicy::Trust,
            LengthPolicyArg::Truncate => LengthPolicy::Truncate,
            LengthPolicyArg::Reject => LengthPolicy::Reject,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum LayoutArg {
    Nested,
    Flat,
}

impl From<LayoutArg> for SchemaLayout {
    fn from(v: LayoutArg) -> Self {
        match v {
            LayoutArg::Nested => SchemaLayout::Nested,
            LayoutArg::Flat => SchemaLayout::Flat,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli).await?;
    let request = build_request(&cli).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let outcome = match cli.output {
        Some(ref path) => extract_to_file(&request, path, &config).await,
        None => extract(&request, &config).await,
    };

    let response = match &outcome {
        Ok(extraction) => GatewayResponse::from_extraction(extraction),
        Err(e) => GatewayResponse::from_error(e, config.error_mode),
    };

    match (&outcome, &cli.output) {
        (Ok(extraction), Some(path)) => {
            if !cli.quiet {
                eprintln!(
                    "{}  HTTP {}  {}ms  →  {}",
                    status_mark(&response),
                    extraction.upstream_status,
                    extraction.duration_ms,
                    path.display()
                );
                print_usage(extraction);
            }
        }
        (Ok(extraction), None) if cli.json => {
            let json = serde_json::to_string_pretty(extraction)
                .context("Failed to serialise extraction")?;
            println!("{json}");
        }
        _ => {
            write_body(&response.body)?;
            if let (Ok(extraction), false) = (&outcome, cli.quiet) {
                print_usage(extraction);
            }
        }
    }

    if let Err(ref e) = outcome {
        report_failure(e, cli.quiet);
    }

    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Map CLI args to `AutofillConfig`.
async fn build_config(cli: &Cli) -> Result<AutofillConfig> {
    let instructions = if let Some(ref path) = cli.instructions_file {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read instructions from {:?}", path))?,
        )
    } else {
        None
    };

    let temperature = if cli.no_temperature {
        None
    } else {
        Some(cli.temperature)
    };

    let mut builder = AutofillConfig::builder()
        .with_env()
        .length_policy(cli.length_policy.clone().into())
        .schema_layout(cli.layout.clone().into())
        .error_mode(if cli.terse {
            ErrorMode::Terse
        } else {
            ErrorMode::Diagnostic
        })
        .temperature(temperature)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref endpoint) = cli.endpoint {
        builder = builder.endpoint(endpoint);
    }
    if let Some(text) = instructions {
        builder = builder.instructions(text);
    }

    builder.build().context("Invalid configuration")
}

/// Map the image flags to an `ImageRequest`.
async fn build_request(cli: &Cli) -> Result<ImageRequest> {
    let mut request = ImageRequest {
        image_base64: cli.image_base64.clone(),
        image_url: cli.image_url.clone(),
        image_mime: cli.image_mime.clone(),
    };

    if let Some(ref path) = cli.image_file {
        let reference = read_local(path)
            .await
            .with_context(|| format!("Failed to load image file {:?}", path))?;
        if let ImageReference::Inline { data, mime } = reference {
            request.image_base64 = Some(data);
            if request.image_mime.is_none() {
                request.image_mime = mime;
            }
        }
    }

    Ok(request)
}

fn write_body(body: &str) -> Result<()> {
    write_body_to(&mut io::stdout().lock(), body)
}

fn write_body_to(out: &mut impl Write, body: &str) -> Result<()> {
    out.write_all(body.as_bytes())
        .context("Failed to write to stdout")?;
    if !body.ends_with('\n') {
        out.write_all(b"\n").context("Failed to write to stdout")?;
    }
    Ok(())
}

fn status_mark(response: &GatewayResponse) -> String {
    if response.is_success() {
        green("✔")
    } else {
        red("✘")
    }
}

fn print_usage(extraction: &Extraction) {
    if let Some(usage) = extraction.usage {
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&usage.input_tokens.to_string()),
            dim(&usage.output_tokens.to_string()),
        );
    }
    if !extraction.truncated_fields.is_empty() {
        eprintln!(
            "   truncated: {}",
            dim(&extraction.truncated_fields.join(", "))
        );
    }
}

fn report_failure(error: &AutofillError, quiet: bool) {
    if quiet {
        return;
    }
    let stage = error
        .stage()
        .map_or("configuration", |s| s.as_str());
    eprintln!("{} {} failed", red("✘"), stage);
}
