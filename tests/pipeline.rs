//! Integration tests for the extraction pipeline.
//!
//! Each test starts a tiny HTTP/1.1 stub on `127.0.0.1:0` that plays both the
//! image host (`/img…`) and the inference endpoint (`/v1/responses`). No
//! external network access is needed.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use autofill_gateway::pipeline::resolve::read_local;
use autofill_gateway::{
    extract, extract_batch, extract_reference, extract_to_file, respond, respond_json,
    AutofillConfig,
    AutofillError, ErrorMode, ExtractionResult, ImageRequest, LengthPolicy, SchemaLayout, Stage,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::EnvFilter;

// ── Stub server ──────────────────────────────────────────────────────────────

/// What the stub saw for one request.
#[derive(Debug, Clone)]
struct Captured {
    path: String,
    /// Header block, lower-cased.
    headers: String,
    body: Vec<u8>,
}

impl Captured {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

struct Reply {
    status: u16,
    content_type: Option<&'static str>,
    body: Vec<u8>,
    delay: Duration,
}

impl Reply {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: Some("application/json"),
            body: body.to_string().into_bytes(),
            delay: Duration::ZERO,
        }
    }

    fn bytes(status: u16, content_type: Option<&'static str>, body: &[u8]) -> Self {
        Self {
            status,
            content_type,
            body: body.to_vec(),
            delay: Duration::ZERO,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

struct Stub {
    base: String,
    requests: Arc<Mutex<Vec<Captured>>>,
}

impl Stub {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn hits(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path.starts_with(prefix))
            .count()
    }

    fn inference_requests(&self) -> Vec<Captured> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path == "/v1/responses")
            .cloned()
            .collect()
    }
}

async fn serve<F>(handler: F) -> Stub
where
    F: Fn(&Captured) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let log = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let handler = handler.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let _ = handle(stream, &*handler, &log).await;
            });
        }
    });

    Stub {
        base: format!("http://{addr}"),
        requests,
    }
}

async fn handle<F>(
    mut stream: TcpStream,
    handler: &F,
    log: &Mutex<Vec<Captured>>,
) -> Option<()>
where
    F: Fn(&Captured) -> Reply,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
    let content_length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let captured = Captured {
        path,
        headers: head,
        body: buf[header_end..].to_vec(),
    };
    let reply = handler(&captured);
    log.lock().unwrap().push(captured);

    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    let mut out = format!(
        "HTTP/1.1 {} Stub\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reply.body.len()
    );
    if let Some(ct) = reply.content_type {
        out.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    out.push_str("\r\n");
    stream.write_all(out.as_bytes()).await.ok()?;
    stream.write_all(&reply.body).await.ok()?;
    stream.shutdown().await.ok()?;
    Some(())
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

/// A complete nested record as the model would return it.
fn record(name: &str) -> Value {
    json!({
        "schema_version": "1.0",
        "step2": {"productInformation": {
            "group1": {
                "productDescription": "Taza de cerámica blanca",
                "productName": name,
                "productBrand": "",
                "productUseAndApplication": "Servir bebidas calientes"
            },
            "detailedProductDescription": {"productDescriptionExtended": "Taza de cerámica con asa."},
            "generalInformation": {"isElectric": false},
            "productUses": {"foodContact": true},
            "productMaterials": {
                "containsPaper": false,
                "containsGlass": false,
                "containsMetal": false,
                "containsTextiles": false,
                "containsBiodegradableMaterial": false
            }
        }},
        "step5": {"productInfo": {"productWarning": {"productWarning": "No apta para microondas."}}}
    })
}

fn flat_reply(record: &Value) -> Reply {
    Reply::json(
        200,
        json!({
            "id": "resp_test",
            "output_text": record.to_string(),
            "usage": {"input_tokens": 812, "output_tokens": 95, "total_tokens": 907}
        }),
    )
}

/// Route library logs through the test harness; `RUST_LOG=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config_for(stub: &Stub) -> AutofillConfig {
    init_tracing();
    AutofillConfig::builder()
        .api_key("sk-test")
        .endpoint(stub.url("/v1/responses"))
        .download_timeout_secs(5)
        .api_timeout_secs(5)
        .build()
        .unwrap()
}

fn stage_of(err: &AutofillError) -> Option<Stage> {
    err.stage()
}

// ── Image resolution ─────────────────────────────────────────────────────────

#[tokio::test]
async fn remote_not_found_is_image_download_with_status() {
    let stub = serve(|req| match req.path.as_str() {
        "/img/missing.jpg" => Reply::bytes(404, Some("text/plain"), b"nope"),
        _ => flat_reply(&record("Taza")),
    })
    .await;
    let config = config_for(&stub);
    let request = ImageRequest::from_url(stub.url("/img/missing.jpg"));

    let err = extract(&request, &config).await.unwrap_err();
    assert_eq!(stage_of(&err), Some(Stage::ImageDownload));
    assert!(err.to_string().contains("status 404"), "got: {err}");
    assert_eq!(stub.hits("/v1/responses"), 0);

    let response = respond(&request, &config).await;
    assert_eq!(response.status, 400);
    let body: Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body["stage"], "image_download");
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn remote_download_timeout_is_image_download() {
    let stub = serve(|req| match req.path.as_str() {
        "/img/slow.jpg" => {
            Reply::bytes(200, Some("image/jpeg"), &[1, 2, 3]).delayed(Duration::from_secs(3))
        }
        _ => flat_reply(&record("Taza")),
    })
    .await;
    let config = AutofillConfig::builder()
        .api_key("sk-test")
        .endpoint(stub.url("/v1/responses"))
        .download_timeout_secs(1)
        .build()
        .unwrap();

    let err = extract(&ImageRequest::from_url(stub.url("/img/slow.jpg")), &config)
        .await
        .unwrap_err();
    assert_eq!(stage_of(&err), Some(Stage::ImageDownload));
    assert!(err.to_string().contains("timed out after 1s"), "got: {err}");
    assert_eq!(stub.hits("/v1/responses"), 0);
}

#[tokio::test]
async fn unreachable_image_host_is_image_download() {
    let stub = serve(|_| flat_reply(&record("Taza"))).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let request = ImageRequest::from_url(format!("http://{addr}/img/mug.png"));
    let err = extract(&request, &config_for(&stub)).await.unwrap_err();
    match err {
        AutofillError::Stage(ref e) => {
            assert_eq!(e.stage(), Stage::ImageDownload);
            assert_eq!(e.status(), None);
            assert!(e.message().starts_with("Could not download image_url: "));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(stub.hits("/v1/responses"), 0);
}

#[tokio::test]
async fn local_file_reference_round_trip() {
    let stub = serve(|_| flat_reply(&record("Taza"))).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mug.webp");
    std::fs::write(&path, [1u8, 2, 3]).unwrap();

    let reference = read_local(&path).await.unwrap();
    let extraction = extract_reference(&reference, &config_for(&stub))
        .await
        .unwrap();

    assert_eq!(extraction.image_mime, "image/webp");
    assert_eq!(extraction.result, ExtractionResult::Structured(record("Taza")));
    let body = stub.inference_requests()[0].json();
    assert_eq!(
        body["input"][0]["content"][1]["image_url"],
        "data:image/webp;base64,AQID"
    );
}

#[tokio::test]
async fn remote_content_type_parameters_are_stripped() {
    let stub = serve(|req| match req.path.as_str() {
        "/img/mug" => Reply::bytes(200, Some("image/webp; charset=binary"), &[1, 2, 3]),
        _ => flat_reply(&record("Taza")),
    })
    .await;
    let config = config_for(&stub);

    let extraction = extract(&ImageRequest::from_url(stub.url("/img/mug")), &config)
        .await
        .unwrap();
    assert_eq!(extraction.image_mime, "image/webp");

    let sent = stub.inference_requests();
    assert_eq!(sent.len(), 1);
    let body = sent[0].json();
    assert_eq!(
        body["input"][0]["content"][1]["image_url"],
        "data:image/webp;base64,AQID"
    );
}

#[tokio::test]
async fn remote_without_content_type_uses_mime_hint() {
    let stub = serve(|req| match req.path.as_str() {
        "/img/raw" => Reply::bytes(200, None, &[0xff, 0xd8, 0xff]),
        _ => flat_reply(&record("Taza")),
    })
    .await;
    let config = config_for(&stub);
    let request = ImageRequest::from_url(stub.url("/img/raw")).with_mime("image/jpeg");

    let extraction = extract(&request, &config).await.unwrap();
    assert_eq!(extraction.image_mime, "image/jpeg");
    let download = stub.requests.lock().unwrap()[0].clone();
    assert!(download.headers.contains("user-agent: mozilla/5.0"));
}

#[tokio::test]
async fn base64_wins_over_url() {
    let stub = serve(|_| flat_reply(&record("Taza"))).await;
    let config = config_for(&stub);
    let request = ImageRequest {
        image_base64: Some("iVBORw0KGgo=".into()),
        image_url: Some(stub.url("/img/ignored.png")),
        image_mime: None,
    };

    extract(&request, &config).await.unwrap();
    assert_eq!(stub.hits("/img"), 0);
    let body = stub.inference_requests()[0].json();
    assert_eq!(
        body["input"][0]["content"][1]["image_url"],
        "data:image/png;base64,iVBORw0KGgo="
    );
}

// ── Request shape ────────────────────────────────────────────────────────────

#[tokio::test]
async fn request_carries_strict_schema_and_credential() {
    let stub = serve(|_| flat_reply(&record("Taza"))).await;
    let config = config_for(&stub);

    extract(&ImageRequest::from_base64("AAAA"), &config).await.unwrap();

    let sent = &stub.inference_requests()[0];
    assert!(sent.headers.contains("authorization: bearer sk-test"));
    let body = sent.json();
    assert_eq!(body["model"], "gpt-4o-2024-08-06");
    assert_eq!(body["temperature"], 0.0);
    assert_eq!(body["text"]["format"]["type"], "json_schema");
    assert_eq!(body["text"]["format"]["strict"], true);
    assert_eq!(body["text"]["format"]["name"], "catalog_autofill_v1");
    assert_eq!(body["input"][0]["role"], "user");
    assert_eq!(body["input"][0]["content"][0]["type"], "input_text");
    assert_eq!(body["input"][0]["content"][1]["type"], "input_image");
    assert!(body["instructions"].as_str().unwrap().contains("JSON"));
}

#[tokio::test]
async fn flat_layout_requests_fields_map() {
    let stub = serve(|_| {
        Reply::json(
            200,
            json!({"output_text": json!({"schema_version": "1.0", "fields": {}}).to_string()}),
        )
    })
    .await;
    let config = AutofillConfig::builder()
        .api_key("sk-test")
        .endpoint(stub.url("/v1/responses"))
        .schema_layout(SchemaLayout::Flat)
        .build()
        .unwrap();

    let extraction = extract(&ImageRequest::from_base64("AAAA"), &config).await.unwrap();
    assert!(extraction.result.is_structured());
    let body = stub.inference_requests()[0].json();
    assert_eq!(body["text"]["format"]["name"], "catalog_autofill_fields_v1");
    assert!(body["text"]["format"]["schema"]["properties"]["fields"].is_object());
}

// ── Reply normalization ──────────────────────────────────────────────────────

#[tokio::test]
async fn flat_output_text_is_structured_with_usage() {
    let stub = serve(|_| flat_reply(&record("Taza Nórdica"))).await;
    let extraction = extract(&ImageRequest::from_base64("AAAA"), &config_for(&stub))
        .await
        .unwrap();

    assert_eq!(extraction.upstream_status, 200);
    assert_eq!(
        extraction.result,
        ExtractionResult::Structured(record("Taza Nórdica"))
    );
    let usage = extraction.usage.unwrap();
    assert_eq!(usage.total_tokens, 907);
    assert!(extraction.truncated_fields.is_empty());
}

#[tokio::test]
async fn nested_output_is_structured() {
    let stub = serve(|_| {
        Reply::json(
            200,
            json!({
                "output": [{"type": "message", "role": "assistant", "content": [
                    {"type": "output_text", "text": record("Taza").to_string()}
                ]}]
            }),
        )
    })
    .await;
    let extraction = extract(&ImageRequest::from_base64("AAAA"), &config_for(&stub))
        .await
        .unwrap();
    assert_eq!(extraction.result, ExtractionResult::Structured(record("Taza")));
}

#[tokio::test]
async fn upstream_error_envelope_passes_through_with_status() {
    let envelope = json!({"error": {"message": "Rate limit reached", "type": "requests"}});
    let expected = envelope.to_string();
    let stub = serve(move |_| Reply::json(429, envelope.clone())).await;
    let config = config_for(&stub);

    let response = respond(&ImageRequest::from_base64("AAAA"), &config).await;
    assert_eq!(response.status, 429);
    assert_eq!(response.body, expected);
    assert!(!response.is_success());
}

#[tokio::test]
async fn empty_reply_is_response_parse() {
    let stub = serve(|_| Reply::bytes(200, Some("application/json"), b"")).await;
    let config = config_for(&stub);

    let err = extract(&ImageRequest::from_base64("AAAA"), &config)
        .await
        .unwrap_err();
    assert_eq!(stage_of(&err), Some(Stage::ResponseParse));

    let response = respond(&ImageRequest::from_base64("AAAA"), &config).await;
    assert_eq!(response.status, 502);
}

// ── Inference failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn slow_inference_times_out() {
    let stub = serve(|_| flat_reply(&record("Taza")).delayed(Duration::from_secs(3))).await;
    let config = AutofillConfig::builder()
        .api_key("sk-test")
        .endpoint(stub.url("/v1/responses"))
        .api_timeout_secs(1)
        .build()
        .unwrap();

    let err = extract(&ImageRequest::from_base64("AAAA"), &config)
        .await
        .unwrap_err();
    match err {
        AutofillError::Stage(ref e) => {
            assert_eq!(e.stage(), Stage::InferenceCall);
            assert_eq!(e.message(), "timeout");
        }
        other => panic!("unexpected error: {other}"),
    }

    let response = respond(&ImageRequest::from_base64("AAAA"), &config).await;
    assert_eq!(response.status, 504);
}

#[tokio::test]
async fn unreachable_endpoint_is_inference_call() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = AutofillConfig::builder()
        .api_key("sk-test")
        .endpoint(format!("http://{addr}/v1/responses"))
        .build()
        .unwrap();

    let err = extract(&ImageRequest::from_base64("AAAA"), &config)
        .await
        .unwrap_err();
    assert_eq!(stage_of(&err), Some(Stage::InferenceCall));

    let response = respond(&ImageRequest::from_base64("AAAA"), &config).await;
    assert_eq!(response.status, 502);
    let body: Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body["stage"], "inference_call");
}

// ── Validation and configuration ─────────────────────────────────────────────

#[tokio::test]
async fn missing_credential_makes_no_network_call() {
    let stub = serve(|_| flat_reply(&record("Taza"))).await;
    let config = AutofillConfig::builder()
        .endpoint(stub.url("/v1/responses"))
        .build()
        .unwrap();

    let request = ImageRequest::from_url(stub.url("/img/mug.png"));
    let err = extract(&request, &config).await.unwrap_err();
    assert!(err.is_config());
    assert_eq!(err.to_string(), "Missing OPENAI_API_KEY env var");

    let response = respond(&request, &config).await;
    assert_eq!(response.status, 500);
    assert_eq!(stub.requests.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn missing_image_source_is_validation() {
    let stub = serve(|_| flat_reply(&record("Taza"))).await;
    let config = config_for(&stub);
    let request = ImageRequest {
        image_base64: Some("   ".into()),
        image_url: Some(String::new()),
        image_mime: Some("image/jpeg".into()),
    };

    let err = extract(&request, &config).await.unwrap_err();
    assert_eq!(stage_of(&err), Some(Stage::Validation));
    assert_eq!(stub.requests.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn respond_json_terse_mode_is_plain_text() {
    let stub = serve(|_| flat_reply(&record("Taza"))).await;
    let config = AutofillConfig::builder()
        .api_key("sk-test")
        .endpoint(stub.url("/v1/responses"))
        .error_mode(ErrorMode::Terse)
        .build()
        .unwrap();

    let response = respond_json(br#"{"image_mime": "image/png"}"#, &config).await;
    assert_eq!(response.status, 400);
    assert_eq!(response.content_type, "text/plain");
    assert_eq!(response.body, "Missing image_base64 or image_url");
}

#[tokio::test]
async fn respond_json_success_returns_record() {
    let stub = serve(|_| flat_reply(&record("Taza"))).await;
    let config = config_for(&stub);

    let body = br#"{"image_base64": "data:image/jpeg;base64,AAAA"}"#;
    let response = respond_json(body, &config).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type, "application/json");
    let body: Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body, record("Taza"));
    assert_eq!(response.body, record("Taza").to_string());

    let sent = stub.inference_requests()[0].json();
    assert_eq!(
        sent["input"][0]["content"][1]["image_url"],
        "data:image/jpeg;base64,AAAA"
    );
}

// ── Character limits ─────────────────────────────────────────────────────────

#[tokio::test]
async fn over_long_fields_are_truncated_by_default() {
    let stub = serve(|_| flat_reply(&record(&"Taza extra grande de desayuno".repeat(2)))).await;
    let extraction = extract(&ImageRequest::from_base64("AAAA"), &config_for(&stub))
        .await
        .unwrap();

    assert_eq!(
        extraction.truncated_fields,
        vec!["step2.productInformation.group1.productName".to_string()]
    );
    let value = extraction.result.as_structured().unwrap();
    let name = value["step2"]["productInformation"]["group1"]["productName"]
        .as_str()
        .unwrap();
    assert!(name.chars().count() <= 20);
}

#[tokio::test]
async fn reject_policy_fails_with_response_parse() {
    let stub = serve(|_| flat_reply(&record(&"x".repeat(21)))).await;
    let config = AutofillConfig::builder()
        .api_key("sk-test")
        .endpoint(stub.url("/v1/responses"))
        .length_policy(LengthPolicy::Reject)
        .build()
        .unwrap();

    let response = respond(&ImageRequest::from_base64("AAAA"), &config).await;
    assert_eq!(response.status, 502);
    let body: Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body["stage"], "response_parse");
    assert!(body["message"].as_str().unwrap().contains("productName"));
}

// ── Concurrency and output ───────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_extractions_keep_their_own_results() {
    // Echo the embedded image back so each caller can check it got its own.
    let stub = serve(|req| {
        let image = req.json()["input"][0]["content"][1]["image_url"].clone();
        Reply::json(200, json!({"output_text": json!({"echo": image}).to_string()}))
            .delayed(Duration::from_millis(50))
    })
    .await;
    let config = config_for(&stub);

    let requests: Vec<ImageRequest> = (0..8)
        .map(|i| ImageRequest::from_base64(format!("QUJD{i}A==")).with_mime("image/webp"))
        .collect();
    let results = extract_batch(&requests, &config, 4).await;

    assert_eq!(results.len(), 8);
    for (i, result) in results.into_iter().enumerate() {
        let extraction = result.unwrap();
        assert_eq!(
            extraction.result.as_structured().unwrap()["echo"],
            format!("data:image/webp;base64,QUJD{i}A==")
        );
    }
    assert_eq!(stub.hits("/v1/responses"), 8);
}

#[tokio::test]
async fn extract_to_file_writes_pretty_json() {
    let stub = serve(|_| flat_reply(&record("Taza"))).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("mug.json");

    let extraction = extract_to_file(&ImageRequest::from_base64("AAAA"), &path, &config_for(&stub))
        .await
        .unwrap();
    assert!(extraction.result.is_structured());

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains('\n'));
    let parsed: Value = serde_json::from_str(&written).unwrap();
    assert_eq!(parsed, record("Taza"));
    assert!(!path.with_extension("json.tmp").exists());
}
