use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::providers::ProviderKind;
use crate::translate::ir::IrError;
use crate::translate::pipeline::ConversionPipeline;
use crate::translate::registry::ProviderRegistry;

use futures::stream::Stream;
use futures::StreamExt;
use serde_json::Value;
use std::pin::Pin;
use tracing::{debug, info, warn};

/// Encoded frames in the client's protocol. Failures have already been
/// turned into in-band error frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Outcome of forwarding one client request.
pub enum ProxyResult {
    /// A JSON document (response or error) in the client's protocol.
    Json { status: u16, body: Value },
    Stream(FrameStream),
}

/// Forward a request written in `frontend`'s protocol to the configured
/// upstream and convert what comes back into `frontend`'s protocol.
pub async fn forward(
    frontend: ProviderKind,
    body: &[u8],
    config: &BridgeConfig,
    client: &reqwest::Client,
    registry: &ProviderRegistry,
) -> Result<ProxyResult> {
    let backend = config.backend_kind()?;
    let inbound = registry.pipeline(frontend, backend)?;
    let outbound = registry.pipeline(backend, frontend)?;

    let mut ir = inbound.normalize_request(body)?;
    let client_model = std::mem::take(&mut ir.model);
    ir.model = config.map_model(&client_model).to_string();
    let upstream_body = inbound.transform_request(&ir)?;

    let url = format!("{}{}", config.effective_base_url()?, backend.upstream_path());
    let api_key = config.resolve_api_key()?;

    info!(
        %frontend,
        %backend,
        model = %client_model,
        upstream_model = %ir.model,
        streaming = ir.stream,
        messages = ir.messages.len(),
        "POST {url}"
    );

    let mut request = client.post(&url).json(&upstream_body);
    for (name, value) in backend.auth_headers(&api_key) {
        request = request.header(name, value);
    }
    let response = request
        .send()
        .await
        .map_err(|e| BridgeError::provider(format!("Request to {url} failed: {e}")))?;

    let status = response.status().as_u16();
    if status >= 400 {
        let body = response.bytes().await.unwrap_or_default();
        warn!(status, body = %truncate(&String::from_utf8_lossy(&body), 300), "Provider error");
        return Ok(ProxyResult::Json {
            status,
            body: upstream_error(&outbound, status, &body)?,
        });
    }

    if ir.stream {
        return Ok(ProxyResult::Stream(convert_frames(
            &outbound,
            response.bytes_stream(),
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| BridgeError::provider(format!("Failed to read response body: {e}")))?;
    debug!(status, body_len = body.len(), "Provider response");

    let converted = outbound.convert_response(&body).map_err(|e| {
        BridgeError::provider(format!(
            "Failed to convert provider response: {e}. Body: {}",
            truncate(&String::from_utf8_lossy(&body), 300)
        ))
    })?;
    Ok(ProxyResult::Json {
        status,
        body: converted,
    })
}

/// Convert an upstream byte stream into client frames. A raised failure
/// becomes a final error frame in the client's protocol.
pub fn convert_frames<S>(pipeline: &ConversionPipeline, upstream: S) -> FrameStream
where
    S: Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
{
    let mut encoder = pipeline.encoder();
    let frames = pipeline.convert_stream(upstream).map(move |frame| match frame {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Stream conversion failed");
            encoder.encode_failure(&e).unwrap_or_else(|encode_err| {
                warn!(error = %encode_err, "Could not encode stream failure for the client");
                String::new()
            })
        }
    });
    Box::pin(frames)
}

/// The provider's error document converted, or a synthesized `api_error`
/// when the body is not one.
fn upstream_error(outbound: &ConversionPipeline, status: u16, body: &[u8]) -> Result<Value> {
    outbound.convert_error(body).or_else(|_| {
        outbound.transform_error(&IrError::new(
            "api_error",
            format!(
                "Provider returned status {status}: {}",
                truncate(&String::from_utf8_lossy(body), 500)
            ),
        ))
    })
}

/// A raised failure as an error document in `frontend`'s protocol, with the
/// HTTP status to send it under.
pub fn failure_response(
    registry: &ProviderRegistry,
    frontend: ProviderKind,
    error: &BridgeError,
) -> (u16, Value) {
    let status = match error {
        e if e.is_conversion_fault() => 400,
        BridgeError::UnknownProvider(_) | BridgeError::Config { .. } => 500,
        _ => 502,
    };
    let ir = error.to_ir_error();
    let body = registry
        .adapter(frontend)
        .and_then(|adapter| adapter.transform_error_json(&ir))
        .unwrap_or_else(|_| serde_json::json!({ "error": { "type": ir.error_type, "message": ir.message } }));
    (status, body)
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
