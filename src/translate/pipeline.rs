//! A source → target conversion built from two adapters.
//!
//! Every channel runs `source.normalize*` into the IR and then
//! `target.transform*` out of it. No pair-specific code exists anywhere.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde_json::Value;

use super::adapter::{StreamContext, WireAdapter};
use super::ir::{IrError, IrRequest, IrResponse, IrStreamEvent};
use super::session::StreamSession;
use crate::error::{BridgeError, Result};
use crate::providers::ProviderKind;

#[derive(Clone)]
pub struct ConversionPipeline {
    source: Arc<dyn WireAdapter>,
    target: Arc<dyn WireAdapter>,
}

impl ConversionPipeline {
    pub fn new(source: Arc<dyn WireAdapter>, target: Arc<dyn WireAdapter>) -> Self {
        Self { source, target }
    }

    pub fn source(&self) -> ProviderKind {
        self.source.kind()
    }

    pub fn target(&self) -> ProviderKind {
        self.target.kind()
    }

    pub fn normalize_request(&self, body: &[u8]) -> Result<IrRequest> {
        self.source.normalize_request_json(body)
    }

    pub fn transform_request(&self, request: &IrRequest) -> Result<Value> {
        self.target.transform_request_json(request)
    }

    pub fn convert_request(&self, body: &[u8]) -> Result<Value> {
        let ir = self.normalize_request(body)?;
        self.transform_request(&ir)
    }

    pub fn normalize_response(&self, body: &[u8]) -> Result<IrResponse> {
        self.source.normalize_response_json(body)
    }

    pub fn convert_response(&self, body: &[u8]) -> Result<Value> {
        let ir = self.normalize_response(body)?;
        self.target.transform_response_json(&ir)
    }

    /// Convert a provider error document. Errors are data here, not failures.
    pub fn convert_error(&self, body: &[u8]) -> Result<Value> {
        let ir = self.source.normalize_error_json(body)?;
        self.transform_error(&ir)
    }

    pub fn transform_error(&self, error: &IrError) -> Result<Value> {
        self.target.transform_error_json(error)
    }

    /// A fresh ingestion session for one source stream.
    pub fn session(&self) -> StreamSession {
        StreamSession::new(Arc::clone(&self.source))
    }

    /// A fresh emitter for one target stream.
    pub fn encoder(&self) -> StreamEncoder {
        StreamEncoder {
            target: Arc::clone(&self.target),
            ctx: StreamContext::new(),
            closed: false,
        }
    }

    /// Reassemble a raw source transport into IR events.
    ///
    /// Arrival order is preserved. The stream ends after a terminal event,
    /// after a raised failure, or when the transport ends.
    pub fn normalize_stream<S, B, E>(
        &self,
        chunks: S,
    ) -> impl Stream<Item = Result<IrStreamEvent>> + Send + 'static
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Into<BridgeError> + Send + 'static,
    {
        let mut session = self.session();
        async_stream::stream! {
            tokio::pin!(chunks);
            let mut failed = false;

            'transport: while let Some(chunk) = chunks.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        failed = true;
                        yield Err(e.into());
                        break 'transport;
                    }
                };

                for item in session.push_bytes(chunk.as_ref()) {
                    failed = item.is_err();
                    yield item;
                    if failed {
                        break 'transport;
                    }
                }

                if session.is_closed() {
                    break;
                }
            }

            if !failed {
                for event in session.finish() {
                    yield Ok(event);
                }
            }
        }
    }

    /// Convert a raw source transport into encoded target frames.
    ///
    /// The target's terminator frame follows the final `MessageEnd`. A raised
    /// failure is yielded as `Err` and ends the stream.
    pub fn convert_stream<S, B, E>(
        &self,
        chunks: S,
    ) -> impl Stream<Item = Result<String>> + Send + 'static
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Into<BridgeError> + Send + 'static,
    {
        let events = self.normalize_stream(chunks);
        let mut encoder = self.encoder();
        async_stream::stream! {
            tokio::pin!(events);

            while let Some(event) = events.next().await {
                let frame = event.and_then(|e| encoder.encode(&e));
                let failed = frame.is_err();
                match frame {
                    Ok(f) if f.is_empty() => {}
                    other => {
                        yield other;
                    }
                }
                if failed {
                    break;
                }
            }
        }
    }
}

/// Target-side half of a streaming conversion: IR events in, wire frames out.
pub struct StreamEncoder {
    target: Arc<dyn WireAdapter>,
    ctx: StreamContext,
    closed: bool,
}

impl StreamEncoder {
    /// Encode one event as zero or more frames, followed by the protocol's
    /// terminator when the event ends the message. Nothing is written after
    /// a terminal event.
    pub fn encode(&mut self, event: &IrStreamEvent) -> Result<String> {
        if self.closed {
            return Ok(String::new());
        }
        self.closed = event.is_terminal();
        let mut out = self.target.encode_stream_event(event, &mut self.ctx)?;
        if matches!(event, IrStreamEvent::MessageEnd { .. }) {
            if let Some(terminator) = self.target.framing().terminator {
                out.push_str(terminator);
            }
        }
        Ok(out)
    }

    /// Encode a raised failure as an in-band error frame.
    pub fn encode_failure(&mut self, error: &BridgeError) -> Result<String> {
        self.encode(&IrStreamEvent::Error {
            error: error.to_ir_error(),
        })
    }
}
