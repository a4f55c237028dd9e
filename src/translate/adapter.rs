//! The provider adapter contract.
//!
//! [`ProviderAdapter`] is the typed interface each provider implements: four
//! channels (request, response, stream, error), each with a normalize half
//! (wire → IR) and a transform half (IR → wire). [`WireAdapter`] is its
//! object-safe form working on JSON bytes and values; every `ProviderAdapter`
//! gets it through a blanket impl, which is what lets the registry hold
//! heterogeneous providers behind one `Arc<dyn WireAdapter>`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ir::{IrError, IrRequest, IrResponse, IrStreamEvent};
use crate::error::{BridgeError, Result};
use crate::providers::ProviderKind;

/// How a provider frames its event stream on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamFraming {
    /// Payload marking stream completion; dropped by the chunk buffer.
    pub sentinel: Option<&'static str>,
    /// Frame written after the final event when emitting this protocol.
    pub terminator: Option<&'static str>,
}

/// Per-session state an adapter carries across the events of one stream.
///
/// On the transform side, some protocols repeat the message id and model on
/// every frame, so they are learned from `MessageStart`. Fresh values are used
/// until one is seen. On the normalize side, it holds facts a provider reports
/// early but the IR only carries on `MessageEnd`.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub id: String,
    pub model: String,
    pub created: i64,
    /// Set by transformers that must open the message before any content.
    pub preamble_sent: bool,
    /// Prompt tokens announced before the final usage.
    pub prompt_tokens: Option<u64>,
    /// Finish reason of a `MessageEnd` held back until its usage arrives.
    /// The session emits it when the stream completes without usage.
    pub pending_end: Option<String>,
}

impl StreamContext {
    pub fn new() -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            model: String::new(),
            created: chrono::Utc::now().timestamp(),
            preamble_sent: false,
            prompt_tokens: None,
            pending_end: None,
        }
    }

    pub fn observe(&mut self, event: &IrStreamEvent) {
        if let IrStreamEvent::MessageStart { id, model } = event {
            if !id.is_empty() {
                self.id.clone_from(id);
            }
            self.model.clone_from(model);
        }
    }
}

impl Default for StreamContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One provider's wire shapes plus its normalizer and transformer.
///
/// Normalizers fail with [`BridgeError::UnrecognizedRole`] on unknown roles and
/// with [`BridgeError::UnrecognizedStreamEventShape`] on stream events that fit
/// no known pattern. Transformers fail with
/// [`BridgeError::UnsupportedRoleForTarget`] rather than drop a message.
pub trait ProviderAdapter: Send + Sync + 'static {
    type Request: Serialize + DeserializeOwned;
    type Response: Serialize + DeserializeOwned;
    type StreamEvent: Serialize + DeserializeOwned;
    type Error: Serialize + DeserializeOwned;

    fn kind(&self) -> ProviderKind;

    fn framing(&self) -> StreamFraming;

    // -- request channel --

    fn normalize_request(&self, request: &Self::Request) -> Result<IrRequest>;

    fn transform_request(&self, request: &IrRequest) -> Result<Self::Request>;

    // -- response channel --

    fn normalize_response(&self, response: &Self::Response) -> Result<IrResponse>;

    fn transform_response(&self, response: &IrResponse) -> Result<Self::Response>;

    // -- stream channel --

    /// Provider-native error event standing in for a frame that failed to parse.
    fn parse_error_event(&self, message: String) -> Self::StreamEvent;

    /// Translate one provider event into zero or more IR events, in order.
    fn normalize_stream_event(
        &self,
        event: &Self::StreamEvent,
        ctx: &mut StreamContext,
    ) -> Result<Vec<IrStreamEvent>>;

    /// Translate one IR event into zero or more provider events, in order.
    fn transform_stream_event(
        &self,
        event: &IrStreamEvent,
        ctx: &mut StreamContext,
    ) -> Result<Vec<Self::StreamEvent>>;

    /// Strict frame parser: a malformed payload is a [`BridgeError::MalformedFrame`].
    fn try_parse_stream_frame(&self, data: &str) -> Result<Self::StreamEvent> {
        serde_json::from_str(data).map_err(|e| BridgeError::malformed_frame(e.to_string()))
    }

    /// Lenient frame parser used mid-stream: a malformed payload becomes an
    /// in-band parsing error event so the stream stays alive.
    fn parse_stream_frame(&self, data: &str) -> Self::StreamEvent {
        match self.try_parse_stream_frame(data) {
            Ok(event) => event,
            Err(e) => self.parse_error_event(e.to_string()),
        }
    }

    /// Serialize one provider event as a complete wire frame.
    fn encode_stream_event(&self, event: &Self::StreamEvent) -> Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
    }

    // -- error channel --

    fn normalize_error(&self, error: &Self::Error) -> IrError;

    fn transform_error(&self, error: &IrError) -> Self::Error;
}

/// Object-safe adapter over raw JSON, implemented for every [`ProviderAdapter`].
pub trait WireAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn framing(&self) -> StreamFraming;

    fn normalize_request_json(&self, body: &[u8]) -> Result<IrRequest>;

    fn transform_request_json(&self, request: &IrRequest) -> Result<serde_json::Value>;

    fn normalize_response_json(&self, body: &[u8]) -> Result<IrResponse>;

    fn transform_response_json(&self, response: &IrResponse) -> Result<serde_json::Value>;

    fn normalize_error_json(&self, body: &[u8]) -> Result<IrError>;

    fn transform_error_json(&self, error: &IrError) -> Result<serde_json::Value>;

    /// Parse and normalize one frame payload. Malformed content yields an
    /// in-band `Error` event instead of failing.
    fn normalize_frame(&self, payload: &str, ctx: &mut StreamContext)
        -> Result<Vec<IrStreamEvent>>;

    /// Like [`WireAdapter::normalize_frame`] but malformed content fails.
    fn normalize_frame_strict(
        &self,
        payload: &str,
        ctx: &mut StreamContext,
    ) -> Result<Vec<IrStreamEvent>>;

    /// Transform one IR event and encode the resulting provider events as
    /// wire frames. May be empty.
    fn encode_stream_event(&self, event: &IrStreamEvent, ctx: &mut StreamContext)
        -> Result<String>;
}

impl<A: ProviderAdapter> WireAdapter for A {
    fn kind(&self) -> ProviderKind {
        ProviderAdapter::kind(self)
    }

    fn framing(&self) -> StreamFraming {
        ProviderAdapter::framing(self)
    }

    fn normalize_request_json(&self, body: &[u8]) -> Result<IrRequest> {
        let request: A::Request = serde_json::from_slice(body)?;
        self.normalize_request(&request)
    }

    fn transform_request_json(&self, request: &IrRequest) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.transform_request(request)?)?)
    }

    fn normalize_response_json(&self, body: &[u8]) -> Result<IrResponse> {
        let response: A::Response = serde_json::from_slice(body)?;
        self.normalize_response(&response)
    }

    fn transform_response_json(&self, response: &IrResponse) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.transform_response(response)?)?)
    }

    fn normalize_error_json(&self, body: &[u8]) -> Result<IrError> {
        let error: A::Error = serde_json::from_slice(body)?;
        Ok(self.normalize_error(&error))
    }

    fn transform_error_json(&self, error: &IrError) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.transform_error(error))?)
    }

    fn normalize_frame(
        &self,
        payload: &str,
        ctx: &mut StreamContext,
    ) -> Result<Vec<IrStreamEvent>> {
        let event = self.parse_stream_frame(payload);
        self.normalize_stream_event(&event, ctx)
    }

    fn normalize_frame_strict(
        &self,
        payload: &str,
        ctx: &mut StreamContext,
    ) -> Result<Vec<IrStreamEvent>> {
        let event = self.try_parse_stream_frame(payload)?;
        self.normalize_stream_event(&event, ctx)
    }

    fn encode_stream_event(
        &self,
        event: &IrStreamEvent,
        ctx: &mut StreamContext,
    ) -> Result<String> {
        ctx.observe(event);
        let mut out = String::new();
        for native in self.transform_stream_event(event, ctx)? {
            out.push_str(&ProviderAdapter::encode_stream_event(self, &native)?);
        }
        Ok(out)
    }
}
