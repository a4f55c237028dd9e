//! Anthropic Messages adapter.
//!
//! The IR speaks OpenAI's finish-reason vocabulary, so stop reasons are
//! mapped on the way in and out. Values without a counterpart pass through.

use super::adapter::{ProviderAdapter, StreamContext, StreamFraming};
use super::anthropic_types::{
    blocks_text, ContentBlock, Delta, DeltaUsage, ErrorBody, ErrorResponse, Message,
    MessageContent, MessageDeltaBody, MessagesRequest, MessagesResponse, StreamEvent,
    SystemContent, Usage,
};
use super::ir::{
    ChoiceContent, IrChoice, IrDelta, IrError, IrMessage, IrRequest, IrResponse, IrRole,
    IrStreamEvent, IrUsage,
};
use crate::error::{BridgeError, Result};
use crate::providers::ProviderKind;

/// `max_tokens` is mandatory for Anthropic; used when the IR carries none.
pub const DEFAULT_MAX_TOKENS: u64 = 4096;

#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdapter;

impl ProviderAdapter for AnthropicAdapter {
    type Request = MessagesRequest;
    type Response = MessagesResponse;
    type StreamEvent = StreamEvent;
    type Error = ErrorResponse;

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn framing(&self) -> StreamFraming {
        StreamFraming::default()
    }

    fn normalize_request(&self, req: &MessagesRequest) -> Result<IrRequest> {
        let mut messages = Vec::with_capacity(req.messages.len() + 1);
        if let Some(system) = &req.system {
            messages.push(IrMessage::new(IrRole::System, system.as_text()));
        }
        for msg in &req.messages {
            messages.push(IrMessage::new(IrRole::parse(&msg.role)?, msg.content.text()));
        }

        Ok(IrRequest {
            messages,
            model: req.model.clone(),
            temperature: req.temperature,
            max_tokens: Some(req.max_tokens),
            top_p: req.top_p,
            frequency_penalty: None,
            presence_penalty: None,
            stop: req.stop_sequences.clone(),
            stream: req.stream.unwrap_or(false),
        })
    }

    fn transform_request(&self, ir: &IrRequest) -> Result<MessagesRequest> {
        let mut system_parts = Vec::new();
        let mut messages = Vec::with_capacity(ir.messages.len());

        for msg in &ir.messages {
            match msg.role {
                IrRole::System => system_parts.push(msg.content.as_str()),
                IrRole::User | IrRole::Assistant => messages.push(Message {
                    role: msg.role.as_str().to_string(),
                    content: MessageContent::Text(msg.content.clone()),
                }),
                IrRole::Tool => {
                    return Err(BridgeError::UnsupportedRoleForTarget {
                        provider: ProviderKind::Anthropic,
                        role: msg.role,
                    })
                }
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(SystemContent::Text(system_parts.join("\n")))
        };

        Ok(MessagesRequest {
            model: ir.model.clone(),
            max_tokens: ir.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system,
            stream: ir.stream.then_some(true),
            temperature: ir.temperature,
            top_p: ir.top_p,
            top_k: None,
            stop_sequences: ir.stop.clone(),
            metadata: None,
        })
    }

    fn normalize_response(&self, resp: &MessagesResponse) -> Result<IrResponse> {
        let message = IrMessage::new(IrRole::parse(&resp.role)?, blocks_text(&resp.content));
        let finish_reason = resp.stop_reason.as_deref().map(to_ir_finish_reason);

        Ok(IrResponse {
            id: resp.id.clone(),
            model: resp.model.clone(),
            choices: vec![IrChoice::with_message(0, message, finish_reason)],
            usage: Some(IrUsage::new(
                resp.usage.input_tokens,
                resp.usage.output_tokens,
            )),
        })
    }

    fn transform_response(&self, ir: &IrResponse) -> Result<MessagesResponse> {
        let choice = ir.choices.first();
        let (role, text) = match choice.and_then(|c| c.content.as_ref()) {
            Some(ChoiceContent::Message(m)) => (m.role, m.content.clone()),
            Some(ChoiceContent::Delta(d)) => (
                d.role.unwrap_or(IrRole::Assistant),
                d.content.clone().unwrap_or_default(),
            ),
            None => (IrRole::Assistant, String::new()),
        };
        if !matches!(role, IrRole::User | IrRole::Assistant) {
            return Err(BridgeError::UnsupportedRoleForTarget {
                provider: ProviderKind::Anthropic,
                role,
            });
        }

        let usage = ir.usage.unwrap_or_default();
        Ok(MessagesResponse {
            id: ir.id.clone(),
            response_type: "message".to_string(),
            role: role.as_str().to_string(),
            content: vec![ContentBlock::Text { text }],
            model: ir.model.clone(),
            stop_reason: choice
                .and_then(|c| c.finish_reason.as_deref())
                .map(from_ir_finish_reason),
            stop_sequence: None,
            usage: Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                ..Usage::default()
            },
        })
    }

    fn parse_error_event(&self, message: String) -> StreamEvent {
        let error = IrError::parsing(message);
        StreamEvent::Error {
            error: ErrorBody {
                error_type: error.error_type,
                message: error.message,
            },
        }
    }

    fn normalize_stream_event(
        &self,
        event: &StreamEvent,
        ctx: &mut StreamContext,
    ) -> Result<Vec<IrStreamEvent>> {
        let events = match event {
            StreamEvent::Error { error } => vec![IrStreamEvent::Error {
                error: IrError::new(&error.error_type, &error.message),
            }],
            StreamEvent::MessageStart { message } => {
                IrRole::parse(&message.role)?;
                // Input tokens are only reported here; message_delta has the output count.
                ctx.prompt_tokens = Some(message.usage.input_tokens);
                vec![IrStreamEvent::MessageStart {
                    id: message.id.clone(),
                    model: message.model.clone(),
                }]
            }
            StreamEvent::ContentBlockDelta {
                delta: Delta::TextDelta { text },
                ..
            } => vec![IrStreamEvent::MessageDelta {
                delta: IrDelta::text(text.as_str()),
            }],
            StreamEvent::MessageDelta { delta, usage } => vec![IrStreamEvent::MessageEnd {
                finish_reason: delta.stop_reason.as_deref().map(to_ir_finish_reason),
                usage: Some(IrUsage::new(
                    usage.input_tokens.or(ctx.prompt_tokens).unwrap_or(0),
                    usage.output_tokens,
                )),
            }],
            StreamEvent::ContentBlockDelta { .. }
            | StreamEvent::ContentBlockStart { .. }
            | StreamEvent::ContentBlockStop { .. }
            | StreamEvent::MessageStop
            | StreamEvent::Ping => Vec::new(),
            StreamEvent::Unknown => {
                return Err(BridgeError::unrecognized_event(
                    ProviderKind::Anthropic,
                    "unknown event type",
                ))
            }
        };
        Ok(events)
    }

    fn transform_stream_event(
        &self,
        event: &IrStreamEvent,
        ctx: &mut StreamContext,
    ) -> Result<Vec<StreamEvent>> {
        let mut out = Vec::new();
        match event {
            IrStreamEvent::MessageStart { .. } => {
                open_message(ctx, &mut out);
            }
            IrStreamEvent::MessageDelta { delta } => {
                open_message(ctx, &mut out);
                if let Some(text) = delta.content.as_ref().filter(|t| !t.is_empty()) {
                    out.push(StreamEvent::ContentBlockDelta {
                        index: 0,
                        delta: Delta::TextDelta { text: text.clone() },
                    });
                }
            }
            IrStreamEvent::MessageEnd {
                finish_reason,
                usage,
            } => {
                open_message(ctx, &mut out);
                out.push(StreamEvent::ContentBlockStop { index: 0 });
                out.push(StreamEvent::MessageDelta {
                    delta: MessageDeltaBody {
                        stop_reason: finish_reason.as_deref().map(from_ir_finish_reason),
                        stop_sequence: None,
                    },
                    usage: DeltaUsage {
                        input_tokens: usage.map(|u| u.prompt_tokens),
                        output_tokens: usage.map_or(0, |u| u.completion_tokens),
                    },
                });
                out.push(StreamEvent::MessageStop);
            }
            IrStreamEvent::Error { error } => out.push(StreamEvent::Error {
                error: ErrorBody {
                    error_type: anthropic_error_type(&error.error_type).to_string(),
                    message: error.message.clone(),
                },
            }),
        }
        Ok(out)
    }

    fn encode_stream_event(&self, event: &StreamEvent) -> Result<String> {
        Ok(format!(
            "event: {}\ndata: {}\n\n",
            event.event_name(),
            serde_json::to_string(event)?
        ))
    }

    fn normalize_error(&self, error: &ErrorResponse) -> IrError {
        IrError::new(&error.error.error_type, &error.error.message)
    }

    fn transform_error(&self, error: &IrError) -> ErrorResponse {
        ErrorResponse::new(anthropic_error_type(&error.error_type), &error.message)
    }
}

/// Emit `message_start` and the single text block's `content_block_start`
/// once per session. Anthropic clients expect both before any delta.
fn open_message(ctx: &mut StreamContext, out: &mut Vec<StreamEvent>) {
    if ctx.preamble_sent {
        return;
    }
    ctx.preamble_sent = true;
    out.push(StreamEvent::MessageStart {
        message: MessagesResponse {
            id: ctx.id.clone(),
            response_type: "message".to_string(),
            role: IrRole::Assistant.as_str().to_string(),
            content: Vec::new(),
            model: ctx.model.clone(),
            stop_reason: None,
            stop_sequence: None,
            usage: Usage::default(),
        },
    });
    out.push(StreamEvent::ContentBlockStart {
        index: 0,
        content_block: ContentBlock::Text {
            text: String::new(),
        },
    });
}

pub fn to_ir_finish_reason(stop_reason: &str) -> String {
    match stop_reason {
        "end_turn" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        "refusal" => "content_filter",
        other => other,
    }
    .to_string()
}

pub fn from_ir_finish_reason(finish_reason: &str) -> String {
    match finish_reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        "content_filter" => "refusal",
        other => other,
    }
    .to_string()
}

/// Anthropic's own error types pass through; foreign ones are folded into
/// the closest Anthropic type.
fn anthropic_error_type(error_type: &str) -> &str {
    match error_type {
        "invalid_request_error" | "authentication_error" | "permission_error"
        | "not_found_error" | "request_too_large" | "rate_limit_error" | "api_error"
        | "overloaded_error" => error_type,
        "rate_limit_exceeded" => "rate_limit_error",
        _ => "api_error",
    }
}
