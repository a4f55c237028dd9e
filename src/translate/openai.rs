//! OpenAI Chat Completions adapter.

use super::adapter::{ProviderAdapter, StreamContext, StreamFraming};
use super::ir::{
    ChoiceContent, IrChoice, IrDelta, IrError, IrMessage, IrRequest, IrResponse, IrRole,
    IrStreamEvent, IrUsage,
};
use super::openai_types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatContent, ChatError,
    ChatErrorResponse, ChatMessage, ChatUsage, Choice, ChoiceMessage, ChunkChoice, ChunkDelta,
    StopSequences, StreamOptions,
};
use crate::error::{BridgeError, Result};
use crate::providers::ProviderKind;

pub const DONE_SENTINEL: &str = "[DONE]";

const CHUNK_OBJECT: &str = "chat.completion.chunk";

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiAdapter;

impl ProviderAdapter for OpenAiAdapter {
    type Request = ChatCompletionRequest;
    type Response = ChatCompletionResponse;
    type StreamEvent = ChatCompletionChunk;
    type Error = ChatErrorResponse;

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn framing(&self) -> StreamFraming {
        StreamFraming {
            sentinel: Some(DONE_SENTINEL),
            terminator: Some("data: [DONE]\n\n"),
        }
    }

    fn normalize_request(&self, req: &ChatCompletionRequest) -> Result<IrRequest> {
        let messages = req
            .messages
            .iter()
            .map(normalize_message)
            .collect::<Result<Vec<_>>>()?;

        Ok(IrRequest {
            messages,
            model: req.model.clone(),
            temperature: req.temperature,
            max_tokens: req.max_tokens.or(req.max_completion_tokens),
            top_p: req.top_p,
            frequency_penalty: req.frequency_penalty,
            presence_penalty: req.presence_penalty,
            stop: req.stop.clone().map(StopSequences::into_vec),
            stream: req.stream.unwrap_or(false),
        })
    }

    fn transform_request(&self, ir: &IrRequest) -> Result<ChatCompletionRequest> {
        let messages = ir
            .messages
            .iter()
            .map(|m| ChatMessage {
                role: m.role.as_str().to_string(),
                content: Some(ChatContent::Text(m.content.clone())),
                name: m.name.clone(),
                tool_call_id: None,
            })
            .collect();

        Ok(ChatCompletionRequest {
            model: ir.model.clone(),
            messages,
            max_tokens: ir.max_tokens,
            max_completion_tokens: None,
            temperature: ir.temperature,
            top_p: ir.top_p,
            frequency_penalty: ir.frequency_penalty,
            presence_penalty: ir.presence_penalty,
            stop: ir.stop.clone().map(StopSequences::Many),
            stream: ir.stream.then_some(true),
            stream_options: ir.stream.then_some(StreamOptions {
                include_usage: true,
            }),
        })
    }

    fn normalize_response(&self, resp: &ChatCompletionResponse) -> Result<IrResponse> {
        let choices = resp
            .choices
            .iter()
            .map(|choice| {
                let message = IrMessage {
                    role: IrRole::parse(&choice.message.role)?,
                    content: choice.message.content.clone().unwrap_or_default(),
                    name: choice.message.name.clone(),
                };
                Ok(IrChoice::with_message(
                    choice.index,
                    message,
                    choice.finish_reason.clone(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(IrResponse {
            id: resp.id.clone(),
            model: resp.model.clone(),
            choices,
            usage: resp.usage.as_ref().map(|u| {
                IrUsage::with_total(u.prompt_tokens, u.completion_tokens, u.total_tokens)
            }),
        })
    }

    fn transform_response(&self, ir: &IrResponse) -> Result<ChatCompletionResponse> {
        let choices = ir
            .choices
            .iter()
            .map(|choice| {
                let message = match &choice.content {
                    Some(ChoiceContent::Message(m)) => ChoiceMessage {
                        role: m.role.as_str().to_string(),
                        content: Some(m.content.clone()),
                        name: m.name.clone(),
                    },
                    Some(ChoiceContent::Delta(d)) => ChoiceMessage {
                        role: d.role.unwrap_or(IrRole::Assistant).as_str().to_string(),
                        content: d.content.clone(),
                        name: d.name.clone(),
                    },
                    None => ChoiceMessage {
                        role: IrRole::Assistant.as_str().to_string(),
                        content: None,
                        name: None,
                    },
                };
                Choice {
                    index: choice.index,
                    message,
                    finish_reason: choice.finish_reason.clone(),
                }
            })
            .collect();

        Ok(ChatCompletionResponse {
            id: ir.id.clone(),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: ir.model.clone(),
            choices,
            usage: ir.usage.map(chat_usage),
        })
    }

    fn parse_error_event(&self, message: String) -> ChatCompletionChunk {
        ChatCompletionChunk {
            error: Some(chat_error(&IrError::parsing(message))),
            ..ChatCompletionChunk::default()
        }
    }

    fn normalize_stream_event(
        &self,
        chunk: &ChatCompletionChunk,
        ctx: &mut StreamContext,
    ) -> Result<Vec<IrStreamEvent>> {
        if let Some(error) = &chunk.error {
            return Ok(vec![IrStreamEvent::Error {
                error: ir_error(error),
            }]);
        }

        let usage = chunk.usage.as_ref().map(|u| {
            IrUsage::with_total(u.prompt_tokens, u.completion_tokens, u.total_tokens)
        });

        // Only the first choice is streamed; n > 1 is not representable as one event sequence.
        let Some(choice) = chunk.choices.first() else {
            // `include_usage` sends usage alone after the finish chunk
            if usage.is_some() {
                return Ok(vec![IrStreamEvent::MessageEnd {
                    finish_reason: ctx.pending_end.take(),
                    usage,
                }]);
            }
            return Err(BridgeError::unrecognized_event(
                ProviderKind::OpenAi,
                "chunk has neither choices nor an error",
            ));
        };
        let delta = &choice.delta;
        let finish_reason = choice.finish_reason.clone();
        let content = delta.content.as_deref();

        if let Some(role) = delta.role.as_deref() {
            if content.map_or(true, str::is_empty) && finish_reason.is_none() {
                IrRole::parse(role)?;
                return Ok(vec![IrStreamEvent::MessageStart {
                    id: chunk.id.clone(),
                    model: chunk.model.clone(),
                }]);
            }
        }

        match content {
            Some(text) if !text.is_empty() || finish_reason.is_none() => {
                let mut events = vec![IrStreamEvent::MessageDelta {
                    delta: IrDelta {
                        role: delta.role.as_deref().map(IrRole::parse).transpose()?,
                        content: Some(text.to_string()),
                        name: delta.name.clone(),
                    },
                }];
                if finish_reason.is_some() {
                    events.extend(message_end(finish_reason, usage, ctx));
                }
                Ok(events)
            }
            _ if finish_reason.is_some() => {
                Ok(message_end(finish_reason, usage, ctx).into_iter().collect())
            }
            _ => Err(BridgeError::unrecognized_event(
                ProviderKind::OpenAi,
                format!("chunk '{}' has no role, content or finish reason", chunk.id),
            )),
        }
    }

    fn transform_stream_event(
        &self,
        event: &IrStreamEvent,
        ctx: &mut StreamContext,
    ) -> Result<Vec<ChatCompletionChunk>> {
        let chunk = match event {
            IrStreamEvent::MessageStart { .. } => content_chunk(
                ctx,
                ChunkDelta {
                    role: Some(IrRole::Assistant.as_str().to_string()),
                    content: Some(String::new()),
                    name: None,
                },
                None,
                None,
            ),
            IrStreamEvent::MessageDelta { delta } => content_chunk(
                ctx,
                ChunkDelta {
                    role: delta.role.map(|r| r.as_str().to_string()),
                    content: delta.content.clone(),
                    name: delta.name.clone(),
                },
                None,
                None,
            ),
            IrStreamEvent::MessageEnd {
                finish_reason,
                usage,
            } => content_chunk(
                ctx,
                ChunkDelta::default(),
                finish_reason.clone(),
                usage.map(chat_usage),
            ),
            IrStreamEvent::Error { error } => ChatCompletionChunk {
                error: Some(chat_error(error)),
                ..ChatCompletionChunk::default()
            },
        };
        Ok(vec![chunk])
    }

    fn normalize_error(&self, error: &ChatErrorResponse) -> IrError {
        ir_error(&error.error)
    }

    fn transform_error(&self, error: &IrError) -> ChatErrorResponse {
        ChatErrorResponse {
            error: chat_error(error),
        }
    }
}

/// A finish chunk without usage is held back until the trailing usage chunk
/// or the end of the stream, so the usage lands on the same `MessageEnd`.
fn message_end(
    finish_reason: Option<String>,
    usage: Option<IrUsage>,
    ctx: &mut StreamContext,
) -> Option<IrStreamEvent> {
    if usage.is_none() {
        ctx.pending_end = finish_reason;
        return None;
    }
    Some(IrStreamEvent::MessageEnd {
        finish_reason,
        usage,
    })
}

fn normalize_message(msg: &ChatMessage) -> Result<IrMessage> {
    Ok(IrMessage {
        role: IrRole::parse(&msg.role)?,
        content: msg
            .content
            .as_ref()
            .map(ChatContent::as_text)
            .unwrap_or_default(),
        name: msg.name.clone(),
    })
}

fn content_chunk(
    ctx: &StreamContext,
    delta: ChunkDelta,
    finish_reason: Option<String>,
    usage: Option<ChatUsage>,
) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: ctx.id.clone(),
        object: CHUNK_OBJECT.to_string(),
        created: ctx.created,
        model: ctx.model.clone(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
        usage,
        error: None,
    }
}

fn chat_usage(usage: IrUsage) -> ChatUsage {
    ChatUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

fn ir_error(error: &ChatError) -> IrError {
    IrError {
        error_type: error.error_type.clone(),
        message: error.message.clone(),
        code: error.code.clone(),
        param: error.param.clone(),
    }
}

fn chat_error(error: &IrError) -> ChatError {
    ChatError {
        message: error.message.clone(),
        error_type: error.error_type.clone(),
        code: error.code.clone(),
        param: error.param.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::adapter::WireAdapter;
    use crate::translate::ir::PARSING_ERROR_TYPE;

    fn frame(payload: &str) -> Vec<IrStreamEvent> {
        OpenAiAdapter
            .normalize_frame(payload, &mut StreamContext::new())
            .unwrap()
    }

    #[test]
    fn test_request_round_trip() {
        let json = r#"{
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "Hi", "name": "alice"},
                {"role": "assistant", "content": "Hello."},
                {"role": "tool", "content": "42"}
            ],
            "temperature": 0.2,
            "max_tokens": 128,
            "top_p": 0.9,
            "frequency_penalty": 0.5,
            "presence_penalty": -0.5,
            "stop": ["END"],
            "stream": true
        }"#;
        let req: ChatCompletionRequest = serde_json::from_str(json).unwrap();
        let ir = OpenAiAdapter.normalize_request(&req).unwrap();
        let back = OpenAiAdapter.transform_request(&ir).unwrap();

        let mut expected: serde_json::Value = serde_json::from_str(json).unwrap();
        expected["stream_options"] = serde_json::json!({"include_usage": true});
        assert_eq!(serde_json::to_value(&back).unwrap(), expected);
        assert_eq!(OpenAiAdapter.normalize_request(&back).unwrap(), ir);
    }

    #[test]
    fn test_usage_only_requested_for_streams() {
        let ir: IrRequest =
            serde_json::from_str(r#"{"model":"m","messages":[{"role":"user","content":"Hi"}]}"#)
                .unwrap();
        let json = serde_json::to_value(OpenAiAdapter.transform_request(&ir).unwrap()).unwrap();
        assert!(json.get("stream").is_none());
        assert!(json.get("stream_options").is_none());
    }

    #[test]
    fn test_roles_are_case_insensitive() {
        let req: ChatCompletionRequest = serde_json::from_str(
            r#"{"model":"m","messages":[
                {"role":"user","content":"a"},
                {"role":"USER","content":"b"},
                {"role":"User","content":"c"}
            ]}"#,
        )
        .unwrap();
        let ir = OpenAiAdapter.normalize_request(&req).unwrap();
        assert!(ir.messages.iter().all(|m| m.role == IrRole::User));
    }

    #[test]
    fn test_unknown_role_fails_request() {
        let req: ChatCompletionRequest = serde_json::from_str(
            r#"{"model":"m","messages":[{"role":"developer_bot","content":"x"}]}"#,
        )
        .unwrap();
        let err = OpenAiAdapter.normalize_request(&req).unwrap_err();
        assert!(matches!(err, BridgeError::UnrecognizedRole { .. }));
    }

    #[test]
    fn test_max_completion_tokens_fallback() {
        let req: ChatCompletionRequest = serde_json::from_str(
            r#"{"model":"m","messages":[],"max_completion_tokens":64,"stop":"x"}"#,
        )
        .unwrap();
        let ir = OpenAiAdapter.normalize_request(&req).unwrap();
        assert_eq!(ir.max_tokens, Some(64));
        assert_eq!(ir.stop, Some(vec!["x".to_string()]));
    }

    #[test]
    fn test_response_round_trip() {
        let resp: ChatCompletionResponse = serde_json::from_str(
            r#"{
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 1700000000,
                "model": "gpt-4o",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi!"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
            }"#,
        )
        .unwrap();
        let ir = OpenAiAdapter.normalize_response(&resp).unwrap();
        assert_eq!(ir.usage, Some(IrUsage::new(5, 2)));

        let back = OpenAiAdapter.transform_response(&ir).unwrap();
        assert_eq!(back.id, "chatcmpl-1");
        assert_eq!(back.model, "gpt-4o");
        assert_eq!(back.choices[0].message.content.as_deref(), Some("Hi!"));
        assert_eq!(back.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(back.usage.as_ref().unwrap().total_tokens, 7);
        assert_eq!(OpenAiAdapter.normalize_response(&back).unwrap(), ir);
    }

    #[test]
    fn test_stream_start_delta_end() {
        assert_eq!(
            frame(r#"{"id":"c1","model":"gpt-4o","choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#),
            vec![IrStreamEvent::MessageStart {
                id: "c1".to_string(),
                model: "gpt-4o".to_string()
            }]
        );
        assert_eq!(
            frame(r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hi"}}]}"#),
            vec![IrStreamEvent::MessageDelta {
                delta: IrDelta::text("Hi")
            }]
        );
        assert_eq!(
            frame(r#"{"id":"c1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#),
            vec![IrStreamEvent::MessageEnd {
                finish_reason: Some("stop".to_string()),
                usage: Some(IrUsage::new(3, 1)),
            }]
        );
    }

    #[test]
    fn test_content_with_finish_reason_emits_both() {
        let events = frame(
            r#"{"id":"c1","choices":[{"delta":{"content":"bye"},"finish_reason":"length"}],"usage":{"prompt_tokens":2,"completion_tokens":1,"total_tokens":3}}"#,
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], IrStreamEvent::MessageDelta { delta } if delta.content.as_deref() == Some("bye")));
        assert!(matches!(&events[1], IrStreamEvent::MessageEnd { finish_reason: Some(r), .. } if r == "length"));
    }

    #[test]
    fn test_finish_waits_for_trailing_usage_chunk() {
        let mut ctx = StreamContext::new();
        let events = OpenAiAdapter
            .normalize_frame(
                r#"{"id":"c1","choices":[{"delta":{"content":"bye"},"finish_reason":"length"}]}"#,
                &mut ctx,
            )
            .unwrap();
        assert!(matches!(&events[..], [IrStreamEvent::MessageDelta { .. }]));
        assert_eq!(ctx.pending_end.as_deref(), Some("length"));

        let events = OpenAiAdapter
            .normalize_frame(
                r#"{"id":"c1","choices":[],"usage":{"prompt_tokens":9,"completion_tokens":4,"total_tokens":13}}"#,
                &mut ctx,
            )
            .unwrap();
        assert_eq!(
            events,
            vec![IrStreamEvent::MessageEnd {
                finish_reason: Some("length".to_string()),
                usage: Some(IrUsage::new(9, 4)),
            }]
        );
        assert!(ctx.pending_end.is_none());
    }

    #[test]
    fn test_stream_role_is_validated() {
        for payload in [
            r#"{"id":"c1","choices":[{"delta":{"role":"narrator","content":""}}]}"#,
            r#"{"id":"c1","choices":[{"delta":{"role":"narrator","content":"Hi"}}]}"#,
        ] {
            let err = OpenAiAdapter
                .normalize_frame(payload, &mut StreamContext::new())
                .unwrap_err();
            assert!(matches!(err, BridgeError::UnrecognizedRole { .. }), "{payload}");
        }

        assert_eq!(
            frame(r#"{"id":"c1","model":"m","choices":[{"delta":{"role":"ASSISTANT"}}]}"#),
            vec![IrStreamEvent::MessageStart {
                id: "c1".to_string(),
                model: "m".to_string()
            }]
        );
    }

    #[test]
    fn test_unknown_role_fails_response() {
        let resp: ChatCompletionResponse = serde_json::from_str(
            r#"{"id":"c1","object":"chat.completion","created":0,"model":"m",
                "choices":[{"index":0,"message":{"role":"narrator","content":"x"},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        let err = OpenAiAdapter.normalize_response(&resp).unwrap_err();
        assert!(matches!(err, BridgeError::UnrecognizedRole { .. }));
    }

    #[test]
    fn test_error_field_wins() {
        let events = frame(
            r#"{"id":"c1","choices":[{"delta":{"content":"ignored"}}],"error":{"message":"overloaded","type":"server_error"}}"#,
        );
        assert_eq!(
            events,
            vec![IrStreamEvent::Error {
                error: IrError::new("server_error", "overloaded")
            }]
        );
    }

    #[test]
    fn test_malformed_frame_becomes_in_band_error() {
        let events = frame("{not json");
        assert!(matches!(
            &events[..],
            [IrStreamEvent::Error { error }] if error.error_type == PARSING_ERROR_TYPE
        ));

        let err = OpenAiAdapter
            .normalize_frame_strict("{not json", &mut StreamContext::new())
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedFrame { .. }));
    }

    #[test]
    fn test_shapeless_chunk_is_fatal() {
        let err = OpenAiAdapter
            .normalize_frame(
                r#"{"id":"c1","choices":[{"index":0,"delta":{}}]}"#,
                &mut StreamContext::new(),
            )
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnrecognizedStreamEventShape { .. }));

        let err = OpenAiAdapter
            .normalize_frame(r#"{"id":"c1"}"#, &mut StreamContext::new())
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnrecognizedStreamEventShape { .. }));
    }

    #[test]
    fn test_stream_transform_repeats_context() {
        let mut ctx = StreamContext::new();
        let start = IrStreamEvent::MessageStart {
            id: "c9".to_string(),
            model: "gpt-4o".to_string(),
        };
        let wire = WireAdapter::encode_stream_event(&OpenAiAdapter, &start, &mut ctx).unwrap();
        assert!(wire.starts_with("data: {"));
        assert!(wire.ends_with("\n\n"));

        let delta = IrStreamEvent::MessageDelta {
            delta: IrDelta::text("Hi"),
        };
        let chunks = OpenAiAdapter.transform_stream_event(&delta, &mut ctx).unwrap();
        assert_eq!(chunks[0].id, "c9");
        assert_eq!(chunks[0].model, "gpt-4o");
        assert_eq!(chunks[0].object, "chat.completion.chunk");
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_stream_event_round_trip() {
        let mut ctx = StreamContext::new();
        let mut ingest = StreamContext::new();
        let events = vec![
            IrStreamEvent::MessageStart {
                id: "c1".to_string(),
                model: "gpt-4o".to_string(),
            },
            IrStreamEvent::MessageDelta {
                delta: IrDelta::text("Hello"),
            },
            IrStreamEvent::MessageEnd {
                finish_reason: Some("stop".to_string()),
                usage: Some(IrUsage::new(1, 1)),
            },
        ];
        for event in &events {
            ctx.observe(event);
            let wire = OpenAiAdapter.transform_stream_event(event, &mut ctx).unwrap();
            let back = OpenAiAdapter
                .normalize_stream_event(&wire[0], &mut ingest)
                .unwrap();
            assert_eq!(&back, std::slice::from_ref(event));
        }
    }

    #[test]
    fn test_error_round_trip() {
        let err: ChatErrorResponse = serde_json::from_str(
            r#"{"error":{"message":"bad key","type":"invalid_request_error","code":"invalid_api_key","param":null}}"#,
        )
        .unwrap();
        let ir = OpenAiAdapter.normalize_error(&err);
        assert_eq!(ir.code.as_deref(), Some("invalid_api_key"));
        let back = OpenAiAdapter.transform_error(&ir);
        assert_eq!(back.error.message, "bad key");
        assert_eq!(back.error.error_type, "invalid_request_error");
        assert_eq!(back.error.code.as_deref(), Some("invalid_api_key"));
    }
}
