//! One streaming exchange, from raw transport chunks to IR events.
//!
//! A [`StreamSession`] owns the chunk buffer for its stream and enforces the
//! event ordering every consumer relies on:
//!
//! ```text
//! Init ──MessageStart/Delta──▶ Streaming ──MessageEnd──▶ End
//!   │                              │
//!   └──────────Error───────────────┴──────Error────────▶ Failed
//! ```
//!
//! `End` and `Failed` are terminal. Once there, the session accepts no more
//! input and emits nothing further.

use std::sync::Arc;

use tracing::debug;

use super::adapter::{StreamContext, WireAdapter};
use super::buffer::ChunkBuffer;
use super::ir::IrStreamEvent;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Streaming,
    End,
    Failed,
}

pub struct StreamSession {
    adapter: Arc<dyn WireAdapter>,
    buffer: ChunkBuffer,
    ctx: StreamContext,
    state: SessionState,
}

impl StreamSession {
    pub fn new(adapter: Arc<dyn WireAdapter>) -> Self {
        let buffer = ChunkBuffer::new(adapter.framing().sentinel);
        Self {
            adapter,
            buffer,
            ctx: StreamContext::new(),
            state: SessionState::Init,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::End | SessionState::Failed)
    }

    /// Feed transport bytes. Returns the events they completed, in order.
    /// A raised failure is always the last item and fails the session.
    pub fn push_bytes(&mut self, raw: &[u8]) -> Vec<Result<IrStreamEvent>> {
        if self.is_closed() {
            return Vec::new();
        }
        let frames = self.buffer.add_bytes(raw);
        self.process(frames)
    }

    /// Text counterpart of [`StreamSession::push_bytes`].
    pub fn push_chunk(&mut self, raw: &str) -> Vec<Result<IrStreamEvent>> {
        if self.is_closed() {
            return Vec::new();
        }
        let frames = self.buffer.add_chunk(raw);
        self.process(frames)
    }

    /// Close the session at end of transport.
    ///
    /// Leftover buffered text is parsed best-effort; if that fails it is
    /// discarded. A session still streaming, or holding back a finish, gets
    /// its `MessageEnd`.
    pub fn finish(&mut self) -> Vec<IrStreamEvent> {
        let mut out = Vec::new();
        if self.is_closed() {
            return out;
        }

        if let Some(rest) = self.buffer.flush() {
            match self.adapter.normalize_frame_strict(&rest, &mut self.ctx) {
                Ok(events) => out.extend(events.into_iter().filter_map(|e| self.admit(e))),
                Err(e) => debug!(
                    provider = %self.adapter.kind(),
                    error = %e,
                    "Discarding unparseable trailing stream data"
                ),
            }
        }

        out.extend(self.close());
        out
    }

    /// `MessageEnd` for a stream that completed without one, carrying any
    /// finish reason the adapter held back.
    fn close(&mut self) -> Option<IrStreamEvent> {
        let finish_reason = self.ctx.pending_end.take();
        if self.state != SessionState::Streaming && finish_reason.is_none() {
            return None;
        }
        self.admit(IrStreamEvent::MessageEnd {
            finish_reason,
            usage: None,
        })
    }

    fn process(&mut self, frames: Vec<String>) -> Vec<Result<IrStreamEvent>> {
        let mut out = Vec::new();
        for frame in frames {
            if self.is_closed() {
                break;
            }
            match self.adapter.normalize_frame(&frame, &mut self.ctx) {
                Ok(events) => out.extend(events.into_iter().filter_map(|e| self.admit(e)).map(Ok)),
                Err(e) => {
                    self.state = SessionState::Failed;
                    out.push(Err(e));
                    return out;
                }
            }
        }

        // The completion sentinel ends the stream even if no MessageEnd came.
        if self.buffer.saw_sentinel() && !self.is_closed() {
            out.extend(self.close().map(Ok));
        }
        out
    }

    /// Apply one event to the state machine; `None` means it is dropped.
    fn admit(&mut self, event: IrStreamEvent) -> Option<IrStreamEvent> {
        use SessionState::{End, Failed, Init, Streaming};

        let next = match (self.state, &event) {
            (End | Failed, _) => None,
            (_, IrStreamEvent::Error { .. }) => Some(Failed),
            (_, IrStreamEvent::MessageEnd { .. }) => Some(End),
            (Init, IrStreamEvent::MessageStart { .. }) => Some(Streaming),
            (Streaming, IrStreamEvent::MessageStart { .. }) => None,
            (_, IrStreamEvent::MessageDelta { .. }) => Some(Streaming),
        };

        match next {
            Some(state) => {
                self.state = state;
                Some(event)
            }
            None => {
                debug!(
                    provider = %self.adapter.kind(),
                    event = event.kind_name(),
                    state = ?self.state,
                    "Dropping out-of-order stream event"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::translate::anthropic::AnthropicAdapter;
    use crate::translate::ir::{IrDelta, IrUsage, PARSING_ERROR_TYPE};
    use crate::translate::openai::OpenAiAdapter;

    fn openai() -> StreamSession {
        StreamSession::new(Arc::new(OpenAiAdapter))
    }

    fn ok(items: Vec<Result<IrStreamEvent>>) -> Vec<IrStreamEvent> {
        items.into_iter().map(|r| r.unwrap()).collect()
    }

    const START: &str =
        "data: {\"id\":\"c1\",\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n";
    const HI: &str = "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n";
    const STOP: &str =
        "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n";

    #[test]
    fn test_start_delta_end_then_sentinel() {
        let mut session = openai();
        let stream = format!("{START}{HI}{STOP}data: [DONE]\n\n");
        let events = ok(session.push_chunk(&stream));

        assert_eq!(
            events,
            vec![
                IrStreamEvent::MessageStart {
                    id: "c1".to_string(),
                    model: "gpt-4o".to_string()
                },
                IrStreamEvent::MessageDelta {
                    delta: IrDelta::text("Hi")
                },
                IrStreamEvent::MessageEnd {
                    finish_reason: Some("stop".to_string()),
                    usage: None
                },
            ]
        );
        assert_eq!(session.state(), SessionState::End);
        assert!(session.finish().is_empty());
    }

    #[test]
    fn test_repeated_start_is_dropped() {
        let mut session = openai();
        let events = ok(session.push_chunk(&format!("{START}{HI}{START}{HI}")));
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], IrStreamEvent::MessageDelta { .. }));
    }

    #[test]
    fn test_events_after_end_are_dropped() {
        let mut session = openai();
        ok(session.push_chunk(&format!("{START}{STOP}data: [DONE]\n\n")));
        assert!(session.is_closed());
        assert!(session.push_chunk(HI).is_empty());
        assert!(session.finish().is_empty());
    }

    #[test]
    fn test_truncated_stream_gets_synthesized_end() {
        let mut session = openai();
        ok(session.push_chunk(&format!("{START}{HI}")));
        assert_eq!(
            session.finish(),
            vec![IrStreamEvent::MessageEnd {
                finish_reason: None,
                usage: None
            }]
        );
        assert_eq!(session.state(), SessionState::End);
    }

    #[test]
    fn test_empty_stream_emits_nothing() {
        let mut session = openai();
        assert!(session.push_chunk(": keep-alive\n\n").is_empty());
        assert!(session.finish().is_empty());
        assert_eq!(session.state(), SessionState::Init);
    }

    #[test]
    fn test_trailing_frame_without_blank_line_is_parsed() {
        let mut session = openai();
        ok(session.push_chunk(START));
        ok(session.push_chunk(STOP.trim_end()));
        let events = session.finish();
        assert!(matches!(
            &events[..],
            [IrStreamEvent::MessageEnd { finish_reason: Some(r), .. }] if r == "stop"
        ));
    }

    #[test]
    fn test_unparseable_tail_is_discarded() {
        let mut session = openai();
        ok(session.push_chunk(START));
        ok(session.push_chunk("data: {\"id\":\"c1\",\"choi"));
        let events = session.finish();
        assert_eq!(
            events,
            vec![IrStreamEvent::MessageEnd {
                finish_reason: None,
                usage: None
            }]
        );
    }

    #[test]
    fn test_malformed_frame_fails_session_in_band() {
        let mut session = openai();
        let events = ok(session.push_chunk(&format!("{START}data: {{oops\n\n{HI}")));
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            IrStreamEvent::Error { error } if error.error_type == PARSING_ERROR_TYPE
        ));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn test_unrecognized_shape_is_raised_after_prior_events() {
        let mut session = openai();
        let shapeless = "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{}}]}\n\n";
        let items = session.push_chunk(&format!("{START}{shapeless}{HI}"));
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(
            items[1],
            Err(BridgeError::UnrecognizedStreamEventShape { .. })
        ));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn test_anthropic_session() {
        let mut session = StreamSession::new(Arc::new(AnthropicAdapter));
        let stream = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"type\":\"message\",\"role\":\"assistant\",\"content\":[],\"model\":\"claude\",\"usage\":{\"input_tokens\":10,\"output_tokens\":1}}}\n\n",
            "event: content_block_start\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: ping\n",
            "data: {\"type\":\"ping\"}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
            "event: content_block_stop\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":5}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        let events = ok(session.push_chunk(stream));
        let kinds: Vec<_> = events.iter().map(IrStreamEvent::kind_name).collect();
        assert_eq!(kinds, ["message_start", "message_delta", "message_end"]);
        assert!(matches!(
            events[2],
            IrStreamEvent::MessageEnd { usage: Some(u), .. } if u == IrUsage::new(10, 5)
        ));
        assert_eq!(session.state(), SessionState::End);
    }

    #[test]
    fn test_held_back_end_waits_for_usage_chunk() {
        let mut session = openai();
        let events = ok(session.push_chunk(&format!("{START}{HI}{STOP}")));
        assert_eq!(events.len(), 2);
        assert_eq!(session.state(), SessionState::Streaming);

        let usage = "data: {\"id\":\"c1\",\"choices\":[],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":2,\"total_tokens\":9}}\n\n";
        let events = ok(session.push_chunk(&format!("{usage}data: [DONE]\n\n")));
        assert_eq!(
            events,
            vec![IrStreamEvent::MessageEnd {
                finish_reason: Some("stop".to_string()),
                usage: Some(IrUsage::new(7, 2)),
            }]
        );
        assert_eq!(session.state(), SessionState::End);
    }

    #[test]
    fn test_sentinel_releases_held_back_end() {
        let mut session = openai();
        ok(session.push_chunk(&format!("{START}{STOP}")));
        let events = ok(session.push_chunk("data: [DONE]\n\n"));
        assert_eq!(
            events,
            vec![IrStreamEvent::MessageEnd {
                finish_reason: Some("stop".to_string()),
                usage: None
            }]
        );
        assert!(session.finish().is_empty());
    }

    #[test]
    fn test_anthropic_frames_split_anywhere_match_unsplit() {
        let stream = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"type\":\"message\",\"role\":\"assistant\",\"content\":[],\"model\":\"claude\",\"usage\":{\"input_tokens\":4,\"output_tokens\":1}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hello\"}}\n\n",
        );
        let mut whole = StreamSession::new(Arc::new(AnthropicAdapter));
        let expected = ok(whole.push_chunk(stream));
        assert_eq!(expected.len(), 2);

        for split in 1..stream.len() {
            let (a, b) = stream.split_at(split);
            let mut session = StreamSession::new(Arc::new(AnthropicAdapter));
            let mut events = ok(session.push_chunk(a));
            events.extend(ok(session.push_chunk(b)));
            assert_eq!(events, expected, "split at {split}");
        }
    }
}
