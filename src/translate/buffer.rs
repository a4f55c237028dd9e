//! Reassembly of server-sent-event frames from arbitrarily chunked transport text.
//!
//! A [`ChunkBuffer`] belongs to exactly one stream session. Chunks are appended
//! as they arrive; every complete frame (terminated by a blank line) is split
//! off and reduced to its `data:` payload, while a trailing partial frame is
//! kept for the next call. The provider's completion sentinel (`[DONE]` for
//! `OpenAI`) is recognized and swallowed here so it never reaches a parser.

/// Frame accumulator for a single streaming session.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    buffer: String,
    pending_bytes: Vec<u8>,
    sentinel: Option<&'static str>,
    saw_sentinel: bool,
}

impl ChunkBuffer {
    pub fn new(sentinel: Option<&'static str>) -> Self {
        Self {
            sentinel,
            ..Self::default()
        }
    }

    /// Append transport bytes. An incomplete UTF-8 sequence at the end of
    /// `raw` is held back until the next call completes it.
    pub fn add_bytes(&mut self, raw: &[u8]) -> Vec<String> {
        self.pending_bytes.extend_from_slice(raw);
        let text = decode_utf8_prefix(&mut self.pending_bytes);
        self.add_chunk(&text)
    }

    /// Append a text chunk and return the payloads of all frames it completed,
    /// in arrival order.
    pub fn add_chunk(&mut self, raw: &str) -> Vec<String> {
        self.buffer.extend(raw.chars().filter(|c| *c != '\r'));

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let frame: String = self.buffer.drain(..end + 2).collect();
            if let Some(payload) = self.frame_payload(&frame) {
                frames.push(payload);
            }
        }
        frames
    }

    /// Buffered text that has not yet formed a complete frame, if any of it is
    /// non-blank.
    #[must_use]
    pub fn remaining_data(&self) -> Option<String> {
        let mut rest = self.buffer.clone();
        if !self.pending_bytes.is_empty() {
            rest.push_str(&String::from_utf8_lossy(&self.pending_bytes));
        }
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Drain the buffer at end of stream, returning the payload of the
    /// trailing partial frame. Text without a `data:` field is returned as-is.
    pub fn flush(&mut self) -> Option<String> {
        let rest = self.remaining_data()?;
        self.buffer.clear();
        self.pending_bytes.clear();

        if has_data_field(&rest) {
            self.frame_payload(&rest)
        } else {
            let trimmed = rest.trim();
            if self.is_sentinel(trimmed) {
                self.saw_sentinel = true;
                None
            } else {
                Some(trimmed.to_string())
            }
        }
    }

    /// Whether the completion sentinel has been seen.
    #[must_use]
    pub fn saw_sentinel(&self) -> bool {
        self.saw_sentinel
    }

    fn frame_payload(&mut self, frame: &str) -> Option<String> {
        let data: Vec<&str> = frame
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
            .collect();

        // event:/id:/retry: lines and comments carry no payload
        if data.is_empty() {
            return None;
        }

        let payload = data.join("\n");
        if self.is_sentinel(payload.trim()) {
            self.saw_sentinel = true;
            return None;
        }
        Some(payload)
    }

    fn is_sentinel(&self, payload: &str) -> bool {
        self.sentinel.is_some_and(|s| s == payload)
    }
}

fn has_data_field(text: &str) -> bool {
    text.lines().any(|line| line.starts_with("data:"))
}

/// Decode the longest valid UTF-8 prefix of `pending`, leaving an incomplete
/// trailing sequence in place. Invalid sequences are replaced with U+FFFD.
fn decode_utf8_prefix(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                match e.error_len() {
                    None => {
                        out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                        pending.drain(..valid);
                        return out;
                    }
                    Some(len) => {
                        out.push_str(&String::from_utf8_lossy(&pending[..valid + len]));
                        pending.drain(..valid + len);
                    }
                }
            }
        }
    }
}
