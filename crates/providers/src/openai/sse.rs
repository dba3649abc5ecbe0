use bytes::{Buf, BytesMut};
use chat_core::llm::{ChatDelta, ChatError, Role, Usage};

/// One server-sent event block with its `data:` lines joined.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChatChunk {
    Deltas(Vec<ChatDelta>),
    Done,
}

/// Buffers upstream bytes and yields complete event blocks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next event carrying data. Comment-only blocks are consumed silently.
    pub fn next_event(&mut self) -> Result<Option<SseEvent>, ChatError> {
        while let Some((end, sep)) = find_event_boundary(&self.buf) {
            let block = self.buf.split_to(end);
            self.buf.advance(sep);
            let text = std::str::from_utf8(&block).map_err(|e| ChatError::Decode(e.to_string()))?;
            if let Some(ev) = parse_block(text) {
                return Ok(Some(ev));
            }
        }
        Ok(None)
    }

    pub fn has_pending(&self) -> bool {
        !self.buf.iter().all(|b| b.is_ascii_whitespace())
    }
}

fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = twoway::find_bytes(buf, b"\r\n\r\n").map(|p| (p, 4));
    let lf = twoway::find_bytes(buf, b"\n\n").map(|p| (p, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines = Vec::new();
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(v) = line.strip_prefix("event:") {
            event = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("data:") {
            data_lines.push(v.strip_prefix(' ').unwrap_or(v));
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent { event, data: data_lines.join("\n") })
}

/// Maps one chat-completions `data:` payload to deltas.
pub fn parse_chat_data(data: &str) -> Result<ChatChunk, ChatError> {
    if data.trim() == "[DONE]" {
        return Ok(ChatChunk::Done);
    }
    let v: serde_json::Value =
        serde_json::from_str(data).map_err(|e| ChatError::Decode(e.to_string()))?;
    if let Some(err) = v.get("error") {
        let msg = err["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(ChatError::Upstream(msg));
    }

    let mut out = Vec::new();
    let choice = &v["choices"][0];
    if let Some(role) = choice["delta"]["role"].as_str() {
        let r = match role {
            "user" => Role::User,
            "system" => Role::System,
            _ => Role::Assistant,
        };
        out.push(ChatDelta::RoleStart(r));
    }
    if let Some(content) = choice["delta"]["content"].as_str() {
        if !content.is_empty() {
            out.push(ChatDelta::Text(content.to_string()));
        }
    }
    if let Some(fr) = choice["finish_reason"].as_str() {
        out.push(ChatDelta::Finish(Some(fr.to_string())));
    }
    if let Some(u) = v.get("usage").filter(|u| u.is_object()) {
        let usage: Usage =
            serde_json::from_value(u.clone()).map_err(|e| ChatError::Decode(e.to_string()))?;
        out.push(ChatDelta::Usage(usage));
    }
    Ok(ChatChunk::Deltas(out))
}
