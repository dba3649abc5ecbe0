//! Wire protocol spoken between the relay and its clients.
//!
//! Requests and non-streaming replies are plain JSON. Streaming replies are a
//! line-delimited event stream: every event is a single `data:` line followed
//! by a blank line, and exactly one terminal event (`[DONE]` or an error)
//! closes the stream.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::llm::{Message, Role, Usage};

pub const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Provide clear, accurate, and helpful responses.";

const DONE_MARKER: &str = "[DONE]";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RelayRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "conversationHistory", default, deserialize_with = "null_as_default")]
    pub conversation_history: Vec<Message>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stream: bool,
}

/// Browsers send `null` for unset fields; treat it like an absent one.
fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RelayReply {
    pub response: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Body of every non-2xx relay answer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RelayFailure {
    pub error: String,
    #[serde(default)]
    pub details: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayEvent {
    Content(String),
    Done,
    Error(String),
}

#[derive(Serialize, Deserialize)]
struct EventBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("event line is not valid utf-8")]
    Utf8,
    #[error("malformed event payload: {0}")]
    Json(String),
    #[error("event carries neither content nor error")]
    Empty,
}

impl RelayEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RelayEvent::Content(_))
    }

    /// Framed form of the event, including the trailing blank line.
    pub fn to_line(&self) -> String {
        let payload = match self {
            RelayEvent::Done => DONE_MARKER.to_string(),
            RelayEvent::Content(c) => encode_body(EventBody { content: Some(c.clone()), error: None }),
            RelayEvent::Error(e) => encode_body(EventBody { content: None, error: Some(e.clone()) }),
        };
        format!("data: {}\n\n", payload)
    }

    /// Decodes one line. Blank lines, `:` comments and fields other than
    /// `data` yield `None`.
    pub fn parse_line(line: &str) -> Result<Option<RelayEvent>, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let payload = rest.strip_prefix(' ').unwrap_or(rest);
        if payload.trim() == DONE_MARKER {
            return Ok(Some(RelayEvent::Done));
        }
        let body: EventBody =
            serde_json::from_str(payload).map_err(|e| ProtocolError::Json(e.to_string()))?;
        match (body.error, body.content) {
            (Some(e), _) => Ok(Some(RelayEvent::Error(e))),
            (None, Some(c)) => Ok(Some(RelayEvent::Content(c))),
            (None, None) => Err(ProtocolError::Empty),
        }
    }
}

fn encode_body(body: EventBody) -> String {
    // A struct of two optional strings always serializes.
    serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string())
}

/// Incremental decoder for the relay event stream.
///
/// Chunks may be split anywhere, including inside a multi-byte character;
/// bytes are held until a full line is available.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buf: BytesMut,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a chunk. Complete events are taken out with [`Self::next_event`].
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete event in the buffer, or `None` when more input is needed.
    pub fn next_event(&mut self) -> Result<Option<RelayEvent>, ProtocolError> {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos);
            self.buf.advance(1);
            let text = std::str::from_utf8(&line).map_err(|_| ProtocolError::Utf8)?;
            if let Some(ev) = RelayEvent::parse_line(text)? {
                return Ok(Some(ev));
            }
        }
        Ok(None)
    }

    /// Decodes whatever is left once the input has ended.
    pub fn finish(&mut self) -> Result<Option<RelayEvent>, ProtocolError> {
        if let Some(ev) = self.next_event()? {
            return Ok(Some(ev));
        }
        if self.buf.is_empty() {
            return Ok(None);
        }
        let rest = self.buf.split();
        let text = std::str::from_utf8(&rest).map_err(|_| ProtocolError::Utf8)?;
        RelayEvent::parse_line(text)
    }
}

/// Upstream message list for one relay request: system prompt, prior turns,
/// then the new user message.
pub fn build_prompt(system_prompt: &str, history: &[Message], message: &str) -> Vec<Message> {
    let mut out = Vec::with_capacity(history.len() + 2);
    out.push(Message::system(system_prompt));
    out.extend(
        history
            .iter()
            .filter(|m| match m.role {
                Role::System => false,
                Role::Assistant => !m.content.trim().is_empty(),
                Role::User => true,
            })
            .cloned(),
    );
    out.push(Message::user(message));
    out
}
