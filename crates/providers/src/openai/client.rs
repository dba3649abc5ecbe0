use crate::openai::config::OpenAiConfig;
use crate::openai::sse::{parse_chat_data, ChatChunk, SseDecoder};
use bytes::Bytes;
use chat_core::llm::{
    ChatDelta, ChatError, ChatOpts, ChatResult, ChatStream, Message, ModelClient, Usage,
};
use futures::{Stream, StreamExt};
use reqwest::{header, Client, StatusCode};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

pub const MISSING_KEY: &str = "OpenRouter API key not configured";

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    cfg: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(cfg: OpenAiConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = &cfg.api_key {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", key))?,
            );
        }
        if let Some(referer) = &cfg.referer {
            headers.insert(
                header::HeaderName::from_static("http-referer"),
                header::HeaderValue::from_str(referer)?,
            );
        }
        if let Some(title) = &cfg.title {
            headers.insert("X-Title", header::HeaderValue::from_str(title)?);
        }
        let mut builder = Client::builder()
            .default_headers(headers)
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .connect_timeout(cfg.timeout);
        if let Some(p) = &cfg.proxy {
            builder = builder.proxy(reqwest::Proxy::all(p)?);
        }
        let http = builder.build()?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.cfg
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.cfg.base_url.trim_end_matches('/')
        )
    }

    fn require_key(&self) -> Result<(), ChatError> {
        match &self.cfg.api_key {
            Some(_) => Ok(()),
            None => Err(ChatError::Config(MISSING_KEY.to_string())),
        }
    }

    fn request_body(&self, msgs: &[Message], opts: &ChatOpts, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = msgs
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        let model = if opts.model.trim().is_empty() {
            self.cfg.model.as_str()
        } else {
            opts.model.trim()
        };
        serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": stream,
            "temperature": opts.temperature.unwrap_or(self.cfg.temperature),
            "top_p": opts.top_p,
            "max_tokens": opts.max_tokens.unwrap_or(self.cfg.max_tokens),
        })
    }
}

#[async_trait::async_trait]
impl ModelClient for OpenAiClient {
    async fn send_chat(&self, msgs: &[Message], opts: &ChatOpts) -> Result<ChatResult, ChatError> {
        self.require_key()?;
        let url = self.endpoint();
        info!(target:"providers::openai","send chat model={} url={}", opts.model, url);
        let body = self.request_body(msgs, opts, false);
        let resp = self
            .http
            .post(url)
            .timeout(self.cfg.timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.ok();
            error!(target:"providers::openai","chat non-200 status={} body={:?}", status, body);
            return Err(map_status_err(status, body));
        }
        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))?;
        let message = &v["choices"][0]["message"];
        if !message.is_object() {
            return Err(ChatError::Protocol("invalid response from upstream".into()));
        }
        let usage = v
            .get("usage")
            .filter(|u| u.is_object())
            .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok());
        debug!(target:"providers::openai","chat response received usage={:?}", usage);
        Ok(ChatResult {
            text: message["content"].as_str().unwrap_or("").to_string(),
            finish_reason: v["choices"][0]["finish_reason"].as_str().map(str::to_string),
            usage,
        })
    }

    async fn stream_chat(&self, msgs: Vec<Message>, opts: ChatOpts) -> Result<ChatStream, ChatError> {
        self.require_key()?;
        let url = self.endpoint();
        info!(target:"providers::openai","start chat stream model={} url={}", opts.model, url);
        let body = self.request_body(&msgs, &opts, true);
        // Only the wait for headers is bounded here; the body is covered by the idle timeout.
        let send = self
            .http
            .post(url)
            .header(header::ACCEPT, "text/event-stream")
            .json(&body)
            .send();
        let resp = tokio::time::timeout(self.cfg.timeout, send)
            .await
            .map_err(|_| ChatError::Timeout("no response headers".into()))?
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.ok();
            error!(target:"providers::openai","chat stream non-200 status={} body={:?}", status, body);
            return Err(map_status_err(status, body));
        }
        Ok(Box::pin(chat_deltas(resp.bytes_stream(), self.cfg.stream_idle_timeout)))
    }
}

/// Turns the raw upstream body into deltas. Ends after `[DONE]`, the first
/// error, or when no bytes arrive for `idle`.
fn chat_deltas<S>(body: S, idle: Duration) -> impl Stream<Item = Result<ChatDelta, ChatError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    async_stream::stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::new();
        'outer: loop {
            let chunk = match tokio::time::timeout(idle, body.next()).await {
                Ok(chunk) => chunk,
                Err(_) => {
                    warn!(target:"providers::openai","chat stream idle for {:?}", idle);
                    yield Err(ChatError::Timeout("idle".into()));
                    break;
                }
            };
            match chunk {
                Some(Ok(b)) => {
                    decoder.push(&b);
                    loop {
                        match decoder.next_event() {
                            Ok(Some(ev)) => match parse_chat_data(&ev.data) {
                                Ok(ChatChunk::Done) => break 'outer,
                                Ok(ChatChunk::Deltas(deltas)) => {
                                    for d in deltas {
                                        yield Ok(d);
                                    }
                                }
                                Err(e) => {
                                    error!(target:"providers::openai","chat stream event error: {}", e);
                                    yield Err(e);
                                    break 'outer;
                                }
                            },
                            Ok(None) => break,
                            Err(e) => { yield Err(e); break 'outer; }
                        }
                    }
                }
                Some(Err(e)) => { yield Err(map_reqwest_err(e)); break; }
                None => {
                    if decoder.has_pending() {
                        debug!(target:"providers::openai","chat stream closed with a partial event");
                    }
                    break;
                }
            }
        }
    }
}

fn map_reqwest_err(e: reqwest::Error) -> ChatError {
    if e.is_timeout() {
        ChatError::Timeout(e.to_string())
    } else if e.is_request() || e.is_connect() {
        ChatError::Network(e.to_string())
    } else {
        ChatError::Other(e.to_string())
    }
}

fn map_status_err(status: StatusCode, body: Option<String>) -> ChatError {
    let s = format!(
        "upstream API error: {} {}",
        status.as_u16(),
        body.unwrap_or_default()
    );
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Auth(s),
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimit(s),
        s5 if s5.is_server_error() => ChatError::Network(s),
        _ => ChatError::Upstream(s),
    }
}
