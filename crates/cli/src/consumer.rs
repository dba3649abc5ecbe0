use chat_core::protocol::{EventDecoder, RelayEvent, RelayFailure, RelayReply, RelayRequest};
use futures::StreamExt;
use reqwest::{header, Client, Response};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("relay unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Relay(String),
    #[error("bad relay reply: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyState {
    Streaming,
    Complete,
    Canceled,
    Failed(String),
}

/// Assistant reply being assembled from stream fragments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveReply {
    pub content: String,
    pub state: ReplyState,
    pub fragments: usize,
}

impl Default for LiveReply {
    fn default() -> Self {
        Self {
            content: String::new(),
            state: ReplyState::Streaming,
            fragments: 0,
        }
    }
}

impl LiveReply {
    pub fn is_done(&self) -> bool {
        self.state != ReplyState::Streaming
    }

    /// Applies one event; returns true once the reply is settled.
    fn apply<F>(&mut self, ev: RelayEvent, on_update: &mut F) -> bool
    where
        F: FnMut(&LiveReply, &str),
    {
        match ev {
            RelayEvent::Content(fragment) => {
                self.content.push_str(&fragment);
                self.fragments += 1;
                on_update(self, &fragment);
                false
            }
            RelayEvent::Done => {
                self.state = ReplyState::Complete;
                true
            }
            RelayEvent::Error(msg) => {
                self.state = ReplyState::Failed(msg);
                true
            }
        }
    }
}

#[derive(Clone)]
pub struct RelayClient {
    http: Client,
    url: String,
}

impl RelayClient {
    pub fn new(url: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder().use_rustls_tls().build()?;
        Ok(Self { http, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send(&self, req: &RelayRequest) -> Result<RelayReply, ClientError> {
        let req = RelayRequest { stream: false, ..req.clone() };
        let resp = self.http.post(&self.url).json(&req).send().await?;
        if !resp.status().is_success() {
            return Err(relay_failure(resp).await);
        }
        resp.json::<RelayReply>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Streams one reply. `on_update` runs after every appended fragment.
    ///
    /// Request-level failures (unreachable relay, non-2xx answer) are errors.
    /// Once the stream is open every outcome is a [`LiveReply`] that keeps
    /// whatever content arrived.
    pub async fn stream<F>(
        &self,
        req: &RelayRequest,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> Result<LiveReply, ClientError>
    where
        F: FnMut(&LiveReply, &str),
    {
        let req = RelayRequest { stream: true, ..req.clone() };
        let mut live = LiveReply::default();

        let send = self
            .http
            .post(&self.url)
            .header(header::ACCEPT, "text/event-stream")
            .json(&req)
            .send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => {
                live.state = ReplyState::Canceled;
                return Ok(live);
            }
            resp = send => resp?,
        };
        if !resp.status().is_success() {
            return Err(relay_failure(resp).await);
        }

        let mut body = Box::pin(resp.bytes_stream());
        let mut decoder = EventDecoder::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(target: "aichat::consumer", fragments = live.fragments, "stream canceled");
                    live.state = ReplyState::Canceled;
                    return Ok(live);
                }
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    decoder.push(&bytes);
                    loop {
                        match decoder.next_event() {
                            Ok(Some(ev)) => {
                                if live.apply(ev, &mut on_update) {
                                    debug!(target: "aichat::consumer", state = ?live.state, "stream settled");
                                    return Ok(live);
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                live.state = ReplyState::Failed(format!("bad relay stream: {}", e));
                                return Ok(live);
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(target: "aichat::consumer", "stream read failed: {}", e);
                    live.state = ReplyState::Failed(format!("relay connection lost: {}", e));
                    return Ok(live);
                }
                None => {
                    match decoder.finish() {
                        Ok(Some(ev)) => {
                            live.apply(ev, &mut on_update);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            live.state = ReplyState::Failed(format!("bad relay stream: {}", e));
                        }
                    }
                    if !live.is_done() {
                        live.state = ReplyState::Failed("stream ended unexpectedly".into());
                    }
                    return Ok(live);
                }
            }
        }
    }
}

/// Reads the relay's `{error, details}` body, falling back to the status line.
async fn relay_failure(resp: Response) -> ClientError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<RelayFailure>(&text) {
        Ok(f) => ClientError::Relay(f.error),
        Err(_) if !text.trim().is_empty() => ClientError::Relay(format!("relay returned {}: {}", status, text.trim())),
        Err(_) => ClientError::Relay(format!("relay returned {}", status)),
    }
}
