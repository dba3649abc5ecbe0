use std::convert::Infallible;

use bytes::Bytes;
use chat_core::{
    llm::{ChatDelta, ChatStream},
    protocol::RelayEvent,
};
use futures::{Stream, StreamExt};
use tracing::{debug, error, warn};

/// Logs streams whose body was dropped before a terminal event went out,
/// which is what happens when the browser aborts its fetch.
#[derive(Default)]
struct StreamGuard {
    fragments: usize,
    finished: bool,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!(target: "aichat_relay", fragments = self.fragments, "client abandoned stream");
        }
    }
}

fn frame(ev: RelayEvent) -> Result<Bytes, Infallible> {
    Ok(Bytes::from(ev.to_line()))
}

/// Re-emits upstream deltas as relay events. Always ends with exactly one
/// terminal event: `[DONE]` on finish or upstream EOF, an error event
/// otherwise.
pub fn reframe(upstream: ChatStream) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut upstream = upstream;
        let mut guard = StreamGuard::default();
        while let Some(item) = upstream.next().await {
            match item {
                Ok(ChatDelta::Text(t)) => {
                    if t.is_empty() {
                        continue;
                    }
                    guard.fragments += 1;
                    yield frame(RelayEvent::Content(t));
                }
                Ok(ChatDelta::Finish(reason)) => {
                    debug!(target: "aichat_relay", ?reason, "upstream finished");
                    break;
                }
                Ok(ChatDelta::Usage(usage)) => {
                    debug!(target: "aichat_relay", ?usage, "upstream usage");
                }
                Ok(ChatDelta::RoleStart(_)) => {}
                Err(e) => {
                    error!(target: "aichat_relay", "stream failed after {} fragments: {}", guard.fragments, e);
                    guard.finished = true;
                    yield frame(RelayEvent::Error(e.to_string()));
                    return;
                }
            }
        }
        guard.finished = true;
        debug!(target: "aichat_relay", fragments = guard.fragments, "stream complete");
        yield frame(RelayEvent::Done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::llm::{ChatError, Role};

    async fn lines(items: Vec<Result<ChatDelta, ChatError>>) -> Vec<String> {
        let upstream: ChatStream = Box::pin(futures::stream::iter(items));
        reframe(upstream)
            .map(|b| String::from_utf8(b.unwrap().to_vec()).unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn text_then_done() {
        let out = lines(vec![
            Ok(ChatDelta::RoleStart(Role::Assistant)),
            Ok(ChatDelta::Text("Hi".into())),
            Ok(ChatDelta::Text(String::new())),
            Ok(ChatDelta::Text(" there".into())),
            Ok(ChatDelta::Finish(Some("stop".into()))),
            Ok(ChatDelta::Text("late".into())),
        ])
        .await;
        assert_eq!(
            out,
            vec![
                "data: {\"content\":\"Hi\"}\n\n",
                "data: {\"content\":\" there\"}\n\n",
                "data: [DONE]\n\n",
            ]
        );
    }

    #[tokio::test]
    async fn eof_without_finish_still_completes() {
        let out = lines(vec![Ok(ChatDelta::Text("x".into()))]).await;
        assert_eq!(out.last().map(String::as_str), Some("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn error_is_terminal() {
        let out = lines(vec![
            Ok(ChatDelta::Text("part".into())),
            Err(ChatError::Upstream("overloaded".into())),
            Ok(ChatDelta::Text("never".into())),
        ])
        .await;
        assert_eq!(out.len(), 2);
        assert_eq!(
            RelayEvent::parse_line(out[1].trim_end()).unwrap(),
            Some(RelayEvent::Error("upstream: overloaded".into()))
        );
    }

    #[tokio::test]
    async fn dropped_body_releases_upstream_and_logs() {
        use std::io::Write;
        use std::pin::Pin;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::{Arc, Mutex};
        use std::task::{Context, Poll};

        struct Flagged {
            inner: ChatStream,
            dropped: Arc<AtomicBool>,
        }
        impl Stream for Flagged {
            type Item = Result<ChatDelta, ChatError>;
            fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
                self.inner.poll_next_unpin(cx)
            }
        }
        impl Drop for Flagged {
            fn drop(&mut self) {
                self.dropped.store(true, Ordering::SeqCst);
            }
        }

        #[derive(Clone, Default)]
        struct Captured(Arc<Mutex<Vec<u8>>>);
        impl Write for Captured {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let logs = Captured::default();
        let sink = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let dropped = Arc::new(AtomicBool::new(false));
        let pending = futures::stream::iter(vec![Ok::<_, ChatError>(ChatDelta::Text("Hi".into()))])
            .chain(futures::stream::pending());
        let upstream: ChatStream = Box::pin(Flagged {
            inner: Box::pin(pending),
            dropped: dropped.clone(),
        });

        let mut body = Box::pin(reframe(upstream));
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from("data: {\"content\":\"Hi\"}\n\n"));
        assert!(!dropped.load(Ordering::SeqCst));

        drop(body);
        assert!(dropped.load(Ordering::SeqCst));
        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("client abandoned stream"), "{text}");
        assert!(text.contains("fragments=1"), "{text}");
    }
}
