use std::sync::{Arc, Mutex};

use aichat_relay::{build_router, AppState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chat_core::llm::{
    ChatDelta, ChatError, ChatOpts, ChatResult, ChatStream, Message, ModelClient, Role, Usage,
};
use chat_core::protocol::{EventDecoder, RelayEvent, RelayFailure, RelayReply};
use tower::ServiceExt;

/// Model client that replays canned output and records what it was sent.
#[derive(Default)]
struct ScriptedClient {
    deltas: Vec<Result<ChatDelta, ChatError>>,
    fail_with: Option<ChatError>,
    seen: Mutex<Vec<(Vec<Message>, String)>>,
}

impl ScriptedClient {
    fn replying(deltas: Vec<Result<ChatDelta, ChatError>>) -> Self {
        Self { deltas, ..Default::default() }
    }

    fn failing(e: ChatError) -> Self {
        Self { fail_with: Some(e), ..Default::default() }
    }
}

#[async_trait::async_trait]
impl ModelClient for ScriptedClient {
    async fn send_chat(&self, msgs: &[Message], opts: &ChatOpts) -> Result<ChatResult, ChatError> {
        self.seen.lock().unwrap().push((msgs.to_vec(), opts.model.clone()));
        if let Some(e) = &self.fail_with {
            return Err(e.clone());
        }
        let text = self
            .deltas
            .iter()
            .filter_map(|d| match d {
                Ok(ChatDelta::Text(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        Ok(ChatResult {
            text,
            finish_reason: Some("stop".into()),
            usage: Some(Usage { prompt_tokens: Some(7), completion_tokens: Some(2), total_tokens: Some(9) }),
        })
    }

    async fn stream_chat(&self, msgs: Vec<Message>, opts: ChatOpts) -> Result<ChatStream, ChatError> {
        self.seen.lock().unwrap().push((msgs, opts.model));
        if let Some(e) = &self.fail_with {
            return Err(e.clone());
        }
        Ok(Box::pin(futures::stream::iter(self.deltas.clone())))
    }
}

fn app(client: Arc<ScriptedClient>) -> axum::Router {
    build_router(AppState::new(client, "be helpful", "openai/gpt-3.5-turbo"))
}

async fn post(client: Arc<ScriptedClient>, body: &str) -> (StatusCode, String, Option<String>) {
    let req = Request::builder()
        .method("POST")
        .uri("/chat-with-ai")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app(client).oneshot(req).await.unwrap();
    let status = resp.status();
    let content_type = resp
        .headers()
        .get("content-type")
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned(), content_type)
}

fn decode(text: &str) -> Vec<RelayEvent> {
    let mut dec = EventDecoder::new();
    dec.push(text.as_bytes());
    let mut out = Vec::new();
    while let Some(ev) = dec.next_event().unwrap() {
        out.push(ev);
    }
    out
}

#[tokio::test]
async fn non_streaming_reply_carries_model_and_usage() {
    let client = Arc::new(ScriptedClient::replying(vec![Ok(ChatDelta::Text("Hello!".into()))]));
    let (status, body, _) = post(client.clone(), r#"{"message":"hi"}"#).await;
    assert_eq!(status, StatusCode::OK);
    let reply: RelayReply = serde_json::from_str(&body).unwrap();
    assert_eq!(reply.response, "Hello!");
    assert_eq!(reply.model, "openai/gpt-3.5-turbo");
    assert_eq!(reply.usage.unwrap().total_tokens, Some(9));
}

#[tokio::test]
async fn prompt_wraps_history_with_system_and_user() {
    let client = Arc::new(ScriptedClient::replying(vec![Ok(ChatDelta::Text("ok".into()))]));
    let body = r#"{
        "message": "and now?",
        "model": "gpt-4o",
        "conversationHistory": [
            {"role": "user", "content": "first"},
            {"role": "assistant", "content": ""},
            {"role": "assistant", "content": "reply"}
        ]
    }"#;
    let (status, _, _) = post(client.clone(), body).await;
    assert_eq!(status, StatusCode::OK);

    let seen = client.seen.lock().unwrap();
    let (msgs, model) = &seen[0];
    assert_eq!(model, "gpt-4o");
    let roles: Vec<Role> = msgs.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
    assert_eq!(msgs[0].content, "be helpful");
    assert_eq!(msgs[3].content, "and now?");
}

#[tokio::test]
async fn blank_message_is_rejected() {
    let client = Arc::new(ScriptedClient::default());
    let (status, body, _) = post(client.clone(), r#"{"message":"   "}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let failure: RelayFailure = serde_json::from_str(&body).unwrap();
    assert_eq!(failure.error, "Message is required");
    assert!(client.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn null_fields_are_treated_as_missing() {
    let client = Arc::new(ScriptedClient::default());
    let (status, body, _) = post(client.clone(), r#"{"message":null}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let failure: RelayFailure = serde_json::from_str(&body).unwrap();
    assert_eq!(failure.error, "Message is required");

    let client = Arc::new(ScriptedClient::replying(vec![Ok(ChatDelta::Text("ok".into()))]));
    let (status, body, _) = post(
        client.clone(),
        r#"{"message":"hi","conversationHistory":null,"model":null}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reply: RelayReply = serde_json::from_str(&body).unwrap();
    assert_eq!(reply.response, "ok");
    let seen = client.seen.lock().unwrap();
    assert_eq!(seen[0].0.len(), 2);
    assert_eq!(seen[0].1, "openai/gpt-3.5-turbo");
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let (status, body, _) = post(Arc::new(ScriptedClient::default()), "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Malformed payload"));
}

#[tokio::test]
async fn missing_key_surfaces_as_server_error() {
    let client = Arc::new(ScriptedClient::failing(ChatError::Config(
        "OpenRouter API key not configured".into(),
    )));
    let (status, body, _) = post(client, r#"{"message":"hi","stream":true}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let failure: RelayFailure = serde_json::from_str(&body).unwrap();
    assert_eq!(failure.error, "OpenRouter API key not configured");
    assert_eq!(failure.details, "Failed to process chat request");
}

#[tokio::test]
async fn upstream_auth_failure_is_bad_gateway() {
    let client = Arc::new(ScriptedClient::failing(ChatError::Auth("401".into())));
    let (status, _, _) = post(client, r#"{"message":"hi"}"#).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn streaming_reply_is_reframed() {
    let client = Arc::new(ScriptedClient::replying(vec![
        Ok(ChatDelta::RoleStart(Role::Assistant)),
        Ok(ChatDelta::Text("Hel".into())),
        Ok(ChatDelta::Text("lo".into())),
        Ok(ChatDelta::Finish(Some("stop".into()))),
    ]));
    let (status, body, content_type) = post(client, r#"{"message":"hi","stream":true}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/event-stream"));
    assert_eq!(
        decode(&body),
        vec![
            RelayEvent::Content("Hel".into()),
            RelayEvent::Content("lo".into()),
            RelayEvent::Done,
        ]
    );
}

#[tokio::test]
async fn streaming_error_ends_with_error_event() {
    let client = Arc::new(ScriptedClient::replying(vec![
        Ok(ChatDelta::Text("par".into())),
        Err(ChatError::Timeout("idle".into())),
    ]));
    let (status, body, _) = post(client, r#"{"message":"hi","stream":true}"#).await;
    assert_eq!(status, StatusCode::OK);
    let events = decode(&body);
    assert_eq!(events.len(), 2);
    assert_eq!(events[1], RelayEvent::Error("timeout: idle".into()));
}

#[tokio::test]
async fn preflight_allows_browser_headers() {
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/chat-with-ai")
        .header("origin", "http://localhost:5173")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "authorization, x-client-info, apikey, content-type")
        .body(Body::empty())
        .unwrap();
    let resp = app(Arc::new(ScriptedClient::default())).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    let allowed = resp.headers()["access-control-allow-headers"].to_str().unwrap();
    assert!(allowed.contains("x-client-info") && allowed.contains("apikey"));
}

#[tokio::test]
async fn health_is_ok() {
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app(Arc::new(ScriptedClient::default())).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
