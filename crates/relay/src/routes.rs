use std::{sync::Arc, time::Duration};

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{
        header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE},
        HeaderName, Method,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chat_core::{
    llm::{ChatOpts, ModelClient},
    protocol::{build_prompt, RelayReply, RelayRequest},
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::{error::AppError, reframe::reframe};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<dyn ModelClient>,
    pub system_prompt: Arc<str>,
    pub default_model: Arc<str>,
}

impl AppState {
    pub fn new(client: Arc<dyn ModelClient>, system_prompt: &str, default_model: &str) -> Self {
        Self {
            client,
            system_prompt: Arc::from(system_prompt),
            default_model: Arc::from(default_model),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/chat-with-ai", post(chat_with_ai))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}

/// `POST /chat-with-ai`: relay one chat turn, streamed or not.
pub async fn chat_with_ai(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let req: RelayRequest =
        serde_json::from_slice(&body).map_err(|e| AppError::MalformedPayload(e.to_string()))?;
    if req.message.trim().is_empty() {
        return Err(AppError::MissingMessage);
    }
    let model = req
        .model
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(state.default_model.as_ref())
        .to_string();

    info!(
        target: "aichat_relay",
        model = %model,
        stream = req.stream,
        history = req.conversation_history.len(),
        "processing chat request"
    );

    let msgs = build_prompt(&state.system_prompt, &req.conversation_history, &req.message);
    let opts = ChatOpts {
        model: model.clone(),
        temperature: None,
        top_p: None,
        max_tokens: None,
    };

    if req.stream {
        let upstream = state.client.stream_chat(msgs, opts).await?;
        let body = Body::from_stream(reframe(upstream));
        return Ok((
            [(CONTENT_TYPE, "text/event-stream"), (CACHE_CONTROL, "no-cache")],
            body,
        )
            .into_response());
    }

    let res = state.client.send_chat(&msgs, &opts).await?;
    info!(target: "aichat_relay", model = %model, usage = ?res.usage, "upstream response received");
    Ok(Json(RelayReply {
        response: res.text,
        model,
        usage: res.usage,
    })
    .into_response())
}
