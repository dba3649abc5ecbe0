use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chat_core::{llm::ChatError, protocol::RelayFailure};
use thiserror::Error;
use tracing::error;

const DETAILS: &str = "Failed to process chat request";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Message is required")]
    MissingMessage,

    #[error("{}", upstream_message(.0))]
    Upstream(#[from] ChatError),
}

fn upstream_message(e: &ChatError) -> String {
    match e {
        ChatError::Config(msg) => msg.clone(),
        other => other.to_string(),
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedPayload(_) | AppError::MissingMessage => StatusCode::BAD_REQUEST,
            AppError::Upstream(ChatError::Config(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Upstream(ChatError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(target: "aichat_relay", %status, "chat request failed: {}", self);
        }
        let body = RelayFailure {
            error: self.to_string(),
            details: DETAILS.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
