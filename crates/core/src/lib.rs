pub mod protocol;

pub mod llm {
    use std::pin::Pin;

    use futures::Stream;
    use serde::{Deserialize, Serialize};
    use thiserror::Error;

    #[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum Role {
        User,
        Assistant,
        System,
    }

    impl Role {
        pub fn as_str(self) -> &'static str {
            match self {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            }
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
    pub struct Message {
        pub role: Role,
        pub content: String,
    }

    impl Message {
        pub fn new<S: Into<String>>(role: Role, content: S) -> Self {
            Self { role, content: content.into() }
        }
        pub fn user<S: Into<String>>(s: S) -> Self {
            Self::new(Role::User, s)
        }
        pub fn assistant<S: Into<String>>(s: S) -> Self {
            Self::new(Role::Assistant, s)
        }
        pub fn system<S: Into<String>>(s: S) -> Self {
            Self::new(Role::System, s)
        }
    }

    #[derive(Clone, Debug)]
    pub struct ChatOpts {
        pub model: String,
        pub temperature: Option<f32>,
        pub top_p: Option<f32>,
        pub max_tokens: Option<u32>,
    }

    /// Token accounting as reported by the upstream provider.
    #[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
    pub struct Usage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub prompt_tokens: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub completion_tokens: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub total_tokens: Option<u32>,
    }

    #[derive(Clone, Debug, PartialEq)]
    pub enum ChatDelta {
        RoleStart(Role),
        Text(String),
        Finish(Option<String>),
        Usage(Usage),
    }

    #[derive(Clone, Debug)]
    pub struct ChatResult {
        pub text: String,
        pub finish_reason: Option<String>,
        pub usage: Option<Usage>,
    }

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum ChatError {
        #[error("config: {0}")] Config(String),
        #[error("auth error: {0}")] Auth(String),
        #[error("rate limit: {0}")] RateLimit(String),
        #[error("timeout: {0}")] Timeout(String),
        #[error("network: {0}")] Network(String),
        #[error("decode: {0}")] Decode(String),
        #[error("protocol: {0}")] Protocol(String),
        #[error("upstream: {0}")] Upstream(String),
        #[error("canceled")] Canceled,
        #[error("other: {0}")] Other(String),
    }

    /// Owned delta stream. Holds no borrow of the client that produced it, so
    /// it can be moved into a response body or a spawned task.
    pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatDelta, ChatError>> + Send + 'static>>;

    #[async_trait::async_trait]
    pub trait ModelClient: Send + Sync {
        async fn send_chat(&self, msgs: &[Message], opts: &ChatOpts) -> Result<ChatResult, ChatError>;
        async fn stream_chat(&self, msgs: Vec<Message>, opts: ChatOpts) -> Result<ChatStream, ChatError>;
    }
}
