use anyhow::Result;
use chat_core::{
    llm::{Message, Role},
    protocol::RelayRequest,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    consumer::{LiveReply, RelayClient, ReplyState},
    store::{Chat, ChatStore, Settings},
};

/// One open conversation: stores turns and relays them.
pub struct ChatSession {
    store: ChatStore,
    client: RelayClient,
    pub chat: Chat,
    pub model: String,
    pub stream: bool,
}

impl ChatSession {
    pub fn new(store: ChatStore, client: RelayClient, chat: Chat, model: String) -> Self {
        Self {
            store,
            client,
            chat,
            model,
            stream: true,
        }
    }

    pub fn relay_url(&self) -> &str {
        self.client.url()
    }

    /// Switches model and remembers it as the preferred one.
    pub fn set_model(&mut self, model: &str) -> Result<()> {
        self.model = model.to_string();
        self.store.save_settings(&Settings {
            preferred_model: Some(self.model.clone()),
        })
    }

    /// Sends one user turn. Returns `None` for blank input. A failed reply is
    /// returned as [`ReplyState::Failed`] with nothing stored for it.
    pub async fn send<F>(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
        on_update: F,
    ) -> Result<Option<LiveReply>>
    where
        F: FnMut(&LiveReply, &str),
    {
        let text = input.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let history: Vec<Message> = self
            .store
            .load_messages(self.chat.id)?
            .iter()
            .map(Message::from)
            .collect();
        self.store.add_message(self.chat.id, Role::User, text, None)?;
        self.chat = self.store.get_chat(self.chat.id)?;

        info!(target: "aichat::session", chat = %self.chat.id, model = %self.model, history = history.len(), "submit");
        let req = RelayRequest {
            message: text.to_string(),
            model: Some(self.model.clone()),
            conversation_history: history,
            stream: self.stream,
        };

        let outcome = if self.stream {
            self.client.stream(&req, cancel, on_update).await
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(target: "aichat::session", "reply canceled before it arrived");
                    Ok(LiveReply {
                        state: ReplyState::Canceled,
                        ..LiveReply::default()
                    })
                }
                reply = self.client.send(&req) => reply.map(|reply| LiveReply {
                    fragments: 1,
                    content: reply.response,
                    state: ReplyState::Complete,
                }),
            }
        };
        let live = outcome.unwrap_or_else(|e| {
            error!(target: "aichat::session", "relay request failed: {}", e);
            LiveReply {
                state: ReplyState::Failed(e.to_string()),
                ..LiveReply::default()
            }
        });

        let keep = match &live.state {
            ReplyState::Complete | ReplyState::Canceled => !live.content.trim().is_empty(),
            ReplyState::Failed(_) | ReplyState::Streaming => false,
        };
        if keep {
            self.store
                .add_message(self.chat.id, Role::Assistant, &live.content, Some(&self.model))?;
            self.chat = self.store.get_chat(self.chat.id)?;
        }
        Ok(Some(live))
    }
}
