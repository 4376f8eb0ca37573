// Telegram Bot API adapter: long polling in, answers out


use itertools::Itertools;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{QueryHandler, reply_text};
use crate::config::{ConfigError, TelegramConfig};
use crate::pipeline::QueryRequest;
use crate::{RagError, Result};

/// Extra time on top of the long-poll timeout before a request is abandoned
const REQUEST_GRACE: Duration = Duration::from_secs(10);
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

impl Chat {
    /// Group-like chats only get answers when the bot is mentioned
    #[inline]
    pub fn is_group(&self) -> bool {
        matches!(self.chat_type.as_str(), "group" | "supergroup" | "channel")
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Blocking client for the handful of Bot API methods the adapter uses
#[derive(Debug, Clone)]
pub struct TelegramClient {
    api_base: Url,
    token: String,
    agent: ureq::Agent,
}

impl TelegramClient {
    /// Fails when neither the config nor `$TELEGRAM_BOT_TOKEN` provide a token
    #[inline]
    pub fn new(config: &TelegramConfig) -> std::result::Result<Self, ConfigError> {
        let token = config.resolve_bot_token()?;
        let api_base = Url::parse(&config.api_base)
            .map_err(|_| ConfigError::InvalidUrl(config.api_base.clone()))?;
        let timeout = Duration::from_secs(config.poll_timeout_seconds) + REQUEST_GRACE;

        Ok(Self {
            api_base,
            token,
            agent: ureq::Agent::config_builder()
                .timeout_global(Some(timeout))
                .http_status_as_error(false)
                .build()
                .into(),
        })
    }

    fn method_url(&self, method: &str) -> Result<Url> {
        // Tokens contain ':' so they cannot go through Url::join as a relative path
        let base = self.api_base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/bot{}/{method}", self.token))
            .map_err(|e| RagError::Channel(format!("invalid Telegram API URL: {e}")))
    }

    fn read_result<T: DeserializeOwned>(method: &str, body: &str) -> Result<T> {
        let response: ApiResponse<T> = serde_json::from_str(body)
            .map_err(|e| RagError::Channel(format!("invalid {method} response: {e}")))?;

        if !response.ok {
            return Err(RagError::Channel(format!(
                "{method} failed: {}",
                response.description.unwrap_or_default()
            )));
        }

        response
            .result
            .ok_or_else(|| RagError::Channel(format!("{method} returned no result")))
    }

    fn call<T: DeserializeOwned>(&self, method: &str, payload: &str) -> Result<T> {
        let url = self.method_url(method)?;
        let mut response = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(payload)
            .map_err(|e| RagError::Channel(format!("{method} request failed: {e}")))?;

        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| RagError::Channel(format!("{method} response unreadable: {e}")))?;

        Self::read_result(method, &body)
    }

    #[inline]
    pub fn get_me(&self) -> Result<User> {
        self.call("getMe", "{}")
    }

    /// Long-poll for updates after `offset`, waiting up to `timeout_seconds`
    #[inline]
    pub fn get_updates(&self, offset: i64, timeout_seconds: u64) -> Result<Vec<Update>> {
        let payload = serde_json::json!({
            "offset": offset,
            "timeout": timeout_seconds,
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", &payload.to_string())
    }

    #[inline]
    pub fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let payload = serde_json::to_string(&SendMessage { chat_id, text })
            .map_err(|e| RagError::Channel(e.to_string()))?;
        let _: Message = self.call("sendMessage", &payload)?;
        Ok(())
    }
}

/// What to do with one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Reply(String),
    Ask(String),
    Ignore,
}

fn mentions(text: &str, handle: &str) -> bool {
    let needle = format!("@{}", handle.to_lowercase());
    text.to_lowercase().contains(&needle)
}

fn strip_mention(text: &str, handle: &str) -> String {
    let needle = format!("@{}", handle.to_lowercase());
    let lower = text.to_lowercase();
    match lower.find(&needle) {
        Some(start) if lower.len() == text.len() => {
            let before = text.get(..start).unwrap_or_default();
            let after = text.get(start + needle.len()..).unwrap_or_default();
            format!("{before}{after}").split_whitespace().join(" ")
        }
        _ => text.trim().to_string(),
    }
}

/// Decide how to handle a message.
///
/// `/start` and `/help` are answered from the config, other commands are dropped. In
/// group chats only messages mentioning `bot_handle` are forwarded, without the mention.
#[inline]
pub fn classify(message: &Message, bot_handle: Option<&str>, config: &TelegramConfig) -> Action {
    if message.from.as_ref().is_some_and(|user| user.is_bot) {
        return Action::Ignore;
    }
    let Some(text) = message.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Action::Ignore;
    };

    if let Some(command_text) = text.strip_prefix('/') {
        let command = command_text.split_whitespace().next().unwrap_or_default();
        let (name, target) = command.split_once('@').unwrap_or((command, ""));
        if !target.is_empty() && bot_handle.is_some_and(|h| !h.eq_ignore_ascii_case(target)) {
            return Action::Ignore;
        }
        return match name {
            "start" => Action::Reply(config.greeting.clone()),
            "help" => Action::Reply(config.help_text.clone()),
            _ => Action::Ignore,
        };
    }

    if message.chat.is_group() {
        return match bot_handle {
            Some(handle) if mentions(text, handle) => {
                let question = strip_mention(text, handle);
                if question.is_empty() {
                    Action::Ignore
                } else {
                    Action::Ask(question)
                }
            }
            _ => Action::Ignore,
        };
    }

    Action::Ask(text.to_string())
}

pub struct TelegramChannel {
    client: TelegramClient,
    handler: Arc<dyn QueryHandler>,
    config: TelegramConfig,
    bot_handle: Option<String>,
    offset: i64,
    retry_delay: Duration,
}

impl TelegramChannel {
    #[inline]
    pub fn new(
        client: TelegramClient,
        handler: Arc<dyn QueryHandler>,
        config: TelegramConfig,
    ) -> Self {
        let bot_handle = config
            .bot_username
            .as_deref()
            .map(|name| name.trim_start_matches('@').to_string())
            .filter(|name| !name.is_empty());

        Self {
            client,
            handler,
            config,
            bot_handle,
            offset: 0,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Pause after a failed poll before trying again
    #[inline]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[inline]
    pub fn bot_handle(&self) -> Option<&str> {
        self.bot_handle.as_deref()
    }

    /// Learn the bot's username from `getMe` when the config does not name it
    #[inline]
    pub async fn connect(&mut self) -> Result<()> {
        let client = self.client.clone();
        let me = tokio::task::spawn_blocking(move || client.get_me())
            .await
            .map_err(|e| RagError::Channel(format!("getMe worker failed: {e}")))??;

        info!(
            "Telegram bot: @{} ({})",
            me.username.as_deref().unwrap_or("unknown"),
            me.first_name
        );
        if self.bot_handle.is_none() {
            self.bot_handle = me.username;
        }
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<Update>> {
        let client = self.client.clone();
        let offset = self.offset;
        let timeout = self.config.poll_timeout_seconds;
        let updates = tokio::task::spawn_blocking(move || client.get_updates(offset, timeout))
            .await
            .map_err(|e| RagError::Channel(format!("getUpdates worker failed: {e}")))??;

        if let Some(last) = updates.last() {
            self.offset = last.update_id + 1;
        }
        Ok(updates)
    }

    async fn send(&self, chat_id: i64, text: String) -> Result<()> {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || client.send_message(chat_id, &text))
            .await
            .map_err(|e| RagError::Channel(format!("sendMessage worker failed: {e}")))?
    }

    /// Handle one update, replying in its chat when there is something to say
    #[inline]
    pub async fn process_update(&self, update: Update) -> Result<()> {
        let Some(message) = update.message else {
            return Ok(());
        };

        let reply = match classify(&message, self.bot_handle(), &self.config) {
            Action::Ignore => return Ok(()),
            Action::Reply(text) => text,
            Action::Ask(question) => {
                info!(
                    "Question from chat {} ({})",
                    message.chat.id, message.chat.chat_type
                );
                let request = QueryRequest::new(
                    self.config.collection.clone(),
                    question,
                    message.chat.id.to_string(),
                );
                let response = self.handler.handle_query(request).await;
                reply_text(&response).to_string()
            }
        };

        self.send(message.chat.id, reply).await
    }

    /// Poll until `shutdown` resolves. Polling failures are logged and retried.
    #[inline]
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        info!(
            "Telegram polling started for collection {}",
            self.config.collection
        );

        loop {
            let updates = tokio::select! {
                () = &mut shutdown => break,
                polled = self.poll() => polled,
            };

            match updates {
                Ok(updates) => {
                    debug!("Received {} updates", updates.len());
                    for update in updates {
                        let update_id = update.update_id;
                        if let Err(e) = self.process_update(update).await {
                            warn!("Failed to handle update {}: {}", update_id, e);
                        }
                    }
                }
                Err(e) => {
                    error!("Telegram polling error: {}", e);
                    tokio::select! {
                        () = &mut shutdown => break,
                        () = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        info!("Telegram polling stopped");
        Ok(())
    }
}
