use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, UpdateKind};
use tracing::{debug, info};

use crate::config::Config;
use crate::platform::{IncomingUpdate, ReplySender};

/// Telegram Bot API session shared by all webhook requests
pub struct TelegramClient {
    bot: Bot,
    username: String,
}

impl TelegramClient {
    /// Build the bot, verify the token with `getMe`, and register the
    /// webhook when a public URL is configured. Must finish before the
    /// server accepts traffic.
    pub async fn initialize(config: &Config) -> Result<Self> {
        let bot = Bot::new(&config.bot_token);

        let me = bot
            .get_me()
            .await
            .context("Failed to authorize with Telegram (getMe)")?;
        let username = me.username().to_string();
        info!("Authorized as @{}", username);

        if let Some(webhook_url) = config.webhook_url() {
            let url = reqwest::Url::parse(&webhook_url).context("Invalid webhook URL")?;
            let mut request = bot.set_webhook(url);
            if let Some(token) = &config.secret_token {
                request = request.secret_token(token.clone());
            }
            request.await.context("Failed to register webhook")?;
            info!(
                "Webhook registered under {}",
                config.public_url.as_deref().unwrap_or_default()
            );
        }

        Ok(Self { bot, username })
    }

    /// The bot's own username, without the leading `@`
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Release the session once the server has stopped. Fails if a
    /// request handler still holds a reference to the client.
    pub fn shutdown(self: Arc<Self>) -> Result<()> {
        let client = Arc::try_unwrap(self).map_err(|shared| {
            anyhow!(
                "Telegram client for @{} still in use at shutdown ({} references)",
                shared.username,
                Arc::strong_count(&shared)
            )
        })?;
        let TelegramClient { bot, username } = client;
        drop(bot);
        info!("Telegram client for @{} stopped", username);
        Ok(())
    }
}

#[async_trait]
impl ReplySender for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .with_context(|| format!("sendMessage to chat {} failed", chat_id))?;
        debug!("Sent {} chars to chat {}", text.chars().count(), chat_id);
        Ok(())
    }
}

impl From<Update> for IncomingUpdate {
    fn from(update: Update) -> Self {
        let update_id = update.id.0;
        match update.kind {
            UpdateKind::Message(msg) => IncomingUpdate {
                update_id,
                chat_id: Some(msg.chat.id.0),
                text: msg.text().map(str::to_string),
            },
            _ => IncomingUpdate {
                update_id,
                ..Default::default()
            },
        }
    }
}

/// Parse a webhook body into an update. Fails on invalid JSON or on a JSON
/// value that is not a Telegram update.
pub fn parse_update(body: &[u8]) -> Result<IncomingUpdate> {
    let update: Update =
        serde_json::from_slice(body).context("Request body is not a Telegram update")?;
    Ok(IncomingUpdate::from(update))
}
