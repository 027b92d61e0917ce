pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// Prefix that marks a message as a bot command.
pub const COMMAND_MARKER: char = '/';

/// A platform-neutral view of one inbound update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncomingUpdate {
    /// Platform-assigned update id, used for logging only
    pub update_id: u32,
    /// Chat to reply to; `None` for updates without a chat
    pub chat_id: Option<i64>,
    /// The message text, if the update carries one
    pub text: Option<String>,
}

/// A command parsed from the head of a message, e.g. `/start@my_bot payload`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRef<'a> {
    pub name: &'a str,
    pub mention: Option<&'a str>,
}

impl IncomingUpdate {
    pub fn is_command(&self) -> bool {
        self.text
            .as_deref()
            .is_some_and(|t| t.starts_with(COMMAND_MARKER))
    }

    /// Parse the leading command token. Returns `None` for plain text.
    pub fn command(&self) -> Option<CommandRef<'_>> {
        let rest = self.text.as_deref()?.strip_prefix(COMMAND_MARKER)?;
        let token = rest.split_whitespace().next().unwrap_or("");
        let (name, mention) = match token.split_once('@') {
            Some((name, mention)) => (name, Some(mention)),
            None => (token, None),
        };
        Some(CommandRef { name, mention })
    }
}

/// Outbound side of the messaging platform
#[async_trait]
pub trait ReplySender: Send + Sync {
    /// Send a plain text message to a chat
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;
}
