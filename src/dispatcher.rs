use anyhow::Result;
use tracing::{debug, info};

use crate::platform::{IncomingUpdate, ReplySender};

/// Reply to `/start`
pub const GREETING: &str = "سلام از Render! ✅";

/// What a matched rule sends back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a fixed text
    Reply(String),
    /// Send the update's own text back
    Echo,
}

impl Action {
    fn render(&self, update: &IncomingUpdate) -> Option<String> {
        match self {
            Action::Reply(text) => Some(text.clone()),
            Action::Echo => update.text.clone(),
        }
    }
}

/// One handler registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Matches `/name`, `/name@this_bot`, with or without arguments.
    /// Command names compare case-insensitively.
    Command { name: String, action: Action },
    /// Matches any non-empty text that is not a command
    FreeText { action: Action },
}

impl Rule {
    pub fn command(name: impl Into<String>, action: Action) -> Self {
        Rule::Command {
            name: name.into(),
            action,
        }
    }

    pub fn free_text(action: Action) -> Self {
        Rule::FreeText { action }
    }

    fn action(&self) -> &Action {
        match self {
            Rule::Command { action, .. } | Rule::FreeText { action } => action,
        }
    }

    fn matches(&self, update: &IncomingUpdate, bot_username: Option<&str>) -> bool {
        match self {
            Rule::Command { name, .. } => {
                let Some(command) = update.command() else {
                    return false;
                };
                let addressed_to_us = match (command.mention, bot_username) {
                    (None, _) | (Some(_), None) => true,
                    (Some(mention), Some(me)) => mention.eq_ignore_ascii_case(me),
                };
                command.name.eq_ignore_ascii_case(name) && addressed_to_us
            }
            Rule::FreeText { .. } => {
                update.text.as_deref().is_some_and(|t| !t.is_empty()) && !update.is_command()
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Rule::Command { name, .. } => format!("/{}", name),
            Rule::FreeText { .. } => "free text".to_string(),
        }
    }
}

/// Result of dispatching one update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// The rule at this registration index ran and its reply was sent
    Replied { rule: usize },
    /// No rule matched; nothing was sent
    Ignored,
}

/// Ordered rule table, read-only once built
#[derive(Debug, Clone)]
pub struct Dispatcher {
    rules: Vec<Rule>,
    bot_username: Option<String>,
}

impl Dispatcher {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            bot_username: None,
        }
    }

    /// Greeting on `/start`, echo for everything that is not a command.
    pub fn with_default_rules() -> Self {
        Self::new(vec![
            Rule::command("start", Action::Reply(GREETING.to_string())),
            Rule::free_text(Action::Echo),
        ])
    }

    /// Only accept `/cmd@name` mentions addressed to this username.
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First matching rule and the text it would send.
    pub fn route(&self, update: &IncomingUpdate) -> Option<(usize, String)> {
        let bot_username = self.bot_username.as_deref();
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(update, bot_username))
            .and_then(|(index, rule)| rule.action().render(update).map(|text| (index, text)))
    }

    /// Run at most one action for the update. Send failures are returned to
    /// the caller unchanged.
    pub async fn dispatch(
        &self,
        update: &IncomingUpdate,
        sender: &dyn ReplySender,
    ) -> Result<Dispatched> {
        let Some(chat_id) = update.chat_id else {
            debug!("Update {} has no chat, ignoring", update.update_id);
            return Ok(Dispatched::Ignored);
        };

        let Some((index, reply)) = self.route(update) else {
            debug!("Update {} matched no rule", update.update_id);
            return Ok(Dispatched::Ignored);
        };

        info!(
            "Update {} matched {} in chat {}",
            update.update_id,
            self.rules[index].describe(),
            chat_id
        );
        sender.send_text(chat_id, &reply).await?;

        Ok(Dispatched::Replied { rule: index })
    }
}
