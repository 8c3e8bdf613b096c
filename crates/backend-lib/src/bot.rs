// ============================
// crates/backend-lib/src/bot.rs
// ============================
//! Replies for direct messages addressed to the reserved bot user.
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};

#[async_trait]
pub trait BotResponder: Send + Sync {
    /// Reply to `content` sent by `user_id`; `None` sends nothing back.
    async fn respond(&self, user_id: &str, content: &str) -> Option<String>;
}

const HELP_TEXT: &str = "Commands: /help, /ping, /time. Anything else is echoed back.";

/// Answers a few slash commands and echoes everything else
#[derive(Debug, Default, Clone, Copy)]
pub struct HelpBot;

#[async_trait]
impl BotResponder for HelpBot {
    async fn respond(&self, _user_id: &str, content: &str) -> Option<String> {
        let text = content.trim();
        let reply = match text.split_whitespace().next() {
            Some("/help") => HELP_TEXT.to_string(),
            Some("/ping") => "pong".to_string(),
            Some("/time") => Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            Some(cmd) if cmd.starts_with('/') => format!("Unknown command {cmd}. {HELP_TEXT}"),
            Some(_) => format!("You said: {text}"),
            None => "I can only read text for now.".to_string(),
        };
        Some(reply)
    }
}
