use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tracing::info;

/// Delivers one article notification to the configured destination.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, title: &str, url: &str) -> Result<()>;
}

pub fn format_message(title: &str, url: &str) -> String {
    format!("Article updated\n- {}\n{}", title.trim(), url.trim())
}

#[derive(Clone)]
pub struct TelegramPublisher {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramPublisher {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self {
            bot,
            chat_id: ChatId(chat_id),
        }
    }
}

#[async_trait]
impl Publisher for TelegramPublisher {
    async fn publish(&self, title: &str, url: &str) -> Result<()> {
        self.bot
            .send_message(self.chat_id, format_message(title, url))
            .await
            .with_context(|| format!("failed to send message to chat {}", self.chat_id.0))?;
        info!(chat_id = self.chat_id.0, title, "article published");
        Ok(())
    }
}
