use async_trait::async_trait;
use teloxide::prelude::*;

use crate::channels::NotificationChannel;
use crate::enums::ChannelKind;
use crate::error::{ AppError, Result };
use crate::services::NotificationEvent;

/// Forwards notifications to a Telegram chat.
pub struct TelegramChannel {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramChannel {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self { bot, chat_id: ChatId(chat_id) }
    }

    pub fn from_token(token: impl Into<String>, chat_id: i64) -> Self {
        Self::new(Bot::new(token), chat_id)
    }
}

pub fn format_message(event: &NotificationEvent) -> String {
    format!("{}\n\n{}", event.title, event.message)
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        self.bot
            .send_message(self.chat_id, format_message(event)).await
            .map_err(|e| AppError::ChannelDelivery(format!("telegram: {}", e)))?;
        Ok(())
    }
}
