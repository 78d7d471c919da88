use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::channels::NotificationChannel;
use crate::enums::{ ChannelKind, Priority };
use crate::error::{ AppError, Result };
use crate::services::NotificationEvent;

/// Body posted to the system notification webhook.
#[derive(Debug, Serialize)]
pub struct SystemNotification<'a> {
    pub id: String,
    pub title: &'a str,
    pub body: &'a str,
    pub priority: Priority,
    pub require_interaction: bool,
    pub tag: String,
}

impl<'a> SystemNotification<'a> {
    pub fn from_event(event: &'a NotificationEvent) -> Self {
        Self {
            id: event.id.to_string(),
            title: &event.title,
            body: &event.message,
            priority: event.priority,
            require_interaction: event.require_interaction,
            // Same tag per rule and asset so the OS replaces rather than stacks.
            tag: format!("{}:{}", event.rule_id, event.asset_id),
        }
    }
}

/// Desktop/system notification, delivered by POSTing JSON to a local
/// notification bridge.
pub struct WebhookChannel {
    client: Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build webhook client: {}", e)))?;

        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::System
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let response = self.client
            .post(&self.url)
            .json(&SystemNotification::from_event(event))
            .send().await
            .map_err(|e| AppError::ChannelDelivery(format!("system webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(
                AppError::ChannelDelivery(format!("system webhook returned {}", response.status()))
            );
        }
        Ok(())
    }
}
