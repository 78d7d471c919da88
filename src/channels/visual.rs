use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::channels::NotificationChannel;
use crate::enums::{ ChannelKind, Priority };
use crate::error::Result;
use crate::services::NotificationEvent;

const FEED_CAPACITY: usize = 64;

/// On-screen toast. Logged through `tracing` and published on a broadcast
/// feed that attached UIs can subscribe to.
pub struct VisualChannel {
    feed: broadcast::Sender<NotificationEvent>,
}

impl VisualChannel {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self { feed }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.feed.subscribe()
    }
}

impl Default for VisualChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationChannel for VisualChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Visual
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        match event.priority {
            Priority::Critical | Priority::High => {
                tracing::warn!(event_id = %event.id, symbol = %event.symbol, sticky = event.require_interaction, "{}", event.title);
            }
            Priority::Medium | Priority::Low => {
                tracing::info!(event_id = %event.id, symbol = %event.symbol, "{}", event.title);
            }
        }

        // No subscribers is fine; the toast was still logged.
        let _ = self.feed.send(event.clone());
        Ok(())
    }
}
