pub mod audible;
pub mod history_file;
pub mod telegram;
pub mod visual;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::enums::ChannelKind;
use crate::error::Result;
use crate::services::NotificationEvent;

pub use audible::AudibleChannel;
pub use history_file::HistoryFileChannel;
pub use telegram::TelegramChannel;
pub use visual::VisualChannel;
pub use webhook::WebhookChannel;

/// A best-effort delivery sink. Errors are reported to the dispatcher, which
/// logs them and carries on with the other channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(&self, event: &NotificationEvent) -> Result<()>;
}

/// Channel sinks by kind. One sink per kind; registering again replaces it.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: HashMap<ChannelKind, Arc<dyn NotificationChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>) {
        self.channels.insert(channel.kind(), channel);
    }

    pub fn with(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.register(channel);
        self
    }

    pub fn get(&self, kind: ChannelKind) -> Option<&Arc<dyn NotificationChannel>> {
        self.channels.get(&kind)
    }

    pub fn kinds(&self) -> Vec<ChannelKind> {
        ChannelKind::all()
            .iter()
            .copied()
            .filter(|k| self.channels.contains_key(k))
            .collect()
    }
}
