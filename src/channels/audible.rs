use async_trait::async_trait;
use tokio::io::{ AsyncWrite, AsyncWriteExt };
use tokio::sync::Mutex;

use crate::channels::NotificationChannel;
use crate::enums::ChannelKind;
use crate::error::Result;
use crate::services::NotificationEvent;

const BEL: u8 = 0x07;

type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Plays the priority's beep pattern as terminal bells.
pub struct AudibleChannel {
    out: Mutex<Output>,
}

impl AudibleChannel {
    pub fn new(out: Output) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(tokio::io::stdout()))
    }
}

#[async_trait]
impl NotificationChannel for AudibleChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Audible
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let pattern = event.priority.sound_pattern();
        let beeps = vec![BEL; pattern.beeps as usize];

        let mut out = self.out.lock().await;
        out.write_all(&beeps).await?;
        out.flush().await?;

        tracing::debug!(
            event_id = %event.id,
            beeps = pattern.beeps,
            frequency_hz = pattern.frequency_hz,
            duration_ms = pattern.duration_ms,
            "Played alert sound"
        );
        Ok(())
    }
}
