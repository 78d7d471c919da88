use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::channels::NotificationChannel;
use crate::enums::ChannelKind;
use crate::error::Result;
use crate::services::NotificationEvent;

/// Appends every dispatched event to a JSON-lines archive. Unlike the
/// in-memory history store this log is never capped.
pub struct HistoryFileChannel {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryFileChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }
}

#[async_trait]
impl NotificationChannel for HistoryFileChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::History
    }

    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions
            ::new()
            .create(true)
            .append(true)
            .open(&self.path).await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::history::tests::event;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifications.jsonl");
        let channel = HistoryFileChannel::new(&path);

        let first = event(Uuid::new_v4(), "bitcoin", Utc::now());
        let second = event(Uuid::new_v4(), "ethereum", Utc::now());
        channel.send(&first).await.unwrap();
        channel.send(&second).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<NotificationEvent> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, vec![first, second]);
    }
}
