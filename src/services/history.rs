use std::collections::VecDeque;
use std::path::Path;

use chrono::{ DateTime, Duration, Utc };
use serde::{ Deserialize, Serialize };
use uuid::Uuid;

use crate::enums::{ AlertKind, Priority };
use crate::error::Result;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// A dispatched notification. Owned by the history store once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub asset_id: String,
    pub symbol: String,
    pub kind: AlertKind,
    pub fired_at: DateTime<Utc>,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub current_value: f64,
    pub percent_change: Option<f64>,
    pub group_count: u32,
    pub grouped: bool,
    pub read: bool,
    pub require_interaction: bool,
}

impl NotificationEvent {
    /// Fold another firing of the same rule and asset into this event.
    pub fn record_repeat(&mut self, now: DateTime<Utc>, current_value: f64) {
        self.group_count = self.group_count.saturating_add(1);
        self.grouped = true;
        self.fired_at = now;
        self.current_value = current_value;
        self.read = false;
    }

    pub fn is_live(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.fired_at < window
    }
}

/// Bounded, newest-first notification log with read state.
#[derive(Debug, Clone)]
pub struct NotificationHistoryStore {
    events: VecDeque<NotificationEvent>,
    capacity: usize,
}

impl NotificationHistoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Insert at the head, evicting from the tail past capacity.
    /// Returns the evicted events, oldest last.
    pub fn push(&mut self, event: NotificationEvent) -> Vec<NotificationEvent> {
        self.events.push_front(event);
        let mut evicted = Vec::new();
        while self.events.len() > self.capacity {
            if let Some(old) = self.events.pop_back() {
                evicted.push(old);
            }
        }
        evicted
    }

    /// Events newest first.
    pub fn events(&self) -> impl Iterator<Item = &NotificationEvent> {
        self.events.iter()
    }

    pub fn to_vec(&self) -> Vec<NotificationEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn get(&self, id: Uuid) -> Option<&NotificationEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    /// The event still inside the grouping window for this rule and asset, if any.
    pub fn find_live_mut(
        &mut self,
        rule_id: Uuid,
        asset_id: &str,
        now: DateTime<Utc>,
        window: Duration
    ) -> Option<&mut NotificationEvent> {
        self.events
            .iter_mut()
            .find(|e| e.rule_id == rule_id && e.asset_id == asset_id && e.is_live(now, window))
    }

    pub fn mark_as_read(&mut self, id: Uuid) -> bool {
        match self.events.iter_mut().find(|e| e.id == id) {
            Some(event) => {
                event.read = true;
                true
            }
            None => false,
        }
    }

    /// Returns how many events changed state.
    pub fn mark_all_as_read(&mut self) -> usize {
        let mut changed = 0;
        for event in self.events.iter_mut().filter(|e| !e.read) {
            event.read = true;
            changed += 1;
        }
        changed
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn unread_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| !e.read)
            .count()
    }

    /// Write the log as a JSON array, newest first.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.events)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Load a log written by [`save_to`](Self::save_to). A missing file yields
    /// an empty store; entries beyond `capacity` are dropped from the tail.
    pub async fn load_from(path: &Path, capacity: usize) -> Result<Self> {
        let mut store = Self::new(capacity);
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(store);
            }
            Err(e) => {
                return Err(e.into());
            }
        };

        let events: Vec<NotificationEvent> = serde_json::from_slice(&bytes)?;
        store.events = events.into_iter().take(store.capacity).collect();
        Ok(store)
    }
}

impl Default for NotificationHistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
