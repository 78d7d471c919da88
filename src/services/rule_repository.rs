use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ AppError, Result };
use crate::rules::AlertRule;

/// Rule storage consumed by the checker. The engine reads rules at cycle start
/// and writes back only firing state afterwards.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// All rules in insertion order.
    async fn list_rules(&self) -> Result<Vec<AlertRule>>;

    async fn get_rule(&self, id: Uuid) -> Result<AlertRule>;

    /// Validate and store a new rule.
    async fn create_rule(&self, rule: AlertRule) -> Result<AlertRule>;

    /// Replace an existing rule's configuration.
    async fn update_rule(&self, rule: AlertRule) -> Result<AlertRule>;

    async fn delete_rule(&self, id: Uuid) -> Result<()>;

    async fn set_paused(&self, id: Uuid, paused: bool) -> Result<AlertRule>;

    /// Clear trigger count and last-triggered time.
    async fn reset_rule(&self, id: Uuid) -> Result<AlertRule>;

    /// Persist `trigger_count`/`last_triggered_at` of rules that fired. Other
    /// fields in storage are left alone; rules deleted meanwhile are ignored.
    async fn record_triggers(&self, fired: &[AlertRule]) -> Result<()>;
}

/// Rules kept in memory, optionally mirrored to a JSON file that is rewritten
/// after every mutation.
pub struct InMemoryRuleRepository {
    rules: RwLock<Vec<AlertRule>>,
    path: Option<PathBuf>,
}

impl InMemoryRuleRepository {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// Load rules from `path` (if it exists) and keep the file in sync.
    pub async fn with_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let rules = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<AlertRule>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e.into());
            }
        };

        tracing::info!(path = %path.display(), count = rules.len(), "Loaded alert rules");
        Ok(Self {
            rules: RwLock::new(rules),
            path: Some(path),
        })
    }

    async fn persist(&self, rules: &[AlertRule]) -> Result<()> {
        if let Some(path) = &self.path {
            let json = serde_json::to_vec_pretty(rules)?;
            tokio::fs::write(path, json).await?;
        }
        Ok(())
    }

    /// Persists `next` and only then swaps it in, so a failed write leaves
    /// the in-memory rules untouched.
    async fn commit(&self, rules: &mut Vec<AlertRule>, next: Vec<AlertRule>) -> Result<()> {
        self.persist(&next).await?;
        *rules = next;
        Ok(())
    }

    async fn modify<F>(&self, id: Uuid, change: F) -> Result<AlertRule>
        where F: FnOnce(&mut AlertRule) + Send
    {
        let mut rules = self.rules.write().await;
        let mut next = rules.clone();
        let rule = next
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(AppError::RuleNotFound)?;
        change(rule);
        let updated = rule.clone();
        self.commit(&mut rules, next).await?;
        Ok(updated)
    }
}

impl Default for InMemoryRuleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn list_rules(&self) -> Result<Vec<AlertRule>> {
        Ok(self.rules.read().await.clone())
    }

    async fn get_rule(&self, id: Uuid) -> Result<AlertRule> {
        self.rules
            .read().await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(AppError::RuleNotFound)
    }

    async fn create_rule(&self, rule: AlertRule) -> Result<AlertRule> {
        rule.validate()?;

        let mut rules = self.rules.write().await;
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(AppError::InvalidInput(format!("Rule {} already exists", rule.id)));
        }
        let mut next = rules.clone();
        next.push(rule.clone());
        self.commit(&mut rules, next).await?;

        tracing::info!(rule_id = %rule.id, kind = %rule.kind, asset = %rule.asset_id, "Created alert rule");
        Ok(rule)
    }

    async fn update_rule(&self, rule: AlertRule) -> Result<AlertRule> {
        rule.validate()?;
        let mut rules = self.rules.write().await;
        let mut next = rules.clone();
        let slot = next
            .iter_mut()
            .find(|r| r.id == rule.id)
            .ok_or(AppError::RuleNotFound)?;
        *slot = rule.clone();
        self.commit(&mut rules, next).await?;
        Ok(rule)
    }

    async fn delete_rule(&self, id: Uuid) -> Result<()> {
        let mut rules = self.rules.write().await;
        let mut next = rules.clone();
        next.retain(|r| r.id != id);
        if next.len() == rules.len() {
            return Err(AppError::RuleNotFound);
        }
        self.commit(&mut rules, next).await?;
        tracing::info!(rule_id = %id, "Deleted alert rule");
        Ok(())
    }

    async fn set_paused(&self, id: Uuid, paused: bool) -> Result<AlertRule> {
        self.modify(id, |rule| {
            if paused { rule.pause() } else { rule.resume() }
        }).await
    }

    async fn reset_rule(&self, id: Uuid) -> Result<AlertRule> {
        self.modify(id, AlertRule::reset).await
    }

    async fn record_triggers(&self, fired: &[AlertRule]) -> Result<()> {
        if fired.is_empty() {
            return Ok(());
        }

        let mut rules = self.rules.write().await;
        let mut next = rules.clone();
        for update in fired {
            match next.iter_mut().find(|r| r.id == update.id) {
                // Counted on top of whatever the API did to the rule meanwhile.
                Some(stored) => {
                    if let Some(at) = update.last_triggered_at() {
                        stored.trigger_at(at);
                    }
                }
                None => {
                    tracing::debug!(rule_id = %update.id, "Fired rule was deleted during the cycle");
                }
            }
        }
        self.commit(&mut rules, next).await
    }
}
