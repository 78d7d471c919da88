use axum::{ extract::{ Path, Query, State }, http::StatusCode, Json };
use serde::Deserialize;
use uuid::Uuid;

use crate::enums::{ AlertKind, ChannelKind, LogicalOperator, Priority, TimeWindow };
use crate::error::Result;
use crate::rules::{ AlertRule, Condition };

use super::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListRulesQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub user_id: String,
    pub name: String,
    pub kind: AlertKind,
    pub asset_id: String,
    #[serde(default)]
    pub asset_name: Option<String>,
    #[serde(default)]
    pub asset_symbol: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub logical_operator: Option<LogicalOperator>,
    #[serde(default)]
    pub time_window: TimeWindow,
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub channels: Option<Vec<ChannelKind>>,
    #[serde(default)]
    pub custom_message: Option<String>,
}

impl CreateRuleRequest {
    pub fn into_rule(self) -> AlertRule {
        let mut rule = AlertRule::new(self.user_id, self.name, self.kind, self.asset_id)
            .with_window(self.time_window)
            .with_cooldown(self.cooldown_secs)
            .with_priority(self.priority);

        let name = self.asset_name.unwrap_or_else(|| rule.asset_name.clone());
        let symbol = self.asset_symbol.unwrap_or_else(|| rule.asset_symbol.clone());
        rule = rule.with_asset_display(name, symbol);

        rule.conditions = self.conditions;
        rule.logical_operator = self.logical_operator;
        if let Some(channels) = self.channels {
            rule.channels = channels;
        }
        rule.custom_message = self.custom_message;
        rule
    }
}

pub async fn list_rules(
    State(state): State<AppState>,
    Query(query): Query<ListRulesQuery>
) -> Result<Json<Vec<AlertRule>>> {
    let mut rules = state.repository.list_rules().await?;
    if let Some(user_id) = query.user_id {
        rules.retain(|r| r.user_id == user_id);
    }
    Ok(Json(rules))
}

pub async fn create_rule(
    State(state): State<AppState>,
    Json(request): Json<CreateRuleRequest>
) -> Result<(StatusCode, Json<AlertRule>)> {
    let rule = state.repository.create_rule(request.into_rule()).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>
) -> Result<Json<AlertRule>> {
    Ok(Json(state.repository.get_rule(id).await?))
}

pub async fn delete_rule(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    state.repository.delete_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pause_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>
) -> Result<Json<AlertRule>> {
    Ok(Json(state.repository.set_paused(id, true).await?))
}

pub async fn resume_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>
) -> Result<Json<AlertRule>> {
    Ok(Json(state.repository.set_paused(id, false).await?))
}

pub async fn reset_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>
) -> Result<Json<AlertRule>> {
    Ok(Json(state.repository.reset_rule(id).await?))
}
