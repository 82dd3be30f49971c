//! Holding-alert strategies: rule schema, validation and persistence.

use crate::db::JournalDb;
use crate::error::{JournalError, Result};
use crate::models::PositionAction;
use crate::validation::{clean_optional, require_non_blank};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tolerance for threshold comparisons so that inclusive boundaries survive
/// floating-point noise in the profit/loss ratio.
pub const RATIO_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    /// ratio <= loss_threshold
    LossExceed,
    /// ratio < profit_threshold
    ProfitBelow,
    /// ratio >= profit_threshold
    ProfitExceed,
    /// ratio < profit_threshold, or ratio <= -drawdown_threshold
    ProfitBelowOrDrawdown,
}

impl RuleCondition {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "loss_exceed" => Some(Self::LossExceed),
            "profit_below" => Some(Self::ProfitBelow),
            "profit_exceed" => Some(Self::ProfitExceed),
            "profit_below_or_drawdown" => Some(Self::ProfitBelowOrDrawdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRule {
    /// Inclusive `[lo, hi]` holding-day window
    pub day_range: [i64; 2],
    pub condition: RuleCondition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profit_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawdown_threshold: Option<f64>,
    pub action: PositionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sell_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StrategyRule {
    pub fn applies_to(&self, holding_days: i64) -> bool {
        let [lo, hi] = self.day_range;
        lo <= holding_days && holding_days <= hi
    }

    /// Whether the condition fires for the given profit/loss ratio.
    /// A threshold the condition needs but the rule lacks never fires.
    pub fn matches(&self, ratio: f64) -> bool {
        match self.condition {
            RuleCondition::LossExceed => self
                .loss_threshold
                .map_or(false, |t| ratio <= t + RATIO_EPSILON),
            RuleCondition::ProfitBelow => self
                .profit_threshold
                .map_or(false, |t| ratio < t - RATIO_EPSILON),
            RuleCondition::ProfitExceed => self
                .profit_threshold
                .map_or(false, |t| ratio >= t - RATIO_EPSILON),
            RuleCondition::ProfitBelowOrDrawdown => {
                let below = self
                    .profit_threshold
                    .map_or(false, |t| ratio < t - RATIO_EPSILON);
                let drawdown = self
                    .drawdown_threshold
                    .map_or(false, |d| ratio <= -d + RATIO_EPSILON);
                below || drawdown
            }
        }
    }

    /// The stored description, or one generated from the rule itself
    pub fn describe(&self) -> String {
        if let Some(desc) = &self.description {
            return desc.clone();
        }
        let [lo, hi] = self.day_range;
        let pct = |v: Option<f64>| format!("{:.1}%", v.unwrap_or(0.0) * 100.0);
        let condition = match self.condition {
            RuleCondition::LossExceed => format!("loss reaches {}", pct(self.loss_threshold)),
            RuleCondition::ProfitBelow => format!("profit below {}", pct(self.profit_threshold)),
            RuleCondition::ProfitExceed => format!("profit reaches {}", pct(self.profit_threshold)),
            RuleCondition::ProfitBelowOrDrawdown => format!(
                "profit below {} or drawdown of {}",
                pct(self.profit_threshold),
                pct(self.drawdown_threshold)
            ),
        };
        format!("day {}-{}: {} -> {}", lo, hi, condition, self.action.as_str())
    }
}

/// Validate raw JSON rules and convert them. Errors name the offending
/// field as `rules[i].field`.
pub fn parse_rules(values: &[Value]) -> Result<Vec<StrategyRule>> {
    if values.is_empty() {
        return Err(JournalError::validation("rules", "at least one rule is required"));
    }
    values
        .iter()
        .enumerate()
        .map(|(i, value)| parse_rule(i, value))
        .collect()
}

fn parse_rule(index: usize, value: &Value) -> Result<StrategyRule> {
    let field = |name: &str| format!("rules[{}].{}", index, name);
    let obj = value
        .as_object()
        .ok_or_else(|| JournalError::validation(format!("rules[{}]", index), "must be an object"))?;

    let day_range = parse_day_range(obj).map_err(|msg| JournalError::validation(field("day_range"), msg))?;

    let condition = match obj.get("condition") {
        None | Some(Value::Null) => return Err(JournalError::validation(field("condition"), "is required")),
        Some(v) => v.as_str().and_then(RuleCondition::parse).ok_or_else(|| {
            JournalError::validation(
                field("condition"),
                "must be one of loss_exceed, profit_below, profit_exceed, profit_below_or_drawdown",
            )
        })?,
    };

    let action = match obj.get("action") {
        None | Some(Value::Null) => return Err(JournalError::validation(field("action"), "is required")),
        Some(v) => v.as_str().and_then(PositionAction::parse).ok_or_else(|| {
            JournalError::validation(field("action"), "must be one of hold, sell_all, sell_partial")
        })?,
    };

    let number = |name: &str| -> Result<Option<f64>> {
        match obj.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_f64()
                .filter(|n| n.is_finite())
                .map(Some)
                .ok_or_else(|| JournalError::validation(field(name), "must be a number")),
        }
    };

    let loss_threshold = number("loss_threshold")?;
    let profit_threshold = number("profit_threshold")?;
    let drawdown_threshold = number("drawdown_threshold")?;

    let require = |name: &str, v: Option<f64>| -> Result<f64> {
        v.ok_or_else(|| JournalError::validation(field(name), "is required by this condition"))
    };
    match condition {
        RuleCondition::LossExceed => {
            if require("loss_threshold", loss_threshold)? >= 0.0 {
                return Err(JournalError::validation(field("loss_threshold"), "must be negative"));
            }
        }
        RuleCondition::ProfitBelow | RuleCondition::ProfitExceed => {
            require("profit_threshold", profit_threshold)?;
        }
        RuleCondition::ProfitBelowOrDrawdown => {
            require("profit_threshold", profit_threshold)?;
            if require("drawdown_threshold", drawdown_threshold)? <= 0.0 {
                return Err(JournalError::validation(field("drawdown_threshold"), "must be positive"));
            }
        }
    }

    let sell_ratio = if action == PositionAction::SellPartial {
        let ratio = number("sell_ratio")?
            .ok_or_else(|| JournalError::validation(field("sell_ratio"), "is required for sell_partial"))?;
        if ratio <= 0.0 || ratio > 1.0 {
            return Err(JournalError::validation(field("sell_ratio"), "must be in (0, 1]"));
        }
        Some(ratio)
    } else {
        None
    };

    let description = match obj.get("description") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => clean_optional(Some(s.clone())),
        Some(_) => return Err(JournalError::validation(field("description"), "must be a string")),
    };

    Ok(StrategyRule {
        day_range,
        condition,
        loss_threshold,
        profit_threshold,
        drawdown_threshold,
        action,
        sell_ratio,
        description,
    })
}

fn parse_day_range(obj: &Map<String, Value>) -> std::result::Result<[i64; 2], String> {
    let arr = match obj.get("day_range") {
        None | Some(Value::Null) => return Err("is required".to_string()),
        Some(Value::Array(arr)) => arr,
        Some(_) => return Err("must be an array [lo, hi]".to_string()),
    };
    if arr.len() != 2 {
        return Err(format!("must have exactly 2 elements, got {}", arr.len()));
    }
    let lo = arr[0].as_i64().ok_or("bounds must be integers")?;
    let hi = arr[1].as_i64().ok_or("bounds must be integers")?;
    if lo < 0 {
        return Err("lower bound must not be negative".to_string());
    }
    if lo > hi {
        return Err(format!("lower bound {} is greater than upper bound {}", lo, hi));
    }
    Ok([lo, hi])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingStrategy {
    pub id: i64,
    pub strategy_name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub rules: Vec<StrategyRule>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyInput {
    pub strategy_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    pub rules: Vec<Value>,
}

#[derive(Debug, sqlx::FromRow)]
struct StrategyRow {
    id: i64,
    strategy_name: String,
    description: Option<String>,
    is_active: bool,
    rules: String,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl TryFrom<StrategyRow> for TradingStrategy {
    type Error = JournalError;

    fn try_from(row: StrategyRow) -> Result<Self> {
        let rules = serde_json::from_str(&row.rules).map_err(|e| {
            JournalError::Internal(format!("stored rules of strategy {} are unreadable: {}", row.id, e))
        })?;
        Ok(Self {
            id: row.id,
            strategy_name: row.strategy_name,
            description: row.description,
            is_active: row.is_active,
            rules,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn map_unique_violation(e: sqlx::Error, name: &str) -> JournalError {
    match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => JournalError::validation(
            "strategy_name",
            format!("a strategy named '{}' already exists", name),
        ),
        _ => JournalError::Database(e),
    }
}

pub struct StrategyManager {
    db: JournalDb,
}

impl StrategyManager {
    pub fn new(db: JournalDb) -> Self {
        Self { db }
    }

    fn prepare(input: StrategyInput) -> Result<(String, Option<String>, String)> {
        require_non_blank("strategy_name", &input.strategy_name)?;
        let rules = parse_rules(&input.rules)?;
        let rules_json = serde_json::to_string(&rules)
            .map_err(|e| JournalError::Internal(format!("cannot encode rules: {}", e)))?;
        Ok((input.strategy_name.trim().to_string(), clean_optional(input.description), rules_json))
    }

    /// Create a strategy; rules are validated before anything is written
    pub async fn create_strategy(&self, input: StrategyInput) -> Result<TradingStrategy> {
        let is_active = input.is_active.unwrap_or(true);
        let (name, description, rules_json) = Self::prepare(input)?;

        let row = sqlx::query_as::<_, StrategyRow>(
            r#"
            INSERT INTO trading_strategies (strategy_name, description, is_active, rules)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&name)
        .bind(&description)
        .bind(is_active)
        .bind(&rules_json)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| map_unique_violation(e, &name))?;

        tracing::info!("Created strategy '{}' (id {})", row.strategy_name, row.id);
        row.try_into()
    }

    pub async fn get_strategy(&self, id: i64) -> Result<TradingStrategy> {
        sqlx::query_as::<_, StrategyRow>("SELECT * FROM trading_strategies WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| JournalError::not_found("Strategy", id))?
            .try_into()
    }

    pub async fn list_strategies(&self, active_only: bool) -> Result<Vec<TradingStrategy>> {
        let rows = if active_only {
            sqlx::query_as::<_, StrategyRow>(
                "SELECT * FROM trading_strategies WHERE is_active = 1 ORDER BY id",
            )
            .fetch_all(self.db.pool())
            .await?
        } else {
            sqlx::query_as::<_, StrategyRow>("SELECT * FROM trading_strategies ORDER BY id")
                .fetch_all(self.db.pool())
                .await?
        };

        rows.into_iter().map(TradingStrategy::try_from).collect()
    }

    pub async fn update_strategy(&self, id: i64, input: StrategyInput) -> Result<TradingStrategy> {
        let existing = self.get_strategy(id).await?;
        let is_active = input.is_active.unwrap_or(existing.is_active);
        let (name, description, rules_json) = Self::prepare(input)?;

        let row = sqlx::query_as::<_, StrategyRow>(
            r#"
            UPDATE trading_strategies
            SET strategy_name = ?, description = ?, is_active = ?, rules = ?, updated_at = datetime('now')
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&name)
        .bind(&description)
        .bind(is_active)
        .bind(&rules_json)
        .bind(id)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| map_unique_violation(e, &name))?;

        row.try_into()
    }

    pub async fn set_active(&self, id: i64, active: bool) -> Result<TradingStrategy> {
        let result = sqlx::query(
            "UPDATE trading_strategies SET is_active = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(active)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(JournalError::not_found("Strategy", id));
        }
        tracing::info!("Strategy {} {}", id, if active { "activated" } else { "deactivated" });
        self.get_strategy(id).await
    }

    pub async fn delete_strategy(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM trading_strategies WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(JournalError::not_found("Strategy", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_of(err: JournalError) -> String {
        match err {
            JournalError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    fn input(name: &str, rules: Vec<Value>) -> StrategyInput {
        StrategyInput {
            strategy_name: name.to_string(),
            description: Some("short-term".to_string()),
            is_active: None,
            rules,
        }
    }

    #[test]
    fn test_parse_valid_rules() {
        let rules = parse_rules(&[
            json!({"day_range": [1, 5], "condition": "loss_exceed", "loss_threshold": -0.05, "action": "sell_all"}),
            json!({"day_range": [1, 5], "condition": "profit_exceed", "profit_threshold": 0.10,
                   "action": "sell_partial", "sell_ratio": 0.5, "description": "take half"}),
            json!({"day_range": [6, 20], "condition": "profit_below_or_drawdown", "profit_threshold": 0.03,
                   "drawdown_threshold": 0.08, "action": "sell_all"}),
        ])
        .unwrap();

        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].condition, RuleCondition::LossExceed);
        assert_eq!(rules[1].sell_ratio, Some(0.5));
        assert_eq!(rules[1].describe(), "take half");
        assert_eq!(rules[2].day_range, [6, 20]);
    }

    #[test]
    fn test_rejects_malformed_rules() {
        let bad_shape = json!({"day_range": [1], "condition": "loss_exceed", "loss_threshold": -0.05, "action": "sell_all"});
        assert_eq!(field_of(parse_rules(&[bad_shape]).unwrap_err()), "rules[0].day_range");

        let reversed = json!({"day_range": [5, 1], "condition": "loss_exceed", "loss_threshold": -0.05, "action": "sell_all"});
        assert_eq!(field_of(parse_rules(&[reversed]).unwrap_err()), "rules[0].day_range");

        let bad_action = json!({"day_range": [1, 5], "condition": "loss_exceed", "loss_threshold": -0.05, "action": "buy_more"});
        assert_eq!(field_of(parse_rules(&[bad_action]).unwrap_err()), "rules[0].action");

        let no_ratio = json!({"day_range": [1, 5], "condition": "profit_exceed", "profit_threshold": 0.1, "action": "sell_partial"});
        let ok = json!({"day_range": [1, 5], "condition": "loss_exceed", "loss_threshold": -0.05, "action": "hold"});
        assert_eq!(field_of(parse_rules(&[ok, no_ratio]).unwrap_err()), "rules[1].sell_ratio");

        let missing_threshold = json!({"day_range": [1, 5], "condition": "profit_below", "action": "hold"});
        assert_eq!(field_of(parse_rules(&[missing_threshold]).unwrap_err()), "rules[0].profit_threshold");

        let missing_condition = json!({"day_range": [1, 5], "action": "hold"});
        assert_eq!(field_of(parse_rules(&[missing_condition]).unwrap_err()), "rules[0].condition");

        assert_eq!(field_of(parse_rules(&[json!("sell")]).unwrap_err()), "rules[0]");
        assert_eq!(field_of(parse_rules(&[]).unwrap_err()), "rules");
    }

    #[test]
    fn test_sell_ratio_dropped_for_full_exit() {
        let rules = parse_rules(&[json!({"day_range": [0, 3], "condition": "loss_exceed",
            "loss_threshold": -0.03, "action": "sell_all", "sell_ratio": 0.3})])
        .unwrap();
        assert_eq!(rules[0].sell_ratio, None);
    }

    #[test]
    fn test_stored_rules_round_trip_through_json() {
        let rules = parse_rules(&[json!({"day_range": [1, 5], "condition": "profit_exceed",
            "profit_threshold": 0.1, "action": "sell_partial", "sell_ratio": 0.5})])
        .unwrap();
        let stored = serde_json::to_string(&rules).unwrap();
        assert!(!stored.contains("loss_threshold"));
        let back: Vec<StrategyRule> = serde_json::from_str(&stored).unwrap();
        assert_eq!(back, rules);
    }

    #[tokio::test]
    async fn test_strategy_crud() {
        let db = JournalDb::new("sqlite::memory:").await.unwrap();
        let manager = StrategyManager::new(db);

        let rules = vec![json!({"day_range": [1, 5], "condition": "loss_exceed", "loss_threshold": -0.05, "action": "sell_all"})];
        let created = manager.create_strategy(input("Short swing", rules.clone())).await.unwrap();
        assert!(created.is_active);
        assert_eq!(created.rules.len(), 1);

        let dup = manager.create_strategy(input("Short swing", rules.clone())).await.unwrap_err();
        assert_eq!(field_of(dup), "strategy_name");

        let off = manager.set_active(created.id, false).await.unwrap();
        assert!(!off.is_active);
        assert!(manager.list_strategies(true).await.unwrap().is_empty());
        assert_eq!(manager.list_strategies(false).await.unwrap().len(), 1);

        // Update keeps the activation flag when not given
        let mut more = rules.clone();
        more.push(json!({"day_range": [6, 10], "condition": "profit_below", "profit_threshold": 0.02, "action": "sell_all"}));
        let updated = manager.update_strategy(created.id, input("Short swing v2", more)).await.unwrap();
        assert_eq!(updated.strategy_name, "Short swing v2");
        assert_eq!(updated.rules.len(), 2);
        assert!(!updated.is_active);

        // A failed validation leaves the stored strategy untouched
        let bad = vec![json!({"day_range": [1, 5], "condition": "loss_exceed", "action": "sell_all"})];
        assert!(manager.update_strategy(created.id, input("broken", bad)).await.is_err());
        assert_eq!(manager.get_strategy(created.id).await.unwrap().strategy_name, "Short swing v2");

        manager.delete_strategy(created.id).await.unwrap();
        assert!(matches!(manager.get_strategy(created.id).await, Err(JournalError::NotFound { .. })));
        assert!(matches!(manager.delete_strategy(created.id).await, Err(JournalError::NotFound { .. })));
    }
}
