use crate::models::{Holding, PositionAction};
use crate::strategies::{StrategyRule, TradingStrategy, RATIO_EPSILON};
use serde::{Deserialize, Serialize};

/// A suggested action for one holding under one strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingAlert {
    pub stock_code: String,
    pub stock_name: Option<String>,
    pub strategy_id: i64,
    pub strategy_name: String,
    pub holding_days: i64,
    pub quantity: i64,
    pub avg_buy_price: f64,
    pub current_price: f64,
    pub profit_loss_ratio: f64,
    pub profit_loss_amount: f64,
    pub alert_type: PositionAction,
    pub sell_ratio: Option<f64>,
    pub suggested_sell_quantity: i64,
    pub rule_index: usize,
    pub rule_description: String,
    pub message: String,
}

pub struct StrategyEvaluator;

impl StrategyEvaluator {
    /// Evaluate every holding against every active strategy. At most one
    /// alert per (holding, strategy) pair.
    pub fn evaluate(holdings: &[Holding], strategies: &[TradingStrategy]) -> Vec<HoldingAlert> {
        strategies
            .iter()
            .filter(|s| s.is_active)
            .flat_map(|s| holdings.iter().filter_map(move |h| Self::evaluate_holding(h, s)))
            .collect()
    }

    /// Current price and average cost, when both are usable for a ratio
    pub fn ratio_inputs(holding: &Holding) -> Option<(f64, f64)> {
        let current_price = holding.current_price.filter(|p| p.is_finite() && *p > 0.0)?;
        let avg = holding.avg_buy_price;
        if !avg.is_finite() || avg <= 0.0 {
            return None;
        }
        Some((current_price, avg))
    }

    /// First matching rule of `strategy` for `holding`, if any.
    ///
    /// Holdings without a usable current price or average cost produce no
    /// alert, and neither does an inactive strategy.
    pub fn evaluate_holding(holding: &Holding, strategy: &TradingStrategy) -> Option<HoldingAlert> {
        if !strategy.is_active {
            return None;
        }
        let (current_price, avg) = Self::ratio_inputs(holding)?;

        let ratio = (current_price - avg) / avg;

        let (index, rule) = strategy
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.applies_to(holding.holding_days) && rule.matches(ratio))?;

        let suggested = suggested_sell_quantity(holding.quantity, rule);
        let description = rule.describe();
        let name = holding.stock_name.as_deref().unwrap_or(&holding.stock_code);
        let message = match rule.action {
            PositionAction::Hold => format!(
                "{} ({}): day {}, P/L {:+.2}%, keep holding [{}]",
                name, holding.stock_code, holding.holding_days, ratio * 100.0, description
            ),
            PositionAction::SellAll => format!(
                "{} ({}): day {}, P/L {:+.2}%, sell all {} shares [{}]",
                name, holding.stock_code, holding.holding_days, ratio * 100.0, suggested, description
            ),
            PositionAction::SellPartial => format!(
                "{} ({}): day {}, P/L {:+.2}%, sell {:.0}% ({} shares) [{}]",
                name,
                holding.stock_code,
                holding.holding_days,
                ratio * 100.0,
                rule.sell_ratio.unwrap_or(0.0) * 100.0,
                suggested,
                description
            ),
        };

        Some(HoldingAlert {
            stock_code: holding.stock_code.clone(),
            stock_name: holding.stock_name.clone(),
            strategy_id: strategy.id,
            strategy_name: strategy.strategy_name.clone(),
            holding_days: holding.holding_days,
            quantity: holding.quantity,
            avg_buy_price: avg,
            current_price,
            profit_loss_ratio: ratio,
            profit_loss_amount: (current_price - avg) * holding.quantity as f64,
            alert_type: rule.action,
            sell_ratio: rule.sell_ratio,
            suggested_sell_quantity: suggested,
            rule_index: index,
            rule_description: description,
            message,
        })
    }
}

fn suggested_sell_quantity(quantity: i64, rule: &StrategyRule) -> i64 {
    match rule.action {
        PositionAction::Hold => 0,
        PositionAction::SellAll => quantity,
        PositionAction::SellPartial => {
            let ratio = rule.sell_ratio.unwrap_or(0.0);
            // floor, but 300 * 0.3 must stay 90
            ((quantity as f64 * ratio) + RATIO_EPSILON).floor() as i64
        }
    }
}
