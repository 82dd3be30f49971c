use crate::calendar::TradingCalendar;
use crate::db::JournalDb;
use crate::error::Result;
use crate::evaluator::{HoldingAlert, StrategyEvaluator};
use crate::holdings::HoldingsManager;
use crate::models::Holding;
use crate::prices::PriceBook;
use crate::strategies::{StrategyManager, TradingStrategy};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertReport {
    pub as_of: NaiveDate,
    pub strategies_evaluated: usize,
    pub holdings_evaluated: usize,
    /// Holdings skipped for lack of a cached price
    pub unpriced: Vec<String>,
    pub alerts: Vec<HoldingAlert>,
}

/// Joins open holdings, cached prices and strategies, then runs the
/// evaluator on demand. Nothing is persisted.
pub struct AlertService {
    holdings: HoldingsManager,
    prices: PriceBook,
    strategies: StrategyManager,
}

impl AlertService {
    pub fn new(db: JournalDb, calendar: Arc<TradingCalendar>) -> Self {
        Self {
            holdings: HoldingsManager::new(db.clone(), calendar),
            prices: PriceBook::new(db.clone(), None),
            strategies: StrategyManager::new(db),
        }
    }

    /// Open holdings with the latest cached close on or before `as_of`
    pub async fn priced_holdings(&self, as_of: NaiveDate) -> Result<Vec<Holding>> {
        let holdings = self.holdings.get_holdings(as_of).await?;
        let codes: Vec<String> = holdings.iter().map(|h| h.stock_code.clone()).collect();
        let prices = self.prices.latest_prices(&codes, as_of).await?;

        Ok(holdings
            .into_iter()
            .map(|h| {
                let price = prices.get(&h.stock_code).copied();
                h.with_price(price)
            })
            .collect())
    }

    /// Evaluate every active strategy
    pub async fn evaluate_active(&self, as_of: NaiveDate) -> Result<AlertReport> {
        let strategies = self.strategies.list_strategies(true).await?;
        self.run(as_of, &strategies).await
    }

    /// Evaluate one strategy; an inactive one yields an empty report
    pub async fn evaluate_strategy(&self, strategy_id: i64, as_of: NaiveDate) -> Result<AlertReport> {
        let strategy = self.strategies.get_strategy(strategy_id).await?;
        self.run(as_of, std::slice::from_ref(&strategy)).await
    }

    async fn run(&self, as_of: NaiveDate, strategies: &[TradingStrategy]) -> Result<AlertReport> {
        let holdings = self.priced_holdings(as_of).await?;
        Ok(build_report(as_of, &holdings, strategies))
    }
}

/// Only holdings the evaluator can compute a ratio for count as evaluated
fn build_report(as_of: NaiveDate, holdings: &[Holding], strategies: &[TradingStrategy]) -> AlertReport {
    let unpriced: Vec<String> = holdings
        .iter()
        .filter(|h| h.current_price.is_none())
        .map(|h| h.stock_code.clone())
        .collect();
    let evaluable = holdings
        .iter()
        .filter(|h| StrategyEvaluator::ratio_inputs(h).is_some())
        .count();

    let alerts = StrategyEvaluator::evaluate(holdings, strategies);
    let active = strategies.iter().filter(|s| s.is_active).count();

    tracing::debug!(
        "Evaluated {} of {} holdings against {} strategies: {} alerts, {} unpriced",
        evaluable,
        holdings.len(),
        active,
        alerts.len(),
        unpriced.len()
    );

    AlertReport {
        as_of,
        strategies_evaluated: active,
        holdings_evaluated: evaluable,
        unpriced,
        alerts,
    }
}
