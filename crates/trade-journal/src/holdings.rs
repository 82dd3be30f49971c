use crate::calendar::TradingCalendar;
use crate::db::JournalDb;
use crate::error::{JournalError, Result};
use crate::models::*;
use chrono::NaiveDate;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Running position for one stock while replaying trades.
#[derive(Debug, Clone)]
pub struct PositionState {
    pub stock_code: String,
    pub stock_name: Option<String>,
    pub quantity: i64,
    pub cost: Decimal,
    pub first_buy_date: Option<NaiveDate>,
}

impl PositionState {
    fn new(stock_code: &str) -> Self {
        Self {
            stock_code: stock_code.to_string(),
            stock_name: None,
            quantity: 0,
            cost: Decimal::ZERO,
            first_buy_date: None,
        }
    }

    pub fn avg_price(&self) -> Decimal {
        if self.quantity > 0 {
            self.cost / Decimal::from(self.quantity)
        } else {
            Decimal::ZERO
        }
    }
}

/// Profit or loss booked by one sell, against the average cost at the time.
#[derive(Debug, Clone)]
pub struct RealizedSell {
    pub trade_id: i64,
    pub stock_code: String,
    pub quantity: i64,
    pub pnl: Decimal,
}

/// Replay trades with the moving-average cost method.
///
/// `trades` must be ordered by (trade_date, id) and must not contain
/// corrected records. Positions that go flat are reset, so a later buy starts
/// a fresh holding period.
pub fn replay_trades(trades: &[TradeRecord]) -> (BTreeMap<String, PositionState>, Vec<RealizedSell>) {
    let mut positions: BTreeMap<String, PositionState> = BTreeMap::new();
    let mut realized = Vec::new();

    for trade in trades {
        let state = positions
            .entry(trade.stock_code.clone())
            .or_insert_with(|| PositionState::new(&trade.stock_code));
        if trade.stock_name.is_some() {
            state.stock_name = trade.stock_name.clone();
        }
        let price = Decimal::from_f64(trade.price).unwrap_or_default();

        match trade.trade_type {
            TradeType::Buy => {
                if state.quantity == 0 {
                    state.first_buy_date = Some(trade.trade_date);
                    state.cost = Decimal::ZERO;
                }
                state.quantity += trade.quantity;
                state.cost += price * Decimal::from(trade.quantity);
            }
            TradeType::Sell => {
                let matched = trade.quantity.min(state.quantity);
                if matched == 0 {
                    continue;
                }
                let avg = state.avg_price();
                realized.push(RealizedSell {
                    trade_id: trade.id,
                    stock_code: trade.stock_code.clone(),
                    quantity: matched,
                    pnl: (price - avg) * Decimal::from(matched),
                });

                state.cost -= avg * Decimal::from(matched);
                state.quantity -= matched;
                if state.quantity == 0 {
                    state.cost = Decimal::ZERO;
                    state.first_buy_date = None;
                }
            }
        }
    }

    (positions, realized)
}

impl Holding {
    /// Attach a current price and derive market value and P&L
    pub fn with_price(mut self, price: Option<f64>) -> Self {
        self.current_price = price;
        match price {
            Some(p) if p > 0.0 => {
                let market_value = p * self.quantity as f64;
                let profit_loss = market_value - self.total_cost;
                self.market_value = Some(market_value);
                self.profit_loss = Some(profit_loss);
                self.profit_loss_ratio = if self.avg_buy_price > 0.0 {
                    Some((p - self.avg_buy_price) / self.avg_buy_price)
                } else {
                    None
                };
            }
            _ => {
                self.market_value = None;
                self.profit_loss = None;
                self.profit_loss_ratio = None;
            }
        }
        self
    }
}

pub struct HoldingsManager {
    db: JournalDb,
    calendar: Arc<TradingCalendar>,
}

impl HoldingsManager {
    pub fn new(db: JournalDb, calendar: Arc<TradingCalendar>) -> Self {
        Self { db, calendar }
    }

    /// Open positions as of `as_of`, without prices
    pub async fn get_holdings(&self, as_of: NaiveDate) -> Result<Vec<Holding>> {
        let trades = sqlx::query_as::<_, TradeRecord>(
            r#"
            SELECT * FROM trade_records
            WHERE is_corrected = 0 AND trade_date <= ?
            ORDER BY trade_date, id
            "#,
        )
        .bind(as_of)
        .fetch_all(self.db.pool())
        .await?;

        let (positions, _) = replay_trades(&trades);

        Ok(positions
            .into_values()
            .filter(|p| p.quantity > 0)
            .filter_map(|p| self.to_holding(p, as_of))
            .collect())
    }

    /// A single open position
    pub async fn get_holding(&self, stock_code: &str, as_of: NaiveDate) -> Result<Holding> {
        self.find_holding(stock_code, as_of)
            .await?
            .ok_or_else(|| JournalError::not_found("Holding", stock_code))
    }

    pub async fn find_holding(&self, stock_code: &str, as_of: NaiveDate) -> Result<Option<Holding>> {
        Ok(self
            .get_holdings(as_of)
            .await?
            .into_iter()
            .find(|h| h.stock_code == stock_code))
    }

    /// Holdings with prices attached from `prices`; codes missing from the
    /// map keep `current_price = None`.
    pub async fn get_summary(
        &self,
        as_of: NaiveDate,
        prices: &HashMap<String, f64>,
    ) -> Result<HoldingsSummary> {
        let holdings = self
            .get_holdings(as_of)
            .await?
            .into_iter()
            .map(|h| {
                let price = prices.get(&h.stock_code).copied();
                h.with_price(price)
            })
            .collect();

        Ok(summarize(holdings))
    }

    fn to_holding(&self, state: PositionState, as_of: NaiveDate) -> Option<Holding> {
        let first_buy_date = state.first_buy_date?;
        let avg = state.avg_price();

        Some(Holding {
            holding_days: self.calendar.trading_days_between(first_buy_date, as_of),
            stock_code: state.stock_code,
            stock_name: state.stock_name,
            quantity: state.quantity,
            avg_buy_price: avg.to_f64().unwrap_or(0.0),
            total_cost: state.cost.round_dp(2).to_f64().unwrap_or(0.0),
            first_buy_date,
            current_price: None,
            market_value: None,
            profit_loss: None,
            profit_loss_ratio: None,
        })
    }
}

pub fn summarize(holdings: Vec<Holding>) -> HoldingsSummary {
    let mut total_cost = Decimal::ZERO;
    let mut total_market_value = Decimal::ZERO;

    for h in &holdings {
        let cost = Decimal::from_f64(h.total_cost).unwrap_or_default();
        total_cost += cost;
        // Unpriced holdings are carried at cost
        total_market_value += h
            .market_value
            .and_then(Decimal::from_f64)
            .unwrap_or(cost);
    }

    HoldingsSummary {
        total_positions: holdings.len(),
        total_cost: total_cost.round_dp(2).to_f64().unwrap_or(0.0),
        total_market_value: total_market_value.round_dp(2).to_f64().unwrap_or(0.0),
        total_profit_loss: (total_market_value - total_cost).round_dp(2).to_f64().unwrap_or(0.0),
        holdings,
    }
}
