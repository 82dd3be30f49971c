//! CSV export of trades and reviews, and CSV import of trades.

use crate::error::{JournalError, Result};
use crate::models::{ReviewRecord, TradeInput, TradeRecord};
use serde::Serialize;

fn write_csv<T: Serialize>(rows: &[T]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| JournalError::Internal(format!("csv export failed: {}", e)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| JournalError::Internal(format!("csv export failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| JournalError::Internal(e.to_string()))
}

#[derive(Serialize)]
struct TradeCsvRow<'a> {
    id: i64,
    stock_code: &'a str,
    stock_name: Option<&'a str>,
    trade_type: &'static str,
    price: f64,
    quantity: i64,
    trade_date: String,
    reason: Option<&'a str>,
    notes: Option<&'a str>,
    stop_loss_price: Option<f64>,
    take_profit_ratio: Option<f64>,
    sell_ratio: Option<f64>,
    original_record_id: Option<i64>,
    is_corrected: bool,
}

pub fn trades_to_csv(trades: &[TradeRecord]) -> Result<String> {
    let rows: Vec<TradeCsvRow> = trades
        .iter()
        .map(|t| TradeCsvRow {
            id: t.id,
            stock_code: &t.stock_code,
            stock_name: t.stock_name.as_deref(),
            trade_type: match t.trade_type {
                crate::models::TradeType::Buy => "buy",
                crate::models::TradeType::Sell => "sell",
            },
            price: t.price,
            quantity: t.quantity,
            trade_date: t.trade_date.format("%Y-%m-%d").to_string(),
            reason: t.reason.as_deref(),
            notes: t.notes.as_deref(),
            stop_loss_price: t.stop_loss_price,
            take_profit_ratio: t.take_profit_ratio,
            sell_ratio: t.sell_ratio,
            original_record_id: t.original_record_id,
            is_corrected: t.is_corrected,
        })
        .collect();

    if rows.is_empty() {
        return Ok(TRADE_HEADER.to_string() + "\n");
    }
    write_csv(&rows)
}

const TRADE_HEADER: &str = "id,stock_code,stock_name,trade_type,price,quantity,trade_date,reason,notes,stop_loss_price,take_profit_ratio,sell_ratio,original_record_id,is_corrected";

const REVIEW_HEADER: &str = "id,stock_code,stock_name,review_date,price_up_score,bbi_score,volume_score,trend_score,j_score,total_score,decision,reason,analysis,holding_days,buy_price,current_price,floating_profit_ratio";

#[derive(Serialize)]
struct ReviewCsvRow<'a> {
    id: i64,
    stock_code: &'a str,
    stock_name: Option<&'a str>,
    review_date: String,
    price_up_score: i64,
    bbi_score: i64,
    volume_score: i64,
    trend_score: i64,
    j_score: i64,
    total_score: i64,
    decision: &'static str,
    reason: Option<&'a str>,
    analysis: Option<&'a str>,
    holding_days: Option<i64>,
    buy_price: Option<f64>,
    current_price: Option<f64>,
    floating_profit_ratio: Option<f64>,
}

pub fn reviews_to_csv(reviews: &[ReviewRecord]) -> Result<String> {
    let rows: Vec<ReviewCsvRow> = reviews
        .iter()
        .map(|r| ReviewCsvRow {
            id: r.id,
            stock_code: &r.stock_code,
            stock_name: r.stock_name.as_deref(),
            review_date: r.review_date.format("%Y-%m-%d").to_string(),
            price_up_score: r.price_up_score,
            bbi_score: r.bbi_score,
            volume_score: r.volume_score,
            trend_score: r.trend_score,
            j_score: r.j_score,
            total_score: r.total_score,
            decision: r.decision.as_str(),
            reason: r.reason.as_deref(),
            analysis: r.analysis.as_deref(),
            holding_days: r.holding_days,
            buy_price: r.buy_price,
            current_price: r.current_price,
            floating_profit_ratio: r.floating_profit_ratio,
        })
        .collect();

    if rows.is_empty() {
        return Ok(REVIEW_HEADER.to_string() + "\n");
    }
    write_csv(&rows)
}

/// Parse trade rows keyed by header name. Each entry carries the 1-based
/// line number of its record so callers can report per-row failures.
/// Unknown columns (ids, correction flags from an export) are ignored.
pub fn parse_trade_csv(content: &str) -> Result<Vec<(u64, Result<TradeInput>)>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let parsed = record
            .deserialize::<TradeInput>(Some(&headers))
            .map_err(|e| JournalError::validation("csv", e.to_string()));
        rows.push((line, parsed));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PositionAction, TradeType};
    use chrono::NaiveDate;

    #[test]
    fn test_empty_exports_still_have_headers() {
        assert_eq!(trades_to_csv(&[]).unwrap().lines().next(), Some(TRADE_HEADER));
        assert_eq!(reviews_to_csv(&[]).unwrap().lines().next(), Some(REVIEW_HEADER));
    }

    #[test]
    fn test_review_export_row() {
        let review = ReviewRecord {
            id: 7,
            stock_code: "600519".to_string(),
            stock_name: Some("贵州茅台".to_string()),
            review_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            price_up_score: 1,
            bbi_score: 1,
            volume_score: 1,
            trend_score: 0,
            j_score: 0,
            total_score: 3,
            decision: PositionAction::SellPartial,
            reason: Some("volume, fading".to_string()),
            analysis: None,
            holding_days: Some(4),
            buy_price: Some(10.0),
            current_price: Some(11.0),
            floating_profit_ratio: Some(0.1),
            created_at: None,
            updated_at: None,
        };
        let csv = reviews_to_csv(&[review]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(REVIEW_HEADER));
        assert_eq!(
            lines.next(),
            Some("7,600519,贵州茅台,2025-03-03,1,1,1,0,0,3,sell_partial,\"volume, fading\",,4,10.0,11.0,0.1")
        );
    }

    #[test]
    fn test_parse_trade_csv_lines() {
        let content = "stock_code,trade_type,price,quantity,trade_date\n600519,buy,10,100,2025-01-02\n600519,short,10,100,2025-01-02\n";
        let rows = parse_trade_csv(content).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, 2);
        let first = rows[0].1.as_ref().unwrap();
        assert_eq!(first.trade_type, TradeType::Buy);
        assert_eq!(first.stock_name, None);
        assert!(rows[1].1.is_err());
    }
}
