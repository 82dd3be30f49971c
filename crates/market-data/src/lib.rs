//! Market data access for the trade journal.
//!
//! Quotes and industry-board rankings come from an AKTools server, which
//! exposes AKShare functions over HTTP. Everything else in the workspace
//! talks to the [`QuoteProvider`] trait so the provider can be swapped or
//! stubbed in tests.

pub mod models;

pub use models::{Quote, SectorQuote};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

const SPOT_ENDPOINT: &str = "/api/public/stock_zh_a_spot_em";
const INDUSTRY_BOARD_ENDPOINT: &str = "/api/public/stock_board_industry_name_em";

#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected payload: {0}")]
    Decode(String),
}

/// Source of spot quotes and sector rankings.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Latest quotes for the given stock codes. Codes the provider does not
    /// know are simply absent from the result.
    async fn fetch_quotes(&self, codes: &[String]) -> Result<Vec<Quote>, MarketDataError>;

    /// Today's industry-board table, in provider order.
    async fn fetch_sector_board(&self) -> Result<Vec<SectorQuote>, MarketDataError>;

    fn name(&self) -> &str;
}

#[derive(Clone)]
pub struct AkToolsClient {
    base_url: String,
    client: Client,
}

impl AkToolsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn get_rows(&self, endpoint: &str) -> Result<Vec<Value>, MarketDataError> {
        let url = format!("{}{}", self.base_url, endpoint);
        tracing::debug!("Fetching {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MarketDataError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MarketDataError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| MarketDataError::Decode(e.to_string()))?;

        match payload {
            Value::Array(rows) => Ok(rows),
            other => Err(MarketDataError::Decode(format!(
                "expected a JSON array from {}, got {}",
                endpoint,
                type_name(&other)
            ))),
        }
    }
}

#[async_trait]
impl QuoteProvider for AkToolsClient {
    async fn fetch_quotes(&self, codes: &[String]) -> Result<Vec<Quote>, MarketDataError> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.get_rows(SPOT_ENDPOINT).await?;
        let wanted: HashSet<&str> = codes.iter().map(String::as_str).collect();
        let quotes = parse_spot_rows(&rows, Utc::now())
            .into_iter()
            .filter(|q| wanted.contains(q.code.as_str()))
            .collect::<Vec<_>>();

        tracing::info!("Fetched {} of {} requested quotes", quotes.len(), codes.len());
        Ok(quotes)
    }

    async fn fetch_sector_board(&self) -> Result<Vec<SectorQuote>, MarketDataError> {
        let rows = self.get_rows(INDUSTRY_BOARD_ENDPOINT).await?;
        let sectors = parse_board_rows(&rows);
        tracing::info!("Fetched {} industry boards", sectors.len());
        Ok(sectors)
    }

    fn name(&self) -> &str {
        "aktools"
    }
}

/// Map rows of `stock_zh_a_spot_em`. Suspended stocks carry a null latest
/// price and are dropped.
pub fn parse_spot_rows(rows: &[Value], fetched_at: DateTime<Utc>) -> Vec<Quote> {
    rows.iter()
        .filter_map(|row| {
            let code = row.get("代码")?.as_str()?.to_string();
            let price = row.get("最新价").and_then(Value::as_f64)?;
            Some(Quote {
                code,
                name: row
                    .get("名称")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                price,
                change_percent: row.get("涨跌幅").and_then(Value::as_f64),
                fetched_at,
            })
        })
        .collect()
}

/// Map rows of `stock_board_industry_name_em`.
pub fn parse_board_rows(rows: &[Value]) -> Vec<SectorQuote> {
    rows.iter()
        .filter_map(|row| {
            let name = row.get("板块名称")?.as_str()?.to_string();
            let change_percent = row.get("涨跌幅").and_then(Value::as_f64)?;
            Some(SectorQuote {
                name,
                change_percent,
                leading_stock: row
                    .get("领涨股票")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                turnover: row.get("换手率").and_then(Value::as_f64),
            })
        })
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
