use crate::db::JournalDb;
use crate::error::{JournalError, Result};
use crate::models::{PriceInput, StockPrice};
use crate::validation::{clean_optional, normalize_stock_code, require_positive};
use chrono::NaiveDate;
use market_data::QuoteProvider;
use std::collections::HashMap;
use std::sync::Arc;

/// Date-keyed close-price cache, optionally fed by a market-data provider
pub struct PriceBook {
    db: JournalDb,
    provider: Option<Arc<dyn QuoteProvider>>,
}

impl PriceBook {
    pub fn new(db: JournalDb, provider: Option<Arc<dyn QuoteProvider>>) -> Self {
        Self { db, provider }
    }

    /// Insert or replace the close for (code, date)
    pub async fn upsert_price(&self, input: PriceInput) -> Result<StockPrice> {
        let code = normalize_stock_code(&input.stock_code)?;
        require_positive("close_price", input.close_price)?;

        let price = sqlx::query_as::<_, StockPrice>(
            r#"
            INSERT INTO stock_prices (stock_code, stock_name, price_date, close_price, change_percent)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (stock_code, price_date) DO UPDATE SET
                stock_name = COALESCE(excluded.stock_name, stock_prices.stock_name),
                close_price = excluded.close_price,
                change_percent = excluded.change_percent
            RETURNING *
            "#,
        )
        .bind(&code)
        .bind(clean_optional(input.stock_name))
        .bind(input.price_date)
        .bind(input.close_price)
        .bind(input.change_percent)
        .fetch_one(self.db.pool())
        .await?;

        Ok(price)
    }

    pub async fn get_price(&self, stock_code: &str, date: NaiveDate) -> Result<StockPrice> {
        let code = normalize_stock_code(stock_code)?;
        sqlx::query_as::<_, StockPrice>(
            "SELECT * FROM stock_prices WHERE stock_code = ? AND price_date = ?",
        )
        .bind(&code)
        .bind(date)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| JournalError::not_found("Price", format!("{} on {}", code, date)))
    }

    /// Most recent cached close on or before `as_of`
    pub async fn latest_price(&self, stock_code: &str, as_of: NaiveDate) -> Result<Option<StockPrice>> {
        let code = normalize_stock_code(stock_code)?;
        let price = sqlx::query_as::<_, StockPrice>(
            r#"
            SELECT * FROM stock_prices
            WHERE stock_code = ? AND price_date <= ?
            ORDER BY price_date DESC
            LIMIT 1
            "#,
        )
        .bind(&code)
        .bind(as_of)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(price)
    }

    /// Cached closes for one code, newest first
    pub async fn price_history(&self, stock_code: &str, limit: i64) -> Result<Vec<StockPrice>> {
        let code = normalize_stock_code(stock_code)?;
        let prices = sqlx::query_as::<_, StockPrice>(
            "SELECT * FROM stock_prices WHERE stock_code = ? ORDER BY price_date DESC LIMIT ?",
        )
        .bind(&code)
        .bind(limit.max(1))
        .fetch_all(self.db.pool())
        .await?;

        Ok(prices)
    }

    /// Latest close on or before `as_of` for each requested code. Codes with
    /// no cached price are absent from the map.
    pub async fn latest_prices(&self, codes: &[String], as_of: NaiveDate) -> Result<HashMap<String, f64>> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<(String, f64)> = sqlx::query_as(
            r#"
            SELECT p.stock_code, p.close_price
            FROM stock_prices p
            WHERE p.price_date = (
                SELECT MAX(q.price_date) FROM stock_prices q
                WHERE q.stock_code = p.stock_code AND q.price_date <= ?
            )
            "#,
        )
        .bind(as_of)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .filter(|(code, _)| codes.contains(code))
            .collect())
    }

    /// Pull spot quotes for `codes` and store them under `date`
    pub async fn refresh(&self, codes: &[String], date: NaiveDate) -> Result<Vec<StockPrice>> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| JournalError::ExternalApi("no market data provider configured".to_string()))?;

        let codes = codes
            .iter()
            .map(|c| normalize_stock_code(c))
            .collect::<Result<Vec<_>>>()?;

        let quotes = provider.fetch_quotes(&codes).await?;
        tracing::info!(
            "Fetched {} of {} quotes from {}",
            quotes.len(),
            codes.len(),
            provider.name()
        );

        let mut stored = Vec::with_capacity(quotes.len());
        for quote in quotes {
            if quote.price <= 0.0 {
                tracing::warn!("Skipping non-positive quote for {}", quote.code);
                continue;
            }
            let price = self
                .upsert_price(PriceInput {
                    stock_code: quote.code,
                    stock_name: Some(quote.name),
                    price_date: date,
                    close_price: quote.price,
                    change_percent: quote.change_percent,
                })
                .await?;
            stored.push(price);
        }

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use market_data::{MarketDataError, Quote, SectorQuote};

    struct FixedQuotes;

    #[async_trait]
    impl QuoteProvider for FixedQuotes {
        async fn fetch_quotes(&self, codes: &[String]) -> std::result::Result<Vec<Quote>, MarketDataError> {
            Ok(codes
                .iter()
                .filter(|c| c.as_str() != "000000")
                .map(|c| Quote {
                    code: c.clone(),
                    name: format!("Stock {}", c),
                    price: 12.5,
                    change_percent: Some(1.2),
                    fetched_at: Utc::now(),
                })
                .collect())
        }

        async fn fetch_sector_board(&self) -> std::result::Result<Vec<SectorQuote>, MarketDataError> {
            Ok(vec![])
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn input(code: &str, date: NaiveDate, close: f64) -> PriceInput {
        PriceInput {
            stock_code: code.to_string(),
            stock_name: None,
            price_date: date,
            close_price: close,
            change_percent: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_day() {
        let db = JournalDb::new("sqlite::memory:").await.unwrap();
        let book = PriceBook::new(db, None);

        book.upsert_price(input("600519", d(2025, 3, 3), 10.0)).await.unwrap();
        let updated = book.upsert_price(input("600519", d(2025, 3, 3), 10.5)).await.unwrap();
        assert_eq!(updated.close_price, 10.5);
        assert_eq!(book.price_history("600519", 10).await.unwrap().len(), 1);

        assert!(book.upsert_price(input("600519", d(2025, 3, 4), 0.0)).await.is_err());
        assert!(matches!(
            book.get_price("600519", d(2025, 3, 4)).await,
            Err(JournalError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_latest_on_or_before() {
        let db = JournalDb::new("sqlite::memory:").await.unwrap();
        let book = PriceBook::new(db, None);

        book.upsert_price(input("600519", d(2025, 3, 3), 10.0)).await.unwrap();
        book.upsert_price(input("600519", d(2025, 3, 5), 11.0)).await.unwrap();
        book.upsert_price(input("000001", d(2025, 3, 6), 5.0)).await.unwrap();

        let latest = book.latest_price("600519", d(2025, 3, 4)).await.unwrap().unwrap();
        assert_eq!(latest.close_price, 10.0);
        assert!(book.latest_price("600519", d(2025, 3, 2)).await.unwrap().is_none());

        let codes = vec!["600519".to_string(), "000001".to_string()];
        let map = book.latest_prices(&codes, d(2025, 3, 5)).await.unwrap();
        assert_eq!(map.get("600519"), Some(&11.0));
        assert!(!map.contains_key("000001"));
    }

    #[tokio::test]
    async fn test_refresh_requires_provider() {
        let db = JournalDb::new("sqlite::memory:").await.unwrap();
        let book = PriceBook::new(db, None);
        let err = book.refresh(&["600519".to_string()], d(2025, 3, 3)).await.unwrap_err();
        assert!(matches!(err, JournalError::ExternalApi(_)));
    }

    #[tokio::test]
    async fn test_refresh_stores_quotes() {
        let db = JournalDb::new("sqlite::memory:").await.unwrap();
        let book = PriceBook::new(db, Some(Arc::new(FixedQuotes)));

        let codes = vec!["600519".to_string(), "000000".to_string()];
        let stored = book.refresh(&codes, d(2025, 3, 3)).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].stock_name.as_deref(), Some("Stock 600519"));
        assert_eq!(book.get_price("600519", d(2025, 3, 3)).await.unwrap().close_price, 12.5);
    }
}
