use crate::calendar::TradingCalendar;
use crate::csv_io;
use crate::db::JournalDb;
use crate::error::{JournalError, Result};
use crate::holdings::HoldingsManager;
use crate::models::*;
use crate::validation::*;
use sqlx::{QueryBuilder, Sqlite};
use std::sync::Arc;

const SCORE_FIELDS: [&str; 5] = ["price_up_score", "bbi_score", "volume_score", "trend_score", "j_score"];

/// Daily per-stock review journal
pub struct ReviewJournal {
    db: JournalDb,
    holdings: HoldingsManager,
}

impl ReviewJournal {
    pub fn new(db: JournalDb, calendar: Arc<TradingCalendar>) -> Self {
        Self {
            holdings: HoldingsManager::new(db.clone(), calendar),
            db,
        }
    }

    async fn prepare(&self, mut review: ReviewInput) -> Result<ReviewInput> {
        review.stock_code = normalize_stock_code(&review.stock_code)?;

        let scores = [
            review.price_up_score,
            review.bbi_score,
            review.volume_score,
            review.trend_score,
            review.j_score,
        ];
        for (field, score) in SCORE_FIELDS.iter().zip(scores) {
            if score != 0 && score != 1 {
                return Err(JournalError::validation(*field, "must be 0 or 1"));
            }
        }

        if let Some(days) = review.holding_days {
            if days < 0 {
                return Err(JournalError::validation("holding_days", "must not be negative"));
            }
        }
        require_positive_opt("buy_price", review.buy_price)?;
        require_positive_opt("current_price", review.current_price)?;

        review.stock_name = clean_optional(review.stock_name);
        review.reason = clean_optional(review.reason);
        review.analysis = clean_optional(review.analysis);

        if review.holding_days.is_none() || review.buy_price.is_none() {
            if let Some(holding) = self
                .holdings
                .find_holding(&review.stock_code, review.review_date)
                .await?
            {
                review.holding_days.get_or_insert(holding.holding_days);
                review.buy_price.get_or_insert(holding.avg_buy_price);
                if review.stock_name.is_none() {
                    review.stock_name = holding.stock_name;
                }
            }
        }

        if review.floating_profit_ratio.is_none() {
            if let (Some(buy), Some(current)) = (review.buy_price, review.current_price) {
                review.floating_profit_ratio = Some((current - buy) / buy);
            }
        }

        Ok(review)
    }

    fn map_duplicate(e: sqlx::Error, review: &ReviewInput) -> JournalError {
        match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => JournalError::validation(
                "review_date",
                format!(
                    "{} already has a review for {}",
                    review.stock_code, review.review_date
                ),
            ),
            _ => JournalError::Database(e),
        }
    }

    pub async fn create_review(&self, review: ReviewInput) -> Result<ReviewRecord> {
        let review = self.prepare(review).await?;

        let record = sqlx::query_as::<_, ReviewRecord>(
            r#"
            INSERT INTO review_records
            (stock_code, stock_name, review_date, price_up_score, bbi_score, volume_score, trend_score,
             j_score, total_score, decision, reason, analysis, holding_days, buy_price, current_price,
             floating_profit_ratio)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&review.stock_code)
        .bind(&review.stock_name)
        .bind(review.review_date)
        .bind(review.price_up_score)
        .bind(review.bbi_score)
        .bind(review.volume_score)
        .bind(review.trend_score)
        .bind(review.j_score)
        .bind(review.total_score())
        .bind(review.decision)
        .bind(&review.reason)
        .bind(&review.analysis)
        .bind(review.holding_days)
        .bind(review.buy_price)
        .bind(review.current_price)
        .bind(review.floating_profit_ratio)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| Self::map_duplicate(e, &review))?;

        tracing::info!(
            "Reviewed {} on {}: score {} -> {}",
            record.stock_code,
            record.review_date,
            record.total_score,
            record.decision.as_str()
        );
        Ok(record)
    }

    pub async fn get_review(&self, id: i64) -> Result<ReviewRecord> {
        sqlx::query_as::<_, ReviewRecord>("SELECT * FROM review_records WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| JournalError::not_found("Review", id))
    }

    pub async fn update_review(&self, id: i64, review: ReviewInput) -> Result<ReviewRecord> {
        self.get_review(id).await?;
        let review = self.prepare(review).await?;

        let record = sqlx::query_as::<_, ReviewRecord>(
            r#"
            UPDATE review_records
            SET stock_code = ?, stock_name = ?, review_date = ?, price_up_score = ?, bbi_score = ?,
                volume_score = ?, trend_score = ?, j_score = ?, total_score = ?, decision = ?,
                reason = ?, analysis = ?, holding_days = ?, buy_price = ?, current_price = ?,
                floating_profit_ratio = ?, updated_at = datetime('now')
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&review.stock_code)
        .bind(&review.stock_name)
        .bind(review.review_date)
        .bind(review.price_up_score)
        .bind(review.bbi_score)
        .bind(review.volume_score)
        .bind(review.trend_score)
        .bind(review.j_score)
        .bind(review.total_score())
        .bind(review.decision)
        .bind(&review.reason)
        .bind(&review.analysis)
        .bind(review.holding_days)
        .bind(review.buy_price)
        .bind(review.current_price)
        .bind(review.floating_profit_ratio)
        .bind(id)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| Self::map_duplicate(e, &review))?;

        Ok(record)
    }

    pub async fn delete_review(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM review_records WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(JournalError::not_found("Review", id));
        }
        Ok(())
    }

    fn push_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filter: &'a ReviewFilter) {
        if let Some(code) = &filter.stock_code {
            qb.push(" AND stock_code = ").push_bind(code.trim().to_ascii_uppercase());
        }
        if let Some(decision) = filter.decision {
            qb.push(" AND decision = ").push_bind(decision);
        }
        if let Some(start) = filter.start_date {
            qb.push(" AND review_date >= ").push_bind(start);
        }
        if let Some(end) = filter.end_date {
            qb.push(" AND review_date <= ").push_bind(end);
        }
    }

    /// Paginated listing, newest review first
    pub async fn list_reviews(&self, filter: &ReviewFilter, page: &PageRequest) -> Result<Page<ReviewRecord>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM review_records WHERE 1 = 1");
        Self::push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(self.db.pool()).await?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM review_records WHERE 1 = 1");
        Self::push_filters(&mut query, filter);
        query
            .push(" ORDER BY review_date DESC, id DESC LIMIT ")
            .push_bind(page.per_page() as i64)
            .push(" OFFSET ")
            .push_bind(page.offset());
        let items = query
            .build_query_as::<ReviewRecord>()
            .fetch_all(self.db.pool())
            .await?;

        Ok(Page::new(items, total, page))
    }

    pub async fn export_csv(&self, filter: &ReviewFilter) -> Result<String> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM review_records WHERE 1 = 1");
        Self::push_filters(&mut query, filter);
        query.push(" ORDER BY review_date, id");
        let reviews = query
            .build_query_as::<ReviewRecord>()
            .fetch_all(self.db.pool())
            .await?;

        csv_io::reviews_to_csv(&reviews)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trades::TradeLogger;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn review(code: &str, date: NaiveDate) -> ReviewInput {
        ReviewInput {
            stock_code: code.to_string(),
            stock_name: None,
            review_date: date,
            price_up_score: 1,
            bbi_score: 1,
            volume_score: 0,
            trend_score: 1,
            j_score: 0,
            decision: PositionAction::Hold,
            reason: Some("above BBI".to_string()),
            analysis: None,
            holding_days: None,
            buy_price: None,
            current_price: None,
            floating_profit_ratio: None,
        }
    }

    async fn setup() -> (JournalDb, ReviewJournal) {
        let db = JournalDb::new("sqlite::memory:").await.unwrap();
        let journal = ReviewJournal::new(db.clone(), Arc::new(TradingCalendar::new()));
        (db, journal)
    }

    #[tokio::test]
    async fn test_create_computes_total_and_rejects_duplicates() {
        let (_db, journal) = setup().await;

        let record = journal.create_review(review("600519", d(2025, 3, 5))).await.unwrap();
        assert_eq!(record.total_score, 3);
        assert_eq!(record.holding_days, None);

        let err = journal.create_review(review("600519", d(2025, 3, 5))).await.unwrap_err();
        match err {
            JournalError::Validation { field, .. } => assert_eq!(field, "review_date"),
            other => panic!("unexpected error: {other:?}"),
        }

        let mut bad = review("600519", d(2025, 3, 6));
        bad.j_score = 2;
        assert!(matches!(
            journal.create_review(bad).await,
            Err(JournalError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_fills_holding_context() {
        let (db, journal) = setup().await;
        TradeLogger::new(db)
            .log_trade(TradeInput {
                stock_code: "600519".to_string(),
                stock_name: Some("贵州茅台".to_string()),
                trade_type: TradeType::Buy,
                price: 10.0,
                quantity: 100,
                trade_date: d(2025, 3, 3),
                reason: None,
                notes: None,
                stop_loss_price: None,
                take_profit_ratio: None,
                sell_ratio: None,
            })
            .await
            .unwrap();

        let mut input = review("600519", d(2025, 3, 5));
        input.current_price = Some(11.0);
        let record = journal.create_review(input).await.unwrap();
        assert_eq!(record.holding_days, Some(3));
        assert_eq!(record.buy_price, Some(10.0));
        assert_eq!(record.stock_name.as_deref(), Some("贵州茅台"));
        assert!((record.floating_profit_ratio.unwrap() - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_update_list_delete() {
        let (_db, journal) = setup().await;
        let first = journal.create_review(review("600519", d(2025, 3, 5))).await.unwrap();
        journal.create_review(review("000001", d(2025, 3, 6))).await.unwrap();

        let mut changed = review("600519", d(2025, 3, 5));
        changed.decision = PositionAction::SellAll;
        changed.volume_score = 1;
        let updated = journal.update_review(first.id, changed).await.unwrap();
        assert_eq!(updated.total_score, 4);
        assert_eq!(updated.decision, PositionAction::SellAll);

        let filter = ReviewFilter {
            decision: Some(PositionAction::SellAll),
            ..Default::default()
        };
        let page = journal.list_reviews(&filter, &PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 1);

        let all = journal.list_reviews(&ReviewFilter::default(), &PageRequest::new(1, 1)).await.unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.pages, 2);
        assert_eq!(all.items[0].stock_code, "000001");

        let csv = journal.export_csv(&ReviewFilter::default()).await.unwrap();
        assert_eq!(csv.lines().count(), 3);

        journal.delete_review(first.id).await.unwrap();
        assert!(matches!(journal.get_review(first.id).await, Err(JournalError::NotFound { .. })));
    }
}
