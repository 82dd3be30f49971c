use crate::csv_io;
use crate::db::JournalDb;
use crate::error::{JournalError, Result};
use crate::holdings::replay_trades;
use crate::models::*;
use crate::validation::*;
use chrono::NaiveDate;
use rust_decimal::prelude::*;
use sqlx::{QueryBuilder, Sqlite};

/// The fields of a trade that move the held quantity
#[derive(Debug, Clone, sqlx::FromRow)]
struct LedgerEntry {
    id: i64,
    trade_date: NaiveDate,
    trade_type: TradeType,
    quantity: i64,
}

impl LedgerEntry {
    fn pending(trade: &TradeInput, id: i64) -> Self {
        Self {
            id,
            trade_date: trade.trade_date,
            trade_type: trade.trade_type,
            quantity: trade.quantity,
        }
    }
}

impl From<&TradeRecord> for LedgerEntry {
    fn from(record: &TradeRecord) -> Self {
        Self {
            id: record.id,
            trade_date: record.trade_date,
            trade_type: record.trade_type,
            quantity: record.quantity,
        }
    }
}

pub struct TradeLogger {
    db: JournalDb,
}

impl TradeLogger {
    pub fn new(db: JournalDb) -> Self {
        Self { db }
    }

    /// Validate and normalize a trade before it touches the database
    fn validate(&self, mut trade: TradeInput) -> Result<TradeInput> {
        trade.stock_code = normalize_stock_code(&trade.stock_code)?;
        require_positive("price", trade.price)?;
        if trade.quantity <= 0 {
            return Err(JournalError::validation("quantity", "must be greater than 0"));
        }
        require_positive_opt("stop_loss_price", trade.stop_loss_price)?;
        require_positive_opt("take_profit_ratio", trade.take_profit_ratio)?;
        if let Some(ratio) = trade.sell_ratio {
            require_ratio("sell_ratio", ratio)?;
        }
        trade.stock_name = clean_optional(trade.stock_name);
        trade.reason = clean_optional(trade.reason);
        trade.notes = clean_optional(trade.notes);
        Ok(trade)
    }

    /// Net quantity held across all uncorrected records, optionally ignoring
    /// one record (the one being edited or corrected).
    pub async fn held_quantity(&self, stock_code: &str, exclude_id: Option<i64>) -> Result<i64> {
        let (held,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(CASE WHEN trade_type = 'buy' THEN quantity ELSE -quantity END), 0)
            FROM trade_records
            WHERE stock_code = ? AND is_corrected = 0 AND id != ?
            "#,
        )
        .bind(stock_code)
        .bind(exclude_id.unwrap_or(-1))
        .fetch_one(self.db.pool())
        .await?;

        Ok(held)
    }

    /// Replay the uncorrected history of `stock_code` in (trade_date, id)
    /// order with one record left out and one pending record added, and
    /// reject the change if the running quantity ever drops below zero.
    async fn check_running_quantity(
        &self,
        stock_code: &str,
        exclude_id: Option<i64>,
        pending: Option<LedgerEntry>,
        field: &str,
    ) -> Result<()> {
        let mut ledger = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, trade_date, trade_type, quantity FROM trade_records
            WHERE stock_code = ? AND is_corrected = 0 AND id != ?
            "#,
        )
        .bind(stock_code)
        .bind(exclude_id.unwrap_or(-1))
        .fetch_all(self.db.pool())
        .await?;

        ledger.extend(pending);
        ledger.sort_by_key(|e| (e.trade_date, e.id));

        let mut held = 0i64;
        for entry in &ledger {
            match entry.trade_type {
                TradeType::Buy => held += entry.quantity,
                TradeType::Sell => held -= entry.quantity,
            }
            if held < 0 {
                return Err(JournalError::validation(
                    field,
                    format!(
                        "{} would be short {} shares on {}",
                        stock_code, -held, entry.trade_date
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Log a new trade
    pub async fn log_trade(&self, trade: TradeInput) -> Result<TradeRecord> {
        let trade = self.validate(trade)?;
        // A new row gets the highest id, so it sorts last within its date
        let pending = LedgerEntry::pending(&trade, i64::MAX);
        self.check_running_quantity(&trade.stock_code, None, Some(pending), "quantity").await?;

        let record = sqlx::query_as::<_, TradeRecord>(
            r#"
            INSERT INTO trade_records
            (stock_code, stock_name, trade_type, price, quantity, trade_date, reason, notes,
             stop_loss_price, take_profit_ratio, sell_ratio)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&trade.stock_code)
        .bind(&trade.stock_name)
        .bind(trade.trade_type)
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.trade_date)
        .bind(&trade.reason)
        .bind(&trade.notes)
        .bind(trade.stop_loss_price)
        .bind(trade.take_profit_ratio)
        .bind(trade.sell_ratio)
        .fetch_one(self.db.pool())
        .await?;

        tracing::info!(
            "Logged {:?} {} x{} @ {} (id {})",
            record.trade_type,
            record.stock_code,
            record.quantity,
            record.price,
            record.id
        );
        Ok(record)
    }

    /// `existing` is swapped for `trade`, which sorts under `new_id`
    async fn check_replacement(&self, existing: &TradeRecord, trade: &TradeInput, new_id: i64) -> Result<()> {
        if existing.stock_code != trade.stock_code {
            self.check_running_quantity(&existing.stock_code, Some(existing.id), None, "stock_code")
                .await?;
        }
        self.check_running_quantity(
            &trade.stock_code,
            Some(existing.id),
            Some(LedgerEntry::pending(trade, new_id)),
            "quantity",
        )
        .await
    }

    /// Get trade by ID
    pub async fn get_trade(&self, id: i64) -> Result<TradeRecord> {
        sqlx::query_as::<_, TradeRecord>("SELECT * FROM trade_records WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| JournalError::not_found("Trade", id))
    }

    fn push_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filter: &'a TradeFilter) {
        if !filter.include_corrected {
            qb.push(" AND is_corrected = 0");
        }
        if let Some(code) = &filter.stock_code {
            qb.push(" AND stock_code = ").push_bind(code.trim().to_ascii_uppercase());
        }
        if let Some(trade_type) = filter.trade_type {
            qb.push(" AND trade_type = ").push_bind(trade_type);
        }
        if let Some(start) = filter.start_date {
            qb.push(" AND trade_date >= ").push_bind(start);
        }
        if let Some(end) = filter.end_date {
            qb.push(" AND trade_date <= ").push_bind(end);
        }
    }

    /// Paginated listing, newest first
    pub async fn list_trades(&self, filter: &TradeFilter, page: &PageRequest) -> Result<Page<TradeRecord>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM trade_records WHERE 1 = 1");
        Self::push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(self.db.pool()).await?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM trade_records WHERE 1 = 1");
        Self::push_filters(&mut query, filter);
        query
            .push(" ORDER BY trade_date DESC, id DESC LIMIT ")
            .push_bind(page.per_page() as i64)
            .push(" OFFSET ")
            .push_bind(page.offset());
        let items = query
            .build_query_as::<TradeRecord>()
            .fetch_all(self.db.pool())
            .await?;

        Ok(Page::new(items, total, page))
    }

    /// Every record matching the filter, oldest first (exports)
    pub async fn all_trades(&self, filter: &TradeFilter) -> Result<Vec<TradeRecord>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM trade_records WHERE 1 = 1");
        Self::push_filters(&mut query, filter);
        query.push(" ORDER BY trade_date, id");
        Ok(query
            .build_query_as::<TradeRecord>()
            .fetch_all(self.db.pool())
            .await?)
    }

    /// Update trade in place. Corrected records are history and stay frozen.
    pub async fn update_trade(&self, id: i64, trade: TradeInput) -> Result<TradeRecord> {
        let existing = self.get_trade(id).await?;
        if existing.is_corrected {
            return Err(JournalError::validation(
                "id",
                format!("trade {} has been corrected and cannot be edited", id),
            ));
        }
        let trade = self.validate(trade)?;
        self.check_replacement(&existing, &trade, id).await?;

        let record = sqlx::query_as::<_, TradeRecord>(
            r#"
            UPDATE trade_records
            SET stock_code = ?, stock_name = ?, trade_type = ?, price = ?, quantity = ?, trade_date = ?,
                reason = ?, notes = ?, stop_loss_price = ?, take_profit_ratio = ?, sell_ratio = ?,
                updated_at = datetime('now')
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&trade.stock_code)
        .bind(&trade.stock_name)
        .bind(trade.trade_type)
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.trade_date)
        .bind(&trade.reason)
        .bind(&trade.notes)
        .bind(trade.stop_loss_price)
        .bind(trade.take_profit_ratio)
        .bind(trade.sell_ratio)
        .bind(id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(record)
    }

    /// Replace a record with a corrected copy. The original stays in the
    /// table flagged `is_corrected` and drops out of every aggregate.
    pub async fn correct_trade(&self, id: i64, trade: TradeInput) -> Result<TradeRecord> {
        let original = self.get_trade(id).await?;
        if original.is_corrected {
            return Err(JournalError::validation(
                "id",
                format!("trade {} has already been corrected", id),
            ));
        }
        let trade = self.validate(trade)?;
        self.check_replacement(&original, &trade, i64::MAX).await?;

        let mut tx = self.db.pool().begin().await?;

        sqlx::query("UPDATE trade_records SET is_corrected = 1, updated_at = datetime('now') WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let corrected = sqlx::query_as::<_, TradeRecord>(
            r#"
            INSERT INTO trade_records
            (stock_code, stock_name, trade_type, price, quantity, trade_date, reason, notes,
             stop_loss_price, take_profit_ratio, sell_ratio, original_record_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&trade.stock_code)
        .bind(&trade.stock_name)
        .bind(trade.trade_type)
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.trade_date)
        .bind(&trade.reason)
        .bind(&trade.notes)
        .bind(trade.stop_loss_price)
        .bind(trade.take_profit_ratio)
        .bind(trade.sell_ratio)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!("Trade {} corrected by {}", id, corrected.id);
        Ok(corrected)
    }

    /// Delete trade. Deleting a correction reinstates the record it replaced.
    pub async fn delete_trade(&self, id: i64) -> Result<()> {
        let record = self.get_trade(id).await?;

        let (dependents,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM trade_records WHERE original_record_id = ?")
                .bind(id)
                .fetch_one(self.db.pool())
                .await?;
        if dependents > 0 {
            return Err(JournalError::validation(
                "id",
                format!("trade {} has corrections; delete the correction first", id),
            ));
        }

        // Deleting a correction brings its original back into the history
        let reinstated = match record.original_record_id {
            Some(original_id) => Some(self.get_trade(original_id).await?),
            None => None,
        };
        match &reinstated {
            Some(original) if original.stock_code == record.stock_code => {
                self.check_running_quantity(&record.stock_code, Some(id), Some(LedgerEntry::from(original)), "id")
                    .await?;
            }
            Some(original) => {
                self.check_running_quantity(&record.stock_code, Some(id), None, "id").await?;
                self.check_running_quantity(&original.stock_code, None, Some(LedgerEntry::from(original)), "id")
                    .await?;
            }
            None => self.check_running_quantity(&record.stock_code, Some(id), None, "id").await?,
        }

        let mut tx = self.db.pool().begin().await?;
        if let Some(original_id) = record.original_record_id {
            sqlx::query("UPDATE trade_records SET is_corrected = 0, updated_at = datetime('now') WHERE id = ?")
                .bind(original_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM trade_records WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Aggregate statistics over uncorrected trades, optionally limited to a
    /// date range. Realized P&L is matched against the moving-average cost of
    /// the full history so a range never starts from a wrong cost basis.
    pub async fn get_stats(&self, filter: &TradeFilter) -> Result<TradeStats> {
        let history = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trade_records WHERE is_corrected = 0 ORDER BY trade_date, id",
        )
        .fetch_all(self.db.pool())
        .await?;

        let code = filter.stock_code.as_ref().map(|c| c.trim().to_ascii_uppercase());
        let in_scope = |t: &TradeRecord| {
            code.as_ref().map_or(true, |c| &t.stock_code == c)
                && filter.start_date.map_or(true, |s| t.trade_date >= s)
                && filter.end_date.map_or(true, |e| t.trade_date <= e)
        };

        let (_, realized) = replay_trades(&history);
        let scoped: Vec<&TradeRecord> = history.iter().filter(|t| in_scope(*t)).collect();
        let scoped_ids: std::collections::HashSet<i64> = scoped.iter().map(|t| t.id).collect();
        let pnls: Vec<Decimal> = realized
            .iter()
            .filter(|r| scoped_ids.contains(&r.trade_id))
            .map(|r| r.pnl)
            .collect();

        let amount = |t: &&TradeRecord| {
            Decimal::from_f64(t.price).unwrap_or_default() * Decimal::from(t.quantity)
        };
        let buys: Vec<&TradeRecord> = scoped.iter().copied().filter(|t| t.trade_type == TradeType::Buy).collect();
        let sells: Vec<&TradeRecord> = scoped.iter().copied().filter(|t| t.trade_type == TradeType::Sell).collect();

        let winning = pnls.iter().filter(|p| **p > Decimal::ZERO).count();
        let losing = pnls.iter().filter(|p| **p < Decimal::ZERO).count();
        let win_rate = if pnls.is_empty() {
            0.0
        } else {
            winning as f64 / pnls.len() as f64 * 100.0
        };

        let to_f64 = |d: Decimal| d.round_dp(2).to_f64().unwrap_or(0.0);

        Ok(TradeStats {
            total_trades: scoped.len(),
            buy_count: buys.len(),
            sell_count: sells.len(),
            total_buy_amount: to_f64(buys.iter().map(amount).sum()),
            total_sell_amount: to_f64(sells.iter().map(amount).sum()),
            closing_sells: pnls.len(),
            winning_sells: winning,
            losing_sells: losing,
            win_rate,
            total_realized_pnl: to_f64(pnls.iter().copied().sum()),
            largest_win: to_f64(pnls.iter().copied().filter(|p| *p > Decimal::ZERO).max().unwrap_or_default()),
            largest_loss: to_f64(pnls.iter().copied().filter(|p| *p < Decimal::ZERO).min().unwrap_or_default()),
        })
    }

    /// CSV of every record matching the filter
    pub async fn export_csv(&self, filter: &TradeFilter) -> Result<String> {
        let trades = self.all_trades(filter).await?;
        csv_io::trades_to_csv(&trades)
    }

    /// Import trades from CSV. Rows are validated one at a time in file
    /// order; bad rows are reported and skipped.
    pub async fn import_csv(&self, content: &str) -> Result<ImportReport> {
        let rows = csv_io::parse_trade_csv(content)?;
        let mut imported = 0;
        let mut errors = Vec::new();

        for (line, row) in rows {
            let outcome = match row {
                Ok(input) => self.log_trade(input).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => imported += 1,
                Err(JournalError::Database(e)) => return Err(JournalError::Database(e)),
                Err(e) => errors.push(ImportRowError {
                    line,
                    message: e.to_string(),
                }),
            }
        }

        tracing::info!("Imported {} trades, {} rows rejected", imported, errors.len());
        Ok(ImportReport { imported, errors })
    }
}
