use crate::db::JournalDb;
use crate::error::{JournalError, Result};
use crate::models::*;
use crate::validation::*;
use chrono::NaiveDate;
use sqlx::{QueryBuilder, Sqlite};

/// Watch list and buy-ready list. Every transition leaves a row behind, so
/// the table doubles as the history of a code.
pub struct StockPoolManager {
    db: JournalDb,
}

impl StockPoolManager {
    pub fn new(db: JournalDb) -> Self {
        Self { db }
    }

    async fn ensure_not_active(&self, stock_code: &str, pool_type: PoolType) -> Result<()> {
        let (active,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM stock_pools WHERE stock_code = ? AND pool_type = ? AND status = 'active'",
        )
        .bind(stock_code)
        .bind(pool_type)
        .fetch_one(self.db.pool())
        .await?;

        if active > 0 {
            return Err(JournalError::validation(
                "stock_code",
                format!("{} is already active in the {:?} pool", stock_code, pool_type),
            ));
        }
        Ok(())
    }

    pub async fn add_entry(&self, input: PoolEntryInput) -> Result<StockPoolEntry> {
        let code = normalize_stock_code(&input.stock_code)?;
        require_positive_opt("target_price", input.target_price)?;
        self.ensure_not_active(&code, input.pool_type).await?;

        let entry = sqlx::query_as::<_, StockPoolEntry>(
            r#"
            INSERT INTO stock_pools (stock_code, stock_name, pool_type, status, add_reason, target_price, added_date)
            VALUES (?, ?, ?, 'active', ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&code)
        .bind(clean_optional(input.stock_name))
        .bind(input.pool_type)
        .bind(clean_optional(input.add_reason))
        .bind(input.target_price)
        .bind(input.added_date)
        .fetch_one(self.db.pool())
        .await?;

        tracing::info!("Added {} to {:?} pool (id {})", entry.stock_code, entry.pool_type, entry.id);
        Ok(entry)
    }

    pub async fn get_entry(&self, id: i64) -> Result<StockPoolEntry> {
        sqlx::query_as::<_, StockPoolEntry>("SELECT * FROM stock_pools WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| JournalError::not_found("Pool entry", id))
    }

    /// Entries matching the filter; status defaults to active
    pub async fn list_entries(&self, filter: &PoolFilter) -> Result<Vec<StockPoolEntry>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM stock_pools WHERE status = ");
        query.push_bind(filter.status.unwrap_or(PoolStatus::Active));
        if let Some(pool_type) = filter.pool_type {
            query.push(" AND pool_type = ").push_bind(pool_type);
        }
        query.push(" ORDER BY added_date DESC, id DESC");

        Ok(query
            .build_query_as::<StockPoolEntry>()
            .fetch_all(self.db.pool())
            .await?)
    }

    /// Edit name, reason or target of an active entry. Absent fields are kept.
    pub async fn update_entry(&self, id: i64, update: PoolEntryUpdate) -> Result<StockPoolEntry> {
        let existing = self.get_entry(id).await?;
        if existing.status != PoolStatus::Active {
            return Err(JournalError::validation("status", "only active entries can be edited"));
        }
        require_positive_opt("target_price", update.target_price)?;

        let entry = sqlx::query_as::<_, StockPoolEntry>(
            r#"
            UPDATE stock_pools
            SET stock_name = ?, add_reason = ?, target_price = ?, updated_at = datetime('now')
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(clean_optional(update.stock_name).or(existing.stock_name))
        .bind(clean_optional(update.add_reason).or(existing.add_reason))
        .bind(update.target_price.or(existing.target_price))
        .bind(id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(entry)
    }

    /// Promote an active watch entry to buy-ready. The watch row is marked
    /// `moved` and a fresh active buy-ready row is inserted, atomically.
    pub async fn move_to_buy_ready(&self, id: i64, date: NaiveDate) -> Result<StockPoolEntry> {
        let entry = self.get_entry(id).await?;
        if entry.pool_type != PoolType::Watch || entry.status != PoolStatus::Active {
            return Err(JournalError::validation(
                "id",
                format!("entry {} is not an active watch entry", id),
            ));
        }
        self.ensure_not_active(&entry.stock_code, PoolType::BuyReady).await?;

        let mut tx = self.db.pool().begin().await?;

        sqlx::query("UPDATE stock_pools SET status = 'moved', updated_at = datetime('now') WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let moved = sqlx::query_as::<_, StockPoolEntry>(
            r#"
            INSERT INTO stock_pools (stock_code, stock_name, pool_type, status, add_reason, target_price, added_date)
            VALUES (?, ?, 'buy_ready', 'active', ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&entry.stock_code)
        .bind(&entry.stock_name)
        .bind(&entry.add_reason)
        .bind(entry.target_price)
        .bind(date)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!("Moved {} to buy-ready (entry {} -> {})", entry.stock_code, id, moved.id);
        Ok(moved)
    }

    /// Soft delete: the row stays as history with status `removed`
    pub async fn remove_entry(&self, id: i64) -> Result<StockPoolEntry> {
        let entry = self.get_entry(id).await?;
        if entry.status != PoolStatus::Active {
            return Err(JournalError::validation("status", "entry is no longer active"));
        }

        let entry = sqlx::query_as::<_, StockPoolEntry>(
            "UPDATE stock_pools SET status = 'removed', updated_at = datetime('now') WHERE id = ? RETURNING *",
        )
        .bind(id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(entry)
    }

    /// Every row ever recorded for a code, oldest first
    pub async fn history(&self, stock_code: &str) -> Result<Vec<StockPoolEntry>> {
        let code = normalize_stock_code(stock_code)?;
        let entries = sqlx::query_as::<_, StockPoolEntry>(
            "SELECT * FROM stock_pools WHERE stock_code = ? ORDER BY added_date, id",
        )
        .bind(&code)
        .fetch_all(self.db.pool())
        .await?;

        Ok(entries)
    }
}
