use crate::db::JournalDb;
use crate::error::{JournalError, Result};
use crate::models::{SectorData, SectorInput, SectorRanking, SectorStrength};
use crate::validation::clean_optional;
use chrono::NaiveDate;
use market_data::QuoteProvider;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Daily industry-sector snapshots and the rankings derived from them
pub struct SectorTracker {
    db: JournalDb,
    provider: Option<Arc<dyn QuoteProvider>>,
}

impl SectorTracker {
    pub fn new(db: JournalDb, provider: Option<Arc<dyn QuoteProvider>>) -> Self {
        Self { db, provider }
    }

    /// Upsert a batch of snapshots for `date` and recompute that date's
    /// rankings in the same transaction. Returns the new rankings.
    pub async fn upsert_snapshot(&self, date: NaiveDate, sectors: Vec<SectorInput>) -> Result<Vec<SectorRanking>> {
        if sectors.is_empty() {
            return Err(JournalError::validation("sectors", "at least one sector is required"));
        }
        for (i, s) in sectors.iter().enumerate() {
            if s.sector_name.trim().is_empty() {
                return Err(JournalError::validation(format!("sectors[{}].sector_name", i), "must not be empty"));
            }
            if !s.change_percent.is_finite() {
                return Err(JournalError::validation(format!("sectors[{}].change_percent", i), "must be a number"));
            }
        }

        let mut tx = self.db.pool().begin().await?;

        for s in &sectors {
            sqlx::query(
                r#"
                INSERT INTO sector_data (sector_name, data_date, change_percent, leading_stock, turnover)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (sector_name, data_date) DO UPDATE SET
                    change_percent = excluded.change_percent,
                    leading_stock = excluded.leading_stock,
                    turnover = excluded.turnover
                "#,
            )
            .bind(s.sector_name.trim())
            .bind(date)
            .bind(s.change_percent)
            .bind(clean_optional(s.leading_stock.clone()))
            .bind(s.turnover)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM sector_rankings WHERE ranking_date = ?")
            .bind(date)
            .execute(&mut *tx)
            .await?;

        let ordered: Vec<(String, f64)> = sqlx::query_as(
            r#"
            SELECT sector_name, change_percent FROM sector_data
            WHERE data_date = ?
            ORDER BY change_percent DESC, sector_name
            "#,
        )
        .bind(date)
        .fetch_all(&mut *tx)
        .await?;

        let mut rankings = Vec::with_capacity(ordered.len());
        for (rank, (name, change)) in ordered.into_iter().enumerate() {
            let ranking = sqlx::query_as::<_, SectorRanking>(
                r#"
                INSERT INTO sector_rankings (sector_name, ranking_date, rank, change_percent)
                VALUES (?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(&name)
            .bind(date)
            .bind(rank as i64 + 1)
            .bind(change)
            .fetch_one(&mut *tx)
            .await?;
            rankings.push(ranking);
        }

        tx.commit().await?;

        tracing::info!("Stored {} sector snapshots for {}", sectors.len(), date);
        Ok(rankings)
    }

    async fn latest_data_date(&self) -> Result<Option<NaiveDate>> {
        let date: Option<NaiveDate> = sqlx::query_scalar("SELECT MAX(data_date) FROM sector_data")
            .fetch_one(self.db.pool())
            .await?;
        Ok(date)
    }

    async fn latest_ranking_dates(&self, limit: i64) -> Result<Vec<NaiveDate>> {
        let dates: Vec<NaiveDate> = sqlx::query_scalar(
            "SELECT DISTINCT ranking_date FROM sector_rankings ORDER BY ranking_date DESC LIMIT ?",
        )
        .bind(limit.max(1))
        .fetch_all(self.db.pool())
        .await?;
        Ok(dates)
    }

    /// Snapshots for `date`, or for the most recent date when `None`
    pub async fn list_snapshots(&self, date: Option<NaiveDate>) -> Result<Vec<SectorData>> {
        let date = match date {
            Some(d) => d,
            None => match self.latest_data_date().await? {
                Some(d) => d,
                None => return Ok(Vec::new()),
            },
        };

        let rows = sqlx::query_as::<_, SectorData>(
            "SELECT * FROM sector_data WHERE data_date = ? ORDER BY change_percent DESC, sector_name",
        )
        .bind(date)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows)
    }

    /// Top `top` rankings for `date` (latest ranking date when `None`)
    pub async fn rankings(&self, date: Option<NaiveDate>, top: i64) -> Result<Vec<SectorRanking>> {
        let date = match date {
            Some(d) => d,
            None => match self.latest_ranking_dates(1).await?.first() {
                Some(d) => *d,
                None => return Ok(Vec::new()),
            },
        };

        let rows = sqlx::query_as::<_, SectorRanking>(
            "SELECT * FROM sector_rankings WHERE ranking_date = ? AND rank <= ? ORDER BY rank",
        )
        .bind(date)
        .bind(top.max(1))
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows)
    }

    /// One sector's rankings over the last `days` ranking dates, oldest first
    pub async fn history(&self, sector_name: &str, days: i64) -> Result<Vec<SectorRanking>> {
        let dates = self.latest_ranking_dates(days).await?;
        let Some(earliest) = dates.last() else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query_as::<_, SectorRanking>(
            r#"
            SELECT * FROM sector_rankings
            WHERE sector_name = ? AND ranking_date >= ?
            ORDER BY ranking_date
            "#,
        )
        .bind(sector_name.trim())
        .bind(*earliest)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows)
    }

    /// Sectors ranked within the top `top_n` on at least `min_count` of the
    /// last `lookback` ranking dates. Most consistent first.
    pub async fn strong_sectors(&self, top_n: i64, min_count: usize, lookback: i64) -> Result<Vec<SectorStrength>> {
        let dates = self.latest_ranking_dates(lookback).await?;
        let (Some(latest), Some(earliest)) = (dates.first().copied(), dates.last().copied()) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query_as::<_, SectorRanking>(
            r#"
            SELECT * FROM sector_rankings
            WHERE ranking_date >= ? AND rank <= ?
            ORDER BY ranking_date
            "#,
        )
        .bind(earliest)
        .bind(top_n.max(1))
        .fetch_all(self.db.pool())
        .await?;

        let mut by_sector: BTreeMap<String, SectorStrength> = BTreeMap::new();
        for row in rows {
            let entry = by_sector
                .entry(row.sector_name.clone())
                .or_insert_with(|| SectorStrength {
                    sector_name: row.sector_name.clone(),
                    appearances: 0,
                    best_rank: row.rank,
                    latest_rank: None,
                });
            entry.appearances += 1;
            entry.best_rank = entry.best_rank.min(row.rank);
            if row.ranking_date == latest {
                entry.latest_rank = Some(row.rank);
            }
        }

        let mut strong: Vec<SectorStrength> = by_sector
            .into_values()
            .filter(|s| s.appearances >= min_count.max(1))
            .collect();
        strong.sort_by(|a, b| {
            b.appearances
                .cmp(&a.appearances)
                .then(a.best_rank.cmp(&b.best_rank))
                .then_with(|| a.sector_name.cmp(&b.sector_name))
        });

        Ok(strong)
    }

    /// Pull the industry board from the provider and store it for `date`
    pub async fn refresh(&self, date: NaiveDate) -> Result<Vec<SectorRanking>> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| JournalError::ExternalApi("no market data provider configured".to_string()))?;

        let board = provider.fetch_sector_board().await?;
        if board.is_empty() {
            return Err(JournalError::ExternalApi(format!("{} returned an empty sector board", provider.name())));
        }

        let inputs = board
            .into_iter()
            .map(|q| SectorInput {
                sector_name: q.name,
                change_percent: q.change_percent,
                leading_stock: q.leading_stock,
                turnover: q.turnover,
            })
            .collect();

        self.upsert_snapshot(date, inputs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use market_data::{MarketDataError, Quote, SectorQuote};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn sector(name: &str, change: f64) -> SectorInput {
        SectorInput {
            sector_name: name.to_string(),
            change_percent: change,
            leading_stock: None,
            turnover: None,
        }
    }

    async fn setup() -> SectorTracker {
        SectorTracker::new(JournalDb::new("sqlite::memory:").await.unwrap(), None)
    }

    #[tokio::test]
    async fn test_rankings_follow_change_percent() {
        let tracker = setup().await;
        let rankings = tracker
            .upsert_snapshot(d(2025, 3, 3), vec![sector("Banks", 0.5), sector("Chips", 3.2), sector("Coal", -1.0)])
            .await
            .unwrap();
        let names: Vec<&str> = rankings.iter().map(|r| r.sector_name.as_str()).collect();
        assert_eq!(names, vec!["Chips", "Banks", "Coal"]);
        assert_eq!(rankings[0].rank, 1);

        // Re-upserting one sector re-ranks the whole date
        let rankings = tracker
            .upsert_snapshot(d(2025, 3, 3), vec![sector("Coal", 5.0)])
            .await
            .unwrap();
        assert_eq!(rankings.len(), 3);
        assert_eq!(rankings[0].sector_name, "Coal");

        assert_eq!(tracker.rankings(None, 2).await.unwrap().len(), 2);
        assert_eq!(tracker.list_snapshots(None).await.unwrap().len(), 3);
        assert!(tracker.list_snapshots(Some(d(2025, 3, 4))).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_strong_sectors_and_history() {
        let tracker = setup().await;
        tracker
            .upsert_snapshot(d(2025, 3, 3), vec![sector("Chips", 3.0), sector("Banks", 2.0), sector("Coal", 1.0)])
            .await
            .unwrap();
        tracker
            .upsert_snapshot(d(2025, 3, 4), vec![sector("Chips", 1.0), sector("Banks", 0.5), sector("Coal", 2.0)])
            .await
            .unwrap();
        tracker
            .upsert_snapshot(d(2025, 3, 5), vec![sector("Chips", 2.0), sector("Banks", -0.5), sector("Coal", 0.1)])
            .await
            .unwrap();

        let strong = tracker.strong_sectors(2, 2, 3).await.unwrap();
        let names: Vec<&str> = strong.iter().map(|s| s.sector_name.as_str()).collect();
        assert_eq!(names, vec!["Chips", "Coal"]);
        assert_eq!(strong[0].appearances, 3);
        assert_eq!(strong[0].latest_rank, Some(1));

        // Only the last two dates count
        let strong = tracker.strong_sectors(1, 1, 2).await.unwrap();
        let names: Vec<&str> = strong.iter().map(|s| s.sector_name.as_str()).collect();
        assert_eq!(names, vec!["Chips", "Coal"]);

        let history = tracker.history("Banks", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].ranking_date, d(2025, 3, 4));
        assert_eq!(history[1].rank, 3);
    }

    #[tokio::test]
    async fn test_rejects_empty_batch() {
        let tracker = setup().await;
        assert!(matches!(
            tracker.upsert_snapshot(d(2025, 3, 3), vec![]).await,
            Err(JournalError::Validation { .. })
        ));
        assert!(tracker.strong_sectors(5, 1, 5).await.unwrap().is_empty());
    }

    struct Board;

    #[async_trait]
    impl QuoteProvider for Board {
        async fn fetch_quotes(&self, _codes: &[String]) -> std::result::Result<Vec<Quote>, MarketDataError> {
            Ok(vec![])
        }

        async fn fetch_sector_board(&self) -> std::result::Result<Vec<SectorQuote>, MarketDataError> {
            Ok(vec![
                SectorQuote {
                    name: "Chips".to_string(),
                    change_percent: 2.5,
                    leading_stock: Some("SMIC".to_string()),
                    turnover: Some(3.1),
                },
                SectorQuote {
                    name: "Banks".to_string(),
                    change_percent: 0.2,
                    leading_stock: None,
                    turnover: None,
                },
            ])
        }

        fn name(&self) -> &str {
            "board"
        }
    }

    #[tokio::test]
    async fn test_refresh_from_provider() {
        let db = JournalDb::new("sqlite::memory:").await.unwrap();
        let tracker = SectorTracker::new(db, Some(Arc::new(Board)));
        let rankings = tracker.refresh(d(2025, 3, 3)).await.unwrap();
        assert_eq!(rankings.len(), 2);
        assert_eq!(rankings[0].sector_name, "Chips");

        let snapshots = tracker.list_snapshots(Some(d(2025, 3, 3))).await.unwrap();
        assert_eq!(snapshots[0].leading_stock.as_deref(), Some("SMIC"));

        let offline = setup().await;
        assert!(matches!(offline.refresh(d(2025, 3, 3)).await, Err(JournalError::ExternalApi(_))));
    }
}
