use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TradeType {
    Buy,
    Sell,
}

/// What to do with an open position. Used by strategy rules, alerts and
/// review decisions alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PositionAction {
    Hold,
    SellAll,
    SellPartial,
}

impl PositionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::SellAll => "sell_all",
            Self::SellPartial => "sell_partial",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hold" => Some(Self::Hold),
            "sell_all" => Some(Self::SellAll),
            "sell_partial" => Some(Self::SellPartial),
            _ => None,
        }
    }
}

// ======== Trades ========

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TradeRecord {
    pub id: i64,
    pub stock_code: String,
    pub stock_name: Option<String>,
    pub trade_type: TradeType,
    pub price: f64,
    pub quantity: i64,
    pub trade_date: NaiveDate,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub stop_loss_price: Option<f64>,
    pub take_profit_ratio: Option<f64>,
    pub sell_ratio: Option<f64>,
    pub original_record_id: Option<i64>,
    pub is_corrected: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeInput {
    pub stock_code: String,
    #[serde(default)]
    pub stock_name: Option<String>,
    pub trade_type: TradeType,
    pub price: f64,
    pub quantity: i64,
    pub trade_date: NaiveDate,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub stop_loss_price: Option<f64>,
    #[serde(default)]
    pub take_profit_ratio: Option<f64>,
    #[serde(default)]
    pub sell_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TradeFilter {
    pub stock_code: Option<String>,
    pub trade_type: Option<TradeType>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub include_corrected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: usize,
    pub buy_count: usize,
    pub sell_count: usize,
    pub total_buy_amount: f64,
    pub total_sell_amount: f64,
    pub closing_sells: usize,
    pub winning_sells: usize,
    pub losing_sells: usize,
    pub win_rate: f64,
    pub total_realized_pnl: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRowError {
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    pub errors: Vec<ImportRowError>,
}

// ======== Holdings ========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub stock_code: String,
    pub stock_name: Option<String>,
    pub quantity: i64,
    pub avg_buy_price: f64,
    pub total_cost: f64,
    pub first_buy_date: NaiveDate,
    pub holding_days: i64,
    pub current_price: Option<f64>,
    pub market_value: Option<f64>,
    pub profit_loss: Option<f64>,
    pub profit_loss_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingsSummary {
    pub total_positions: usize,
    pub total_cost: f64,
    pub total_market_value: f64,
    pub total_profit_loss: f64,
    pub holdings: Vec<Holding>,
}

// ======== Reviews ========

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReviewRecord {
    pub id: i64,
    pub stock_code: String,
    pub stock_name: Option<String>,
    pub review_date: NaiveDate,
    pub price_up_score: i64,
    pub bbi_score: i64,
    pub volume_score: i64,
    pub trend_score: i64,
    pub j_score: i64,
    pub total_score: i64,
    pub decision: PositionAction,
    pub reason: Option<String>,
    pub analysis: Option<String>,
    pub holding_days: Option<i64>,
    pub buy_price: Option<f64>,
    pub current_price: Option<f64>,
    pub floating_profit_ratio: Option<f64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewInput {
    pub stock_code: String,
    #[serde(default)]
    pub stock_name: Option<String>,
    pub review_date: NaiveDate,
    #[serde(default)]
    pub price_up_score: i64,
    #[serde(default)]
    pub bbi_score: i64,
    #[serde(default)]
    pub volume_score: i64,
    #[serde(default)]
    pub trend_score: i64,
    #[serde(default)]
    pub j_score: i64,
    pub decision: PositionAction,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub analysis: Option<String>,
    #[serde(default)]
    pub holding_days: Option<i64>,
    #[serde(default)]
    pub buy_price: Option<f64>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub floating_profit_ratio: Option<f64>,
}

impl ReviewInput {
    pub fn total_score(&self) -> i64 {
        self.price_up_score + self.bbi_score + self.volume_score + self.trend_score + self.j_score
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewFilter {
    pub stock_code: Option<String>,
    pub decision: Option<PositionAction>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

// ======== Stock pool ========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PoolType {
    Watch,
    BuyReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PoolStatus {
    Active,
    Moved,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockPoolEntry {
    pub id: i64,
    pub stock_code: String,
    pub stock_name: Option<String>,
    pub pool_type: PoolType,
    pub status: PoolStatus,
    pub add_reason: Option<String>,
    pub target_price: Option<f64>,
    pub added_date: NaiveDate,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntryInput {
    pub stock_code: String,
    #[serde(default)]
    pub stock_name: Option<String>,
    pub pool_type: PoolType,
    #[serde(default)]
    pub add_reason: Option<String>,
    #[serde(default)]
    pub target_price: Option<f64>,
    pub added_date: NaiveDate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolEntryUpdate {
    pub stock_name: Option<String>,
    pub add_reason: Option<String>,
    pub target_price: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolFilter {
    pub pool_type: Option<PoolType>,
    pub status: Option<PoolStatus>,
}

// ======== Prices ========

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockPrice {
    pub id: i64,
    pub stock_code: String,
    pub stock_name: Option<String>,
    pub price_date: NaiveDate,
    pub close_price: f64,
    pub change_percent: Option<f64>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceInput {
    pub stock_code: String,
    #[serde(default)]
    pub stock_name: Option<String>,
    pub price_date: NaiveDate,
    pub close_price: f64,
    #[serde(default)]
    pub change_percent: Option<f64>,
}

// ======== Sectors ========

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SectorData {
    pub id: i64,
    pub sector_name: String,
    pub data_date: NaiveDate,
    pub change_percent: f64,
    pub leading_stock: Option<String>,
    pub turnover: Option<f64>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorInput {
    pub sector_name: String,
    pub change_percent: f64,
    #[serde(default)]
    pub leading_stock: Option<String>,
    #[serde(default)]
    pub turnover: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SectorRanking {
    pub id: i64,
    pub sector_name: String,
    pub ranking_date: NaiveDate,
    pub rank: i64,
    pub change_percent: f64,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorStrength {
    pub sector_name: String,
    pub appearances: usize,
    pub best_rank: i64,
    pub latest_rank: Option<i64>,
}

// ======== Case studies ========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CaseType {
    Success,
    Failure,
    Lesson,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseStudy {
    pub id: i64,
    pub title: String,
    pub stock_code: Option<String>,
    pub stock_name: Option<String>,
    pub case_type: CaseType,
    pub tags: Vec<String>,
    pub content: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseInput {
    pub title: String,
    #[serde(default)]
    pub stock_code: Option<String>,
    #[serde(default)]
    pub stock_name: Option<String>,
    pub case_type: CaseType,
    #[serde(default)]
    pub tags: Vec<String>,
    pub content: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseFilter {
    pub keyword: Option<String>,
    pub tag: Option<String>,
    pub case_type: Option<CaseType>,
}

// ======== Pagination ========

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageRequest {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
        }
    }

    /// Page number clamped to >= 1
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size clamped to 1..=MAX_PER_PAGE
    pub fn per_page(&self) -> u32 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() as i64 - 1) * self.per_page() as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: &PageRequest) -> Self {
        let per_page = request.per_page();
        let pages = ((total.max(0) as u64 + per_page as u64 - 1) / per_page as u64) as u32;
        Self {
            items,
            total,
            page: request.page(),
            per_page,
            pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_clamps() {
        let req = PageRequest::new(0, 500);
        assert_eq!(req.page(), 1);
        assert_eq!(req.per_page(), MAX_PER_PAGE);
        assert_eq!(req.offset(), 0);

        let req = PageRequest::default();
        assert_eq!(req.per_page(), DEFAULT_PER_PAGE);

        let req = PageRequest::new(3, 10);
        assert_eq!(req.offset(), 20);
    }

    #[test]
    fn test_page_count_rounds_up() {
        let page: Page<i32> = Page::new(vec![], 41, &PageRequest::new(1, 20));
        assert_eq!(page.pages, 3);

        let empty: Page<i32> = Page::new(vec![], 0, &PageRequest::default());
        assert_eq!(empty.pages, 0);
    }

    #[test]
    fn test_review_total_score() {
        let input = ReviewInput {
            stock_code: "600519".to_string(),
            stock_name: None,
            review_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            price_up_score: 1,
            bbi_score: 1,
            volume_score: 0,
            trend_score: 1,
            j_score: 0,
            decision: PositionAction::Hold,
            reason: None,
            analysis: None,
            holding_days: None,
            buy_price: None,
            current_price: None,
            floating_profit_ratio: None,
        };
        assert_eq!(input.total_score(), 3);
    }

    #[test]
    fn test_position_action_round_trip_names() {
        for action in [PositionAction::Hold, PositionAction::SellAll, PositionAction::SellPartial] {
            assert_eq!(PositionAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(PositionAction::parse("buy"), None);
    }
}
