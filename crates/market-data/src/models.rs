use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Spot quote for a single stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub code: String,
    pub name: String,
    pub price: f64,
    pub change_percent: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

/// One row of the industry-board table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorQuote {
    pub name: String,
    /// Daily change in percent (2.5 means +2.5%)
    pub change_percent: f64,
    pub leading_stock: Option<String>,
    pub turnover: Option<f64>,
}
