pub mod alerts;
pub mod calendar;
pub mod cases;
pub mod csv_io;
pub mod db;
pub mod error;
pub mod evaluator;
pub mod holdings;
pub mod models;
pub mod prices;
pub mod reviews;
pub mod sectors;
pub mod stock_pool;
pub mod strategies;
pub mod trades;
pub mod validation;

pub use alerts::{AlertReport, AlertService};
pub use calendar::TradingCalendar;
pub use cases::CaseLibrary;
pub use db::JournalDb;
pub use error::JournalError;
pub use evaluator::{HoldingAlert, StrategyEvaluator};
pub use holdings::HoldingsManager;
pub use models::*;
pub use prices::PriceBook;
pub use reviews::ReviewJournal;
pub use sectors::SectorTracker;
pub use stock_pool::StockPoolManager;
pub use strategies::{StrategyInput, StrategyManager, StrategyRule, TradingStrategy};
pub use trades::TradeLogger;
