use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use trade_journal::holdings::summarize;
use trade_journal::validation::normalize_stock_code;
use trade_journal::*;

use crate::{today, ApiResponse, AppError, AppQuery, AppState};

#[derive(Deserialize)]
pub struct AsOfQuery {
    pub as_of: Option<NaiveDate>,
}

pub fn holding_routes() -> Router<AppState> {
    Router::new()
        .route("/api/holdings", get(list_holdings))
        .route("/api/holdings/alerts", get(get_alerts))
        .route("/api/holdings/:code", get(get_holding))
}

async fn list_holdings(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<AsOfQuery>,
) -> Result<Json<ApiResponse<HoldingsSummary>>, AppError> {
    let as_of = query.as_of.unwrap_or_else(today);
    let holdings = state.alerts().priced_holdings(as_of).await?;
    Ok(Json(ApiResponse::success(summarize(holdings))))
}

async fn get_holding(
    State(state): State<AppState>,
    Path(code): Path<String>,
    AppQuery(query): AppQuery<AsOfQuery>,
) -> Result<Json<ApiResponse<Holding>>, AppError> {
    let as_of = query.as_of.unwrap_or_else(today);
    let code = normalize_stock_code(&code)?;
    let holding = state.holdings().get_holding(&code, as_of).await?;
    let price = state
        .prices()
        .latest_price(&code, as_of)
        .await?
        .map(|p| p.close_price);
    Ok(Json(ApiResponse::success(holding.with_price(price))))
}

/// Evaluate every active strategy against current holdings
async fn get_alerts(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<AsOfQuery>,
) -> Result<Json<ApiResponse<AlertReport>>, AppError> {
    let as_of = query.as_of.unwrap_or_else(today);
    let report = state.alerts().evaluate_active(as_of).await?;
    Ok(Json(ApiResponse::success(report)))
}
