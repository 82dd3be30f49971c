use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use trade_journal::*;

use crate::{today, ApiResponse, AppError, AppJson, AppQuery, AppState};

#[derive(Deserialize)]
pub struct PriceQuery {
    /// Exact date; without it the latest cached close is returned
    pub date: Option<NaiveDate>,
}

#[derive(Deserialize, Default)]
pub struct RefreshRequest {
    /// Defaults to every open holding
    #[serde(default)]
    pub codes: Option<Vec<String>>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

pub fn price_routes() -> Router<AppState> {
    Router::new()
        .route("/api/prices", post(upsert_price))
        .route("/api/prices/refresh", post(refresh_prices))
        .route("/api/prices/:code", get(get_price))
}

async fn upsert_price(
    State(state): State<AppState>,
    AppJson(input): AppJson<PriceInput>,
) -> Result<(StatusCode, Json<ApiResponse<StockPrice>>), AppError> {
    let price = state.prices().upsert_price(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::with_message(price, "Price saved"))))
}

async fn get_price(
    State(state): State<AppState>,
    Path(code): Path<String>,
    AppQuery(query): AppQuery<PriceQuery>,
) -> Result<Json<ApiResponse<StockPrice>>, AppError> {
    let prices = state.prices();
    let price = match query.date {
        Some(date) => prices.get_price(&code, date).await?,
        None => prices
            .latest_price(&code, today())
            .await?
            .ok_or_else(|| JournalError::not_found("Price", &code))?,
    };
    Ok(Json(ApiResponse::success(price)))
}

async fn refresh_prices(
    State(state): State<AppState>,
    request: Option<AppJson<RefreshRequest>>,
) -> Result<Json<ApiResponse<Vec<StockPrice>>>, AppError> {
    let request = request.map(|AppJson(r)| r).unwrap_or_default();
    let date = request.date.unwrap_or_else(today);

    let codes = match request.codes {
        Some(codes) => codes,
        None => state
            .holdings()
            .get_holdings(date)
            .await?
            .into_iter()
            .map(|h| h.stock_code)
            .collect(),
    };

    let stored = state.prices().refresh(&codes, date).await?;
    let message = format!("Refreshed {} of {} codes", stored.len(), codes.len());
    Ok(Json(ApiResponse::with_message(stored, message)))
}
