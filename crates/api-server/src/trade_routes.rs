use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use trade_journal::*;

use crate::{ApiResponse, AppError, AppJson, AppQuery, AppState};

#[derive(Deserialize)]
pub struct TradeListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub stock_code: Option<String>,
    pub trade_type: Option<TradeType>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub include_corrected: bool,
}

impl TradeListQuery {
    fn filter(&self) -> TradeFilter {
        TradeFilter {
            stock_code: self.stock_code.clone(),
            trade_type: self.trade_type,
            start_date: self.start_date,
            end_date: self.end_date,
            include_corrected: self.include_corrected,
        }
    }

    fn page(&self) -> PageRequest {
        PageRequest {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

pub fn trade_routes() -> Router<AppState> {
    Router::new()
        .route("/api/trades", get(list_trades).post(create_trade))
        .route("/api/trades/stats", get(get_stats))
        .route("/api/trades/export", get(export_trades))
        .route("/api/trades/import", post(import_trades))
        .route("/api/trades/:id", get(get_trade).put(update_trade).delete(delete_trade))
        .route("/api/trades/:id/correct", post(correct_trade))
}

async fn list_trades(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<TradeListQuery>,
) -> Result<Json<ApiResponse<Page<TradeRecord>>>, AppError> {
    let page = state.trades().list_trades(&query.filter(), &query.page()).await?;
    Ok(Json(ApiResponse::success(page)))
}

async fn create_trade(
    State(state): State<AppState>,
    AppJson(input): AppJson<TradeInput>,
) -> Result<(StatusCode, Json<ApiResponse<TradeRecord>>), AppError> {
    let record = state.trades().log_trade(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::with_message(record, "Trade recorded"))))
}

async fn get_trade(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<TradeRecord>>, AppError> {
    let record = state.trades().get_trade(id).await?;
    Ok(Json(ApiResponse::success(record)))
}

async fn update_trade(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    AppJson(input): AppJson<TradeInput>,
) -> Result<Json<ApiResponse<TradeRecord>>, AppError> {
    let record = state.trades().update_trade(id, input).await?;
    Ok(Json(ApiResponse::with_message(record, "Trade updated")))
}

async fn delete_trade(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    state.trades().delete_trade(id).await?;
    Ok(Json(ApiResponse::with_message(serde_json::json!({ "id": id }), "Trade deleted")))
}

async fn correct_trade(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    AppJson(input): AppJson<TradeInput>,
) -> Result<(StatusCode, Json<ApiResponse<TradeRecord>>), AppError> {
    let record = state.trades().correct_trade(id, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(record, format!("Trade {} corrected", id))),
    ))
}

async fn get_stats(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<TradeListQuery>,
) -> Result<Json<ApiResponse<TradeStats>>, AppError> {
    let stats = state.trades().get_stats(&query.filter()).await?;
    Ok(Json(ApiResponse::success(stats)))
}

async fn export_trades(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<TradeListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let csv = state.trades().export_csv(&query.filter()).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"trades.csv\""),
        ],
        csv,
    ))
}

/// Body is the raw CSV text
async fn import_trades(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<ApiResponse<ImportReport>>, AppError> {
    let report = state.trades().import_csv(&body).await?;
    let message = format!("Imported {} trades, {} rows rejected", report.imported, report.errors.len());
    Ok(Json(ApiResponse::with_message(report, message)))
}
