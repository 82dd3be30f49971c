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
pub struct MoveQuery {
    pub date: Option<NaiveDate>,
}

pub fn pool_routes() -> Router<AppState> {
    Router::new()
        .route("/api/pool", get(list_entries).post(add_entry))
        .route("/api/pool/history/:code", get(get_history))
        .route("/api/pool/:id", get(get_entry).put(update_entry).delete(remove_entry))
        .route("/api/pool/:id/move", post(move_entry))
}

async fn list_entries(
    State(state): State<AppState>,
    AppQuery(filter): AppQuery<PoolFilter>,
) -> Result<Json<ApiResponse<Vec<StockPoolEntry>>>, AppError> {
    Ok(Json(ApiResponse::success(state.pool().list_entries(&filter).await?)))
}

async fn add_entry(
    State(state): State<AppState>,
    AppJson(input): AppJson<PoolEntryInput>,
) -> Result<(StatusCode, Json<ApiResponse<StockPoolEntry>>), AppError> {
    let entry = state.pool().add_entry(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::with_message(entry, "Added to pool"))))
}

async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<StockPoolEntry>>, AppError> {
    Ok(Json(ApiResponse::success(state.pool().get_entry(id).await?)))
}

async fn update_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    AppJson(update): AppJson<PoolEntryUpdate>,
) -> Result<Json<ApiResponse<StockPoolEntry>>, AppError> {
    let entry = state.pool().update_entry(id, update).await?;
    Ok(Json(ApiResponse::with_message(entry, "Pool entry updated")))
}

async fn remove_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<StockPoolEntry>>, AppError> {
    let entry = state.pool().remove_entry(id).await?;
    Ok(Json(ApiResponse::with_message(entry, "Removed from pool")))
}

/// Watch list -> buy-ready list
async fn move_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    AppQuery(query): AppQuery<MoveQuery>,
) -> Result<(StatusCode, Json<ApiResponse<StockPoolEntry>>), AppError> {
    let date = query.date.unwrap_or_else(today);
    let entry = state.pool().move_to_buy_ready(id, date).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::with_message(entry, "Moved to buy-ready"))))
}

async fn get_history(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<Vec<StockPoolEntry>>>, AppError> {
    Ok(Json(ApiResponse::success(state.pool().history(&code).await?)))
}
