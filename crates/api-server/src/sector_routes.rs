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
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct RankingsQuery {
    pub date: Option<NaiveDate>,
    #[serde(default = "default_top")]
    pub top: i64,
}

#[derive(Deserialize)]
pub struct StrongQuery {
    #[serde(default = "default_top")]
    pub top_n: i64,
    #[serde(default = "default_min_count")]
    pub min_count: usize,
    #[serde(default = "default_lookback")]
    pub lookback: i64,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_days")]
    pub days: i64,
}

#[derive(Deserialize)]
pub struct SnapshotRequest {
    pub date: Option<NaiveDate>,
    pub sectors: Vec<SectorInput>,
}

fn default_top() -> i64 {
    10
}

fn default_min_count() -> usize {
    3
}

fn default_lookback() -> i64 {
    5
}

fn default_history_days() -> i64 {
    20
}

pub fn sector_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sectors", get(list_snapshots).post(upsert_snapshot))
        .route("/api/sectors/rankings", get(get_rankings))
        .route("/api/sectors/strong", get(get_strong))
        .route("/api/sectors/refresh", post(refresh_sectors))
        .route("/api/sectors/:name/history", get(get_history))
}

async fn list_snapshots(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<DateQuery>,
) -> Result<Json<ApiResponse<Vec<SectorData>>>, AppError> {
    Ok(Json(ApiResponse::success(state.sectors().list_snapshots(query.date).await?)))
}

async fn upsert_snapshot(
    State(state): State<AppState>,
    AppJson(request): AppJson<SnapshotRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Vec<SectorRanking>>>), AppError> {
    let date = request.date.unwrap_or_else(today);
    let rankings = state.sectors().upsert_snapshot(date, request.sectors).await?;
    let message = format!("Stored {} sectors for {}", rankings.len(), date);
    Ok((StatusCode::CREATED, Json(ApiResponse::with_message(rankings, message))))
}

async fn get_rankings(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<RankingsQuery>,
) -> Result<Json<ApiResponse<Vec<SectorRanking>>>, AppError> {
    Ok(Json(ApiResponse::success(
        state.sectors().rankings(query.date, query.top).await?,
    )))
}

/// Sectors that keep showing up near the top
async fn get_strong(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<StrongQuery>,
) -> Result<Json<ApiResponse<Vec<SectorStrength>>>, AppError> {
    let strong = state
        .sectors()
        .strong_sectors(query.top_n, query.min_count, query.lookback)
        .await?;
    Ok(Json(ApiResponse::success(strong)))
}

async fn refresh_sectors(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<DateQuery>,
) -> Result<Json<ApiResponse<Vec<SectorRanking>>>, AppError> {
    let date = query.date.unwrap_or_else(today);
    let rankings = state.sectors().refresh(date).await?;
    let message = format!("Refreshed {} sectors", rankings.len());
    Ok(Json(ApiResponse::with_message(rankings, message)))
}

async fn get_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
    AppQuery(query): AppQuery<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<SectorRanking>>>, AppError> {
    Ok(Json(ApiResponse::success(
        state.sectors().history(&name, query.days).await?,
    )))
}
