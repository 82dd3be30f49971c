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
pub struct StrategyListQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Deserialize)]
pub struct EvaluateQuery {
    pub as_of: Option<NaiveDate>,
}

pub fn strategy_routes() -> Router<AppState> {
    Router::new()
        .route("/api/strategies", get(list_strategies).post(create_strategy))
        .route(
            "/api/strategies/:id",
            get(get_strategy).put(update_strategy).delete(delete_strategy),
        )
        .route("/api/strategies/:id/activate", post(activate_strategy))
        .route("/api/strategies/:id/deactivate", post(deactivate_strategy))
        .route("/api/strategies/:id/evaluate", post(evaluate_strategy))
}

async fn list_strategies(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<StrategyListQuery>,
) -> Result<Json<ApiResponse<Vec<TradingStrategy>>>, AppError> {
    let strategies = state.strategies().list_strategies(query.active_only).await?;
    Ok(Json(ApiResponse::success(strategies)))
}

async fn create_strategy(
    State(state): State<AppState>,
    AppJson(input): AppJson<StrategyInput>,
) -> Result<(StatusCode, Json<ApiResponse<TradingStrategy>>), AppError> {
    let strategy = state.strategies().create_strategy(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::with_message(strategy, "Strategy created"))))
}

async fn get_strategy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<TradingStrategy>>, AppError> {
    Ok(Json(ApiResponse::success(state.strategies().get_strategy(id).await?)))
}

async fn update_strategy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    AppJson(input): AppJson<StrategyInput>,
) -> Result<Json<ApiResponse<TradingStrategy>>, AppError> {
    let strategy = state.strategies().update_strategy(id, input).await?;
    Ok(Json(ApiResponse::with_message(strategy, "Strategy updated")))
}

async fn delete_strategy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    state.strategies().delete_strategy(id).await?;
    Ok(Json(ApiResponse::with_message(serde_json::json!({ "id": id }), "Strategy deleted")))
}

async fn activate_strategy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<TradingStrategy>>, AppError> {
    let strategy = state.strategies().set_active(id, true).await?;
    Ok(Json(ApiResponse::with_message(strategy, "Strategy activated")))
}

async fn deactivate_strategy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<TradingStrategy>>, AppError> {
    let strategy = state.strategies().set_active(id, false).await?;
    Ok(Json(ApiResponse::with_message(strategy, "Strategy deactivated")))
}

/// Explicit trigger for one strategy; inactive strategies report no alerts
async fn evaluate_strategy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    AppQuery(query): AppQuery<EvaluateQuery>,
) -> Result<Json<ApiResponse<AlertReport>>, AppError> {
    let as_of = query.as_of.unwrap_or_else(today);
    let report = state.alerts().evaluate_strategy(id, as_of).await?;
    Ok(Json(ApiResponse::success(report)))
}
