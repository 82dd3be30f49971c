use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use trade_journal::*;

use crate::{ApiResponse, AppError, AppJson, AppQuery, AppState};

#[derive(Deserialize)]
pub struct ReviewListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub stock_code: Option<String>,
    pub decision: Option<PositionAction>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl ReviewListQuery {
    fn filter(&self) -> ReviewFilter {
        ReviewFilter {
            stock_code: self.stock_code.clone(),
            decision: self.decision,
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/api/reviews", get(list_reviews).post(create_review))
        .route("/api/reviews/export", get(export_reviews))
        .route("/api/reviews/:id", get(get_review).put(update_review).delete(delete_review))
}

async fn list_reviews(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ReviewListQuery>,
) -> Result<Json<ApiResponse<Page<ReviewRecord>>>, AppError> {
    let page = PageRequest {
        page: query.page,
        per_page: query.per_page,
    };
    let reviews = state.reviews().list_reviews(&query.filter(), &page).await?;
    Ok(Json(ApiResponse::success(reviews)))
}

async fn create_review(
    State(state): State<AppState>,
    AppJson(input): AppJson<ReviewInput>,
) -> Result<(StatusCode, Json<ApiResponse<ReviewRecord>>), AppError> {
    let review = state.reviews().create_review(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::with_message(review, "Review saved"))))
}

async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<ReviewRecord>>, AppError> {
    Ok(Json(ApiResponse::success(state.reviews().get_review(id).await?)))
}

async fn update_review(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    AppJson(input): AppJson<ReviewInput>,
) -> Result<Json<ApiResponse<ReviewRecord>>, AppError> {
    let review = state.reviews().update_review(id, input).await?;
    Ok(Json(ApiResponse::with_message(review, "Review updated")))
}

async fn delete_review(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    state.reviews().delete_review(id).await?;
    Ok(Json(ApiResponse::with_message(serde_json::json!({ "id": id }), "Review deleted")))
}

async fn export_reviews(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ReviewListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let csv = state.reviews().export_csv(&query.filter()).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"reviews.csv\""),
        ],
        csv,
    ))
}
