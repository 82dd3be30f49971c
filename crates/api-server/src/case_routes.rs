use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use trade_journal::*;

use crate::{ApiResponse, AppError, AppJson, AppQuery, AppState};

#[derive(Deserialize)]
pub struct CaseListQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub keyword: Option<String>,
    pub tag: Option<String>,
    pub case_type: Option<CaseType>,
}

pub fn case_routes() -> Router<AppState> {
    Router::new()
        .route("/api/cases", get(list_cases).post(create_case))
        .route("/api/cases/:id", get(get_case).put(update_case).delete(delete_case))
}

async fn list_cases(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<CaseListQuery>,
) -> Result<Json<ApiResponse<Page<CaseStudy>>>, AppError> {
    let filter = CaseFilter {
        keyword: query.keyword,
        tag: query.tag,
        case_type: query.case_type,
    };
    let page = PageRequest {
        page: query.page,
        per_page: query.per_page,
    };
    Ok(Json(ApiResponse::success(state.cases().list_cases(&filter, &page).await?)))
}

async fn create_case(
    State(state): State<AppState>,
    AppJson(input): AppJson<CaseInput>,
) -> Result<(StatusCode, Json<ApiResponse<CaseStudy>>), AppError> {
    let case = state.cases().create_case(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::with_message(case, "Case saved"))))
}

async fn get_case(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<CaseStudy>>, AppError> {
    Ok(Json(ApiResponse::success(state.cases().get_case(id).await?)))
}

async fn update_case(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    AppJson(input): AppJson<CaseInput>,
) -> Result<Json<ApiResponse<CaseStudy>>, AppError> {
    let case = state.cases().update_case(id, input).await?;
    Ok(Json(ApiResponse::with_message(case, "Case updated")))
}

async fn delete_case(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    state.cases().delete_case(id).await?;
    Ok(Json(ApiResponse::with_message(serde_json::json!({ "id": id }), "Case deleted")))
}
