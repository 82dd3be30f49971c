//! HTTP front end of the trade journal.

pub mod case_routes;
pub mod config;
pub mod holding_routes;
pub mod pool_routes;
pub mod price_routes;
pub mod request_id;
pub mod review_routes;
pub mod sector_routes;
pub mod security_headers;
pub mod strategy_routes;
pub mod trade_routes;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, FromRequest, FromRequestParts, State},
    http::{HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use market_data::{AkToolsClient, QuoteProvider};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use trade_journal::*;

use crate::config::ServerConfig;

/// Shared handler state. Services are thin wrappers over the pool, so
/// handlers build the one they need per request.
#[derive(Clone)]
pub struct AppState {
    pub db: JournalDb,
    pub calendar: Arc<TradingCalendar>,
    pub provider: Option<Arc<dyn QuoteProvider>>,
}

impl AppState {
    pub fn new(db: JournalDb, calendar: TradingCalendar, provider: Option<Arc<dyn QuoteProvider>>) -> Self {
        Self {
            db,
            calendar: Arc::new(calendar),
            provider,
        }
    }

    pub fn trades(&self) -> TradeLogger {
        TradeLogger::new(self.db.clone())
    }

    pub fn holdings(&self) -> HoldingsManager {
        HoldingsManager::new(self.db.clone(), self.calendar.clone())
    }

    pub fn reviews(&self) -> ReviewJournal {
        ReviewJournal::new(self.db.clone(), self.calendar.clone())
    }

    pub fn pool(&self) -> StockPoolManager {
        StockPoolManager::new(self.db.clone())
    }

    pub fn strategies(&self) -> StrategyManager {
        StrategyManager::new(self.db.clone())
    }

    pub fn alerts(&self) -> AlertService {
        AlertService::new(self.db.clone(), self.calendar.clone())
    }

    pub fn prices(&self) -> PriceBook {
        PriceBook::new(self.db.clone(), self.provider.clone())
    }

    pub fn sectors(&self) -> SectorTracker {
        SectorTracker::new(self.db.clone(), self.provider.clone())
    }

    pub fn cases(&self) -> CaseLibrary {
        CaseLibrary::new(self.db.clone())
    }
}

/// Local calendar date, the default "as of" for holdings and alerts
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: ErrorBody,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    field: Option<String>,
}

impl AppError {
    pub fn with_status(status: StatusCode, err: anyhow::Error) -> Self {
        let code = match status {
            StatusCode::BAD_REQUEST => "VALIDATION_ERROR",
            StatusCode::NOT_FOUND => "NOT_FOUND",
            StatusCode::SERVICE_UNAVAILABLE => "EXTERNAL_API_ERROR",
            _ => "INTERNAL_ERROR",
        };
        Self {
            status,
            code,
            message: err.to_string(),
            field: None,
        }
    }
}

impl From<JournalError> for AppError {
    fn from(err: JournalError) -> Self {
        let (status, code, field) = match &err {
            JournalError::Validation { field, .. } => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", Some(field.clone())),
            JournalError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
            JournalError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", None),
            JournalError::ExternalApi(_) => (StatusCode::SERVICE_UNAVAILABLE, "EXTERNAL_API_ERROR", None),
            JournalError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None),
        };
        Self {
            status,
            code,
            message: err.to_string(),
            field,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR",
            message: rejection.body_text(),
            field: None,
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR",
            message: rejection.body_text(),
            field: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("{} ({}): {}", self.status, self.code, self.message);
        } else {
            tracing::warn!("{} ({}): {}", self.status, self.code, self.message);
        }

        let body = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                code: self.code,
                message: self.message,
                field: self.field,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// JSON body extractor whose rejections use the error envelope
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// Query-string extractor whose rejections use the error envelope
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    database: bool,
    market_data: Option<String>,
    holidays: usize,
}

async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let database = state.db.ping().await.is_ok();
    Json(ApiResponse::success(HealthStatus {
        status: if database { "ok" } else { "degraded" },
        database,
        market_data: state.provider.as_ref().map(|p| p.name().to_string()),
        holidays: state.calendar.holiday_count(),
    }))
}

fn cors_layer(allowed_origins: Option<&[String]>) -> CorsLayer {
    let origin = match allowed_origins {
        Some(origins) => AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        ),
        None => AllowOrigin::any(),
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Full API router with middleware applied
pub fn build_router(state: AppState, allowed_origins: Option<&[String]>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .merge(trade_routes::trade_routes())
        .merge(review_routes::review_routes())
        .merge(holding_routes::holding_routes())
        .merge(strategy_routes::strategy_routes())
        .merge(pool_routes::pool_routes())
        .merge(sector_routes::sector_routes())
        .merge(case_routes::case_routes())
        .merge(price_routes::price_routes())
        .layer(middleware::from_fn(security_headers::security_headers_middleware))
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().make_span_with(|req: &axum::extract::Request| {
                    tracing::info_span!(
                        "http",
                        method = %req.method(),
                        path = %req.uri().path(),
                        request_id = tracing::field::Empty,
                    )
                }))
                .layer(cors_layer(allowed_origins)),
        )
        .with_state(state)
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=debug,sqlx=warn"));

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Open the database, load the calendar and wire up the market-data
/// provider described by `config`.
pub async fn build_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    if !JournalDb::exists(&config.database_url) {
        tracing::info!("Creating new journal database at {}", config.database_url);
    }
    let db = JournalDb::new(&config.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;

    let calendar = match &config.holidays_file {
        Some(path) => {
            let calendar = TradingCalendar::from_file(path)
                .with_context(|| format!("failed to load holidays from {}", path.display()))?;
            tracing::info!("Loaded {} holidays from {}", calendar.holiday_count(), path.display());
            calendar
        }
        None => {
            tracing::warn!("HOLIDAYS_FILE not set, only weekends are treated as non-trading days");
            TradingCalendar::new()
        }
    };

    let provider: Option<Arc<dyn QuoteProvider>> = match &config.market_data_url {
        Some(url) => {
            tracing::info!("Market data provider: AKTools at {}", url);
            Some(Arc::new(AkToolsClient::new(url.clone(), config.market_data_timeout)))
        }
        None => {
            tracing::warn!("MARKET_DATA_URL not set, price and sector refresh are disabled");
            None
        }
    };

    Ok(AppState::new(db, calendar, provider))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}

pub async fn run_server() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServerConfig::from_env()?;
    let state = build_state(&config).await?;
    let app = build_router(state, config.cors_allowed_origins.as_deref());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!("Trade journal API listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
