//! Router-level tests: requests go through the full middleware stack
//! against an in-memory journal.

use api_server::{build_router, AppState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use trade_journal::{JournalDb, TradingCalendar};

async fn test_app() -> Router {
    let db = JournalDb::new("sqlite::memory:").await.unwrap();
    build_router(AppState::new(db, TradingCalendar::new(), None), None)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn buy(code: &str, price: f64, quantity: i64, date: &str) -> Value {
    json!({
        "stock_code": code,
        "stock_name": "Test Co",
        "trade_type": "buy",
        "price": price,
        "quantity": quantity,
        "trade_date": date,
    })
}

#[tokio::test]
async fn test_health_and_headers() {
    let app = test_app().await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .header("x-request-id", "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "abc-123");
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");

    let (_, json) = send(&app, "GET", "/api/health", None).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["database"], true);
    assert_eq!(json["data"]["market_data"], Value::Null);
}

#[tokio::test]
async fn test_trade_lifecycle() {
    let app = test_app().await;

    let (status, json) = send(&app, "POST", "/api/trades", Some(buy("600519", 10.0, 300, "2025-03-03"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = json["data"]["id"].as_i64().unwrap();

    // Selling more than held is rejected and names the field
    let oversell = json!({
        "stock_code": "600519", "trade_type": "sell", "price": 11.0,
        "quantity": 500, "trade_date": "2025-03-04"
    });
    let (status, json) = send(&app, "POST", "/api/trades", Some(oversell)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(json["error"]["field"], "quantity");

    let (status, json) = send(
        &app,
        "POST",
        &format!("/api/trades/{}/correct", id),
        Some(buy("600519", 10.5, 300, "2025-03-03")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["original_record_id"], id);

    let (_, json) = send(&app, "GET", "/api/trades", None).await;
    assert_eq!(json["data"]["total"], 1);
    let (_, json) = send(&app, "GET", "/api/trades?include_corrected=true", None).await;
    assert_eq!(json["data"]["total"], 2);

    let (status, json) = send(&app, "GET", "/api/trades/9999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");

    let (status, json) = send(&app, "GET", "/api/trades/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["buy_count"], 1);
}

#[tokio::test]
async fn test_malformed_body_uses_error_envelope() {
    let app = test_app().await;
    let bad = json!({"stock_code": "600519", "trade_type": "short", "price": 1.0, "quantity": 1, "trade_date": "2025-03-03"});
    let (status, json) = send(&app, "POST", "/api/trades", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_csv_import_and_export() {
    let app = test_app().await;
    let csv = "stock_code,trade_type,price,quantity,trade_date\n\
               600519,buy,10,100,2025-03-03\n\
               600519,sell,11,500,2025-03-04\n\
               000001,buy,5,200,2025-03-04\n";

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/trades/import")
                .header("content-type", "text/csv")
                .body(Body::from(csv))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["data"]["imported"], 2);
    assert_eq!(json["data"]["errors"][0]["line"], 3);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/trades/export").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"].to_str().unwrap().starts_with("text/csv"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert_eq!(text.lines().count(), 3);
}

#[tokio::test]
async fn test_holdings_and_alerts() {
    let app = test_app().await;
    send(&app, "POST", "/api/trades", Some(buy("600519", 10.0, 300, "2025-03-03"))).await;
    send(&app, "POST", "/api/trades", Some(buy("000001", 10.0, 200, "2025-03-03"))).await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/prices",
        Some(json!({"stock_code": "600519", "price_date": "2025-03-07", "close_price": 11.2})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    send(
        &app,
        "POST",
        "/api/prices",
        Some(json!({"stock_code": "000001", "price_date": "2025-03-07", "close_price": 9.2})),
    )
    .await;

    let strategy = json!({
        "strategy_name": "Short swing",
        "rules": [
            {"day_range": [1, 5], "condition": "loss_exceed", "loss_threshold": -0.05, "action": "sell_all"},
            {"day_range": [1, 5], "condition": "profit_exceed", "profit_threshold": 0.10,
             "action": "sell_partial", "sell_ratio": 0.5}
        ]
    });
    let (status, json) = send(&app, "POST", "/api/strategies", Some(strategy)).await;
    assert_eq!(status, StatusCode::CREATED);
    let strategy_id = json["data"]["id"].as_i64().unwrap();

    let (_, json) = send(&app, "GET", "/api/holdings?as_of=2025-03-07", None).await;
    assert_eq!(json["data"]["total_positions"], 2);

    let (_, json) = send(&app, "GET", "/api/holdings/600519?as_of=2025-03-07", None).await;
    assert_eq!(json["data"]["holding_days"], 5);
    assert_eq!(json["data"]["current_price"], 11.2);

    let (status, json) = send(&app, "GET", "/api/holdings/alerts?as_of=2025-03-07", None).await;
    assert_eq!(status, StatusCode::OK);
    let alerts = json["data"]["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 2);
    let partial = alerts.iter().find(|a| a["stock_code"] == "600519").unwrap();
    assert_eq!(partial["alert_type"], "sell_partial");
    assert_eq!(partial["suggested_sell_quantity"], 150);
    let stop = alerts.iter().find(|a| a["stock_code"] == "000001").unwrap();
    assert_eq!(stop["alert_type"], "sell_all");
    assert_eq!(stop["suggested_sell_quantity"], 200);

    let (_, json) = send(&app, "POST", &format!("/api/strategies/{}/deactivate", strategy_id), None).await;
    assert_eq!(json["data"]["is_active"], false);
    let (_, json) = send(&app, "GET", "/api/holdings/alerts?as_of=2025-03-07", None).await;
    assert!(json["data"]["alerts"].as_array().unwrap().is_empty());

    let (status, json) = send(
        &app,
        "POST",
        &format!("/api/strategies/{}/evaluate?as_of=2025-03-07", strategy_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["data"]["alerts"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_rules_name_the_field() {
    let app = test_app().await;
    let strategy = json!({
        "strategy_name": "Broken",
        "rules": [{"day_range": [5], "condition": "loss_exceed", "loss_threshold": -0.05, "action": "sell_all"}]
    });
    let (status, json) = send(&app, "POST", "/api/strategies", Some(strategy)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["field"], "rules[0].day_range");
}

#[tokio::test]
async fn test_refresh_without_provider_is_unavailable() {
    let app = test_app().await;
    let (status, json) = send(&app, "POST", "/api/prices/refresh", Some(json!({"codes": ["600519"]}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], "EXTERNAL_API_ERROR");

    let (status, _) = send(&app, "POST", "/api/sectors/refresh", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_pool_reviews_sectors_cases() {
    let app = test_app().await;

    let (status, json) = send(
        &app,
        "POST",
        "/api/pool",
        Some(json!({"stock_code": "600519", "pool_type": "watch", "added_date": "2025-03-03"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = json["data"]["id"].as_i64().unwrap();
    let (status, json) = send(&app, "POST", &format!("/api/pool/{}/move?date=2025-03-05", id), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["pool_type"], "buy_ready");
    let (_, json) = send(&app, "GET", "/api/pool/history/600519", None).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 2);

    let review = json!({
        "stock_code": "600519", "review_date": "2025-03-05",
        "price_up_score": 1, "bbi_score": 1, "volume_score": 1, "decision": "hold"
    });
    let (status, json) = send(&app, "POST", "/api/reviews", Some(review.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["total_score"], 3);
    let (status, _) = send(&app, "POST", "/api/reviews", Some(review)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let sectors = json!({"date": "2025-03-05", "sectors": [
        {"sector_name": "Banks", "change_percent": 0.4},
        {"sector_name": "Chips", "change_percent": 2.1}
    ]});
    let (status, json) = send(&app, "POST", "/api/sectors", Some(sectors)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"][0]["sector_name"], "Chips");
    let (_, json) = send(&app, "GET", "/api/sectors/strong?top_n=1&min_count=1", None).await;
    assert_eq!(json["data"][0]["sector_name"], "Chips");
    let (_, json) = send(&app, "GET", "/api/sectors/Banks/history", None).await;
    assert_eq!(json["data"][0]["rank"], 2);

    let case = json!({"title": "Cut the loser", "case_type": "lesson", "tags": ["stop"], "content": "Sold at -5%."});
    let (status, json) = send(&app, "POST", "/api/cases", Some(case)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["tags"][0], "stop");
    let (_, json) = send(&app, "GET", "/api/cases?tag=stop", None).await;
    assert_eq!(json["data"]["total"], 1);
}
