mod common;

use common::{init_tracing, ok_envelope, respond, ScriptedTransport, API_KEY, SECRET_KEY};
use reqwest::Method;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use venuelink::core::kernel::signer::sign;
use venuelink::core::kernel::{RateLimiter, RestClient, RestClientBuilder, RestClientConfig, RestExecutor};
use venuelink::ExchangeError;

fn executor(transport: Arc<ScriptedTransport>, signed: bool) -> RestExecutor {
    init_tracing();
    let config = RestClientConfig::new("https://api.test".to_string(), "bybit".to_string())
        .with_max_attempts(3)
        .with_backoff(Duration::from_secs(1), Duration::from_secs(30));
    let mut builder = RestClientBuilder::new(config).with_transport(transport);
    if signed {
        builder = builder.with_signer(common::signer());
    }
    builder.build().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_with_backoff() {
    let transport = ScriptedTransport::new(vec![
        respond(503, "Service Unavailable"),
        respond(503, "Service Unavailable"),
        ok_envelope(r#"{"list":[{"symbol":"BTCUSDT","lastPrice":"27150.50"}]}"#),
    ]);
    let rest = executor(transport.clone(), false);
    let start = Instant::now();

    let envelope = rest
        .get("/v5/market/tickers", &json!({"category": "linear"}), false)
        .await
        .unwrap();

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "waited {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "waited {:?}", elapsed);
    assert_eq!(transport.request_count(), 3);
    assert_eq!(rest.stats().retries(), 2);

    let price = envelope
        .get("result")
        .and_then(|r| r.get("list"))
        .and_then(|l| l.index(0))
        .and_then(|t| t.get("lastPrice"))
        .and_then(|p| p.as_decimal());
    assert_eq!(price, Some(Decimal::new(2_715_050, 2)));
}

#[tokio::test(start_paused = true)]
async fn test_venue_error_is_not_retried() {
    let transport = ScriptedTransport::new(vec![respond(
        200,
        r#"{"retCode":10001,"retMsg":"params error: symbol invalid","result":{},"time":1700000000000}"#,
    )]);
    let rest = executor(transport.clone(), false);

    let err = rest
        .get("/v5/market/tickers", &json!({"category": "linear", "symbol": "NOPE"}), false)
        .await
        .unwrap_err();

    match err {
        ExchangeError::ApiError { code, message } => {
            assert_eq!(code, 10001);
            assert_eq!(message, "params error: symbol invalid");
        }
        other => panic!("Expected ApiError, got {:?}", other),
    }
    assert_eq!(transport.request_count(), 1);
    assert_eq!(rest.stats().retries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_surface_transient_failure() {
    let transport = ScriptedTransport::new(vec![
        Err(ExchangeError::NetworkError("connection reset".to_string())),
        respond(502, "Bad Gateway"),
        respond(429, "Too Many Requests"),
    ]);
    let rest = executor(transport.clone(), false);

    let err = rest
        .get("/v5/market/time", &Value::Null, false)
        .await
        .unwrap_err();

    match &err {
        ExchangeError::TransientRequestFailure {
            attempts,
            last_error,
        } => {
            assert_eq!(*attempts, 3);
            assert!(last_error.contains("429"), "last error: {}", last_error);
        }
        other => panic!("Expected TransientRequestFailure, got {:?}", other),
    }
    assert!(!err.is_venue_error());
    assert_eq!(transport.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_client_errors_are_not_retried() {
    let transport = ScriptedTransport::new(vec![
        respond(403, r#"{"retCode":10003,"retMsg":"API key is invalid."}"#),
        respond(404, "Not Found"),
    ]);
    let rest = executor(transport.clone(), false);

    let first = rest.get("/v5/private", &Value::Null, false).await.unwrap_err();
    assert!(matches!(first, ExchangeError::ApiError { code: 10003, .. }));

    let second = rest.get("/v5/missing", &Value::Null, false).await.unwrap_err();
    assert!(matches!(second, ExchangeError::HttpStatus { status: 404, .. }));

    assert_eq!(transport.request_count(), 2);
}

#[tokio::test]
async fn test_signed_get_carries_valid_signature() {
    let transport = ScriptedTransport::new(vec![ok_envelope(r#"{"list":[]}"#)]);
    let rest = executor(transport.clone(), true);

    rest.get(
        "/v5/account/wallet-balance",
        &json!({"coin": "USDT", "accountType": "UNIFIED"}),
        true,
    )
    .await
    .unwrap();

    let request = &transport.requests()[0];
    let query = "accountType=UNIFIED&coin=USDT";
    assert_eq!(
        request.url,
        format!("https://api.test/v5/account/wallet-balance?{}", query)
    );
    assert_eq!(request.header("X-BAPI-API-KEY"), Some(API_KEY));
    assert_eq!(request.header("X-BAPI-RECV-WINDOW"), Some("5000"));

    let timestamp = request.header("X-BAPI-TIMESTAMP").unwrap();
    let expected = sign(
        SECRET_KEY.as_bytes(),
        &format!("{}{}5000{}", timestamp, API_KEY, query),
    )
    .unwrap();
    assert_eq!(request.header("X-BAPI-SIGN"), Some(expected.as_str()));
}

#[tokio::test]
async fn test_signed_post_signs_the_body() {
    let transport = ScriptedTransport::new(vec![ok_envelope(r#"{"orderId":"1"}"#)]);
    let rest = executor(transport.clone(), true);
    let body = json!({"category": "linear", "symbol": "BTCUSDT", "orderId": "1"});

    rest.execute(Method::POST, "/v5/order/cancel", &body, true)
        .await
        .unwrap();

    let request = &transport.requests()[0];
    let sent_body = request.body.as_deref().unwrap();
    assert_eq!(serde_json::from_str::<Value>(sent_body).unwrap(), body);
    assert_eq!(request.url, "https://api.test/v5/order/cancel");

    let timestamp = request.header("X-BAPI-TIMESTAMP").unwrap();
    let expected = sign(
        SECRET_KEY.as_bytes(),
        &format!("{}{}5000{}", timestamp, API_KEY, sent_body),
    )
    .unwrap();
    assert_eq!(request.header("X-BAPI-SIGN"), Some(expected.as_str()));
}

#[tokio::test]
async fn test_unsigned_call_carries_identity_headers_when_credentials_exist() {
    let transport = ScriptedTransport::new(vec![ok_envelope("{}"), ok_envelope("{}")]);

    executor(transport.clone(), true)
        .get("/v5/market/tickers", &json!({"category": "linear"}), false)
        .await
        .unwrap();
    executor(transport.clone(), false)
        .get("/v5/market/tickers", &json!({"category": "linear"}), false)
        .await
        .unwrap();

    let requests = transport.requests();
    let with_key = &requests[0];
    assert_eq!(with_key.header("X-BAPI-API-KEY"), Some(API_KEY));
    assert_eq!(with_key.header("X-BAPI-RECV-WINDOW"), Some("5000"));
    assert!(with_key.header("X-BAPI-TIMESTAMP").is_some());
    assert_eq!(with_key.header("X-BAPI-SIGN"), None);

    let anonymous = &requests[1];
    assert_eq!(anonymous.header("X-BAPI-API-KEY"), None);
    assert_eq!(anonymous.header("X-BAPI-SIGN"), None);
}

#[tokio::test]
async fn test_signed_call_without_credentials_fails_fast() {
    let transport = ScriptedTransport::new(vec![]);
    let rest = executor(transport.clone(), false);

    let err = rest
        .get("/v5/account/wallet-balance", &Value::Null, true)
        .await
        .unwrap_err();

    assert!(matches!(err, ExchangeError::ConfigError(_)));
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_calls_share_the_rate_window() {
    let transport = ScriptedTransport::new(vec![
        ok_envelope("{}"),
        ok_envelope("{}"),
        ok_envelope("{}"),
    ]);
    init_tracing();
    let config = RestClientConfig::new("https://api.test".to_string(), "bybit".to_string());
    let rest = RestClientBuilder::new(config)
        .with_transport(transport.clone())
        .with_rate_limiter(RateLimiter::new(2, Duration::from_secs(60)))
        .build()
        .unwrap();
    let start = Instant::now();

    let results = join_all((0..3).map(|_| rest.get("/v5/market/time", &Value::Null, false))).await;

    assert!(results.iter().all(Result::is_ok));
    assert!(start.elapsed() >= Duration::from_secs(60));
    assert_eq!(transport.request_count(), 3);
}

#[tokio::test]
async fn test_server_time_sync_sets_clock_offset() {
    let server_ms = chrono::Utc::now().timestamp_millis() + 5_000;
    let transport = ScriptedTransport::new(vec![respond(
        200,
        &format!(
            r#"{{"retCode":0,"retMsg":"OK","result":{{"timeSecond":"{}","timeNano":"0"}},"time":{}}}"#,
            server_ms / 1000,
            server_ms
        ),
    )]);
    let rest = executor(transport, false);

    let offset = rest.sync_server_time("/v5/market/time").await.unwrap();

    assert!((4_000..=6_000).contains(&offset), "offset {}", offset);
    assert_eq!(rest.clock_offset_ms(), offset);
}
