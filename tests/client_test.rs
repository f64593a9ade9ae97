use perpbot::{Client, GatewayError, API};
use std::collections::BTreeMap;
use std::time::Instant;

fn test_client(host: String) -> Client {
    Client::new("test-key".into(), "test-secret".into(), host, 5000)
}

#[tokio::test]
async fn get_public_decodes_successful_envelope() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/v5/market/kline")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ret_code":0,"ret_msg":"OK","result":{"list":[]},"time":0}"#)
        .create_async()
        .await;

    let client = test_client(server.url());
    let value: serde_json::Value = client
        .get_public(
            API::Market(perpbot::Market::Kline),
            BTreeMap::from([("symbol".to_string(), "BTCUSDT".to_string())]),
        )
        .await
        .expect("public request succeeds");
    assert_eq!(value["list"], serde_json::json!([]));
}

#[tokio::test]
async fn venue_error_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v5/account/wallet-balance")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ret_code":130049,"ret_msg":"insufficient balance","result":null,"time":0}"#)
        .expect(1)
        .create_async()
        .await;

    let client = test_client(server.url());
    let err = client
        .get_signed::<serde_json::Value>(API::Account(perpbot::Account::Balance), BTreeMap::new())
        .await
        .expect_err("non-transient venue error propagates");
    assert!(matches!(err, GatewayError::Venue(v) if v.code == 130049));
    mock.assert_async().await;
}

#[tokio::test]
async fn transient_venue_error_is_retried_then_succeeds() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("GET", "/v5/account/wallet-balance")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ret_code":130150,"ret_msg":"try again later","result":null,"time":0}"#)
        .expect(1)
        .create_async()
        .await;
    let succeeding = server
        .mock("GET", "/v5/account/wallet-balance")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ret_code":0,"ret_msg":"OK","result":{"ok":true},"time":0}"#)
        .expect(1)
        .create_async()
        .await;

    let client = test_client(server.url()).with_max_retries(1);
    let started = Instant::now();
    let value: serde_json::Value = client
        .get_signed(API::Account(perpbot::Account::Balance), BTreeMap::new())
        .await
        .expect("retrier absorbs the transient error and returns the second response");
    assert_eq!(value["ok"], true);
    // backoff for max_retries=1, attempt=0 is (1-0)^2+1 = 2 seconds.
    assert!(started.elapsed().as_secs_f64() >= 1.5);

    failing.assert_async().await;
    succeeding.assert_async().await;
}

#[tokio::test]
async fn transport_failure_surfaces_as_transport_error() {
    // Nothing is listening on this port; the request fails before it ever
    // reaches a mock server.
    let client = test_client("http://127.0.0.1:1".to_string()).with_max_retries(0);
    let err = client
        .get_public::<serde_json::Value>(API::Market(perpbot::Market::Kline), BTreeMap::new())
        .await
        .expect_err("connection refused surfaces as a transport error");
    assert!(matches!(err, GatewayError::Transport(_)));
}
