use perpbot::{Client, ExchangeGateway};

fn gateway(host: String) -> ExchangeGateway {
    let client = Client::new("test-key".into(), "test-secret".into(), host, 5000);
    ExchangeGateway::new(client, true, "BTCUSDT".into(), "test-key".into(), "test-secret".into())
}

#[tokio::test]
async fn startup_reset_tolerates_idempotent_ok_codes_on_every_step() {
    let mut server = mockito::Server::new_async().await;
    let _switch_mode = server
        .mock("POST", "/v5/position/switch-mode")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ret_code":130056,"ret_msg":"position mode not modified","result":null,"time":0}"#)
        .create_async()
        .await;
    let _auto_add_margin = server
        .mock("POST", "/v5/position/set-auto-add-margin")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ret_code":30076,"ret_msg":"auto add margin already in desired state","result":null,"time":0}"#)
        .expect(2)
        .create_async()
        .await;
    let _switch_isolated = server
        .mock("POST", "/v5/position/switch-isolated")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ret_code":30032,"ret_msg":"margin mode not modified","result":null,"time":0}"#)
        .create_async()
        .await;
    let _tpsl_mode = server
        .mock("POST", "/v5/position/set-tpsl-mode")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ret_code":130060,"ret_msg":"tpsl mode not modified","result":null,"time":0}"#)
        .create_async()
        .await;

    let gateway = gateway(server.url());
    gateway
        .reset_account_state()
        .await
        .expect("idempotent-ok codes at every step must not fail the startup sequence");
}

#[tokio::test]
async fn startup_reset_propagates_a_genuine_business_error() {
    let mut server = mockito::Server::new_async().await;
    let _switch_mode = server
        .mock("POST", "/v5/position/switch-mode")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ret_code":10004,"ret_msg":"invalid signature","result":null,"time":0}"#)
        .create_async()
        .await;

    let gateway = gateway(server.url());
    let err = gateway
        .reset_account_state()
        .await
        .expect_err("a non-idempotent-ok error must abort the startup sequence");
    assert!(!err.is_idempotent_ok());
}
