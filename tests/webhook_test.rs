//! Payment callback behavior: the webhook must always ack, and a failure
//! result must settle the order without side effects.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{failure_callback, success_callback, TestApp};

#[tokio::test]
async fn unmatched_callback_is_acked_and_dropped() {
    let app = TestApp::spawn().await;

    let (status, ack) = app
        .post(
            "/api/v1/mpesa/callback",
            None,
            success_callback("ws_CO_unknown", "NLJ7RT61SV", 850.0),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ResultCode"], 0);
}

#[tokio::test]
async fn malformed_callback_is_still_acked() {
    let app = TestApp::spawn().await;

    let (status, ack) = app
        .post("/api/v1/mpesa/callback", None, json!({ "unexpected": true }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ResultCode"], 0);
}

#[tokio::test]
async fn failure_callback_settles_the_order_as_failed() {
    let app = TestApp::spawn().await;
    let espresso = app.seed_menu_item("Espresso", 200, 300, true, 10).await;

    app.stub_oauth().await;
    app.stub_stk_push_accepted("ws_CO_wh_1").await;
    app.stub_stk_query_processing().await;

    let token = app.token_for("user-1");
    let (status, body) = app
        .post(
            "/api/v1/orders",
            Some(&token),
            json!({
                "phone_number": "0712345678",
                "items": [{ "menu_item_id": espresso.id, "size": "single", "quantity": 2 }]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let order_id = body["order"]["id"].as_i64().unwrap();

    let (status, _) = app
        .post(
            "/api/v1/mpesa/callback",
            None,
            failure_callback("ws_CO_wh_1", 1032, "Request cancelled by user"),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, details) = app
        .get(&format!("/api/v1/orders/{order_id}"), Some(&token))
        .await;
    assert_eq!(details["order"]["status"], "FAILED");

    // No receipt and no stock movement.
    let (status, _) = app
        .get(&format!("/api/v1/orders/{order_id}/receipt"), Some(&token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, menu) = app.get("/api/v1/menu", None).await;
    assert_eq!(menu.as_array().unwrap()[0]["portion_available"], 10);
}

#[tokio::test]
async fn duplicate_success_callbacks_are_idempotent() {
    let app = TestApp::spawn().await;
    let espresso = app.seed_menu_item("Espresso", 200, 300, true, 10).await;

    app.stub_oauth().await;
    app.stub_stk_push_accepted("ws_CO_wh_2").await;
    app.stub_stk_query_processing().await;

    let token = app.token_for("user-1");
    let (_, body) = app
        .post(
            "/api/v1/orders",
            Some(&token),
            json!({
                "phone_number": "0712345678",
                "items": [{ "menu_item_id": espresso.id, "size": "single", "quantity": 2 }]
            }),
        )
        .await;
    let order_id = body["order"]["id"].as_i64().unwrap();

    for _ in 0..2 {
        let (status, _) = app
            .post(
                "/api/v1/mpesa/callback",
                None,
                success_callback("ws_CO_wh_2", "NLJ7RT61SV", 400.0),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    // Stock decremented once, one receipt.
    let (_, menu) = app.get("/api/v1/menu", None).await;
    assert_eq!(menu.as_array().unwrap()[0]["portion_available"], 8);

    let (_, receipts) = app.get("/api/v1/orders/receipts", Some(&token)).await;
    assert_eq!(receipts.as_array().unwrap().len(), 1);

    let (_, details) = app
        .get(&format!("/api/v1/orders/{order_id}"), Some(&token))
        .await;
    assert_eq!(details["order"]["status"], "PAID");
}
