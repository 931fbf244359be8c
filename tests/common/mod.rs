#![allow(dead_code)]

//! Shared harness for the integration tests: an in-memory database, a
//! wiremock Daraja stand-in, and the real router wired exactly like main.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kahawa_api::auth::Claims;
use kahawa_api::config::{AppConfig, MpesaConfig};
use kahawa_api::entities::menu_item;
use kahawa_api::services::mpesa::MpesaClient;
use kahawa_api::services::notifications::PushNotifier;
use kahawa_api::services::orders::{OrderService, PollSettings};
use kahawa_api::services::receipts::ReceiptService;
use kahawa_api::{app_router, db, events, AppState};

pub const JWT_SECRET: &str = "integration-test-secret";

pub struct TestApp {
    pub router: Router,
    pub db: Arc<DatabaseConnection>,
    pub mpesa: MockServer,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let mpesa = MockServer::start().await;

        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: JWT_SECRET.to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            log_level: "warn".to_string(),
            log_json: false,
            auto_migrate: true,
            cors_allowed_origins: None,
            db_max_connections: 1,
            db_min_connections: 1,
            payment_poll_interval_secs: 5,
            payment_poll_budget_secs: 60,
            receipt_tax_minor: 0,
            notify_url: None,
            mpesa: MpesaConfig {
                base_url: mpesa.uri(),
                consumer_key: "test-consumer-key".to_string(),
                consumer_secret: "test-consumer-secret".to_string(),
                passkey: "test-passkey".to_string(),
                short_code: 174379,
                callback_url: "http://localhost/api/v1/mpesa/callback".to_string(),
                timeout_secs: 5,
            },
        };

        // Single connection: an in-memory sqlite per connection would give
        // each pooled handle its own empty database.
        let database = Arc::new(
            db::establish_connection_with_config(&db::DbConfig {
                url: config.database_url.clone(),
                max_connections: 1,
                min_connections: 1,
                ..db::DbConfig::default()
            })
            .await
            .expect("test database"),
        );
        db::run_migrations(&database).await.expect("schema");

        let (event_sender, event_receiver) = events::channel(64);
        tokio::spawn(events::process_events(event_receiver));

        let gateway = Arc::new(MpesaClient::new(config.mpesa.clone()).expect("mpesa client"));
        let receipts = Arc::new(ReceiptService::new(
            database.clone(),
            config.receipt_tax_minor,
        ));
        let orders = Arc::new(OrderService::new(
            database.clone(),
            gateway,
            receipts.clone(),
            Arc::new(PushNotifier::new(None)),
            event_sender,
            PollSettings {
                interval: Duration::from_millis(5),
                budget: Duration::from_millis(250),
            },
        ));

        let state = AppState {
            db: database.clone(),
            config: Arc::new(config),
            orders,
            receipts,
        };

        Self {
            router: app_router(state),
            db: database,
            mpesa,
        }
    }

    pub fn token_for(&self, user_id: &str) -> String {
        let claims = Claims {
            sub: user_id.to_string(),
            email: Some(format!("{user_id}@example.com")),
            name: Some("Test User".to_string()),
            exp: chrono::Utc::now().timestamp() + 3600,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("test token")
    }

    pub async fn seed_menu_item(
        &self,
        title: &str,
        single_price: i64,
        double_price: i64,
        available: bool,
        portions: i32,
    ) -> menu_item::Model {
        menu_item::ActiveModel {
            title: Set(title.to_string()),
            single_price: Set(single_price),
            double_price: Set(double_price),
            available: Set(available),
            portion_available: Set(portions),
            category: Set("espresso".to_string()),
            image_path: Set(None),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed menu item")
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, serde_json::Value) {
        self.request("GET", uri, token, None).await
    }

    pub async fn post(
        &self,
        uri: &str,
        token: Option<&str>,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        self.request("POST", uri, token, Some(body)).await
    }

    pub async fn put(
        &self,
        uri: &str,
        token: Option<&str>,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        self.request("PUT", uri, token, Some(body)).await
    }

    // ---- Daraja stubs ----

    pub async fn stub_oauth(&self) {
        Mock::given(method("GET"))
            .and(path("/oauth/v1/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "test-access-token",
                "expires_in": "3599",
            })))
            .mount(&self.mpesa)
            .await;
    }

    pub async fn stub_stk_push_accepted(&self, checkout_request_id: &str) {
        Mock::given(method("POST"))
            .and(path("/mpesa/stkpush/v1/processrequest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResponseCode": "0",
                "ResponseDescription": "Success. Request accepted for processing",
                "CustomerMessage": "Success. Request accepted for processing",
            })))
            .mount(&self.mpesa)
            .await;
    }

    pub async fn stub_stk_query_success(&self) {
        Mock::given(method("POST"))
            .and(path("/mpesa/stkpushquery/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ResponseCode": "0",
                "ResponseDescription": "The service request has been accepted successfully",
                "ResultCode": "0",
                "ResultDesc": "The service request is processed successfully.",
            })))
            .mount(&self.mpesa)
            .await;
    }

    pub async fn stub_stk_query_processing(&self) {
        Mock::given(method("POST"))
            .and(path("/mpesa/stkpushquery/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ResponseCode": "0",
                "ResultDesc": "The transaction is being processed",
            })))
            .mount(&self.mpesa)
            .await;
    }

    pub async fn stub_stk_query_failed(&self, result_code: &str, desc: &str) {
        Mock::given(method("POST"))
            .and(path("/mpesa/stkpushquery/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ResponseCode": "0",
                "ResultCode": result_code,
                "ResultDesc": desc,
            })))
            .mount(&self.mpesa)
            .await;
    }
}

/// Daraja success callback payload for the given checkout id.
pub fn success_callback(checkout_request_id: &str, receipt: &str, amount: f64) -> serde_json::Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        { "Name": "Amount", "Value": amount },
                        { "Name": "MpesaReceiptNumber", "Value": receipt },
                        { "Name": "TransactionDate", "Value": 20250830143000u64 },
                        { "Name": "PhoneNumber", "Value": 254712345678u64 }
                    ]
                }
            }
        }
    })
}

pub fn failure_callback(checkout_request_id: &str, result_code: i64, desc: &str) -> serde_json::Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": result_code,
                "ResultDesc": desc,
            }
        }
    })
}
