//! Coffee-bar ordering backend: menu, order submission, M-Pesa STK push
//! payment orchestration, and receipts.

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use sea_orm::DatabaseConnection;
use serde_json::json;

use crate::config::AppConfig;
use crate::services::orders::OrderService;
use crate::services::receipts::ReceiptService;

/// Shared application state threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub orders: Arc<OrderService>,
    pub receipts: Arc<ReceiptService>,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "database": "connected",
                "version": env!("CARGO_PKG_VERSION"),
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "degraded",
                "database": e.to_string(),
                "version": env!("CARGO_PKG_VERSION"),
            })),
        ),
    }
}

fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/menu", get(handlers::menu::list_menu))
        .route(
            "/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        // Static segment must be registered alongside the :id capture.
        .route("/orders/receipts", get(handlers::receipts::list_receipts))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/:id/status",
            put(handlers::orders::update_order_status),
        )
        .route(
            "/orders/:id/receipt",
            get(handlers::receipts::get_order_receipt),
        )
        .route("/mpesa/callback", post(handlers::mpesa::stk_callback))
}

/// Builds the full application router. Shared by `main` and the
/// integration tests so both exercise the same routes and middleware.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
}
