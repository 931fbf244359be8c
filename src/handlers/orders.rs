use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth::AuthUser;
use crate::entities::{order, order_item};
use crate::errors::ServiceError;
use crate::models::OrderStatus;
use crate::services::orders::OrderItemRequest;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 9, max = 15))]
    pub phone_number: String,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Serialize)]
pub struct OrderSubmissionResponse {
    pub order: order::Model,
    pub status: OrderStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct OrderDetailsResponse {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

/// POST /api/v1/orders
///
/// Submits an order and holds the request open while the payment is
/// polled. The response status reflects the payment outcome: 201 when paid
/// within the poll budget, 202 when still pending, 200 when it failed.
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;

    let submission = state
        .orders
        .create_order(&user.user_id, &payload.phone_number, &payload.items)
        .await?;

    let code = match submission.status {
        OrderStatus::Paid => StatusCode::CREATED,
        OrderStatus::Failed => StatusCode::OK,
        _ => StatusCode::ACCEPTED,
    };

    Ok((
        code,
        Json(OrderSubmissionResponse {
            order: submission.order,
            status: submission.status,
            message: submission.message,
        }),
    ))
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<order::Model>>, ServiceError> {
    let orders = state.orders.list_for_user(&user.user_id).await?;
    Ok(Json(orders))
}

/// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<OrderDetailsResponse>, ServiceError> {
    let details = state.orders.get_order(id).await?;

    // Customers only see their own orders.
    if details.order.user_id != user.user_id {
        return Err(ServiceError::NotFound(format!("Order {id} not found")));
    }

    Ok(Json(OrderDetailsResponse {
        order: details.order,
        items: details.items,
    }))
}

/// PUT /api/v1/orders/:id/status
///
/// Barista-side status updates. Payment states cannot be set through this
/// endpoint; those only change via the payment pipeline.
pub async fn update_order_status(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<Json<order::Model>, ServiceError> {
    let target = OrderStatus::parse(&payload.status)?;
    let updated = state.orders.update_status(id, target).await?;
    Ok(Json(updated))
}
