use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::auth::AuthUser;
use crate::entities::receipt;
use crate::errors::ServiceError;
use crate::services::receipts::ReceiptData;
use crate::AppState;

/// Receipt as served to the client: the frozen snapshot plus the provider
/// reference that may have been backfilled after generation.
#[derive(Debug, Serialize)]
pub struct ReceiptResponse {
    pub mpesa_receipt_number: Option<String>,
    #[serde(flatten)]
    pub data: ReceiptData,
}

fn to_response(model: receipt::Model) -> Result<ReceiptResponse, ServiceError> {
    let data: ReceiptData = serde_json::from_str(&model.receipt_data)?;
    Ok(ReceiptResponse {
        mpesa_receipt_number: model.mpesa_receipt_number,
        data,
    })
}

/// GET /api/v1/orders/:id/receipt
pub async fn get_order_receipt(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<ReceiptResponse>, ServiceError> {
    let details = state.orders.get_order(id).await?;
    if details.order.user_id != user.user_id {
        return Err(ServiceError::NotFound(format!("Order {id} not found")));
    }

    let model = state.receipts.get_by_order_id(id).await?;
    Ok(Json(to_response(model)?))
}

/// GET /api/v1/orders/receipts
///
/// All of the caller's receipts, newest first.
pub async fn list_receipts(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<ReceiptResponse>>, ServiceError> {
    let models = state.receipts.list_for_user(&user.user_id).await?;
    let receipts = models
        .into_iter()
        .map(to_response)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(receipts))
}
