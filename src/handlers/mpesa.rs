use axum::{extract::State, Json};
use serde_json::json;
use tracing::{error, info, warn};

use crate::services::mpesa::StkCallbackEnvelope;
use crate::AppState;

/// POST /api/v1/mpesa/callback
///
/// Asynchronous payment result from Daraja. The provider retries on
/// non-200 responses, so this endpoint always acks with 200: a payload we
/// cannot parse or a checkout id we do not know is logged and dropped,
/// never bounced.
pub async fn stk_callback(State(state): State<AppState>, body: String) -> Json<serde_json::Value> {
    match serde_json::from_str::<StkCallbackEnvelope>(&body) {
        Ok(envelope) => {
            let callback = envelope.body.stk_callback;
            let success = callback.result_code == 0;
            let receipt_number = callback.mpesa_receipt_number();

            info!(
                checkout_request_id = %callback.checkout_request_id,
                result_code = callback.result_code,
                "payment callback received"
            );

            if let Err(e) = state
                .orders
                .finalize_payment(
                    &callback.checkout_request_id,
                    success,
                    receipt_number.as_deref(),
                )
                .await
            {
                // Ack anyway; the poll loop or a manual replay can recover.
                error!(
                    checkout_request_id = %callback.checkout_request_id,
                    error = %e,
                    "payment callback processing failed"
                );
            }
        }
        Err(e) => {
            warn!(error = %e, "unparseable payment callback payload");
        }
    }

    Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" }))
}
