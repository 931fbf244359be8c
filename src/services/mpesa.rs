//! M-Pesa (Daraja) STK push gateway client.
//!
//! Wraps the three provider interactions the order pipeline needs: OAuth
//! token acquisition (cached process-wide), payment initiation, and the
//! synchronous status query used by the poll loop. The asynchronous result
//! arrives separately on the callback webhook; its payload types live here
//! too since they are part of the same wire protocol.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::MpesaConfig;
use crate::errors::ServiceError;

/// Refresh the cached token this long before the provider-declared expiry.
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(10);
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Correlation ids returned by a successful STK push initiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StkPushHandle {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
}

/// Interpretation of a status query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StkQueryOutcome {
    /// ResultCode "0": the customer authorized the payment.
    Success,
    /// No result code yet: the push is still waiting on the customer.
    Processing,
    /// Any other result code: cancelled, insufficient funds, timeout, ...
    Failed { code: String, desc: String },
}

/// Seam between the order orchestrator and the payment provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StkGateway: Send + Sync {
    /// Initiates an STK push prompt on the customer's phone.
    async fn initiate_stk_push(
        &self,
        phone_number: &str,
        amount: i64,
        account_reference: &str,
        transaction_desc: &str,
    ) -> Result<StkPushHandle, ServiceError>;

    /// Queries the provider for the current state of a push.
    ///
    /// Transport failures surface as `Err` and mean "retry later", never a
    /// terminal payment outcome.
    async fn query_stk_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<StkQueryOutcome, ServiceError>;
}

// ---- Daraja wire types ----

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    #[serde(rename = "access_token")]
    access_token: String,
    #[serde(rename = "expires_in")]
    expires_in: String,
}

#[derive(Debug, Serialize)]
struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: u64,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "TransactionType")]
    transaction_type: &'static str,
    #[serde(rename = "Amount")]
    amount: i64,
    #[serde(rename = "PartyA")]
    party_a: u64,
    #[serde(rename = "PartyB")]
    party_b: u64,
    #[serde(rename = "PhoneNumber")]
    phone_number: u64,
    #[serde(rename = "CallBackURL")]
    call_back_url: String,
    #[serde(rename = "AccountReference")]
    account_reference: String,
    #[serde(rename = "TransactionDesc")]
    transaction_desc: String,
}

#[derive(Debug, Deserialize)]
struct StkPushSyncResponse {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    response_code: String,
    #[serde(rename = "ResponseDescription")]
    response_description: String,
}

#[derive(Debug, Serialize)]
struct StkPushQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: u64,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
}

#[derive(Debug, Deserialize)]
struct StkPushQueryResponse {
    #[serde(rename = "ResultCode", default)]
    result_code: Option<String>,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,
}

/// Asynchronous payment result posted by Daraja to the callback webhook.
#[derive(Debug, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallbackData,
}

#[derive(Debug, Deserialize)]
pub struct StkCallbackData {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub item: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

impl StkCallbackData {
    /// Pulls the M-Pesa receipt number out of the callback metadata, when
    /// present (only successful payments carry one).
    pub fn mpesa_receipt_number(&self) -> Option<String> {
        self.callback_metadata.as_ref()?.item.iter().find_map(|it| {
            if it.name == "MpesaReceiptNumber" {
                it.value.as_ref().and_then(|v| match v {
                    serde_json::Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                })
            } else {
                None
            }
        })
    }
}

// ---- Client ----

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Daraja HTTP client with a process-wide cached access token.
pub struct MpesaClient {
    http: reqwest::Client,
    config: MpesaConfig,
    token: Mutex<Option<CachedToken>>,
}

impl MpesaClient {
    pub fn new(config: MpesaConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {e}")))?;

        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    /// Returns a valid access token, refreshing when the cached one is
    /// absent or within [`TOKEN_EXPIRY_BUFFER`] of expiry. The mutex is
    /// held across the refresh so concurrent callers do not stampede the
    /// provider.
    async fn access_token(&self) -> Result<String, ServiceError> {
        let mut guard = self.token.lock().await;

        if let Some(cached) = guard.as_ref() {
            if cached.expires_at.saturating_duration_since(Instant::now())
                > TOKEN_EXPIRY_BUFFER
            {
                return Ok(cached.token.clone());
            }
        }

        debug!("refreshing daraja access token");
        let basic = BASE64.encode(format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        ));
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );

        let response: AccessTokenResponse = self
            .http
            .get(url)
            .header(http::header::AUTHORIZATION, format!("Basic {basic}"))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("token request: {e}")))?
            .error_for_status()
            .map_err(|e| ServiceError::ExternalServiceError(format!("token request: {e}")))?
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("token response: {e}")))?;

        let ttl = response
            .expires_in
            .parse::<u64>()
            .unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        let token = response.access_token;
        *guard = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });
        info!("daraja access token refreshed (ttl={}s)", ttl);

        Ok(token)
    }

    fn timestamp() -> String {
        chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
    }

    fn password(&self, timestamp: &str) -> String {
        BASE64.encode(format!(
            "{}{}{}",
            self.config.short_code, self.config.passkey, timestamp
        ))
    }
}

/// Normalizes a customer phone number to the provider's international
/// format: `07...` becomes `2547...`, a leading `+` is stripped.
pub fn normalize_phone_number(phone: &str) -> Result<u64, ServiceError> {
    let normalized = if let Some(rest) = phone.strip_prefix('0') {
        format!("254{rest}")
    } else if let Some(rest) = phone.strip_prefix('+') {
        rest.to_string()
    } else {
        phone.to_string()
    };

    normalized
        .parse::<u64>()
        .map_err(|_| ServiceError::ValidationError(format!("Invalid phone number: {phone}")))
}

#[async_trait]
impl StkGateway for MpesaClient {
    async fn initiate_stk_push(
        &self,
        phone_number: &str,
        amount: i64,
        account_reference: &str,
        transaction_desc: &str,
    ) -> Result<StkPushHandle, ServiceError> {
        let msisdn = normalize_phone_number(phone_number)?;
        let token = self.access_token().await?;
        let timestamp = Self::timestamp();

        let request = StkPushRequest {
            business_short_code: self.config.short_code,
            password: self.password(&timestamp),
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount,
            party_a: msisdn,
            party_b: self.config.short_code,
            phone_number: msisdn,
            call_back_url: self.config.callback_url.clone(),
            account_reference: account_reference.to_string(),
            transaction_desc: transaction_desc.to_string(),
        };

        info!(msisdn, amount, account_reference, "initiating STK push");

        let response: StkPushSyncResponse = self
            .http
            .post(format!(
                "{}/mpesa/stkpush/v1/processrequest",
                self.config.base_url
            ))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("stk push: {e}")))?
            .error_for_status()
            .map_err(|e| ServiceError::ExternalServiceError(format!("stk push: {e}")))?
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("stk push response: {e}")))?;

        if response.response_code == "0" {
            info!(
                checkout_request_id = %response.checkout_request_id,
                "STK push accepted by provider"
            );
            Ok(StkPushHandle {
                checkout_request_id: response.checkout_request_id,
                merchant_request_id: response.merchant_request_id,
            })
        } else {
            warn!(
                response_code = %response.response_code,
                "STK push rejected by provider"
            );
            Err(ServiceError::PaymentFailed(response.response_description))
        }
    }

    async fn query_stk_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<StkQueryOutcome, ServiceError> {
        let token = self.access_token().await?;
        let timestamp = Self::timestamp();

        let request = StkPushQueryRequest {
            business_short_code: self.config.short_code,
            password: self.password(&timestamp),
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        debug!(checkout_request_id, "querying STK push status");

        let response: StkPushQueryResponse = self
            .http
            .post(format!(
                "{}/mpesa/stkpushquery/v1/query",
                self.config.base_url
            ))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("stk query: {e}")))?
            .error_for_status()
            .map_err(|e| ServiceError::ExternalServiceError(format!("stk query: {e}")))?
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("stk query response: {e}")))?;

        Ok(interpret_result_code(
            response.result_code.as_deref(),
            response.result_desc.as_deref(),
        ))
    }
}

/// Maps a provider result code onto the outcome the orchestrator acts on.
fn interpret_result_code(code: Option<&str>, desc: Option<&str>) -> StkQueryOutcome {
    match code {
        Some("0") => StkQueryOutcome::Success,
        None | Some("") => StkQueryOutcome::Processing,
        Some(other) => StkQueryOutcome::Failed {
            code: other.to_string(),
            desc: desc.unwrap_or("").to_string(),
        },
    }
}
