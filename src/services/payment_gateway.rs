//! Payment gateway collaborator.
//!
//! [`PaymentGateway`] is the seam the checkout, cancellation and reconciliation
//! flows talk to; [`HttpPaymentGateway`] implements it against a Snap-style
//! JSON API.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::pricing::whole_units;
use crate::errors::ServiceError;

/// Wallets offered when the buyer picks QRIS.
const QRIS_WALLETS: [&str; 3] = ["gopay", "shopeepay", "other_qris"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyerInfo {
    pub first_name: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub invoice: String,
    pub gross_amount: Decimal,
    pub customer: BuyerInfo,
    pub enabled_payments: Vec<String>,
    pub finish_url: Option<String>,
}

impl SessionRequest {
    /// Maps the buyer's chosen method onto the gateway's payment channels.
    pub fn enabled_payments_for(payment_method: &str) -> Vec<String> {
        match payment_method.trim().to_lowercase().as_str() {
            "qris" => QRIS_WALLETS.iter().map(|w| w.to_string()).collect(),
            other => vec![other.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub token: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
}

/// Remote transaction status as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Pending,
    /// Captured but held for fraud review.
    Challenged,
    Captured,
    Settled,
    Denied,
    Cancelled,
    Expired,
    Unknown(String),
}

impl RemoteStatus {
    pub fn from_notification(transaction_status: &str, fraud_status: Option<&str>) -> Self {
        match transaction_status {
            "capture" => match fraud_status {
                Some("challenge") => RemoteStatus::Challenged,
                Some("deny") => RemoteStatus::Denied,
                _ => RemoteStatus::Captured,
            },
            "settlement" => RemoteStatus::Settled,
            "pending" => RemoteStatus::Pending,
            "deny" => RemoteStatus::Denied,
            "cancel" => RemoteStatus::Cancelled,
            "expire" => RemoteStatus::Expired,
            other => RemoteStatus::Unknown(other.to_string()),
        }
    }

    /// Whether an in-flight session in this state can still be cancelled remotely.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            RemoteStatus::Pending | RemoteStatus::Captured | RemoteStatus::Challenged
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, request: SessionRequest) -> Result<SessionHandle, ServiceError>;

    async fn query_status(&self, invoice: &str) -> Result<RemoteStatus, ServiceError>;

    async fn cancel(&self, invoice: &str) -> Result<CancelOutcome, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    transaction_status: Option<String>,
    #[serde(default)]
    fraud_status: Option<String>,
}

/// reqwest client for the gateway's Snap and Core endpoints.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    server_key: Option<String>,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        server_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            server_key,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Accept", "application/json");
        match &self.server_key {
            Some(key) => builder.basic_auth(key, Some("")),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ServiceError> {
        let response = builder.send().await.map_err(unavailable)?;
        if response.status().is_server_error() {
            return Err(ServiceError::GatewayUnavailable(format!(
                "gateway answered {}",
                response.status()
            )));
        }
        Ok(response)
    }
}

fn unavailable(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::GatewayUnavailable("gateway timed out".to_string())
    } else {
        ServiceError::GatewayUnavailable(e.to_string())
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(invoice = %request.invoice))]
    async fn create_session(&self, request: SessionRequest) -> Result<SessionHandle, ServiceError> {
        let gross_amount = whole_units(request.gross_amount).to_i64().ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "gross amount {} is out of range",
                request.gross_amount
            ))
        })?;

        let mut body = json!({
            "transaction_details": {
                "order_id": request.invoice,
                "gross_amount": gross_amount,
            },
            "customer_details": request.customer,
            "enabled_payments": request.enabled_payments,
        });
        if let Some(finish) = &request.finish_url {
            body["callbacks"] = json!({ "finish": finish });
        }

        let response = self
            .send(self.request(reqwest::Method::POST, "/snap/v1/transactions").json(&body))
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(%status, body = %text, "gateway rejected session request");
            return Err(ServiceError::GatewayUnavailable(format!(
                "session request rejected with {}",
                status
            )));
        }

        let handle: SessionHandle = response.json().await.map_err(unavailable)?;
        info!("payment session created");
        Ok(handle)
    }

    #[instrument(skip(self))]
    async fn query_status(&self, invoice: &str) -> Result<RemoteStatus, ServiceError> {
        let response = self
            .send(self.request(reqwest::Method::GET, &format!("/v2/{}/status", invoice)))
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(format!(
                "Transaction {} not found at gateway",
                invoice
            )));
        }
        if !response.status().is_success() {
            return Err(ServiceError::GatewayUnavailable(format!(
                "status query answered {}",
                response.status()
            )));
        }

        let body: StatusBody = response.json().await.map_err(unavailable)?;
        // the Core API reports unknown transactions with 200 and an inner 404
        if body.status_code.as_deref() == Some("404") {
            return Err(ServiceError::NotFound(format!(
                "Transaction {} not found at gateway",
                invoice
            )));
        }

        let transaction_status = body.transaction_status.unwrap_or_default();
        Ok(RemoteStatus::from_notification(
            &transaction_status,
            body.fraud_status.as_deref(),
        ))
    }

    #[instrument(skip(self))]
    async fn cancel(&self, invoice: &str) -> Result<CancelOutcome, ServiceError> {
        let response = self
            .send(self.request(reqwest::Method::POST, &format!("/v2/{}/cancel", invoice)))
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(CancelOutcome::NotFound);
        }
        if !response.status().is_success() {
            return Err(ServiceError::GatewayUnavailable(format!(
                "cancel answered {}",
                response.status()
            )));
        }

        let body: StatusBody = response.json().await.map_err(unavailable)?;
        if body.status_code.as_deref() == Some("404") {
            return Ok(CancelOutcome::NotFound);
        }
        Ok(CancelOutcome::Cancelled)
    }
}
