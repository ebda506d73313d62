use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ring::hmac;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header carrying the hex-encoded HMAC-SHA512 of the raw webhook body.
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Transaction status as reported by the gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Failed,
    Abandoned,
    Pending,
    Reversed,
    #[serde(other)]
    Unknown,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Abandoned => "abandoned",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Reversed => "reversed",
            TransactionStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionInit {
    pub authorization_url: String,
    pub access_code: Option<String>,
    pub reference: String,
}

/// Result of a verify call. The only source of truth for payment success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionVerification {
    pub reference: String,
    pub status: TransactionStatus,
    /// Minor units of the settlement currency.
    pub amount: i64,
    pub currency: String,
    pub metadata: Value,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub status: Option<TransactionStatus>,
    pub customer: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub reference: String,
    pub status: TransactionStatus,
    pub amount: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPage {
    pub transactions: Vec<TransactionSummary>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refund {
    pub transaction_reference: String,
    pub amount: i64,
    pub status: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment gateway misconfigured: {0}")]
    Misconfigured(String),

    #[error("Payment gateway returned {status}: {body}")]
    Gateway { status: u16, body: String },

    #[error("Payment gateway unreachable: {0}")]
    Transport(String),

    #[error("Payment gateway timed out after {0}ms")]
    Timeout(u64),
}

impl PaymentError {
    /// Worth another attempt under the retry policy.
    pub fn is_transient(&self) -> bool {
        match self {
            PaymentError::Transport(_) | PaymentError::Timeout(_) => true,
            PaymentError::Gateway { status, .. } => *status >= 500 || *status == 429,
            PaymentError::Misconfigured(_) => false,
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a remote transaction for `amount_minor` under our `reference`
    async fn initialize_transaction(
        &self,
        email: &str,
        amount_minor: i64,
        reference: &str,
        metadata: Value,
    ) -> Result<TransactionInit, PaymentError>;

    /// Look up the authoritative status of a transaction
    async fn verify_transaction(&self, reference: &str) -> Result<TransactionVerification, PaymentError>;

    async fn list_transactions(&self, query: &TransactionQuery) -> Result<TransactionPage, PaymentError>;

    /// Refund a settled transaction; `None` refunds the full amount
    async fn create_refund(&self, reference: &str, amount_minor: Option<i64>) -> Result<Refund, PaymentError>;
}

/// Check the gateway's HMAC-SHA512 signature over the raw, unparsed body.
///
/// Comparison is constant time. An empty secret or a header that is not hex
/// never verifies.
pub fn verify_webhook_signature(raw_body: &[u8], signature_header: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(signature) = hex::decode(signature_header.trim()) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA512, secret.as_bytes());
    hmac::verify(&key, raw_body, &signature).is_ok()
}

/// Hex HMAC-SHA512 of `raw_body`, as the gateway would send it.
pub fn sign_webhook_body(raw_body: &[u8], secret: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA512, secret.as_bytes());
    hex::encode(hmac::sign(&key, raw_body).as_ref())
}
