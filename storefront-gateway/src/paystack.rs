use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use storefront_core::payment::{
    PaymentError, PaymentGateway, Refund, TransactionInit, TransactionPage, TransactionQuery,
    TransactionStatus, TransactionSummary, TransactionVerification,
};
use storefront_core::retry::RetryPolicy;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub base_url: String,
    pub secret_key: Option<String>,
    pub currency: String,
    pub callback_url: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Bearer-token client for the Paystack transaction API.
pub struct PaystackGateway {
    client: Client,
    config: PaystackConfig,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
    meta: Option<PageMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageMeta {
    total: Option<u64>,
    page: Option<u32>,
    per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
struct InitializeRequest<'a> {
    email: &'a str,
    amount: i64,
    reference: &'a str,
    currency: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    metadata: Value,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: Option<String>,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    reference: String,
    status: TransactionStatus,
    amount: i64,
    currency: String,
    #[serde(default)]
    metadata: Value,
    paid_at: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt", alias = "created_at")]
    created_at: Option<DateTime<Utc>>,
    customer: Option<CustomerData>,
}

#[derive(Debug, Deserialize)]
struct CustomerData {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundData {
    transaction: RefundTransaction,
    amount: i64,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RefundTransaction {
    reference: String,
}

impl PaystackGateway {
    pub fn new(config: PaystackConfig) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Misconfigured(format!("HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn secret(&self) -> Result<&str, PaymentError> {
        self.config
            .secret_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| PaymentError::Misconfigured("payment secret key is not set".to_string()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send<T, F>(&self, label: &str, build: F) -> Result<Envelope<T>, PaymentError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let secret = self.secret()?;
        let timeout_ms = self.config.timeout.as_millis() as u64;

        self.config
            .retry
            .run(
                label,
                || {
                    let request = build().bearer_auth(secret);
                    async move {
                        let response = request
                            .send()
                            .await
                            .map_err(|e| transport_error(e, timeout_ms))?;
                        let status = response.status().as_u16();
                        let body = response
                            .text()
                            .await
                            .map_err(|e| transport_error(e, timeout_ms))?;
                        decode_envelope(status, &body)
                    }
                },
                PaymentError::is_transient,
            )
            .await
    }
}

fn transport_error(err: reqwest::Error, timeout_ms: u64) -> PaymentError {
    if err.is_timeout() {
        PaymentError::Timeout(timeout_ms)
    } else {
        PaymentError::Transport(err.to_string())
    }
}

/// Map an HTTP status + body to the gateway's envelope or a typed error.
fn decode_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<Envelope<T>, PaymentError> {
    if !(200..300).contains(&status) {
        return Err(PaymentError::Gateway {
            status,
            body: body.to_string(),
        });
    }

    let envelope: Envelope<T> = serde_json::from_str(body).map_err(|e| PaymentError::Gateway {
        status,
        body: format!("unreadable response ({}): {}", e, body),
    })?;

    if !envelope.status {
        return Err(PaymentError::Gateway {
            status,
            body: envelope.message,
        });
    }
    Ok(envelope)
}

fn require_data<T>(envelope: Envelope<T>, status_hint: u16) -> Result<T, PaymentError> {
    let message = envelope.message;
    envelope.data.ok_or(PaymentError::Gateway {
        status: status_hint,
        body: format!("response carried no data: {}", message),
    })
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn initialize_transaction(
        &self,
        email: &str,
        amount_minor: i64,
        reference: &str,
        metadata: Value,
    ) -> Result<TransactionInit, PaymentError> {
        let url = self.url("/transaction/initialize");
        let payload = InitializeRequest {
            email,
            amount: amount_minor,
            reference,
            currency: &self.config.currency,
            callback_url: self.config.callback_url.as_deref(),
            metadata,
        };

        let envelope: Envelope<InitializeData> = self
            .send("paystack.initialize", || self.client.post(&url).json(&payload))
            .await?;
        let data = require_data(envelope, 200)?;

        info!(reference = %data.reference, amount = amount_minor, "Payment transaction initialized");
        Ok(TransactionInit {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
            reference: data.reference,
        })
    }

    async fn verify_transaction(&self, reference: &str) -> Result<TransactionVerification, PaymentError> {
        let url = self.url(&format!("/transaction/verify/{}", reference));
        let envelope: Envelope<TransactionData> = self
            .send("paystack.verify", || self.client.get(&url))
            .await?;
        let data = require_data(envelope, 200)?;

        debug!(reference = %data.reference, status = data.status.as_str(), "Payment transaction verified");
        Ok(TransactionVerification {
            reference: data.reference,
            status: data.status,
            amount: data.amount,
            currency: data.currency,
            metadata: data.metadata,
            paid_at: data.paid_at,
        })
    }

    async fn list_transactions(&self, query: &TransactionQuery) -> Result<TransactionPage, PaymentError> {
        let url = self.url("/transaction");
        let params = list_params(query);
        let envelope: Envelope<Vec<TransactionData>> = self
            .send("paystack.list", || self.client.get(&url).query(&params))
            .await?;

        let meta = envelope.meta.as_ref();
        let page = meta.and_then(|m| m.page).or(query.page).unwrap_or(1);
        let per_page = meta.and_then(|m| m.per_page).or(query.per_page).unwrap_or(50);
        let total = meta.and_then(|m| m.total);
        let transactions: Vec<TransactionSummary> = envelope
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|t| TransactionSummary {
                reference: t.reference,
                status: t.status,
                amount: t.amount,
                currency: t.currency,
                customer_email: t.customer.and_then(|c| c.email),
                created_at: t.created_at,
            })
            .collect();

        Ok(TransactionPage {
            total: total.unwrap_or(transactions.len() as u64),
            page,
            per_page,
            transactions,
        })
    }

    async fn create_refund(&self, reference: &str, amount_minor: Option<i64>) -> Result<Refund, PaymentError> {
        let url = self.url("/refund");
        let mut payload = json!({ "transaction": reference });
        if let Some(amount) = amount_minor {
            payload["amount"] = json!(amount);
        }

        let envelope: Envelope<RefundData> = self
            .send("paystack.refund", || self.client.post(&url).json(&payload))
            .await?;
        let data = require_data(envelope, 200)?;

        info!(reference = %data.transaction.reference, amount = data.amount, "Refund created");
        Ok(Refund {
            transaction_reference: data.transaction.reference,
            amount: data.amount,
            status: data.status,
        })
    }
}

fn list_params(query: &TransactionQuery) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    params.push(("perPage", query.per_page.unwrap_or(50).to_string()));
    params.push(("page", query.page.unwrap_or(1).to_string()));
    if let Some(status) = query.status {
        params.push(("status", status.as_str().to_string()));
    }
    if let Some(customer) = &query.customer {
        params.push(("customer", customer.clone()));
    }
    if let Some(from) = query.from {
        params.push(("from", from.to_rfc3339()));
    }
    if let Some(to) = query.to {
        params.push(("to", to.to_rfc3339()));
    }
    params
}
