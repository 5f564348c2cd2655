//! Payment provider client: looks up and creates invoices.
//!
//! ## Resilience
//!
//! * Exponential back-off is applied on transport errors and rate-limit
//!   responses, up to [`MAX_BACKOFF_SECS`] seconds and [`MAX_ATTEMPTS`] tries.
//! * Any other non-success status is a hard failure.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{OrderError, Result};
use crate::webhook::{Invoice, InvoiceResponse};

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_ATTEMPTS: u32 = 5;

/// What the order system asks the provider for when a client wants to pay.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRequest {
    /// Fiat amount in major units (e.g. euros).
    pub price: f64,
    pub currency: String,
    pub order_id: String,
    pub expiration_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedInvoice {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct CreatedInvoiceResponse {
    data: CreatedInvoice,
}

/// External payment provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Fetch an invoice with its crypto payments.
    async fn get_invoice(&self, invoice_id: &str) -> Result<Invoice>;

    /// Create an invoice the client can pay.
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<CreatedInvoice>;
}

/// BTCPay Server, legacy invoice API.
pub struct BtcPayClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl BtcPayClient {
    pub fn new(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.header(
                reqwest::header::AUTHORIZATION,
                format!("Basic {}", STANDARD.encode(&self.api_key)),
            )
        }
    }

    /// Send with back-off; `build` is called again for every attempt.
    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response> {
        let mut backoff = INITIAL_BACKOFF_SECS;
        let mut attempt = 1;

        loop {
            let retry_reason = match self.authorize(build()).send().await {
                Err(e) => format!("request failed: {e}"),
                Ok(resp) if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    "rate-limited".to_string()
                }
                Ok(resp) if !resp.status().is_success() => {
                    return Err(OrderError::Provider(format!(
                        "provider answered {}",
                        resp.status()
                    )));
                }
                Ok(resp) => return Ok(resp),
            };

            if attempt >= MAX_ATTEMPTS {
                return Err(OrderError::Provider(format!(
                    "giving up after {attempt} attempts: {retry_reason}"
                )));
            }
            warn!("Provider {retry_reason} (will retry in {backoff}s)");
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
            attempt += 1;
        }
    }
}

#[async_trait]
impl PaymentProvider for BtcPayClient {
    async fn get_invoice(&self, invoice_id: &str) -> Result<Invoice> {
        let url = format!("{}/invoices/{}", self.base_url, invoice_id);
        let resp = self.send(|| self.client.get(&url)).await?;
        let body: InvoiceResponse = resp.json().await?;
        debug!(
            "Fetched invoice {} ({} crypto entries)",
            body.data.id,
            body.data.crypto_info.len()
        );
        Ok(body.data)
    }

    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<CreatedInvoice> {
        let url = format!("{}/invoices", self.base_url);
        let resp = self.send(|| self.client.post(&url).json(request)).await?;
        let body: CreatedInvoiceResponse = resp.json().await?;
        Ok(body.data)
    }
}
