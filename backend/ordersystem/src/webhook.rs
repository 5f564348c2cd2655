//! Payment provider notification and invoice shapes.
//!
//! A webhook delivery only names the invoice; the payments themselves come
//! from a second lookup of that invoice through the provider API.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// All recognised webhook kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookKind {
    /// A payment was seen on the network (provisional).
    InvoiceReceivedPayment,
    /// The invoice is paid in full, in time, and confirmed (authoritative).
    InvoiceSettled,
    /// Any other event type; acknowledged and ignored.
    Unknown,
}

impl WebhookKind {
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "InvoiceReceivedPayment" => Self::InvoiceReceivedPayment,
            "InvoiceSettled" => Self::InvoiceSettled,
            _ => Self::Unknown,
        }
    }
}

/// A webhook delivery body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub invoice_id: String,
    /// Only meaningful on `InvoiceReceivedPayment`.
    #[serde(default)]
    pub after_expiration: bool,
    #[serde(default)]
    pub is_redelivery: bool,
}

impl WebhookEvent {
    pub fn kind(&self) -> WebhookKind {
        WebhookKind::from_type(&self.kind)
    }
}

/// Checks a `BTCPay-Sig` header (`sha256=<hex>`) against the raw body.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_sig) = header.trim().strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

// ─────────────────────────────────────────────────────────
// Invoice shapes (legacy invoice API)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InvoiceResponse {
    pub data: Invoice,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    /// Collection id the invoice was created for.
    pub order_id: String,
    #[serde(default)]
    pub url: String,
    /// Milliseconds since the Unix epoch.
    pub expiration_time: i64,
    #[serde(default)]
    pub crypto_info: Vec<CryptoInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoInfo {
    pub crypto_code: String,
    /// Fiat per coin at invoice creation.
    pub rate: f64,
    #[serde(default)]
    pub payments: Vec<CryptoPayment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoPayment {
    pub id: String,
    /// Amount in coins.
    pub value: f64,
    #[serde(default)]
    pub received_date: String,
}

impl Invoice {
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.expiration_time).single()
    }

    /// Every payment with the rate and currency of its crypto entry.
    pub fn payments(&self) -> impl Iterator<Item = (&CryptoInfo, &CryptoPayment)> {
        self.crypto_info
            .iter()
            .flat_map(|c| c.payments.iter().map(move |p| (c, p)))
    }
}

/// Fiat minor units of a payment at the invoice rate.
pub fn fiat_cents(crypto: &CryptoInfo, payment: &CryptoPayment) -> i64 {
    (payment.value * crypto.rate * 100.0).round() as i64
}

/// Parses a received date, either RFC 3339 or a zone-less UTC timestamp.
pub fn parse_received_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
