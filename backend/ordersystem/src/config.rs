//! Application configuration loaded from environment variables.

use std::str::FromStr;

use crate::errors::{OrderError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the HTTP surface (webhook + store views)
    pub api_port: u16,
    /// Base URL of the BTCPay server (e.g. https://pay.example.org)
    pub btcpay_url: String,
    /// Legacy API key, sent as Basic auth
    pub btcpay_api_key: String,
    /// Shared secret used to verify `BTCPay-Sig` on webhook deliveries
    pub webhook_secret: Option<String>,
    /// How often (in seconds) the bot sweeps all candidate collections
    pub bot_interval_secs: u64,
    /// Capacity of the bot worker queue
    pub bot_queue_capacity: usize,
    /// Days after the latest event before the bot archives or deletes
    pub retention_days: i64,
    /// Minor units absorbed when deciding between paid and underpaid
    pub discount_tolerance: i64,
    /// Storefront commission share rate
    pub store_fee_share: f64,
    /// Storefront base fee per task, in minor units
    pub store_fee_base: i64,
    /// Expiration window requested for new invoices
    pub invoice_expiration_minutes: u32,
    /// bcrypt cost for collection passwords
    pub password_cost: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./ordersystem.db".to_string()),
            api_port: parse_or("API_PORT", "3002")?,
            btcpay_url: env_var("BTCPAY_URL").map_err(|_| {
                OrderError::Config("BTCPAY_URL environment variable is required".to_string())
            })?,
            btcpay_api_key: env_var("BTCPAY_API_KEY").unwrap_or_default(),
            webhook_secret: env_var("WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            bot_interval_secs: parse_or("BOT_INTERVAL_SECS", "43200")?,
            bot_queue_capacity: parse_or("BOT_QUEUE_CAPACITY", "100")?,
            retention_days: parse_or("RETENTION_DAYS", "14")?,
            discount_tolerance: parse_or("DISCOUNT_TOLERANCE", "10")?,
            store_fee_share: parse_or("STORE_FEE_SHARE", "0.02")?,
            store_fee_base: parse_or("STORE_FEE_BASE", "1290")?,
            invoice_expiration_minutes: parse_or("INVOICE_EXPIRATION_MINUTES", "60")?,
            password_cost: parse_or("PASSWORD_COST", "12")?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| OrderError::Config(format!("Missing env var: {key}")))
}

fn parse_or<T: FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| OrderError::Config(format!("Invalid {key}")))
}
