//! The order system as one cloneable handle.
//!
//! Actor actions (`actions`), payment reconciliation (`reconcile`) and the
//! bot (`bot`) are all methods on [`Orders`], so every path shares one ledger,
//! one pair of transition tables and one pricing policy.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::bot::BotQueue;
use crate::config::Config;
use crate::fsm::Machines;
use crate::ledger::Ledger;
use crate::pricing::Pricing;
use crate::provider::PaymentProvider;

/// Tunable policy values.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Minor units absorbed when deciding paid vs underpaid.
    pub discount_tolerance: i64,
    /// Days after the latest event before the bot archives or deletes.
    pub retention_days: i64,
    pub password_cost: u32,
    pub invoice_expiration_minutes: u32,
    pub currency: String,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            discount_tolerance: 10,
            retention_days: 14,
            password_cost: bcrypt::DEFAULT_COST,
            invoice_expiration_minutes: 60,
            currency: "EUR".to_string(),
        }
    }
}

impl Policy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            discount_tolerance: config.discount_tolerance,
            retention_days: config.retention_days,
            password_cost: config.password_cost,
            invoice_expiration_minutes: config.invoice_expiration_minutes,
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct Orders {
    pub ledger: Ledger,
    pub pricing: Arc<Pricing>,
    pub policy: Arc<Policy>,
    pub provider: Arc<dyn PaymentProvider>,
    pub bot_queue: BotQueue,
}

impl Orders {
    pub fn new(
        pool: SqlitePool,
        pricing: Pricing,
        policy: Policy,
        provider: Arc<dyn PaymentProvider>,
        bot_queue: BotQueue,
    ) -> Self {
        Self {
            ledger: Ledger::new(pool, Arc::new(Machines::default())),
            pricing: Arc::new(pricing),
            policy: Arc::new(policy),
            provider,
            bot_queue,
        }
    }
}

/// `1234` → `"12.34 EUR"`.
pub fn format_cents(cents: i64, currency: &str) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02} {currency}", abs / 100, abs % 100)
}
