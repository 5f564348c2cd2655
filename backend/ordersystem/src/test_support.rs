//! Shared fixtures for the scenario tests.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::bot::BotQueue;
use crate::collection::Collection;
use crate::db;
use crate::errors::{OrderError, Result};
use crate::id::new_id;
use crate::pricing::Pricing;
use crate::provider::{CreatedInvoice, InvoiceRequest, PaymentProvider};
use crate::service::{Orders, Policy};
use crate::webhook::{CryptoInfo, CryptoPayment, Invoice};

/// 2021-02-17T14:00:00Z
pub const EXPIRATION_MS: i64 = 1_613_570_400_000;
/// One coin in euros.
pub const RATE: f64 = 100.0;
/// Due of [`one_task_edit`] with default pricing: 10000 + round(0.02 × 10000) + 1290.
pub const ONE_TASK_DUE: i64 = 11_490;

#[derive(Default)]
pub struct FakeProvider {
    pub invoices: Mutex<HashMap<String, Invoice>>,
    pub created: Mutex<Vec<InvoiceRequest>>,
}

impl FakeProvider {
    pub fn publish(&self, invoice: Invoice) {
        self.invoices
            .lock()
            .unwrap()
            .insert(invoice.id.clone(), invoice);
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn get_invoice(&self, invoice_id: &str) -> Result<Invoice> {
        let invoice = self.invoices.lock().unwrap().get(invoice_id).cloned();
        invoice.ok_or_else(|| OrderError::Provider(format!("unknown invoice {invoice_id}")))
    }

    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<CreatedInvoice> {
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        let id = format!("INV{}", created.len());
        Ok(CreatedInvoice {
            url: format!("https://pay.example/i/{id}"),
            id,
        })
    }
}

pub struct Harness {
    pub orders: Orders,
    pub provider: Arc<FakeProvider>,
    pub queue: mpsc::Receiver<String>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_pool(db::connect("sqlite::memory:", 1).await.unwrap())
    }

    /// Backed by a database file with several connections, so overlapping
    /// operations really run on different connections.
    pub async fn on_file(path: &Path) -> Self {
        let pool = db::connect(path.to_str().unwrap(), 4).await.unwrap();
        Self::with_pool(pool)
    }

    fn with_pool(pool: SqlitePool) -> Self {
        let provider = Arc::new(FakeProvider::default());
        let (bot_queue, queue) = BotQueue::channel(16);
        let policy = Policy {
            password_cost: 4,
            ..Default::default()
        };
        let orders = Orders::new(pool, Pricing::default(), policy, provider.clone(), bot_queue);
        Self {
            orders,
            provider,
            queue,
        }
    }

    pub async fn reload(&self, coll: &Collection) -> Collection {
        self.orders.ledger.read(&coll.id).await.unwrap()
    }

    /// Ids the bot was asked to look at so far.
    pub fn queued(&mut self) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(id) = self.queue.try_recv() {
            ids.push(id);
        }
        ids
    }

    /// A draft with one task, edited by its Client.
    pub async fn draft(&self) -> Collection {
        let mut coll = self.orders.create("secret").await.unwrap();
        self.orders
            .client_edit(&mut coll, &one_task_edit())
            .await
            .unwrap();
        coll
    }

    /// A draft submitted by the Client and accepted by the Store.
    pub async fn accepted(&self) -> Collection {
        let mut coll = self.draft().await;
        self.orders.submit(&mut coll).await.unwrap();
        self.orders.accept(&mut coll, "").await.unwrap();
        coll
    }

    /// An accepted collection paid in full by the Store.
    pub async fn paid(&self) -> Collection {
        let mut coll = self.accepted().await;
        let due = coll.due(&self.orders.pricing);
        self.orders
            .confirm_payment(&mut coll, due, "cash")
            .await
            .unwrap();
        coll
    }
}

/// Client edit with contact details and one article of 100.00.
pub fn one_task_edit() -> String {
    json!({
        "client-name": "Alice",
        "client-contact": "alice@example.org",
        "client-contact-protocol": "email",
        "delivery-method": "pickup",
        "shipping-street": "Main St",
        "shipping-town": "Springfield",
        "shipping-country": "DE",
        "tasks": [{
            "merchant": "Bookshop",
            "articles": [{"link": "https://shop.example/book", "quantity": 1, "price": 10000}]
        }]
    })
    .to_string()
}

/// Invoice with `(payment id, coins, received date)` payments in one currency.
pub fn invoice(id: &str, order_id: &str, payments: &[(&str, f64, &str)]) -> Invoice {
    Invoice {
        id: id.to_string(),
        order_id: order_id.to_string(),
        url: format!("https://pay.example/i/{id}"),
        expiration_time: EXPIRATION_MS,
        crypto_info: vec![CryptoInfo {
            crypto_code: "XMR".to_string(),
            rate: RATE,
            payments: payments
                .iter()
                .map(|(id, value, date)| CryptoPayment {
                    id: id.to_string(),
                    value: *value,
                    received_date: date.to_string(),
                })
                .collect(),
        }],
    }
}

/// Database file in the temp directory, removed with its journal on drop.
pub struct TempDb(pub PathBuf);

impl TempDb {
    pub fn new() -> Self {
        Self(std::env::temp_dir().join(format!("ordersystem-{}.db", new_id())))
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut path = self.0.clone().into_os_string();
            path.push(suffix);
            let _ = fs::remove_file(path);
        }
    }
}
