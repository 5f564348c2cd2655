//! # Collection
//!
//! The aggregate root: one purchase errand with its tasks, its append-only
//! event log and the payment bookkeeping used by reconciliation.
//!
//! The amount due is never stored. It is always
//! `Pricing::collection_total − Σ event.paid`, recomputed from the current
//! tasks and events.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::{OrderError, Result};
use crate::id::new_id;
use crate::pricing::Pricing;
use crate::types::{Actor, CollState, TaskState};

/// Upper bound on tasks per collection.
pub const MAX_TASKS: usize = 100;
/// Largest amount in minor units accepted from an edit or a manual booking,
/// in either direction.
pub const MAX_AMOUNT: i64 = 1_000_000_000;
/// Largest article quantity accepted from an edit, in either direction.
pub const MAX_QUANTITY: i64 = 100_000;

/// Rejects amounts outside `±MAX_AMOUNT`.
pub fn check_amount(what: &str, amount: i64) -> Result<()> {
    if (-MAX_AMOUNT..=MAX_AMOUNT).contains(&amount) {
        Ok(())
    } else {
        Err(OrderError::Validation(format!("{what} out of range: {amount}")))
    }
}

/// Contact and delivery details entered by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClientInput {
    pub client_name: String,
    pub client_contact: String,
    pub client_contact_protocol: String,
    pub delivery_method: String,
    pub shipping_first_name: String,
    pub shipping_last_name: String,
    pub shipping_street: String,
    pub shipping_street_number: String,
    pub shipping_address_supplement: String,
    pub shipping_postcode: String,
    pub shipping_town: String,
    pub shipping_country: String,
    pub shipping_service: String,
}

/// Fields only the store may set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StoreInput {
    /// Overrides the selected service's minimum when non-zero.
    pub reshipping_fee: i64,
}

/// Persisted JSON body of a collection row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CollectionData {
    #[serde(flatten)]
    pub client: ClientInput,
    #[serde(flatten)]
    pub store: StoreInput,
    /// Invoices whose settlement has been booked.
    pub booked_invoices: BTreeSet<String>,
    /// Payments seen before expiration, with the fiat value recorded at that time.
    pub received_in_time_payments: BTreeMap<String, i64>,
    /// Payments seen after expiration. Never booked automatically.
    pub received_late_payments: BTreeSet<String>,
}

impl CollectionData {
    pub fn invoice_booked(&self, invoice_id: &str) -> bool {
        self.booked_invoices.contains(invoice_id)
    }

    pub fn payment_received(&self, payment_id: &str) -> bool {
        self.payment_received_in_time(payment_id).is_some()
            || self.payment_received_late(payment_id)
    }

    /// Fiat value recorded when the payment was first seen in time.
    pub fn payment_received_in_time(&self, payment_id: &str) -> Option<i64> {
        self.received_in_time_payments.get(payment_id).copied()
    }

    pub fn payment_received_late(&self, payment_id: &str) -> bool {
        self.received_late_payments.contains(payment_id)
    }

    /// Records an in-time payment. Returns `false` if the id is already known in
    /// either set, leaving both untouched.
    pub fn record_in_time(&mut self, payment_id: &str, cents: i64) -> bool {
        if self.payment_received(payment_id) {
            return false;
        }
        self.received_in_time_payments
            .insert(payment_id.to_string(), cents);
        true
    }

    /// Records a late payment. Same idempotency rule as [`Self::record_in_time`].
    pub fn record_late(&mut self, payment_id: &str) -> bool {
        if self.payment_received(payment_id) {
            return false;
        }
        self.received_late_payments.insert(payment_id.to_string())
    }

    /// Returns `false` if the invoice was already booked.
    pub fn mark_booked(&mut self, invoice_id: &str) -> bool {
        self.booked_invoices.insert(invoice_id.to_string())
    }

    /// Takes over every booked invoice and received payment of `stored`.
    /// Where both copies know a payment, the stored classification wins, so
    /// the two payment sets stay disjoint.
    pub fn absorb_payments(&mut self, stored: &CollectionData) {
        self.booked_invoices
            .extend(stored.booked_invoices.iter().cloned());
        for (id, cents) in &stored.received_in_time_payments {
            self.received_late_payments.remove(id);
            self.received_in_time_payments.insert(id.clone(), *cents);
        }
        for id in &stored.received_late_payments {
            self.received_in_time_payments.remove(id);
            self.received_late_payments.insert(id.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Article {
    pub link: String,
    pub properties: String,
    pub quantity: i64,
    pub price: i64,
}

/// Extra expense (positive) or discount (negative).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddCost {
    pub name: String,
    pub price: i64,
}

/// Persisted JSON body of a task row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TaskData {
    pub merchant: String,
    pub articles: Vec<Article>,
    pub shipping_fee: i64,
    pub add_costs: Vec<AddCost>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: String,
    pub state: TaskState,
    #[serde(flatten)]
    pub data: TaskData,
}

impl Task {
    pub fn new(data: TaskData) -> Self {
        Self {
            id: new_id(),
            state: TaskState::NotOrderedYet,
            data,
        }
    }

    /// Whether `actor` may replace or remove this task through an edit.
    pub fn writable_by(&self, actor: Actor) -> bool {
        match actor {
            Actor::Bot => false,
            Actor::Client => matches!(self.state, TaskState::Failed | TaskState::NotOrderedYet),
            Actor::Store => matches!(
                self.state,
                TaskState::Failed | TaskState::NotOrderedYet | TaskState::Ordered
            ),
        }
    }
}

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Collection state after the entry was written.
    pub state: CollState,
    pub date: NaiveDate,
    /// Positive: paid in by the client. Negative: refunded by the store.
    pub paid: i64,
    pub text: String,
}

/// Untrusted edit submitted by a client or the store.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CollectionInput {
    #[serde(flatten)]
    pub client: ClientInput,
    #[serde(flatten)]
    pub store: StoreInput,
    pub tasks: Vec<TaskInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskInput {
    pub id: String,
    #[serde(flatten)]
    pub data: TaskData,
}

impl CollectionInput {
    /// Parses and range-checks an edit.
    pub fn from_json(json: &str) -> Result<Self> {
        let input: Self = serde_json::from_str(json)
            .map_err(|e| OrderError::Validation(format!("malformed collection data: {e}")))?;
        input.validate()?;
        Ok(input)
    }

    pub fn validate(&self) -> Result<()> {
        check_amount("reshipping fee", self.store.reshipping_fee)?;
        for task in &self.tasks {
            task.data.validate()?;
        }
        Ok(())
    }
}

impl TaskData {
    pub fn validate(&self) -> Result<()> {
        check_amount("shipping fee", self.shipping_fee)?;
        for article in &self.articles {
            check_amount("article price", article.price)?;
            if !(-MAX_QUANTITY..=MAX_QUANTITY).contains(&article.quantity) {
                return Err(OrderError::Validation(format!(
                    "article quantity out of range: {}",
                    article.quantity
                )));
            }
        }
        for cost in &self.add_costs {
            check_amount("additional cost", cost.price)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub id: String,
    /// bcrypt hash of the client password.
    pub pass: String,
    pub state: CollState,
    pub data: CollectionData,
    /// Ledger entries, oldest first.
    pub events: Vec<Event>,
    pub tasks: Vec<Task>,
}

impl Collection {
    pub fn paid(&self) -> i64 {
        self.events
            .iter()
            .fold(0i64, |sum, e| sum.saturating_add(e.paid))
    }

    pub fn due(&self, pricing: &Pricing) -> i64 {
        pricing
            .collection_total(self)
            .saturating_sub(self.paid())
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn latest_event_date(&self) -> Option<NaiveDate> {
        self.events.iter().map(|e| e.date).max()
    }

    /// Whole days between the latest event and `today`. `None` without events.
    pub fn days_since_latest_event(&self, today: NaiveDate) -> Option<i64> {
        self.latest_event_date()
            .map(|latest| (today - latest).num_days())
    }

    /// Every task reached the client.
    pub fn all_tasks_delivered(&self) -> bool {
        self.tasks.iter().all(|t| t.state.is_delivered())
    }

    pub fn check_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.pass).unwrap_or(false)
    }

    /// Clears personally identifying contact, address and tracking fields.
    /// Delivery method, shipping service and country are kept for bookkeeping.
    pub fn scrub_contact(&mut self) {
        let client = &self.data.client;
        self.data.client = ClientInput {
            delivery_method: client.delivery_method.clone(),
            shipping_service: client.shipping_service.clone(),
            shipping_country: client.shipping_country.clone(),
            ..Default::default()
        };
    }

    /// Merges an untrusted edit into this collection.
    ///
    /// Tasks `actor` may not write are kept verbatim and cannot be replaced,
    /// added twice or removed. Incoming tasks without an id, or with an id not
    /// belonging to this collection, are new and get a fresh id. The client
    /// cannot touch store-only fields. Nothing is modified on error.
    pub fn merge(&mut self, actor: Actor, input: CollectionInput) -> Result<()> {
        if actor == Actor::Bot {
            return Err(OrderError::TransitionDenied);
        }

        let (mut tasks, replaceable): (Vec<Task>, Vec<Task>) = self
            .tasks
            .iter()
            .cloned()
            .partition(|t| !t.writable_by(actor));

        for incoming in input.tasks {
            let id = incoming.id.trim();
            if !id.is_empty() && tasks.iter().any(|t| t.id == id) {
                continue;
            }
            let task = match replaceable.iter().find(|t| !id.is_empty() && t.id == id) {
                Some(old) => Task {
                    id: old.id.clone(),
                    state: old.state,
                    data: incoming.data,
                },
                None => {
                    let mut task = Task::new(incoming.data);
                    while tasks.iter().chain(&self.tasks).any(|t| t.id == task.id) {
                        task.id = new_id();
                    }
                    task
                }
            };
            tasks.push(task);
            if tasks.len() > MAX_TASKS {
                return Err(OrderError::Validation("too many tasks".to_string()));
            }
        }

        self.data.client = input.client;
        if actor == Actor::Store {
            self.data.store = input.store;
        }
        self.tasks = tasks;
        Ok(())
    }
}
