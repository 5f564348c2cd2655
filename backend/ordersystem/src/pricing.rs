//! Pricing calculator. All amounts are in minor currency units (euro cents).
//!
//! Edits are range-checked before they are stored, but sums saturate anyway:
//! a stored row is read by the bot and the store views, which must not panic.

use serde::Serialize;

use crate::collection::{Collection, Task};

/// A reshipping service the store offers, with its minimum price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShippingService {
    pub id: String,
    pub name: String,
    pub min_cost: i64,
}

impl ShippingService {
    fn new(id: &str, name: &str, min_cost: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            min_cost,
        }
    }
}

/// Commission policy and the store-managed shipping price list.
#[derive(Debug, Clone)]
pub struct Pricing {
    pub share_rate: f64,
    pub base_fee: i64,
    pub shipping_services: Vec<ShippingService>,
}

impl Default for Pricing {
    fn default() -> Self {
        Self::new(0.02, 1290)
    }
}

impl Pricing {
    pub fn new(share_rate: f64, base_fee: i64) -> Self {
        Self {
            share_rate,
            base_fee,
            shipping_services: vec![
                ShippingService::new("dhl-paket-analog", "DHL parcel, franked handwritten", 749),
                ShippingService::new("dhl-paket-digital", "DHL parcel, franked digitally", 594),
                ShippingService::new("post-einschreiben-einwurf", "Registered letter", 381),
                ShippingService::new("post-einschreiben-wert", "Insured letter", 631),
            ],
        }
    }

    /// Articles, shipping fee and additional costs, without the store fee.
    ///
    /// Articles only count when both quantity and price are positive;
    /// additional costs may be negative (discounts).
    pub fn task_sum(&self, task: &Task) -> i64 {
        let articles = task
            .data
            .articles
            .iter()
            .filter(|a| a.quantity > 0 && a.price > 0)
            .map(|a| a.quantity.saturating_mul(a.price))
            .fold(0i64, i64::saturating_add);
        let add_costs = task
            .data
            .add_costs
            .iter()
            .map(|c| c.price)
            .fold(0i64, i64::saturating_add);
        articles
            .saturating_add(task.data.shipping_fee)
            .saturating_add(add_costs)
    }

    pub fn task_fee(&self, task: &Task) -> i64 {
        // float to int `as` saturates
        let share = (self.share_rate * self.task_sum(task) as f64).round() as i64;
        share.saturating_add(self.base_fee)
    }

    pub fn task_total(&self, task: &Task) -> i64 {
        self.task_sum(task).saturating_add(self.task_fee(task))
    }

    /// Services offered for this collection. A stored service id that is no
    /// longer listed is appended with a minimum cost of zero.
    pub fn services_for(&self, coll: &Collection) -> Vec<ShippingService> {
        let mut services = self.shipping_services.clone();
        let selected = &coll.data.client.shipping_service;
        if !selected.is_empty() && !services.iter().any(|s| &s.id == selected) {
            services.push(ShippingService::new(selected, selected, 0));
        }
        services
    }

    /// Reshipping charge: the store's explicit fee if set, otherwise the
    /// minimum of the selected service. Zero unless the goods are shipped.
    pub fn delivery_charge(&self, coll: &Collection) -> i64 {
        if coll.data.client.delivery_method != "shipping" {
            return 0;
        }
        if coll.data.store.reshipping_fee != 0 {
            return coll.data.store.reshipping_fee;
        }
        self.services_for(coll)
            .iter()
            .find(|s| s.id == coll.data.client.shipping_service)
            .map(|s| s.min_cost)
            .unwrap_or(0)
    }

    pub fn collection_total(&self, coll: &Collection) -> i64 {
        coll.tasks
            .iter()
            .map(|t| self.task_total(t))
            .fold(0i64, i64::saturating_add)
            .saturating_add(self.delivery_charge(coll))
    }
}
