//! Purchase errand order system.
//!
//! Collections of merchant tasks move through an actor-gated lifecycle, every
//! change is written to an append-only ledger, and crypto payments reported by
//! the payment provider are booked exactly once.

pub mod actions;
pub mod api;
pub mod bot;
pub mod collection;
pub mod config;
pub mod db;
pub mod errors;
pub mod fsm;
pub mod id;
pub mod ledger;
pub mod pricing;
pub mod provider;
pub mod reconcile;
pub mod service;
pub mod types;
pub mod webhook;

pub use errors::{OrderError, Result};
pub use service::{Orders, Policy};

#[cfg(test)]
mod test_api;
#[cfg(test)]
mod test_lifecycle;
#[cfg(test)]
mod test_support;
