//! # Payment reconciliation
//!
//! Books crypto payments reported by the provider against the ledger.
//!
//! Webhooks can be late, missed or redelivered, so nothing here relies on the
//! time a notification arrives:
//!
//! * `InvoiceReceivedPayment` is provisional. Each new payment id goes into
//!   exactly one of the in-time or late sets. Only in-time payments carry a
//!   fiat value; late ones are left for the store to book by hand because the
//!   exchange rate is no longer guaranteed.
//! * `InvoiceSettled` is authoritative and booked at most once per invoice.
//!   Payments never seen provisionally fall back to comparing their received
//!   date with the invoice expiration.
//!
//! Each notification is handled on a [`Locked`] collection: the row is read,
//! checked and written in one write transaction, so overlapping deliveries of
//! the same invoice are applied one after the other and the second one sees
//! what the first one booked.

use tracing::{error, info, warn};

use crate::collection::CollectionData;
use crate::errors::{OrderError, Result};
use crate::ledger::Locked;
use crate::service::{format_cents, Orders};
use crate::types::{Actor, CollState};
use crate::webhook::{fiat_cents, parse_received_date, Invoice, WebhookEvent, WebhookKind};

/// A payment seen after expiration, reported unconverted.
#[derive(Debug, Clone, PartialEq)]
pub struct LatePayment {
    pub payment_id: String,
    pub amount: f64,
    pub crypto_code: String,
}

/// New payments found in one provisional notification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceivedSummary {
    /// Fiat value of payments newly recorded as in time.
    pub in_time_cents: i64,
    pub in_time: Vec<String>,
    pub late: Vec<LatePayment>,
}

impl ReceivedSummary {
    pub fn is_empty(&self) -> bool {
        self.in_time.is_empty() && self.late.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub booked_cents: i64,
    pub state: CollState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Ignored,
    Received(ReceivedSummary),
    Settled(Settlement),
}

/// Sorts the invoice's unseen payments into the in-time or late set.
pub fn classify_received(
    data: &mut CollectionData,
    invoice: &Invoice,
    after_expiration: bool,
) -> ReceivedSummary {
    let mut summary = ReceivedSummary::default();
    for (crypto, payment) in invoice.payments() {
        if data.payment_received(&payment.id) {
            continue;
        }
        if after_expiration {
            data.record_late(&payment.id);
            summary.late.push(LatePayment {
                payment_id: payment.id.clone(),
                amount: payment.value,
                crypto_code: crypto.crypto_code.clone(),
            });
        } else {
            let cents = fiat_cents(crypto, payment);
            data.record_in_time(&payment.id, cents);
            summary.in_time_cents = summary.in_time_cents.saturating_add(cents);
            summary.in_time.push(payment.id.clone());
        }
    }
    summary
}

/// Fiat amount to book when `invoice` settles.
pub fn settled_amount(data: &CollectionData, invoice: &Invoice) -> i64 {
    let expiration = invoice.expiration();
    let mut total: i64 = 0;
    for (crypto, payment) in invoice.payments() {
        if let Some(cents) = data.payment_received_in_time(&payment.id) {
            total = total.saturating_add(cents);
            continue;
        }
        if data.payment_received_late(&payment.id) {
            continue;
        }
        // the provisional webhook was missed
        let Some(received) = parse_received_date(&payment.received_date) else {
            error!(
                "Invoice {}: cannot parse received date {:?} of payment {}, skipping",
                invoice.id, payment.received_date, payment.id
            );
            continue;
        };
        match expiration {
            Some(expiration) if received < expiration => {
                total = total.saturating_add(fiat_cents(crypto, payment))
            }
            _ => warn!(
                "Invoice {}: unseen payment {} received after expiration, not booked",
                invoice.id, payment.id
            ),
        }
    }
    total
}

impl Orders {
    /// Entry point for one webhook delivery.
    pub async fn handle_webhook(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let kind = event.kind();
        if kind == WebhookKind::Unknown {
            info!("Skipping webhook event {}", event.kind);
            return Ok(WebhookOutcome::Ignored);
        }
        info!(
            "Webhook {} for invoice {} (redelivery: {})",
            event.kind, event.invoice_id, event.is_redelivery
        );
        let invoice = self.provider.get_invoice(&event.invoice_id).await?;
        self.reconcile_invoice(kind, &invoice, event.after_expiration)
            .await
    }

    /// Reconcile an already fetched invoice against its collection.
    pub async fn reconcile_invoice(
        &self,
        kind: WebhookKind,
        invoice: &Invoice,
        after_expiration: bool,
    ) -> Result<WebhookOutcome> {
        if kind == WebhookKind::Unknown {
            return Ok(WebhookOutcome::Ignored);
        }
        let mut locked = self.ledger.lock(&invoice.order_id).await?;
        let outcome = match kind {
            WebhookKind::InvoiceReceivedPayment => WebhookOutcome::Received(
                self.invoice_received_payment(&mut locked, invoice, after_expiration)
                    .await?,
            ),
            WebhookKind::InvoiceSettled => {
                WebhookOutcome::Settled(self.invoice_settled(&mut locked, invoice).await?)
            }
            WebhookKind::Unknown => WebhookOutcome::Ignored,
        };
        let coll = locked.commit().await?;
        if matches!(outcome, WebhookOutcome::Settled(_)) {
            self.bot_queue.enqueue(&coll.id);
        }
        Ok(outcome)
    }

    /// Provisional notification: record new payments, then tell the client.
    async fn invoice_received_payment(
        &self,
        locked: &mut Locked,
        invoice: &Invoice,
        after_expiration: bool,
    ) -> Result<ReceivedSummary> {
        let summary = classify_received(&mut locked.coll.data, invoice, after_expiration);
        if summary.is_empty() {
            info!("Invoice {}: no new payments for {}", invoice.id, locked.coll.id);
            return Ok(summary);
        }

        locked.save().await?;

        if summary.in_time_cents > 0 {
            let message = format!(
                "Invoice [{}]({}): provisional receipt of {}. The payment will be booked once the network confirms the transaction.",
                invoice.id,
                invoice.url,
                format_cents(summary.in_time_cents, &self.policy.currency)
            );
            locked.append_note(Actor::Bot, &message).await?;
        }

        for late in &summary.late {
            warn!(
                "Invoice {}: late payment {} of {} {} on {} needs manual review",
                invoice.id, late.payment_id, late.amount, late.crypto_code, locked.coll.id
            );
            let message = format!(
                "Invoice [{}]({}): late provisional receipt of {} {}. The exchange rate can no longer be guaranteed, so the store will review this payment manually.",
                invoice.id, invoice.url, late.amount, late.crypto_code
            );
            if let Err(e) = locked.append_note(Actor::Bot, &message).await {
                error!("Invoice {}: logging late payment {} failed: {e}", invoice.id, late.payment_id);
            }
        }

        Ok(summary)
    }

    /// Authoritative settlement: book the invoice exactly once.
    async fn invoice_settled(&self, locked: &mut Locked, invoice: &Invoice) -> Result<Settlement> {
        let coll = &locked.coll;
        if coll.data.invoice_booked(&invoice.id) {
            return Err(OrderError::AlreadyBooked(invoice.id.clone()));
        }

        let booked_cents = settled_amount(&coll.data, invoice);
        let state = if booked_cents.saturating_add(self.policy.discount_tolerance) >= coll.due(&self.pricing) {
            CollState::Paid
        } else {
            CollState::Underpaid
        };

        // Refuse before marking the invoice booked, so a later redelivery can
        // still book it once the collection is in a payable state.
        if !locked
            .machines()
            .collection
            .can_reach(Actor::Bot, coll.state, state)
        {
            warn!(
                "Invoice {}: collection {} is {}, settlement needs manual review",
                invoice.id, coll.id, coll.state
            );
            return Err(OrderError::TransitionDenied);
        }

        locked.coll.data.mark_booked(&invoice.id);
        locked.save().await?;

        let message = format!(
            "Invoice [{}]({}): payment confirmed: {}.",
            invoice.id,
            invoice.url,
            format_cents(booked_cents, &self.policy.currency)
        );
        locked
            .append_transition(Actor::Bot, state, booked_cents, &message)
            .await?;

        Ok(Settlement {
            booked_cents,
            state,
        })
    }
}
