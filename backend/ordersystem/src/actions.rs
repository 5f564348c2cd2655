//! # Actor actions
//!
//! Every operation a Client or the Store can trigger. Each one maps to one
//! action string of the transition tables: it is offered only when
//! `can_perform` holds, and the concrete target state is checked again by the
//! ledger before anything is written.
//!
//! All methods work on a freshly read [`Collection`] and keep it in sync with
//! what was persisted. If another writer changed the collection's state in the
//! meantime the write is refused with `TransitionDenied`; reread and retry.

use tracing::{debug, info};

use crate::collection::{check_amount, Collection, CollectionInput};
use crate::errors::{OrderError, Result};
use crate::provider::{CreatedInvoice, InvoiceRequest};
use crate::service::{format_cents, Orders};
use crate::types::{Actor, CollState, State, TaskState};

impl Orders {
    fn require(&self, actor: Actor, coll: &Collection, action: &str) -> Result<()> {
        if self.ledger.can(actor, coll, action) {
            Ok(())
        } else {
            debug!("{} may not {action} {} in {}", actor.name(), coll.id, coll.state);
            Err(OrderError::TransitionDenied)
        }
    }

    /// Runs an action that has exactly one target from the current state.
    async fn perform(&self, actor: Actor, coll: &mut Collection, action: &str, message: &str) -> Result<()> {
        self.require(actor, coll, action)?;
        let targets = self
            .ledger
            .machines()
            .collection
            .targets_of(actor, coll.state, action);
        let [target] = targets.as_slice() else {
            return Err(OrderError::TransitionDenied);
        };
        self.ledger
            .append_transition(actor, coll, *target, 0, message)
            .await
    }

    // ── Client ─────────────────────────────────────────────

    /// Start a new draft protected by `password`.
    pub async fn create(&self, password: &str) -> Result<Collection> {
        if password.is_empty() {
            return Err(OrderError::Validation("empty password".to_string()));
        }
        let hash = bcrypt::hash(password, self.policy.password_cost)?;
        self.ledger.create(hash).await
    }

    /// Read a collection as its Client. A wrong password reads as unknown id.
    pub async fn read_with_password(&self, id: &str, password: &str) -> Result<Collection> {
        let coll = self.ledger.read(id).await?;
        if !coll.check_password(password) {
            return Err(OrderError::NotFound);
        }
        Ok(coll)
    }

    pub async fn client_edit(&self, coll: &mut Collection, json: &str) -> Result<()> {
        self.require(Actor::Client, coll, "edit")?;
        let input = CollectionInput::from_json(json)?;
        coll.merge(Actor::Client, input)?;
        self.ledger.save(coll).await
    }

    pub async fn submit(&self, coll: &mut Collection) -> Result<()> {
        if coll.tasks.is_empty() {
            return Err(OrderError::Validation("collection has no tasks".to_string()));
        }
        self.perform(Actor::Client, coll, "submit", "").await
    }

    pub async fn cancel(&self, coll: &mut Collection, message: &str) -> Result<()> {
        self.perform(Actor::Client, coll, "cancel", message).await
    }

    /// Request an invoice over the amount due and link it in the ledger.
    pub async fn pay(&self, coll: &mut Collection) -> Result<CreatedInvoice> {
        self.require(Actor::Client, coll, "pay")?;
        let due = coll.due(&self.pricing);
        if due < self.policy.discount_tolerance {
            return Err(OrderError::Validation("nothing to pay".to_string()));
        }

        let request = InvoiceRequest {
            price: due as f64 / 100.0,
            currency: self.policy.currency.clone(),
            order_id: coll.id.clone(),
            expiration_minutes: self.policy.invoice_expiration_minutes,
            redirect_url: None,
        };
        let invoice = self.provider.create_invoice(&request).await?;
        info!("Invoice {} created for {} over {due}", invoice.id, coll.id);

        let message = format!(
            "invoice [{}]({}) created over {}",
            invoice.id,
            invoice.url,
            format_cents(due, &self.policy.currency)
        );
        self.perform(Actor::Client, coll, "pay", &message).await?;
        Ok(invoice)
    }

    pub async fn client_message(&self, coll: &mut Collection, text: &str) -> Result<()> {
        self.perform(Actor::Client, coll, "message", text).await
    }

    pub async fn client_delete(&self, coll: &Collection) -> Result<()> {
        self.require(Actor::Client, coll, "delete")?;
        self.ledger.delete(Actor::Client, coll).await
    }

    // ── Store ──────────────────────────────────────────────

    pub async fn accept(&self, coll: &mut Collection, message: &str) -> Result<()> {
        self.perform(Actor::Store, coll, "accept", message).await
    }

    /// Send the collection back to the Client for revision.
    pub async fn return_to_client(&self, coll: &mut Collection, message: &str) -> Result<()> {
        self.perform(Actor::Store, coll, "return", message).await
    }

    pub async fn reject(&self, coll: &mut Collection, message: &str) -> Result<()> {
        self.perform(Actor::Store, coll, "reject", message).await
    }

    pub async fn mark_spam(&self, coll: &mut Collection) -> Result<()> {
        self.perform(Actor::Store, coll, "mark-spam", "").await
    }

    /// Store edit. On an underpaid collection whose due drops to zero or below
    /// the edit also settles it.
    pub async fn store_edit(&self, coll: &mut Collection, json: &str) -> Result<()> {
        self.require(Actor::Store, coll, "edit")?;
        let input = CollectionInput::from_json(json)?;
        coll.merge(Actor::Store, input)?;

        if coll.state == CollState::Underpaid && coll.due(&self.pricing) <= 0 {
            self.ledger
                .save_with_transition(Actor::Store, coll, CollState::Paid, 0, "order edited")
                .await
        } else {
            self.ledger.save(coll).await
        }
    }

    /// Book a manually received payment, or a refund when `amount` is negative.
    pub async fn confirm_payment(&self, coll: &mut Collection, amount: i64, message: &str) -> Result<()> {
        self.require(Actor::Store, coll, "confirm-payment")?;
        check_amount("payment", amount)?;
        let target = if amount >= coll.due(&self.pricing) {
            CollState::Paid
        } else {
            CollState::Underpaid
        };
        self.ledger
            .append_transition(Actor::Store, coll, target, amount, message)
            .await?;
        self.bot_queue.enqueue(&coll.id);
        Ok(())
    }

    pub async fn confirm_pickup(&self, coll: &mut Collection, task_ids: &[String]) -> Result<usize> {
        self.confirm_delivery(coll, task_ids, "confirm-pickup").await
    }

    pub async fn confirm_reshipped(&self, coll: &mut Collection, task_ids: &[String]) -> Result<usize> {
        self.confirm_delivery(coll, task_ids, "confirm-reshipped").await
    }

    /// Moves every eligible task named in `task_ids` along `action` and logs one
    /// event for all of them. Unknown or ineligible ids are skipped.
    async fn confirm_delivery(&self, coll: &mut Collection, task_ids: &[String], action: &str) -> Result<usize> {
        self.require(Actor::Store, coll, action)?;

        let task_fsm = &self.ledger.machines().task;
        let mut moved = Vec::new();
        for id in task_ids {
            let Some(task) = coll.task_mut(id) else {
                debug!("{action}: no task {id} in {}", coll.id);
                continue;
            };
            match task_fsm.targets_of(Actor::Store, task.state, action).first() {
                Some(&target) => {
                    task.state = target;
                    moved.push(id.as_str());
                }
                None => debug!("{action}: task {id} is {}", task.state.as_str()),
            }
        }
        if moved.is_empty() {
            return Ok(0);
        }

        let message = format!("{action}: {}", moved.join(", "));
        let count = moved.len();
        let state = coll.state;
        self.ledger
            .save_with_transition(Actor::Store, coll, state, 0, &message)
            .await?;
        self.bot_queue.enqueue(&coll.id);
        Ok(count)
    }

    /// The articles got more expensive; the client owes the difference.
    pub async fn price_rised(&self, coll: &mut Collection, message: &str) -> Result<()> {
        self.perform(Actor::Store, coll, "price-rised", message).await
    }

    pub async fn store_message(&self, coll: &mut Collection, text: &str) -> Result<()> {
        self.perform(Actor::Store, coll, "message", text).await
    }

    pub async fn store_delete(&self, coll: &Collection) -> Result<()> {
        self.require(Actor::Store, coll, "delete")?;
        self.ledger.delete(Actor::Store, coll).await
    }

    // ── Store, single task ─────────────────────────────────

    pub async fn confirm_ordered(&self, coll: &mut Collection, task_id: &str) -> Result<()> {
        self.task_action(coll, task_id, "confirm-ordered").await
    }

    pub async fn confirm_arrived(&self, coll: &mut Collection, task_id: &str) -> Result<()> {
        self.task_action(coll, task_id, "confirm-arrived").await
    }

    pub async fn mark_failed(&self, coll: &mut Collection, task_id: &str, message: &str) -> Result<()> {
        self.task_action(coll, task_id, "mark-failed").await?;
        if !message.trim().is_empty() {
            let note = format!("task {task_id} failed: {message}");
            self.ledger.append_note(Actor::Store, coll, &note).await?;
        }
        Ok(())
    }

    /// Task work happens only while the collection is being paid for.
    async fn task_action(&self, coll: &mut Collection, task_id: &str, action: &str) -> Result<()> {
        if !matches!(coll.state, CollState::Paid | CollState::Underpaid) {
            return Err(OrderError::TransitionDenied);
        }
        let from = coll.task(task_id).ok_or(OrderError::NotFound)?.state;
        let target: Option<TaskState> = self
            .ledger
            .machines()
            .task
            .targets_of(Actor::Store, from, action)
            .first()
            .copied();
        let target = target.ok_or(OrderError::TransitionDenied)?;
        self.ledger
            .update_task_state(Actor::Store, coll, task_id, target)
            .await
    }
}
