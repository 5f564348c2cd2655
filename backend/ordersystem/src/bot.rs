//! # Bot
//!
//! Automatic follow-up transitions. The bot is never called from outside:
//! it runs on a periodic sweep and on collection ids queued by Store actions
//! that may have unblocked something (a confirmed payment, a pickup).
//!
//! Per collection the steps run in a fixed order: archive, delete, finalize.
//! Each step is guarded by the transition table, so queue duplicates and
//! repeated sweeps are harmless.

use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::collection::Collection;
use crate::db;
use crate::errors::{OrderError, Result};
use crate::ledger::today;
use crate::service::Orders;
use crate::types::{Actor, CollState, State};

/// Sending half of the bounded bot worker queue.
#[derive(Clone)]
pub struct BotQueue {
    tx: mpsc::Sender<String>,
}

impl BotQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Never blocks. A full or closed queue drops the id; the next periodic
    /// sweep picks the collection up anyway.
    pub fn enqueue(&self, coll_id: &str) {
        match self.tx.try_send(coll_id.to_string()) {
            Ok(()) => debug!("Queued {coll_id} for the bot"),
            Err(TrySendError::Full(id)) => warn!("Bot queue full, dropping {id}"),
            Err(TrySendError::Closed(id)) => warn!("Bot queue closed, dropping {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStep {
    Archived,
    Deleted,
    Finalized,
}

/// Run the bot until the process exits.
pub async fn run(orders: Orders, mut queue: mpsc::Receiver<String>, every: Duration) {
    info!("Bot starting, sweeping every {}s", every.as_secs());
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let touched = orders.bot_sweep(today()).await;
                info!("Bot sweep done, {touched} collections changed");
            }
            next = queue.recv() => match next {
                Some(id) => orders.bot_id(&id, today()).await,
                None => break,
            },
        }
    }

    warn!("Bot queue closed, continuing with periodic sweeps only");
    loop {
        ticker.tick().await;
        orders.bot_sweep(today()).await;
    }
}

impl Orders {
    /// Visit every collection in a state the bot can leave.
    /// Returns how many collections had at least one step applied.
    pub async fn bot_sweep(&self, today: NaiveDate) -> usize {
        let mut states: Vec<CollState> = self
            .ledger
            .machines()
            .collection
            .states_origin(Actor::Bot)
            .into_iter()
            .collect();
        states.sort_by_key(|s| s.as_str());

        let mut touched = 0;
        for state in states {
            let ids = match db::read_collection_ids(self.ledger.pool(), state).await {
                Ok(ids) => ids,
                Err(e) => {
                    error!("Bot could not list {state} collections: {e}");
                    continue;
                }
            };
            for id in ids {
                if self.bot_id_steps(&id, today).await > 0 {
                    touched += 1;
                }
            }
        }
        touched
    }

    /// Handle one queued collection id.
    pub async fn bot_id(&self, coll_id: &str, today: NaiveDate) {
        self.bot_id_steps(coll_id, today).await;
    }

    async fn bot_id_steps(&self, coll_id: &str, today: NaiveDate) -> usize {
        let mut coll = match self.ledger.read(coll_id).await {
            Ok(coll) => coll,
            Err(OrderError::NotFound) => {
                debug!("Bot: {coll_id} is gone");
                return 0;
            }
            Err(e) => {
                error!("Bot could not read {coll_id}: {e}");
                return 0;
            }
        };
        match self.bot_collection(&mut coll, today).await {
            Ok(steps) => steps.len(),
            Err(e) => {
                error!("Bot failed on {coll_id}: {e}");
                0
            }
        }
    }

    /// Archive, delete, finalize. The first failing step ends the run.
    pub async fn bot_collection(&self, coll: &mut Collection, today: NaiveDate) -> Result<Vec<BotStep>> {
        let mut steps = Vec::new();
        let expired = coll
            .days_since_latest_event(today)
            .is_some_and(|days| days >= self.policy.retention_days);

        // not in debt; an overpaid remainder does not block archiving
        if expired && self.ledger.can(Actor::Bot, coll, "archive") && coll.due(&self.pricing) <= 0 {
            coll.scrub_contact();
            self.ledger
                .save_with_transition(Actor::Bot, coll, CollState::Archived, 0, "")
                .await?;
            info!("Bot archived {}", coll.id);
            steps.push(BotStep::Archived);
        }

        if expired && self.ledger.can(Actor::Bot, coll, "delete") {
            self.ledger.delete(Actor::Bot, coll).await?;
            steps.push(BotStep::Deleted);
            return Ok(steps);
        }

        if self.ledger.can(Actor::Bot, coll, "finalize")
            && coll.due(&self.pricing) == 0
            && coll.all_tasks_delivered()
        {
            self.ledger
                .append_transition(Actor::Bot, coll, CollState::Finalized, 0, "")
                .await?;
            info!("Bot finalized {}", coll.id);
            steps.push(BotStep::Finalized);
        }

        Ok(steps)
    }
}
