//! # Ledger
//!
//! Guarded writes for collections. [`Ledger::append_transition`] is the only
//! way a collection changes state: it checks the transition table against the
//! state held by the caller, then writes the new state and its event together.
//!
//! Every write runs in one `BEGIN IMMEDIATE` transaction that first checks the
//! stored state still equals the caller's. A copy that went stale because
//! another writer moved the collection on is refused with `TransitionDenied`
//! instead of overwriting that writer's result. Where the decision itself
//! depends on the stored row (webhook reconciliation), [`Ledger::lock`] reads
//! the row inside the transaction and holds it until commit.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::collection::{Collection, Event};
use crate::db;
use crate::errors::{OrderError, Result};
use crate::fsm::Machines;
use crate::id::new_id;
use crate::types::{Actor, CollState, TaskState};

/// `"<Actor>: <message>"`, or empty when the message is blank.
pub fn annotate(actor: Actor, message: &str) -> String {
    let message = message.trim();
    if message.is_empty() {
        String::new()
    } else {
        format!("{}: {}", actor.name(), message)
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
    machines: Arc<Machines>,
}

impl Ledger {
    pub fn new(pool: SqlitePool, machines: Arc<Machines>) -> Self {
        Self { pool, machines }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn machines(&self) -> &Machines {
        &self.machines
    }

    /// `CanPerform` on the collection table for the collection's current state.
    pub fn can(&self, actor: Actor, coll: &Collection, action: &str) -> bool {
        self.machines
            .collection
            .can_perform(actor, coll.state, action)
    }

    /// Create a draft collection with its synthetic "created" event.
    pub async fn create(&self, pass_hash: String) -> Result<Collection> {
        let mut coll = Collection {
            id: new_id(),
            pass: pass_hash,
            state: CollState::Draft,
            ..Default::default()
        };
        let first = Event {
            state: CollState::Draft,
            date: today(),
            paid: 0,
            text: "Order draft created".to_string(),
        };
        db::insert_collection(&self.pool, &coll, &first).await?;
        coll.events.push(first);
        info!("Created collection {}", coll.id);
        Ok(coll)
    }

    pub async fn read(&self, id: &str) -> Result<Collection> {
        db::read_collection(&self.pool, id).await
    }

    /// Read `id` inside a write transaction. Other writers of the database
    /// wait until the returned [`Locked`] is committed or dropped.
    pub async fn lock(&self, id: &str) -> Result<Locked> {
        let mut tx = db::begin_write(&self.pool).await?;
        let coll = db::read_collection_in(&mut tx, id).await?;
        Ok(Locked {
            tx,
            machines: self.machines.clone(),
            coll,
        })
    }

    /// Write transaction on which `coll`'s state has been confirmed current.
    async fn begin(&self, coll: &Collection) -> Result<Transaction<'static, Sqlite>> {
        let mut tx = db::begin_write(&self.pool).await?;
        db::expect_state(&mut tx, &coll.id, coll.state).await?;
        Ok(tx)
    }

    /// Move `coll` to `new_state` and book `paid` in the same transaction.
    pub async fn append_transition(
        &self,
        actor: Actor,
        coll: &mut Collection,
        new_state: CollState,
        paid: i64,
        message: &str,
    ) -> Result<()> {
        let event = transition_event(&self.machines, actor, coll, new_state, paid, message)?;
        let mut tx = self.begin(coll).await?;
        write_transition(&mut tx, &coll.id, &event).await?;
        tx.commit().await?;
        applied(actor, coll, event);
        Ok(())
    }

    /// Like [`Self::append_transition`], also writing data and tasks of `coll`
    /// in the same transaction.
    pub async fn save_with_transition(
        &self,
        actor: Actor,
        coll: &mut Collection,
        new_state: CollState,
        paid: i64,
        message: &str,
    ) -> Result<()> {
        let event = transition_event(&self.machines, actor, coll, new_state, paid, message)?;
        let mut tx = self.begin(coll).await?;
        db::write_data_and_tasks(&mut tx, coll).await?;
        write_transition(&mut tx, &coll.id, &event).await?;
        tx.commit().await?;
        applied(actor, coll, event);
        Ok(())
    }

    /// Append an event that keeps the current state and books nothing.
    pub async fn append_note(&self, actor: Actor, coll: &mut Collection, message: &str) -> Result<()> {
        let event = note_event(actor, coll, message);
        let mut tx = self.begin(coll).await?;
        db::insert_event(&mut tx, &coll.id, &event).await?;
        tx.commit().await?;
        debug!("{} noted on {}", actor.name(), coll.id);
        coll.events.push(event);
        Ok(())
    }

    /// Persist data and tasks without changing state.
    pub async fn save(&self, coll: &mut Collection) -> Result<()> {
        let mut tx = self.begin(coll).await?;
        db::write_data_and_tasks(&mut tx, coll).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Remove the collection, its tasks and events. Gated like a transition to
    /// `Deleted`, but the refusal is explicit so a failed deletion is noticed.
    pub async fn delete(&self, actor: Actor, coll: &Collection) -> Result<()> {
        if !self
            .machines
            .collection
            .can_reach(actor, coll.state, CollState::Deleted)
        {
            return Err(OrderError::TransitionDenied);
        }
        let mut tx = self.begin(coll).await?;
        db::delete_collection(&mut tx, &coll.id).await?;
        tx.commit().await?;
        info!("{} deleted collection {} ({})", actor.name(), coll.id, coll.state);
        Ok(())
    }

    /// Move one task along the task table.
    pub async fn update_task_state(
        &self,
        actor: Actor,
        coll: &mut Collection,
        task_id: &str,
        new_state: TaskState,
    ) -> Result<()> {
        let from = coll.task(task_id).ok_or(OrderError::NotFound)?.state;
        if !self.machines.task.can_reach(actor, from, new_state) {
            return Err(OrderError::TransitionDenied);
        }
        let mut tx = self.begin(coll).await?;
        db::write_task_state(&mut tx, &coll.id, task_id, from, new_state).await?;
        tx.commit().await?;
        debug!("Task {task_id}: {from} -> {new_state}");
        if let Some(task) = coll.task_mut(task_id) {
            task.state = new_state;
        }
        Ok(())
    }
}

/// A collection read inside an open write transaction.
///
/// Writes go to the transaction and to [`Locked::coll`] immediately; nothing
/// is visible to other readers before [`Locked::commit`]. Dropping it rolls
/// everything back.
pub struct Locked {
    tx: Transaction<'static, Sqlite>,
    machines: Arc<Machines>,
    pub coll: Collection,
}

impl Locked {
    pub fn machines(&self) -> &Machines {
        &self.machines
    }

    pub async fn save(&mut self) -> Result<()> {
        db::write_data_and_tasks(&mut self.tx, &mut self.coll).await
    }

    pub async fn append_transition(
        &mut self,
        actor: Actor,
        new_state: CollState,
        paid: i64,
        message: &str,
    ) -> Result<()> {
        let event = transition_event(&self.machines, actor, &self.coll, new_state, paid, message)?;
        write_transition(&mut self.tx, &self.coll.id, &event).await?;
        applied(actor, &mut self.coll, event);
        Ok(())
    }

    pub async fn append_note(&mut self, actor: Actor, message: &str) -> Result<()> {
        let event = note_event(actor, &self.coll, message);
        db::insert_event(&mut self.tx, &self.coll.id, &event).await?;
        self.coll.events.push(event);
        Ok(())
    }

    pub async fn commit(self) -> Result<Collection> {
        self.tx.commit().await?;
        Ok(self.coll)
    }
}

fn transition_event(
    machines: &Machines,
    actor: Actor,
    coll: &Collection,
    new_state: CollState,
    paid: i64,
    message: &str,
) -> Result<Event> {
    if new_state == CollState::Deleted || !machines.collection.can_reach(actor, coll.state, new_state) {
        return Err(OrderError::TransitionDenied);
    }
    Ok(Event {
        state: new_state,
        date: today(),
        paid,
        text: annotate(actor, message),
    })
}

fn note_event(actor: Actor, coll: &Collection, message: &str) -> Event {
    Event {
        state: coll.state,
        date: today(),
        paid: 0,
        text: annotate(actor, message),
    }
}

async fn write_transition(conn: &mut SqliteConnection, coll_id: &str, event: &Event) -> Result<()> {
    db::write_state(conn, coll_id, event.state).await?;
    db::insert_event(conn, coll_id, event).await
}

fn applied(actor: Actor, coll: &mut Collection, event: Event) {
    info!(
        "{} moved {} from {} to {} (paid {})",
        actor.name(),
        coll.id,
        coll.state,
        event.state,
        event.paid
    );
    coll.state = event.state;
    coll.events.push(event);
}
