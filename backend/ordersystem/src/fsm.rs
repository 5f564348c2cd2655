//! Actor-gated transition tables.
//!
//! A table answers two questions: "may this actor move from `from` to `to`"
//! ([`Fsm::can_reach`]) and "does this actor have action `a` in state `from`"
//! ([`Fsm::can_perform`]). Both tables are built once at startup and shared
//! read-only through [`Machines`].

use std::collections::{HashMap, HashSet};

use crate::types::{Actor, CollState, State, TaskState};

/// One `(from, actor, action) → to` rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub from: S,
    pub actor: Actor,
    pub action: &'static str,
    pub to: S,
}

/// Transition table keyed by `(actor, from)`.
#[derive(Debug, Clone)]
pub struct Fsm<S: State> {
    edges: HashMap<(Actor, S), Vec<(&'static str, S)>>,
}

impl<S: State> Fsm<S> {
    pub fn new(transitions: impl IntoIterator<Item = Transition<S>>) -> Self {
        let mut edges: HashMap<(Actor, S), Vec<(&'static str, S)>> = HashMap::new();
        for t in transitions {
            let targets = edges.entry((t.actor, t.from)).or_default();
            if !targets.contains(&(t.action, t.to)) {
                targets.push((t.action, t.to));
            }
        }
        Self { edges }
    }

    /// `true` iff some transition matches actor, origin and target exactly.
    pub fn can_reach(&self, actor: Actor, from: S, to: S) -> bool {
        self.targets(actor, from).any(|(_, target)| target == to)
    }

    /// `true` iff `action` exists for this actor in `from`, whatever its target.
    pub fn can_perform(&self, actor: Actor, from: S, action: &str) -> bool {
        self.targets(actor, from).any(|(a, _)| a == action)
    }

    /// All states from which `actor` has at least one transition.
    pub fn states_origin(&self, actor: Actor) -> HashSet<S> {
        self.edges
            .keys()
            .filter(|(a, _)| *a == actor)
            .map(|(_, from)| *from)
            .collect()
    }

    /// Targets `action` can lead to for this actor in `from`.
    pub fn targets_of(&self, actor: Actor, from: S, action: &str) -> Vec<S> {
        self.targets(actor, from)
            .filter(|(a, _)| *a == action)
            .map(|(_, to)| to)
            .collect()
    }

    fn targets(&self, actor: Actor, from: S) -> impl Iterator<Item = (&'static str, S)> + '_ {
        self.edges
            .get(&(actor, from))
            .into_iter()
            .flat_map(|targets| targets.iter().copied())
    }
}

/// Both tables, built once and handed to every component that guards a write.
#[derive(Debug, Clone)]
pub struct Machines {
    pub collection: Fsm<CollState>,
    pub task: Fsm<TaskState>,
}

impl Default for Machines {
    fn default() -> Self {
        Self {
            collection: collection_fsm(),
            task: task_fsm(),
        }
    }
}

fn t<S>(from: S, actor: Actor, action: &'static str, to: S) -> Transition<S> {
    Transition {
        from,
        actor,
        action,
        to,
    }
}

/// Collection transition table.
pub fn collection_fsm() -> Fsm<CollState> {
    use Actor::{Bot, Client, Store};
    use CollState::*;

    Fsm::new([
        t(Accepted, Bot, "confirm-payment", Paid),
        t(Accepted, Bot, "confirm-payment", Underpaid),
        t(Accepted, Bot, "delete", Deleted),
        t(Accepted, Client, "cancel", Cancelled),
        // stays Accepted until the provider reports the payment
        t(Accepted, Client, "pay", Accepted),
        t(Accepted, Store, "confirm-payment", Paid),
        t(Accepted, Store, "confirm-payment", Underpaid),
        t(Accepted, Store, "delete", Deleted),
        t(Accepted, Store, "edit", Accepted),
        t(Accepted, Store, "return", NeedsRevise),
        t(Draft, Bot, "delete", Deleted),
        t(Draft, Client, "delete", Deleted),
        t(Draft, Client, "edit", Draft),
        t(Draft, Client, "submit", Submitted),
        t(Finalized, Store, "message", Finalized),
        t(Finalized, Bot, "archive", Archived),
        t(NeedsRevise, Client, "cancel", Cancelled),
        t(NeedsRevise, Client, "edit", NeedsRevise),
        t(NeedsRevise, Client, "submit", Submitted),
        t(Paid, Bot, "confirm-payment", Paid),
        t(Paid, Bot, "finalize", Finalized),
        // manual refund of an overpaid amount
        t(Paid, Store, "confirm-payment", Paid),
        t(Paid, Store, "confirm-pickup", Paid),
        t(Paid, Store, "confirm-reshipped", Paid),
        t(Paid, Store, "edit", Paid),
        t(Paid, Store, "message", Paid),
        t(Paid, Store, "price-rised", Underpaid),
        t(Spam, Bot, "delete", Deleted),
        t(Submitted, Client, "cancel", Cancelled),
        t(Submitted, Store, "accept", Accepted),
        t(Submitted, Store, "edit", Submitted),
        t(Submitted, Store, "mark-spam", Spam),
        t(Submitted, Store, "reject", Rejected),
        t(Submitted, Store, "return", NeedsRevise),
        t(Underpaid, Bot, "confirm-payment", Paid),
        t(Underpaid, Bot, "confirm-payment", Underpaid),
        t(Underpaid, Client, "message", Underpaid),
        t(Underpaid, Client, "pay", Underpaid),
        t(Underpaid, Store, "confirm-payment", Paid),
        t(Underpaid, Store, "confirm-payment", Underpaid),
        // an edit that lowers the sum can settle the debt
        t(Underpaid, Store, "edit", Paid),
        t(Underpaid, Store, "edit", Underpaid),
        t(Underpaid, Store, "message", Underpaid),
    ])
}

/// Task transition table.
pub fn task_fsm() -> Fsm<TaskState> {
    use Actor::{Bot, Store};
    use TaskState::*;

    Fsm::new([
        t(NotOrderedYet, Store, "confirm-ordered", Ordered),
        t(NotOrderedYet, Store, "mark-failed", Failed),
        t(Ordered, Store, "confirm-arrived", Ready),
        t(Ordered, Store, "mark-failed", Failed),
        t(Ready, Bot, "pickup-expired", Unfetched),
        t(Ready, Store, "confirm-pickup", Fetched),
        t(Ready, Store, "confirm-reshipped", Reshipped),
    ])
}
