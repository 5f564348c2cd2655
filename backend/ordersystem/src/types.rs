//! # Types
//!
//! Actors and lifecycle states shared by every module.
//!
//! ## Collection lifecycle
//!
//! ```text
//! Draft ──► Submitted ──► Accepted ──► Paid ◄──► Underpaid
//!   ▲           │  │          │          │
//!   └ NeedsRevise ◄┘          │          └──► Finalized ──► Archived
//!               ├──► Rejected │
//!               ├──► Spam     ├──► Cancelled
//! ```
//!
//! `Deleted` is a transition target only. Reaching it removes the collection
//! together with its tasks and events, so no stored row ever carries it.
//!
//! ## Task lifecycle
//!
//! ```text
//! NotOrderedYet ──► Ordered ──► Ready ──► Fetched | Reshipped | Unfetched
//!        └──────────────┴──► Failed
//! ```

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::OrderError;

/// Identity performing an operation. Only used to gate transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// Automatic follow-up transitions, never triggered by an outside caller.
    Bot,
    /// The remote customer holding the collection password.
    Client,
    /// Store staff.
    Store,
}

impl Actor {
    /// Name used as the prefix of ledger annotations.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bot => "Bot",
            Self::Client => "Client",
            Self::Store => "Store",
        }
    }
}

/// Common surface of both state enums so one transition table type serves both.
pub trait State: Copy + Eq + Hash + fmt::Debug + 'static {
    fn as_str(&self) -> &'static str;
}

/// Lifecycle status of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CollState {
    #[default]
    Draft,
    Submitted,
    NeedsRevise,
    Accepted,
    /// Fully paid; the store is executing the tasks.
    Paid,
    Underpaid,
    Finalized,
    /// Contact and delivery information has been scrubbed.
    Archived,
    Rejected,
    Cancelled,
    Spam,
    Deleted,
}

impl CollState {
    pub const ALL: [CollState; 12] = [
        Self::Draft,
        Self::Submitted,
        Self::NeedsRevise,
        Self::Accepted,
        Self::Paid,
        Self::Underpaid,
        Self::Finalized,
        Self::Archived,
        Self::Rejected,
        Self::Cancelled,
        Self::Spam,
        Self::Deleted,
    ];
}

impl State for CollState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::NeedsRevise => "needs-revise",
            Self::Accepted => "accepted",
            Self::Paid => "paid",
            Self::Underpaid => "underpaid",
            Self::Finalized => "finalized",
            Self::Archived => "archived",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Spam => "spam",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for CollState {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| OrderError::Validation(format!("unknown collection state: {s}")))
    }
}

impl fmt::Display for CollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage of a single merchant order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    #[default]
    NotOrderedYet,
    Ordered,
    Ready,
    Fetched,
    Reshipped,
    Failed,
    Unfetched,
}

impl TaskState {
    pub const ALL: [TaskState; 7] = [
        Self::NotOrderedYet,
        Self::Ordered,
        Self::Ready,
        Self::Fetched,
        Self::Reshipped,
        Self::Failed,
        Self::Unfetched,
    ];

    /// The goods reached the client, either in the store or by mail.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Fetched | Self::Reshipped)
    }
}

impl State for TaskState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::NotOrderedYet => "not-ordered-yet",
            Self::Ordered => "ordered",
            Self::Ready => "ready",
            Self::Fetched => "fetched",
            Self::Reshipped => "reshipped",
            Self::Failed => "failed",
            Self::Unfetched => "unfetched",
        }
    }
}

impl FromStr for TaskState {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| OrderError::Validation(format!("unknown task state: {s}")))
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
