//! Repair ledger: monotonic per-node severity plus the queued action list.
//!
//! The checker never mutates storage in-line. Every finding escalates a
//! node's repair status (which only ever goes up within a run) and may queue
//! exactly one corrective action. The queue is drained later by an explicit
//! apply call -- never concurrently with checking.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::id::NodeId;
use crate::source::StoreAdapter;

/// Repair severity, ordered. Monotonic per node within one run.
///
/// `Pending` marks findings whose queued repair is expected to leave the
/// store clean on the next run; `Recheck` marks findings that need another
/// check pass (or an operator) after repairs; `Failure` marks a node whose
/// repair was attempted and failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Clean,
    Pending,
    Recheck,
    Failure,
}

/// A queued, not-yet-applied corrective action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    /// Destroy the node's bundle outright (orphan disposition; children of
    /// the destroyed node surface as orphans on the next run).
    RemoveNode(NodeId),
    /// Remove `child` from `parent`'s child listing. The child's own record
    /// is untouched.
    UnlistChild { parent: NodeId, child: NodeId },
    /// Flag-only: `child` should be re-parented, with `parent` as the only
    /// observed candidate. No automatic target exists, so apply logs the
    /// flag for operator review and mutates nothing.
    FixParentIntent { child: NodeId, parent: NodeId },
    /// Drop the reference edge `src -> dst`.
    RemoveReference { src: NodeId, dst: NodeId },
}

impl RepairAction {
    /// The node whose stored state an apply of this action touches. Used to
    /// mark `Failure` when the apply errors.
    pub fn subject(&self) -> NodeId {
        match *self {
            RepairAction::RemoveNode(id) => id,
            RepairAction::UnlistChild { parent, .. } => parent,
            RepairAction::FixParentIntent { child, .. } => child,
            RepairAction::RemoveReference { src, .. } => src,
        }
    }
}

/// Outcome of an escalation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Status raised (or re-confirmed at `Pending`); the action, if any,
    /// was queued.
    Accepted,
    /// Request at or below the node's saturation point; nothing was queued.
    /// Requesting `Recheck` on an already-`Recheck` node lands here on
    /// purpose -- re-flagging the same node buys nothing.
    Saturated,
}

/// Findings ledger and repair queue for one partition check.
pub struct RepairLedger {
    /// Per-node status; absent means `Clean`.
    statuses: BTreeMap<NodeId, RepairStatus>,
    /// Queued actions in insertion order. Append-only during checking,
    /// drained exactly once by `apply`.
    queue: Vec<RepairAction>,
}

/// Tally of one apply pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Actions executed against the store.
    pub applied: u64,
    /// Flag-only actions surfaced for operator review.
    pub flagged: u64,
    /// Actions whose execution failed (logged, batch continued).
    pub failed: u64,
}

impl RepairLedger {
    pub fn new() -> Self {
        Self {
            statuses: BTreeMap::new(),
            queue: Vec::new(),
        }
    }

    /// Current status for a node (`Clean` if never escalated).
    pub fn status(&self, id: NodeId) -> RepairStatus {
        self.statuses
            .get(&id)
            .copied()
            .unwrap_or(RepairStatus::Clean)
    }

    /// Request an escalation for `id`, optionally queueing one action.
    ///
    /// Transitions (current -> requested):
    /// - anything strictly above current: accepted;
    /// - `Pending` -> `Pending`: accepted as a no-op transition (the action
    ///   still queues, so independent pending repairs all land);
    /// - `Recheck` -> `Recheck`: saturated, the duplicate action is dropped;
    /// - `Failure` absorbs every further request;
    /// - requests below current never regress the status.
    pub fn escalate(
        &mut self,
        id: NodeId,
        requested: RepairStatus,
        action: Option<RepairAction>,
    ) -> Escalation {
        let current = self.status(id);
        let accepted = match (current, requested) {
            (RepairStatus::Failure, _) => false,
            (RepairStatus::Recheck, RepairStatus::Recheck) => false,
            (RepairStatus::Pending, RepairStatus::Pending) => true,
            (current, requested) => requested > current,
        };
        if !accepted {
            return Escalation::Saturated;
        }

        if requested > current {
            self.statuses.insert(id, requested);
        }
        if let Some(action) = action {
            self.queue.push(action);
        }
        Escalation::Accepted
    }

    /// Worst status across all nodes.
    pub fn worst(&self) -> RepairStatus {
        self.statuses
            .values()
            .copied()
            .max()
            .unwrap_or(RepairStatus::Clean)
    }

    pub fn is_clean(&self) -> bool {
        self.worst() == RepairStatus::Clean
    }

    /// Queued actions, in insertion order.
    pub fn queued(&self) -> &[RepairAction] {
        &self.queue
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Execute every queued action against the store, in insertion order.
    ///
    /// Explicit and separate from checking. Each action's failure is caught,
    /// logged, and marks the subject node `Failure` without aborting the
    /// remaining batch. The queue is drained whether or not actions fail.
    pub fn apply(&mut self, store: &dyn StoreAdapter) -> ApplyReport {
        let actions = std::mem::take(&mut self.queue);
        let mut report = ApplyReport::default();
        for action in actions {
            match Self::apply_one(store, action) {
                Ok(true) => report.applied += 1,
                Ok(false) => report.flagged += 1,
                Err(e) => {
                    warn!("repair failed, continuing batch: {action:?}: {e}");
                    self.statuses.insert(action.subject(), RepairStatus::Failure);
                    report.failed += 1;
                }
            }
        }
        info!(
            "repair batch done: {} applied, {} flagged, {} failed",
            report.applied, report.flagged, report.failed
        );
        report
    }

    /// Returns Ok(true) if storage was mutated, Ok(false) for flag-only.
    fn apply_one(store: &dyn StoreAdapter, action: RepairAction) -> Result<bool> {
        match action {
            RepairAction::RemoveNode(id) => {
                store.destroy(id)?;
                Ok(true)
            }
            RepairAction::UnlistChild { parent, child } => {
                let mut bundle = store.load_bundle(parent)?;
                bundle.children.retain(|c| *c != child);
                store.store_bundle(bundle)?;
                Ok(true)
            }
            RepairAction::FixParentIntent { child, parent } => {
                info!(
                    "operator review: node {child} needs re-parenting (candidate parent {parent})"
                );
                Ok(false)
            }
            RepairAction::RemoveReference { src, dst } => {
                store.remove_reference(src, dst)?;
                Ok(true)
            }
        }
    }
}

impl Default for RepairLedger {
    fn default() -> Self {
        Self::new()
    }
}
