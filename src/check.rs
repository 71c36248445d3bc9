//! Graph consistency checker.
//!
//! Consumes one partition's record streams into the three relation indexes,
//! then runs three independent read-only scans:
//!
//! 1. root / cycle / orphan scan over parent chains,
//! 2. missing / disconnected child cross-check over child listings,
//! 3. dangling-reference scan.
//!
//! Findings escalate the repair ledger and queue corrective actions; nothing
//! is applied in-line, so scan order cannot affect the final queued set. The
//! apply phase runs strictly afterwards, and only when `fix` is set.
//!
//! All traversal is iterative (explicit path vector, no recursion), so stack
//! use is bounded at any hierarchy depth. Walk order is smallest-id-first
//! and every index iterates sorted, making findings and queued repairs a
//! pure function of the input.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::bridge::StreamBridge;
use crate::error::Result;
use crate::id::NodeId;
use crate::index::RelationIndex;
use crate::progress::Progress;
use crate::repair::{ApplyReport, RepairAction, RepairLedger, RepairStatus};
use crate::source::{PartitionSource, StoreAdapter};

// ── Options & report ───────────────────────────────────────────────

/// Knobs for one checker run. Explicit configuration object; the checker
/// keeps no process-wide state.
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// Apply queued repairs after checking. Never implied.
    pub fix: bool,

    /// Escalate "stale child entry whose true parent already lists it"
    /// instead of downgrading it to a harmless pending cleanup. The
    /// downgrade can mask a writer racing an offline check, so strict runs
    /// refuse to auto-repair those.
    pub strict: bool,

    /// Always-missing system container ids, excluded from missing-child
    /// findings (virtual nodes that other partitions materialize).
    pub allow_missing: BTreeSet<NodeId>,
}

/// Per-partition check result. Category counts are reported even at zero so
/// the absence of a defect class is explicit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub partition: String,
    /// Distinct live nodes observed.
    pub nodes: u64,
    /// Reference pairs indexed (inline bundle references plus the separate
    /// reference stream, deduplicated).
    pub refs: u64,
    pub roots: u64,
    pub cycles: u64,
    pub orphans: u64,
    pub abandoned: u64,
    pub missing_children: u64,
    pub stale_children: u64,
    pub disconnected: u64,
    pub dangling_refs: u64,
    pub duplicated_bundles: u64,
    pub queued_repairs: u64,
    /// The queued repair-action list, in insertion order. Captured before
    /// the apply phase drains it.
    pub actions: Vec<RepairAction>,
    /// Apply tally, present when `fix` ran a non-empty batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repairs: Option<ApplyReport>,
    pub clean: bool,
    pub elapsed_ms: u64,
}

impl CheckReport {
    fn defect_count(&self) -> u64 {
        self.cycles
            + self.orphans
            + self.abandoned
            + self.missing_children
            + self.stale_children
            + self.disconnected
            + self.dangling_refs
            + self.duplicated_bundles
    }
}

// ── Ingested partition state ───────────────────────────────────────

/// The three relation indexes plus the live id set for one partition.
/// Discarded when the partition's check completes.
#[derive(Default)]
struct PartitionState {
    live: BTreeSet<NodeId>,
    /// child -> parent. One value per node record; more than one means the
    /// store holds conflicting bundles for the same id.
    child_parent: RelationIndex<NodeId, NodeId>,
    /// parent -> children, from each record's child listing.
    parent_children: RelationIndex<NodeId, NodeId>,
    /// reference source -> targets.
    references: RelationIndex<NodeId, NodeId>,
    /// Ids observed in more than one node record.
    duplicated: BTreeSet<NodeId>,
}

// ── Checker ────────────────────────────────────────────────────────

/// Offline consistency checker. One instance drives a whole run; partitions
/// are checked sequentially, each with its own indexes and ledger.
pub struct ConsistencyChecker {
    options: CheckOptions,
    /// Node ids from version-history partitions checked earlier in this
    /// run. Dangling-reference scans treat them as valid targets.
    historical: BTreeSet<NodeId>,
}

impl ConsistencyChecker {
    pub fn new(options: CheckOptions) -> Self {
        Self {
            options,
            historical: BTreeSet::new(),
        }
    }

    /// Check one partition; the sole core entry point.
    ///
    /// Streams the partition's records, runs all scans, logs per-category
    /// summaries, and (when `fix` is set) applies the queued repairs
    /// against `store`. A fatal source or storage error propagates and no
    /// partial result for the partition is trusted.
    pub fn check(
        &mut self,
        source: Arc<dyn PartitionSource>,
        store: &dyn StoreAdapter,
    ) -> Result<CheckReport> {
        let started = Instant::now();
        let name = source.name().to_string();
        info!("{name}: consistency check started");

        let state = self.ingest(&source)?;

        let mut ledger = RepairLedger::new();
        let mut report = CheckReport {
            partition: name.clone(),
            nodes: state.live.len() as u64,
            refs: state.references.entry_count() as u64,
            ..CheckReport::default()
        };

        for &id in &state.duplicated {
            warn!("{name}: conflicting bundles stored for node {id}");
            ledger.escalate(id, RepairStatus::Recheck, None);
        }
        report.duplicated_bundles = state.duplicated.len() as u64;

        self.scan_hierarchy(&name, &state, &mut ledger, &mut report);
        self.scan_child_listings(&name, &state, &mut ledger, &mut report);
        self.scan_references(&name, &state, &mut ledger, &mut report);

        report.queued_repairs = ledger.queued_len() as u64;
        report.actions = ledger.queued().to_vec();
        report.clean =
            report.defect_count() == 0 && (report.nodes == 0 || report.roots == 1);
        Self::log_summary(&report);

        if self.options.fix && ledger.queued_len() > 0 {
            let repairs = ledger.apply(store);
            store.flush()?;
            report.repairs = Some(repairs);
        }

        if source.historical() {
            self.historical.extend(state.live.iter().copied());
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "{name}: consistency check {} ({} nodes, {} queued repairs, {}ms)",
            if report.clean { "clean" } else { "found defects" },
            report.nodes,
            report.queued_repairs,
            report.elapsed_ms
        );
        Ok(report)
    }

    /// Ids retained from version-history partitions checked so far.
    pub fn historical_len(&self) -> usize {
        self.historical.len()
    }

    // ── Ingest ─────────────────────────────────────────────────────

    fn ingest(&self, source: &Arc<dyn PartitionSource>) -> Result<PartitionState> {
        let name = source.name().to_string();
        let mut state = PartitionState::default();

        let progress = Progress::new(format!("{name}: nodes"), source.node_count());
        let src = Arc::clone(source);
        let mut bridge =
            StreamBridge::spawn("nodes", progress.clone(), move |push| src.accept_nodes(push))?;
        for record in bridge.by_ref() {
            if record.id.is_no_parent() {
                warn!("{name}: record carries the reserved null id, skipped");
                continue;
            }
            if !state.live.insert(record.id) {
                state.duplicated.insert(record.id);
            }
            state.child_parent.put(record.id, record.parent);
            state
                .parent_children
                .put_all(record.id, record.children.iter().copied());
            state
                .references
                .put_all(record.id, record.references.iter().copied());
        }
        if let Some(e) = bridge.take_error() {
            return Err(e);
        }
        progress.finish();

        let progress = Progress::new(format!("{name}: references"), source.ref_count());
        let src = Arc::clone(source);
        let mut bridge =
            StreamBridge::spawn("refs", progress.clone(), move |push| src.accept_refs(push))?;
        for record in bridge.by_ref() {
            state.references.put(record.src, record.dst);
        }
        if let Some(e) = bridge.take_error() {
            return Err(e);
        }
        progress.finish();

        Ok(state)
    }

    // ── Scan 1: roots, cycles, orphans ─────────────────────────────

    /// Walk every node's parent chain once. Iterative on purpose: hierarchy
    /// depth is attacker-controlled input as far as stack use is concerned.
    fn scan_hierarchy(
        &self,
        name: &str,
        state: &PartitionState,
        ledger: &mut RepairLedger,
        report: &mut CheckReport,
    ) {
        let mut unvisited: BTreeSet<NodeId> = state.live.clone();
        let mut visited: HashSet<NodeId> = HashSet::with_capacity(state.live.len());
        let mut roots: Vec<NodeId> = Vec::new();

        while let Some(&start) = unvisited.iter().next() {
            let mut path: Vec<NodeId> = Vec::new();
            let mut on_path: HashSet<NodeId> = HashSet::new();
            let mut current = start;

            loop {
                path.push(current);
                on_path.insert(current);

                // Every live node has at least one parent entry; a missing
                // one would mean the indexes disagree with ingest.
                let Some(parent) = state.child_parent.get_first(&current) else {
                    break;
                };

                if parent.is_no_parent() {
                    roots.push(current);
                    break;
                }

                if !state.live.contains(&parent) {
                    warn!("{name}: node {current} orphaned, parent {parent} does not exist");
                    report.orphans += 1;
                    ledger.escalate(
                        current,
                        RepairStatus::Recheck,
                        Some(RepairAction::RemoveNode(current)),
                    );
                    break;
                }

                // Cross-check the other direction of this edge: the parent's
                // own child listing must name us. The chain itself is still
                // walkable, so keep going after recording the finding.
                if !state.parent_children.contains(&parent, &current) {
                    warn!("{name}: node {current} abandoned, parent {parent} does not list it");
                    report.abandoned += 1;
                    ledger.escalate(
                        current,
                        RepairStatus::Recheck,
                        Some(RepairAction::FixParentIntent {
                            child: current,
                            parent,
                        }),
                    );
                }

                if on_path.contains(&parent) {
                    self.record_cycle(name, state, &path, parent, ledger, report);
                    break;
                }

                if visited.contains(&parent) {
                    // Prefix validated by an earlier walk.
                    break;
                }

                current = parent;
            }

            for node in path {
                unvisited.remove(&node);
                visited.insert(node);
            }
        }

        report.roots = roots.len() as u64;
        if roots.is_empty() && !state.live.is_empty() {
            warn!("{name}: no root node found");
        }
        // Exactly one root is expected; whichever walk surfaced one first
        // wins and every further root is a corruption needing operator
        // judgement (no automated disposition is safe).
        for &extra in roots.iter().skip(1) {
            warn!("{name}: unexpected extra root node {extra}");
            ledger.escalate(extra, RepairStatus::Recheck, None);
        }
    }

    /// A parent-chain walk closed on itself. Record the cycle and cut
    /// exactly one edge by queueing removal of one member, which the cut
    /// re-classifies as orphaned.
    fn record_cycle(
        &self,
        name: &str,
        state: &PartitionState,
        path: &[NodeId],
        closing: NodeId,
        ledger: &mut RepairLedger,
        report: &mut CheckReport,
    ) {
        let Some(pos) = path.iter().position(|&n| n == closing) else {
            return;
        };
        let mut members: Vec<NodeId> = path[pos..].to_vec();
        members.sort_unstable();

        // Prefer cutting an edge the hierarchy only half-believes in: a
        // member whose parent does not list it. Ties and the fallback both
        // resolve to the smallest id so repeated runs cut the same edge.
        let victim = members
            .iter()
            .copied()
            .find(|&c| match state.child_parent.get_first(&c) {
                Some(p) => !state.parent_children.contains(&p, &c),
                None => true,
            })
            .unwrap_or(members[0]);

        warn!(
            "{name}: cycle of {} nodes detected, cutting at {victim}",
            members.len()
        );
        report.cycles += 1;
        report.orphans += 1;
        ledger.escalate(
            victim,
            RepairStatus::Recheck,
            Some(RepairAction::RemoveNode(victim)),
        );
    }

    // ── Scan 2: child-listing cross-check ──────────────────────────

    /// For every (parent, child) pair some bundle claims, verify the
    /// child's side of the story.
    fn scan_child_listings(
        &self,
        name: &str,
        state: &PartitionState,
        ledger: &mut RepairLedger,
        report: &mut CheckReport,
    ) {
        for (parent, child) in state.parent_children.iter() {
            if !state.live.contains(&child) {
                if self.options.allow_missing.contains(&child) {
                    continue;
                }
                warn!("{name}: node {parent} lists missing child {child}");
                report.missing_children += 1;
                ledger.escalate(
                    child,
                    RepairStatus::Recheck,
                    Some(RepairAction::UnlistChild { parent, child }),
                );
                continue;
            }

            let Some(recorded) = state.child_parent.get_first(&child) else {
                continue;
            };
            if recorded == parent {
                continue;
            }

            if !state.live.contains(&recorded) {
                // The child's own parent is gone; the hierarchy scan owns
                // the node-level orphan disposition, so only flag the
                // listing disagreement here.
                warn!(
                    "{name}: node {child} listed by {parent} but points at \
                     nonexistent parent {recorded}"
                );
                report.disconnected += 1;
                ledger.escalate(child, RepairStatus::Recheck, None);
            } else if state.parent_children.contains(&recorded, &child) {
                if self.options.strict {
                    warn!(
                        "{name}: node {child} listed by both {parent} and its \
                         recorded parent {recorded} (strict: not auto-repaired)"
                    );
                    report.disconnected += 1;
                    ledger.escalate(child, RepairStatus::Recheck, None);
                } else {
                    // Both sides of the true relationship agree; this
                    // listing is leftover state.
                    warn!("{name}: node {parent} holds stale child entry for {child}");
                    report.stale_children += 1;
                    ledger.escalate(
                        child,
                        RepairStatus::Pending,
                        Some(RepairAction::UnlistChild { parent, child }),
                    );
                }
            } else {
                warn!(
                    "{name}: node {child} disconnected, recorded parent {recorded} \
                     does not list it"
                );
                report.disconnected += 1;
                ledger.escalate(
                    child,
                    RepairStatus::Recheck,
                    Some(RepairAction::FixParentIntent { child, parent }),
                );
            }
        }
    }

    // ── Scan 3: dangling references ────────────────────────────────

    fn scan_references(
        &self,
        name: &str,
        state: &PartitionState,
        ledger: &mut RepairLedger,
        report: &mut CheckReport,
    ) {
        for (src, dst) in state.references.iter() {
            if state.live.contains(&dst) || self.historical.contains(&dst) {
                continue;
            }
            warn!("{name}: reference {src} -> {dst} targets a nonexistent node");
            report.dangling_refs += 1;
            ledger.escalate(
                src,
                RepairStatus::Pending,
                Some(RepairAction::RemoveReference { src, dst }),
            );
        }
    }

    // ── Summary ────────────────────────────────────────────────────

    /// One line per category, zero counts included: "no finding" must be
    /// distinguishable from "scan did not run".
    fn log_summary(report: &CheckReport) {
        let name = &report.partition;
        info!("{name}: found {} root nodes", report.roots);
        info!("{name}: found {} cycles", report.cycles);
        info!("{name}: found {} orphaned nodes", report.orphans);
        info!("{name}: found {} abandoned nodes", report.abandoned);
        info!("{name}: found {} missing children", report.missing_children);
        info!("{name}: found {} stale child entries", report.stale_children);
        info!("{name}: found {} disconnected nodes", report.disconnected);
        info!("{name}: found {} dangling references", report.dangling_refs);
        info!(
            "{name}: found {} duplicated bundles",
            report.duplicated_bundles
        );
    }
}

// ── Whole-store orchestration ──────────────────────────────────────

/// A partition paired with the storage adapter its repairs execute against.
pub struct StorePartition {
    pub source: Arc<dyn PartitionSource>,
    pub store: Arc<dyn StoreAdapter>,
}

/// Check every partition sequentially, version-history partitions first so
/// their ids are known to later dangling-reference scans. Each partition
/// gets fresh indexes and a fresh ledger.
pub fn check_store(
    partitions: &[StorePartition],
    options: CheckOptions,
) -> Result<Vec<CheckReport>> {
    let mut checker = ConsistencyChecker::new(options);
    let mut reports = Vec::with_capacity(partitions.len());

    let (versioned, workspaces): (Vec<_>, Vec<_>) = partitions
        .iter()
        .partition(|p| p.source.historical());
    for part in versioned.into_iter().chain(workspaces) {
        reports.push(checker.check(Arc::clone(&part.source), part.store.as_ref())?);
    }
    Ok(reports)
}

pub fn all_clean(reports: &[CheckReport]) -> bool {
    reports.iter().all(|r| r.clean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NodeRecord;
    use crate::source::MemoryStore;

    fn node(id: u128, parent: u128, children: &[u128]) -> NodeRecord {
        NodeRecord {
            id: NodeId(id),
            parent: NodeId(parent),
            children: children.iter().map(|&c| NodeId(c)).collect(),
            references: Vec::new(),
        }
    }

    fn check_once(store: &Arc<MemoryStore>, options: CheckOptions) -> CheckReport {
        let mut checker = ConsistencyChecker::new(options);
        checker
            .check(Arc::clone(store) as Arc<dyn PartitionSource>, store.as_ref())
            .unwrap()
    }

    #[test]
    fn test_clean_two_level_tree() {
        let store = Arc::new(MemoryStore::new("ws"));
        store.add_node(node(1, 0, &[2, 3]));
        store.add_node(node(2, 1, &[]));
        store.add_node(node(3, 1, &[]));

        let report = check_once(&store, CheckOptions::default());
        assert!(report.clean);
        assert_eq!(report.roots, 1);
        assert_eq!(report.queued_repairs, 0);
        assert_eq!(report.defect_count(), 0);
    }

    #[test]
    fn test_empty_partition_is_clean() {
        let store = Arc::new(MemoryStore::new("empty"));
        let report = check_once(&store, CheckOptions::default());
        assert!(report.clean);
        assert_eq!(report.nodes, 0);
        assert_eq!(report.roots, 0);
    }

    #[test]
    fn test_orphan_detected_once() {
        let store = Arc::new(MemoryStore::new("ws"));
        store.add_node(node(1, 0, &[2]));
        store.add_node(node(2, 1, &[3]));
        // Node 3's parent 99 was never stored.
        store.add_node(node(3, 99, &[]));

        let report = check_once(&store, CheckOptions::default());
        assert!(!report.clean);
        assert_eq!(report.orphans, 1);
    }

    #[test]
    fn test_multiple_roots_flagged() {
        let store = Arc::new(MemoryStore::new("ws"));
        store.add_node(node(1, 0, &[]));
        store.add_node(node(2, 0, &[]));

        let report = check_once(&store, CheckOptions::default());
        assert!(!report.clean);
        assert_eq!(report.roots, 2);
    }
}
