//! Integration test: repair application and re-check convergence.
//!
//! Validates that:
//! - queued repairs execute in insertion order against the store adapter
//! - applying auto-fixable repairs leaves the store clean on the next run
//! - an action failure is contained (batch continues, node marked Failure)
//! - the dump adapter persists repairs through flush and re-open

use std::sync::Arc;

use hfsck::dump::{write_partition, DumpPartition};
use hfsck::{
    all_clean, check_store, CheckOptions, CheckReport, ConsistencyChecker, Escalation,
    MemoryStore, NodeId, NodeRecord, PartitionSource, RefRecord, RepairAction, RepairLedger,
    RepairStatus, StorePartition,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn node(id: u128, parent: u128, children: &[u128]) -> NodeRecord {
    NodeRecord {
        id: NodeId(id),
        parent: NodeId(parent),
        children: children.iter().map(|&c| NodeId(c)).collect(),
        references: Vec::new(),
    }
}

fn check(store: &Arc<MemoryStore>, fix: bool) -> CheckReport {
    let mut checker = ConsistencyChecker::new(CheckOptions {
        fix,
        ..CheckOptions::default()
    });
    checker
        .check(Arc::clone(store) as Arc<dyn PartitionSource>, store.as_ref())
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests: apply semantics
// ---------------------------------------------------------------------------

#[test]
fn unlisting_stale_child_leaves_true_parent_untouched() {
    let store = Arc::new(MemoryStore::new("ws"));
    store.add_node(node(1, 0, &[2, 3]));
    store.add_node(node(2, 1, &[5]));
    store.add_node(node(3, 1, &[5]));
    store.add_node(node(5, 3, &[]));

    let report = check(&store, true);
    assert!(!report.clean);
    assert_eq!(report.stale_children, 1);
    let repairs = report.repairs.unwrap();
    assert_eq!(repairs.applied, 1);
    assert_eq!(repairs.failed, 0);

    // The stale lister lost the entry; the true parent kept it.
    assert!(store.get(NodeId(2)).unwrap().children.is_empty());
    assert_eq!(store.get(NodeId(3)).unwrap().children, vec![NodeId(5)]);

    let second = check(&store, false);
    assert!(second.clean);
}

#[test]
fn fix_false_never_mutates() {
    let store = Arc::new(MemoryStore::new("ws"));
    store.add_node(node(1, 0, &[2, 9]));
    store.add_node(node(2, 1, &[]));

    let report = check(&store, false);
    assert_eq!(report.missing_children, 1);
    assert!(report.repairs.is_none());
    // The listing is still there.
    assert_eq!(
        store.get(NodeId(1)).unwrap().children,
        vec![NodeId(2), NodeId(9)]
    );
}

#[test]
fn applied_repairs_converge_to_clean() {
    let store = Arc::new(MemoryStore::new("ws"));
    store.add_node(node(1, 0, &[2, 3]));
    // 9 is missing, 5 is a stale entry (true parent 3 lists it).
    store.add_node(node(2, 1, &[9, 5]));
    store.add_node(node(3, 1, &[5]));
    store.add_node(node(5, 3, &[]));
    // Leaf orphan with an absent parent.
    store.add_node(node(6, 77, &[]));
    store.add_ref(NodeId(5), NodeId(1234));

    let report = check(&store, true);
    assert!(!report.clean);
    assert_eq!(report.orphans, 1);
    assert_eq!(report.missing_children, 1);
    assert_eq!(report.stale_children, 1);
    assert_eq!(report.dangling_refs, 1);
    assert_eq!(
        report.actions,
        vec![
            RepairAction::RemoveNode(NodeId(6)),
            RepairAction::UnlistChild {
                parent: NodeId(2),
                child: NodeId(5),
            },
            RepairAction::UnlistChild {
                parent: NodeId(2),
                child: NodeId(9),
            },
            RepairAction::RemoveReference {
                src: NodeId(5),
                dst: NodeId(1234),
            },
        ]
    );
    assert_eq!(report.repairs.unwrap().applied, 4);

    let second = check(&store, false);
    assert!(second.clean, "store must be clean after repairs: {second:?}");
    assert!(second.actions.is_empty());
    assert!(!store.contains(NodeId(6)));
}

#[test]
fn cycle_cut_converges_over_repeated_fix_runs() {
    let store = Arc::new(MemoryStore::new("ws"));
    store.add_node(node(1, 0, &[]));
    store.add_node(node(10, 11, &[12]));
    store.add_node(node(11, 12, &[10]));
    store.add_node(node(12, 10, &[11]));

    // Each fix pass removes one member; the survivors surface as orphans
    // (their parent is gone) until the whole cycle has drained.
    let mut passes = 0;
    loop {
        let report = check(&store, true);
        passes += 1;
        if report.clean {
            break;
        }
        assert!(passes < 10, "cycle repair did not converge");
    }
    assert!(store.contains(NodeId(1)));
    assert!(!store.contains(NodeId(10)));
    assert!(!store.contains(NodeId(11)));
    assert!(!store.contains(NodeId(12)));
}

// ---------------------------------------------------------------------------
// Tests: failure containment
// ---------------------------------------------------------------------------

#[test]
fn failed_action_is_contained_and_marks_failure() {
    let store = MemoryStore::new("ws");
    store.add_node(node(1, 0, &[9]));

    let mut ledger = RepairLedger::new();
    // Destroying a node that does not exist fails at apply time.
    ledger.escalate(
        NodeId(42),
        RepairStatus::Recheck,
        Some(RepairAction::RemoveNode(NodeId(42))),
    );
    ledger.escalate(
        NodeId(9),
        RepairStatus::Recheck,
        Some(RepairAction::UnlistChild {
            parent: NodeId(1),
            child: NodeId(9),
        }),
    );

    let report = ledger.apply(&store);
    assert_eq!(report.failed, 1);
    // The failure did not abort the rest of the batch.
    assert_eq!(report.applied, 1);
    assert!(store.get(NodeId(1)).unwrap().children.is_empty());

    // The failed node is absorbed at Failure.
    assert_eq!(ledger.status(NodeId(42)), RepairStatus::Failure);
    assert_eq!(
        ledger.escalate(NodeId(42), RepairStatus::Recheck, None),
        Escalation::Saturated
    );
}

#[test]
fn flag_only_actions_do_not_touch_storage() {
    let store = MemoryStore::new("ws");
    store.add_node(node(1, 0, &[2]));
    store.add_node(node(2, 1, &[]));

    let mut ledger = RepairLedger::new();
    ledger.escalate(
        NodeId(2),
        RepairStatus::Recheck,
        Some(RepairAction::FixParentIntent {
            child: NodeId(2),
            parent: NodeId(1),
        }),
    );

    let report = ledger.apply(&store);
    assert_eq!(report.flagged, 1);
    assert_eq!(report.applied, 0);
    assert_eq!(store.get(NodeId(1)).unwrap().children, vec![NodeId(2)]);
}

// ---------------------------------------------------------------------------
// Tests: dump adapter end-to-end
// ---------------------------------------------------------------------------

#[test]
fn dump_store_fix_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let vroot = NodeId::from_name("version-root");
    let hist = NodeId::from_name("hist-1");
    write_partition(
        &dir.path().join("version"),
        &[
            NodeRecord {
                id: vroot,
                parent: NodeId::NO_PARENT,
                children: vec![hist],
                references: Vec::new(),
            },
            NodeRecord {
                id: hist,
                parent: vroot,
                children: Vec::new(),
                references: Vec::new(),
            },
        ],
        &[],
    )
    .unwrap();

    let root = NodeId::from_name("r");
    let a = NodeId::from_name("a");
    write_partition(
        &dir.path().join("ws"),
        &[
            NodeRecord {
                id: root,
                parent: NodeId::NO_PARENT,
                // "missing-kid" has no record: queue an unlist.
                children: vec![a, NodeId::from_name("missing-kid")],
                references: Vec::new(),
            },
            NodeRecord {
                id: a,
                parent: root,
                children: Vec::new(),
                references: Vec::new(),
            },
        ],
        &[
            // Valid via the version-history store.
            RefRecord { src: a, dst: hist },
            // Dangling everywhere.
            RefRecord {
                src: a,
                dst: NodeId::from_name("gone"),
            },
        ],
    )
    .unwrap();

    let open_all = || -> Vec<StorePartition> {
        DumpPartition::discover(dir.path())
            .unwrap()
            .into_iter()
            .map(Arc::new)
            .map(|p| StorePartition {
                source: p.clone(),
                store: p,
            })
            .collect()
    };

    let reports = check_store(
        &open_all(),
        CheckOptions {
            fix: true,
            ..CheckOptions::default()
        },
    )
    .unwrap();
    assert!(!all_clean(&reports));

    let ws = reports.iter().find(|r| r.partition == "ws").unwrap();
    assert_eq!(ws.missing_children, 1);
    assert_eq!(ws.dangling_refs, 1);
    assert_eq!(ws.repairs.unwrap().applied, 2);

    // Fresh partitions from disk: the repairs must have been flushed.
    let reports = check_store(&open_all(), CheckOptions::default()).unwrap();
    assert!(all_clean(&reports), "reports: {reports:?}");
}
