//! hfsck - offline consistency checking and repair queueing for persisted
//! hierarchical node stores.
//!
//! Runs outside the live engine, directly against decoded record streams,
//! and handles datasets far larger than memory: records are pulled through
//! a bounded streaming bridge, folded into deterministic relation indexes,
//! and scanned iteratively for structural corruption (multiple roots,
//! cycles, orphans, child-listing disagreements, dangling references).
//! Findings escalate a monotonic repair ledger that queues, but never
//! in-line applies, corrective actions; an explicit apply phase executes
//! them when (and only when) `fix` is requested.
//!
//! The check assumes exclusive offline access to the store. It is not a
//! live integrity enforcer and gives no guarantee under concurrent writes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hfsck::{check_store, CheckOptions, StorePartition};
//! use hfsck::dump::DumpPartition;
//!
//! # fn main() -> hfsck::Result<()> {
//! let partitions: Vec<StorePartition> =
//!     DumpPartition::discover(std::path::Path::new("/data/store-dump"))?
//!         .into_iter()
//!         .map(Arc::new)
//!         .map(|p| StorePartition { source: p.clone(), store: p })
//!         .collect();
//!
//! let reports = check_store(&partitions, CheckOptions::default())?;
//! for report in &reports {
//!     println!("{}: clean={}", report.partition, report.clean);
//! }
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod check;
pub mod dump;
pub mod error;
pub mod id;
pub mod index;
pub mod progress;
pub mod record;
pub mod repair;
pub mod source;

pub use bridge::{StreamBridge, BRIDGE_QUEUE_CAP};
pub use check::{
    all_clean, check_store, CheckOptions, CheckReport, ConsistencyChecker, StorePartition,
};
pub use error::{CheckError, Result};
pub use id::NodeId;
pub use index::RelationIndex;
pub use progress::Progress;
pub use record::{NodeRecord, RefRecord};
pub use repair::{ApplyReport, Escalation, RepairAction, RepairLedger, RepairStatus};
pub use source::{MemoryStore, PartitionSource, StoreAdapter};
