//! Source and store adapter traits, plus the in-memory implementation.
//!
//! The binary bundle codec, connection setup, and search-index plumbing are
//! external collaborators. The checker sees them only through two narrow
//! capabilities: a [`PartitionSource`] that pushes decoded records, and a
//! [`StoreAdapter`] exposing the minimal repair primitives.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{CheckError, Result};
use crate::id::NodeId;
use crate::record::{NodeRecord, RefRecord};

/// One independently checkable subset of the store (a workspace, or the
/// version-history store).
///
/// Implementations must skip-and-log individually unreadable records and
/// still run to completion -- a record that fails to decode is treated as an
/// absent node downstream, deliberately cascading into orphan/missing-child
/// findings instead of vanishing silently. Returning `Err` is reserved for
/// fatal failures (backend gone), which abort the partition's check.
///
/// Sources are consumed behind `Arc` so the streaming bridge's producer
/// thread can hold its own handle.
pub trait PartitionSource: Send + Sync {
    fn name(&self) -> &str;

    /// Expected node record count, if cheaply known. Progress sizing only.
    fn node_count(&self) -> Option<u64>;

    /// Expected reference record count, if cheaply known.
    fn ref_count(&self) -> Option<u64>;

    /// True for the version-history partition. Its node ids are retained
    /// across the run and later partitions' dangling-reference scans treat
    /// them as valid targets.
    fn historical(&self) -> bool {
        false
    }

    /// Push every decodable node record to `visit`, in storage order.
    fn accept_nodes(&self, visit: &mut dyn FnMut(NodeRecord)) -> Result<()>;

    /// Push every decodable reference record to `visit`, in storage order.
    fn accept_refs(&self, visit: &mut dyn FnMut(RefRecord)) -> Result<()>;
}

/// Minimal storage primitives the repair queue executes against.
///
/// Methods take `&self`: implementations handle their own interior locking.
/// The apply phase itself is single-threaded and runs strictly after
/// checking, never concurrently with it.
pub trait StoreAdapter {
    /// Destroy a node's bundle outright.
    fn destroy(&self, id: NodeId) -> Result<()>;

    /// Load one bundle for editing.
    fn load_bundle(&self, id: NodeId) -> Result<NodeRecord>;

    /// Write back an edited bundle. Callers restrict edits to the child
    /// listing; content is never mutated through this path.
    fn store_bundle(&self, record: NodeRecord) -> Result<()>;

    /// Drop the reference edge `src -> dst` from the reference store.
    fn remove_reference(&self, src: NodeId, dst: NodeId) -> Result<()>;

    /// Persist any buffered repairs. No-op for stores that write through.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-memory partition acting as both source and adapter.
///
/// The ephemeral-engine pattern: tests (and fixtures) build a store, corrupt
/// it, check it, apply repairs, and re-check -- all without touching disk.
pub struct MemoryStore {
    name: String,
    historical: bool,
    nodes: RwLock<BTreeMap<NodeId, NodeRecord>>,
    refs: RwLock<Vec<RefRecord>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            historical: false,
            nodes: RwLock::new(BTreeMap::new()),
            refs: RwLock::new(Vec::new()),
        }
    }

    /// Construct the version-history partition variant.
    pub fn versioned(name: impl Into<String>) -> Self {
        Self {
            historical: true,
            ..Self::new(name)
        }
    }

    /// Insert or replace a node record.
    pub fn add_node(&self, record: NodeRecord) {
        self.nodes.write().unwrap().insert(record.id, record);
    }

    /// Append a reference record. Duplicates are kept as stored.
    pub fn add_ref(&self, src: NodeId, dst: NodeId) {
        self.refs.write().unwrap().push(RefRecord { src, dst });
    }

    pub fn get(&self, id: NodeId) -> Option<NodeRecord> {
        self.nodes.read().unwrap().get(&id).cloned()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.read().unwrap().contains_key(&id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.read().unwrap().keys().copied().collect()
    }

    pub fn refs(&self) -> Vec<RefRecord> {
        self.refs.read().unwrap().clone()
    }
}

impl PartitionSource for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn node_count(&self) -> Option<u64> {
        Some(self.nodes.read().unwrap().len() as u64)
    }

    fn ref_count(&self) -> Option<u64> {
        Some(self.refs.read().unwrap().len() as u64)
    }

    fn historical(&self) -> bool {
        self.historical
    }

    fn accept_nodes(&self, visit: &mut dyn FnMut(NodeRecord)) -> Result<()> {
        // Snapshot first: visitation must not hold the lock while the
        // consumer (possibly this same store's adapter side) is live.
        let records: Vec<NodeRecord> = self.nodes.read().unwrap().values().cloned().collect();
        for record in records {
            visit(record);
        }
        Ok(())
    }

    fn accept_refs(&self, visit: &mut dyn FnMut(RefRecord)) -> Result<()> {
        let records = self.refs.read().unwrap().clone();
        for record in records {
            visit(record);
        }
        Ok(())
    }
}

impl StoreAdapter for MemoryStore {
    fn destroy(&self, id: NodeId) -> Result<()> {
        match self.nodes.write().unwrap().remove(&id) {
            Some(_) => Ok(()),
            None => Err(CheckError::NodeNotFound(id)),
        }
    }

    fn load_bundle(&self, id: NodeId) -> Result<NodeRecord> {
        self.get(id).ok_or(CheckError::NodeNotFound(id))
    }

    fn store_bundle(&self, record: NodeRecord) -> Result<()> {
        let mut nodes = self.nodes.write().unwrap();
        if !nodes.contains_key(&record.id) {
            return Err(CheckError::NodeNotFound(record.id));
        }
        nodes.insert(record.id, record);
        Ok(())
    }

    fn remove_reference(&self, src: NodeId, dst: NodeId) -> Result<()> {
        self.refs
            .write()
            .unwrap()
            .retain(|r| !(r.src == src && r.dst == dst));
        Ok(())
    }
}
