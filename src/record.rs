//! Decoded store records.
//!
//! These are the structured forms the external bundle codec produces; the
//! checker consumes each record exactly once into the relation indexes and
//! then drops it, so peak memory stays independent of record payload size.

use serde::{Deserialize, Serialize};

use crate::id::NodeId;

/// One decoded node bundle.
///
/// `parent`, `children` and `references` reflect raw storage as observed --
/// they are allowed to disagree with each other and with other records.
/// Detecting such disagreement is the checker's job, not a precondition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,

    /// Parent id; [`NodeId::NO_PARENT`] marks a root.
    pub parent: NodeId,

    /// Child listing in storage order. Duplicate entries are corruption and
    /// are collapsed (deterministically) at index build.
    #[serde(default)]
    pub children: Vec<NodeId>,

    /// Reference targets carried inline in the bundle.
    #[serde(default)]
    pub references: Vec<NodeId>,
}

impl NodeRecord {
    pub fn is_root(&self) -> bool {
        self.parent.is_no_parent()
    }
}

/// A directed reference edge from the separate reference record stream,
/// independent of the parent/child hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefRecord {
    pub src: NodeId,
    pub dst: NodeId,
}
