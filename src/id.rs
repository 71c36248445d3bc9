//! Node identifiers.
//!
//! Store ids are opaque, totally-ordered 128-bit values. The all-zero value
//! is reserved: a node whose parent field holds [`NodeId::NO_PARENT`] is a
//! root. The reserved value is a documented constant on the type rather than
//! an `Option`, so "this node is a root" can never be conflated with
//! "parent unknown / failed to decode" -- a decode failure surfaces as a
//! skipped record, never as a fabricated root.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CheckError, Result};

/// Opaque 128-bit node identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u128);

impl NodeId {
    /// Reserved parent value marking a root node.
    ///
    /// Never produced by [`NodeId::from_name`] (BLAKE3 output) and rejected
    /// as a real node id at ingest.
    pub const NO_PARENT: NodeId = NodeId(0);

    /// Derive a deterministic id from an external string id.
    ///
    /// BLAKE3 hash of the string, first 16 bytes little-endian. The same
    /// scheme external producers use, so dumps written with string ids map
    /// to the same `NodeId` on every run.
    pub fn from_name(name: &str) -> Self {
        let hash = blake3::hash(name.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash.as_bytes()[0..16]);
        NodeId(u128::from_le_bytes(bytes))
    }

    /// Parse an id from its textual form.
    ///
    /// A 32-digit hex string is taken verbatim; anything else is treated as
    /// an external string id and mapped through [`NodeId::from_name`].
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(CheckError::InvalidNodeId(s.to_string()));
        }
        if s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            let raw = u128::from_str_radix(s, 16)
                .map_err(|_| CheckError::InvalidNodeId(s.to_string()))?;
            return Ok(NodeId(raw));
        }
        Ok(Self::from_name(s))
    }

    /// True if this value is the reserved root marker.
    pub fn is_no_parent(self) -> bool {
        self == Self::NO_PARENT
    }

    pub fn as_u128(self) -> u128 {
        self.0
    }
}

impl From<u128> for NodeId {
    fn from(raw: u128) -> Self {
        NodeId(raw)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:032x})", self.0)
    }
}
