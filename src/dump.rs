//! JSON-lines dump adapter.
//!
//! The production bundle codec is an external collaborator; what this crate
//! ships is an offline surface the binary can actually run against: a
//! partition is a directory holding `nodes.jsonl` and `refs.jsonl`, one
//! record per line. Ids may be 32-digit hex or arbitrary external strings
//! (mapped through [`NodeId::parse`], so the same dump resolves to the same
//! ids on every run).
//!
//! Reading streams line by line and never materializes the partition.
//! Repairs do materialize it (the dump store is sized for exports, not for
//! the live store); edited files are written to a temp file and renamed so
//! a crashed fix pass never leaves a half-written dump.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CheckError, Result};
use crate::id::NodeId;
use crate::record::{NodeRecord, RefRecord};
use crate::source::{PartitionSource, StoreAdapter};

const NODES_FILE: &str = "nodes.jsonl";
const REFS_FILE: &str = "refs.jsonl";

/// Directory name conventionally holding the version-history partition.
pub const VERSION_PARTITION: &str = "version";

// ── Line formats ───────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct DumpNode {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    references: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct DumpRef {
    src: String,
    dst: String,
}

fn parse_node(line: &str) -> Result<NodeRecord> {
    let raw: DumpNode = serde_json::from_str(line)?;
    let parent = match raw.parent {
        Some(p) => NodeId::parse(&p)?,
        None => NodeId::NO_PARENT,
    };
    Ok(NodeRecord {
        id: NodeId::parse(&raw.id)?,
        parent,
        children: raw
            .children
            .iter()
            .map(|c| NodeId::parse(c))
            .collect::<Result<_>>()?,
        references: raw
            .references
            .iter()
            .map(|r| NodeId::parse(r))
            .collect::<Result<_>>()?,
    })
}

fn parse_ref(line: &str) -> Result<RefRecord> {
    let raw: DumpRef = serde_json::from_str(line)?;
    Ok(RefRecord {
        src: NodeId::parse(&raw.src)?,
        dst: NodeId::parse(&raw.dst)?,
    })
}

// ── Writing ────────────────────────────────────────────────────────

/// Write a full partition dump. Used by the fix path and by test fixtures.
pub fn write_partition(dir: &Path, nodes: &[NodeRecord], refs: &[RefRecord]) -> Result<()> {
    fs::create_dir_all(dir)?;
    write_atomic(&dir.join(NODES_FILE), nodes.iter().map(|n| {
        serde_json::to_string(&DumpNode {
            id: n.id.to_string(),
            parent: if n.parent.is_no_parent() {
                None
            } else {
                Some(n.parent.to_string())
            },
            children: n.children.iter().map(NodeId::to_string).collect(),
            references: n.references.iter().map(NodeId::to_string).collect(),
        })
    }))?;
    write_atomic(&dir.join(REFS_FILE), refs.iter().map(|r| {
        serde_json::to_string(&DumpRef {
            src: r.src.to_string(),
            dst: r.dst.to_string(),
        })
    }))
}

/// Write lines to `<path>.tmp`, then rename over `path`.
fn write_atomic<I>(path: &Path, lines: I) -> Result<()>
where
    I: Iterator<Item = serde_json::Result<String>>,
{
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut out = BufWriter::new(File::create(&tmp)?);
        for line in lines {
            out.write_all(line?.as_bytes())?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

// ── Partition ──────────────────────────────────────────────────────

/// One dump directory, acting as both record source and repair target.
pub struct DumpPartition {
    name: String,
    dir: PathBuf,
    historical: bool,
    /// Materialized edit state; loaded on the first repair primitive call,
    /// written back by `flush`.
    edits: RwLock<Option<DumpState>>,
}

struct DumpState {
    nodes: BTreeMap<NodeId, NodeRecord>,
    refs: Vec<RefRecord>,
}

impl DumpPartition {
    /// Open one partition directory. The node file must exist; the
    /// reference file is optional (many workspaces carry no references).
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        if !dir.join(NODES_FILE).is_file() {
            return Err(CheckError::PartitionNotFound(name));
        }
        Ok(Self {
            historical: name == VERSION_PARTITION,
            name,
            dir,
            edits: RwLock::new(None),
        })
    }

    /// Enumerate partition subdirectories of a store dump, sorted by name.
    pub fn discover(store_dir: &Path) -> Result<Vec<Self>> {
        let mut partitions = Vec::new();
        let mut entries: Vec<PathBuf> = fs::read_dir(store_dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_dir() && p.join(NODES_FILE).is_file())
            .collect();
        entries.sort();
        for dir in entries {
            partitions.push(Self::open(dir)?);
        }
        Ok(partitions)
    }

    fn visit_lines<T>(
        &self,
        file: &str,
        parse: impl Fn(&str) -> Result<T>,
        visit: &mut dyn FnMut(T),
    ) -> Result<()> {
        let path = self.dir.join(file);
        if !path.is_file() {
            return Ok(());
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut skipped = 0usize;
        for (lineno, line) in reader.lines().enumerate() {
            // An unreadable line is a broken record: skip it and let the
            // absent node cascade into downstream findings.
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!("{}: unreadable line {} in {file}: {e}", self.name, lineno + 1);
                    skipped += 1;
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse(&line) {
                Ok(record) => visit(record),
                Err(e) => {
                    warn!("{}: bad record at {file}:{}: {e}", self.name, lineno + 1);
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            warn!("{}: skipped {skipped} unreadable records in {file}", self.name);
        }
        Ok(())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut DumpState) -> Result<R>) -> Result<R> {
        let mut guard = self.edits.write().unwrap();
        if guard.is_none() {
            let mut nodes = BTreeMap::new();
            self.visit_lines(NODES_FILE, parse_node, &mut |n: NodeRecord| {
                nodes.insert(n.id, n);
            })?;
            let mut refs = Vec::new();
            self.visit_lines(REFS_FILE, parse_ref, &mut |r: RefRecord| refs.push(r))?;
            *guard = Some(DumpState { nodes, refs });
        }
        // Populated above; the fallback state is never constructed.
        let state = guard.get_or_insert_with(|| DumpState {
            nodes: BTreeMap::new(),
            refs: Vec::new(),
        });
        f(state)
    }
}

impl PartitionSource for DumpPartition {
    fn name(&self) -> &str {
        &self.name
    }

    fn node_count(&self) -> Option<u64> {
        // Counting would mean a full extra pass over the dump.
        None
    }

    fn ref_count(&self) -> Option<u64> {
        None
    }

    fn historical(&self) -> bool {
        self.historical
    }

    fn accept_nodes(&self, visit: &mut dyn FnMut(NodeRecord)) -> Result<()> {
        self.visit_lines(NODES_FILE, parse_node, visit)
    }

    fn accept_refs(&self, visit: &mut dyn FnMut(RefRecord)) -> Result<()> {
        self.visit_lines(REFS_FILE, parse_ref, visit)
    }
}

impl StoreAdapter for DumpPartition {
    fn destroy(&self, id: NodeId) -> Result<()> {
        self.with_state(|state| match state.nodes.remove(&id) {
            Some(_) => Ok(()),
            None => Err(CheckError::NodeNotFound(id)),
        })
    }

    fn load_bundle(&self, id: NodeId) -> Result<NodeRecord> {
        self.with_state(|state| {
            state
                .nodes
                .get(&id)
                .cloned()
                .ok_or(CheckError::NodeNotFound(id))
        })
    }

    fn store_bundle(&self, record: NodeRecord) -> Result<()> {
        self.with_state(|state| {
            if !state.nodes.contains_key(&record.id) {
                return Err(CheckError::NodeNotFound(record.id));
            }
            state.nodes.insert(record.id, record);
            Ok(())
        })
    }

    fn remove_reference(&self, src: NodeId, dst: NodeId) -> Result<()> {
        self.with_state(|state| {
            state.refs.retain(|r| !(r.src == src && r.dst == dst));
            Ok(())
        })
    }

    fn flush(&self) -> Result<()> {
        let guard = self.edits.read().unwrap();
        let Some(state) = guard.as_ref() else {
            return Ok(());
        };
        let nodes: Vec<NodeRecord> = state.nodes.values().cloned().collect();
        write_partition(&self.dir, &nodes, &state.refs)
    }
}
