//! Error types for the consistency checker

use thiserror::Error;

use crate::id::NodeId;

pub type Result<T> = std::result::Result<T, CheckError>;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Partition '{0}' not found")]
    PartitionNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
