//! Operation queue types

use crate::types::{EntryId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Creates a new random OperationId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an OperationId from a UUID string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Returns the OperationId as a string
    pub fn as_string(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutation destined for the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Creates go first so that later updates have a remote id to target
    pub fn default_priority(&self) -> i32 {
        match self {
            Self::Create => 1,
            Self::Update | Self::Delete => 2,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    /// Terminal: will not be retried without operator action
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown operation status '{}'", other)),
        }
    }
}

/// A durable queue row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: OperationId,
    /// Monotonic enqueue sequence, the FIFO tiebreaker
    pub seq: i64,
    pub operation_type: OperationType,
    pub target: EntryId,
    /// JSON snapshot of the entry taken at enqueue time
    pub payload: String,
    pub priority: i32,
    pub status: OperationStatus,
    pub attempts: u32,
    pub next_retry_at: Timestamp,
    pub last_error: Option<String>,
    pub enqueued_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Result of recording a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to pending, eligible again at `next_retry_at`
    Retrying {
        attempts: u32,
        next_retry_at: Timestamp,
    },
    /// Attempt ceiling reached or permanent rejection
    Terminal { attempts: u32 },
}

impl FailureOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Operations not yet completed (pending + processing + failed)
    pub queue_size: u64,
    pub pending: u64,
    /// Pending operations whose retry time has passed
    pub ready: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStatus {
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.processing == 0
    }
}
