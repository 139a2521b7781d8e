use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One object identified for cross-region copy. Immutable once decoded;
/// (source_bucket, object_key, event_time) identifies it within an invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicationRequest {
    pub source_bucket: String,
    pub object_key: String,
    pub size_bytes: Option<u64>,
    pub event_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    Throttled,
    Timeout,
    Unknown,
    MalformedRecord,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AccessDenied => "AccessDenied",
            ErrorKind::Throttled => "Throttled",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Unknown => "Unknown",
            ErrorKind::MalformedRecord => "MalformedRecord",
        }
    }

    /// Short operator-facing hint included in the notification body.
    pub fn hint(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "source object was deleted or never existed; retrying will not help",
            ErrorKind::AccessDenied => "check the replication role's permissions on both buckets",
            ErrorKind::Throttled => "storage backend rate limit; retries were exhausted",
            ErrorKind::Timeout => "copy exceeded its time budget",
            ErrorKind::Unknown => "unclassified error; see the execution log for the full message",
            ErrorKind::MalformedRecord => "event record is missing a bucket name or object key",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Failure(ErrorKind),
}

/// The recorded result of one replication attempt. Created once per request,
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicationOutcome {
    pub request: ReplicationRequest,
    pub status: OutcomeStatus,
    pub error_detail: Option<String>,
    pub destination_bucket: String,
    pub elapsed_ms: u64,
    pub attempts: u32,
}

impl ReplicationOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}
