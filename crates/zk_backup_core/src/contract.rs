use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const RESPONSE_SCHEMA_VERSION: &str = "v1";

/// Point-in-time capture of a coordination service's state.
///
/// Fields are private so a snapshot cannot be mutated once fetched; the
/// checksum is always computed from the payload it travels with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    source_endpoint: String,
    captured_at: DateTime<Utc>,
    logical_version: u64,
    payload: Vec<u8>,
    checksum: String,
}

impl Snapshot {
    pub fn new(
        source_endpoint: impl Into<String>,
        captured_at: DateTime<Utc>,
        logical_version: u64,
        payload: Vec<u8>,
    ) -> Self {
        let checksum = payload_checksum(&payload);
        Self {
            source_endpoint: source_endpoint.into(),
            captured_at,
            logical_version,
            payload,
            checksum,
        }
    }

    pub fn source_endpoint(&self) -> &str {
        &self.source_endpoint
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn logical_version(&self) -> u64 {
        self.logical_version
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }
}

/// Lowercase hex SHA-256 of a snapshot payload.
pub fn payload_checksum(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}

/// A snapshot that has been durably persisted under its deterministic key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub key: String,
    pub logical_version: u64,
    pub checksum: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    AlreadyPresent,
}

impl WriteOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::AlreadyPresent => "already_present",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    PermanentFailure,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::TransientFailure => "transient_failure",
            Self::PermanentFailure => "permanent_failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPhase {
    Idle,
    Fetching,
    Writing,
    Verifying,
    Succeeded,
    Failed,
}

impl BackupPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Writing => "writing",
            Self::Verifying => "verifying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// Result of one orchestrator run; lives for a single invocation only.
///
/// `attempt_number` is the number of the attempt that produced this result,
/// which is also the total number of attempts made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResult {
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub error_detail: Option<String>,
    pub record: Option<BackupRecord>,
    pub write: Option<WriteOutcome>,
}

impl AttemptResult {
    pub fn success(attempt_number: u32, record: BackupRecord, write: WriteOutcome) -> Self {
        Self {
            attempt_number,
            outcome: AttemptOutcome::Success,
            error_detail: None,
            record: Some(record),
            write: Some(write),
        }
    }

    pub fn failure(
        attempt_number: u32,
        outcome: AttemptOutcome,
        phase: BackupPhase,
        detail: impl std::fmt::Display,
    ) -> Self {
        Self {
            attempt_number,
            outcome,
            error_detail: Some(format!("{}: {detail}", phase.as_str())),
            record: None,
            write: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }

    pub fn terminal_phase(&self) -> BackupPhase {
        if self.is_success() {
            BackupPhase::Succeeded
        } else {
            BackupPhase::Failed
        }
    }
}

/// Lenient view of the scheduler event that triggered an invocation.
///
/// Every field is optional so manual invocations (`{}`) and unfamiliar event
/// shapes are still accepted; the tick is only used to correlate log lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleTick {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default, rename = "detail-type")]
    pub detail_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl ScheduleTick {
    pub fn from_event(event: Value) -> Self {
        serde_json::from_value(event).unwrap_or_default()
    }

    pub fn correlation_id(&self) -> &str {
        self.id.as_deref().unwrap_or("manual")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupResponse {
    pub status: String,
    pub key: String,
    pub logical_version: u64,
    pub checksum: String,
    pub write: String,
    pub attempts: u32,
    pub pruned: usize,
    pub schema_version: String,
}

impl BackupResponse {
    pub fn from_record(
        record: &BackupRecord,
        write: WriteOutcome,
        attempts: u32,
        pruned: usize,
    ) -> Self {
        Self {
            status: "ok".to_string(),
            key: record.key.clone(),
            logical_version: record.logical_version,
            checksum: record.checksum.clone(),
            write: write.as_str().to_string(),
            attempts,
            pruned,
            schema_version: RESPONSE_SCHEMA_VERSION.to_string(),
        }
    }
}
