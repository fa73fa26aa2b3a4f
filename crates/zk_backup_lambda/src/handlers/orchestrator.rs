use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::adapters::object_store::{ObjectMetadata, ObjectStore, StoreError};
use crate::adapters::snapshot_source::{FetchError, SnapshotSource};
use crate::handlers::writer::ObjectStoreWriter;
use crate::runtime::config::{
    DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF_MS,
};
use crate::runtime::contract::{
    AttemptOutcome, AttemptResult, BackupPhase, BackupRecord, Snapshot,
};
use crate::runtime::storage_keys::backup_object_key;

const COMPONENT: &str = "orchestrator";

/// In-process retries of the whole fetch, write, verify sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

pub fn classify_fetch_error(error: &FetchError) -> AttemptOutcome {
    match error {
        FetchError::Unreachable(_) | FetchError::Timeout(_) => AttemptOutcome::TransientFailure,
        FetchError::Protocol(_) => AttemptOutcome::PermanentFailure,
    }
}

pub fn classify_store_error(error: &StoreError) -> AttemptOutcome {
    match error {
        StoreError::Unavailable(_) => AttemptOutcome::TransientFailure,
        StoreError::PermissionDenied(_)
        | StoreError::Collision { .. }
        | StoreError::Rejected(_) => AttemptOutcome::PermanentFailure,
    }
}

/// Drives one backup run: `Idle → Fetching → Writing → Verifying →
/// {Succeeded | Failed}`, retrying only transient failures.
///
/// This is the only place errors are classified. No lock is taken: runs that
/// overlap on the same logical version are kept safe by the writer's
/// write-once contract.
#[derive(Debug)]
pub struct BackupOrchestrator<C, S> {
    source: C,
    writer: ObjectStoreWriter<S>,
    source_id: String,
    fetch_timeout: Duration,
    retry: RetryPolicy,
}

impl<C, S> BackupOrchestrator<C, S>
where
    C: SnapshotSource + Sync,
    S: ObjectStore + Sync,
{
    pub fn new(source: C, writer: ObjectStoreWriter<S>, source_id: impl Into<String>) -> Self {
        Self {
            source,
            writer,
            source_id: source_id.into(),
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn source(&self) -> &C {
        &self.source
    }

    pub fn writer(&self) -> &ObjectStoreWriter<S> {
        &self.writer
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub async fn run_backup(&self, endpoint: &str) -> AttemptResult {
        let max_attempts = self.retry.max_attempts();
        let mut attempt_number = 1;

        loop {
            let result = self.attempt(endpoint, attempt_number).await;

            let retryable = result.outcome == AttemptOutcome::TransientFailure;
            if !retryable || attempt_number >= max_attempts {
                self.report(&result, max_attempts);
                return result;
            }

            warn!(
                component = COMPONENT,
                event = "attempt_failed",
                attempt = attempt_number,
                max_attempts,
                backoff_ms = self.retry.backoff.as_millis() as u64,
                error = result.error_detail.as_deref().unwrap_or_default(),
            );
            if !self.retry.backoff.is_zero() {
                tokio::time::sleep(self.retry.backoff).await;
            }
            attempt_number += 1;
        }
    }

    async fn attempt(&self, endpoint: &str, attempt_number: u32) -> AttemptResult {
        let mut phase = BackupPhase::Idle;

        self.enter(&mut phase, BackupPhase::Fetching, attempt_number);
        let snapshot = match self
            .source
            .fetch_snapshot(endpoint, self.fetch_timeout)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(error) => {
                return AttemptResult::failure(
                    attempt_number,
                    classify_fetch_error(&error),
                    phase,
                    error,
                );
            }
        };
        debug!(
            component = COMPONENT,
            event = "snapshot_fetched",
            attempt = attempt_number,
            logical_version = snapshot.logical_version(),
            size_bytes = snapshot.size_bytes(),
            checksum = snapshot.checksum(),
        );

        self.enter(&mut phase, BackupPhase::Writing, attempt_number);
        let key = backup_object_key(&self.source_id, snapshot.logical_version());
        let write = match self
            .writer
            .write_if_absent(
                &key,
                snapshot.payload(),
                &ObjectMetadata::for_snapshot(&snapshot),
            )
            .await
        {
            Ok(write) => write,
            Err(error) => {
                return AttemptResult::failure(
                    attempt_number,
                    classify_store_error(&error),
                    phase,
                    error,
                );
            }
        };

        self.enter(&mut phase, BackupPhase::Verifying, attempt_number);
        if let Err((outcome, detail)) = self.verify(&key, &snapshot).await {
            return AttemptResult::failure(attempt_number, outcome, phase, detail);
        }

        AttemptResult::success(
            attempt_number,
            BackupRecord {
                key,
                logical_version: snapshot.logical_version(),
                checksum: snapshot.checksum().to_string(),
                size_bytes: snapshot.size_bytes(),
            },
            write,
        )
    }

    /// Confirms the stored checksum equals the fetched one.
    ///
    /// A missing object is transient: the next attempt simply writes it
    /// again. A differing checksum means corruption and is permanent.
    async fn verify(
        &self,
        key: &str,
        snapshot: &Snapshot,
    ) -> Result<(), (AttemptOutcome, String)> {
        let head = self
            .writer
            .read_back(key)
            .await
            .map_err(|error| (classify_store_error(&error), error.to_string()))?;

        match head {
            None => Err((
                AttemptOutcome::TransientFailure,
                format!("object '{key}' is missing after an acknowledged write"),
            )),
            Some(head) if head.checksum.as_deref() == Some(snapshot.checksum()) => Ok(()),
            Some(head) => Err((
                AttemptOutcome::PermanentFailure,
                format!(
                    "checksum mismatch at '{key}': stored {}, fetched {}",
                    head.checksum.as_deref().unwrap_or("<none>"),
                    snapshot.checksum()
                ),
            )),
        }
    }

    fn enter(&self, phase: &mut BackupPhase, next: BackupPhase, attempt_number: u32) {
        debug!(
            component = COMPONENT,
            event = "phase_transition",
            attempt = attempt_number,
            from = phase.as_str(),
            to = next.as_str(),
        );
        *phase = next;
    }

    fn report(&self, result: &AttemptResult, max_attempts: u32) {
        match &result.record {
            Some(record) if result.is_success() => info!(
                component = COMPONENT,
                event = "backup_succeeded",
                phase = result.terminal_phase().as_str(),
                attempt = result.attempt_number,
                key = record.key.as_str(),
                logical_version = record.logical_version,
                write = result.write.map(|write| write.as_str()).unwrap_or_default(),
            ),
            _ => error!(
                component = COMPONENT,
                event = "backup_failed",
                phase = result.terminal_phase().as_str(),
                attempt = result.attempt_number,
                max_attempts,
                outcome = result.outcome.as_str(),
                error = result.error_detail.as_deref().unwrap_or_default(),
            ),
        }
    }
}
