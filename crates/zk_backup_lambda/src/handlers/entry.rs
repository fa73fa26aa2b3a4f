use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::adapters::object_store::ObjectStore;
use crate::adapters::snapshot_source::SnapshotSource;
use crate::handlers::orchestrator::{BackupOrchestrator, RetryPolicy};
use crate::handlers::writer::ObjectStoreWriter;
use crate::runtime::config::BackupConfig;
use crate::runtime::contract::{BackupResponse, ScheduleTick};
use crate::runtime::retention::select_expired;
use crate::runtime::storage_keys::source_prefix;

const COMPONENT: &str = "entry_point";

/// Held back from the runtime deadline so a timed-out run can still report.
pub const DEADLINE_SAFETY_MARGIN: Duration = Duration::from_millis(200);

/// The only failure signal surfaced to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail}")]
pub struct BackupFailure {
    pub detail: String,
    pub attempts: u32,
}

/// Handles one schedule tick end-to-end.
///
/// Invocations may overlap or be redelivered; each one is safe to repeat
/// because the orchestrator's writes are idempotent.
#[derive(Debug)]
pub struct BackupHandler<C, S> {
    config: BackupConfig,
    orchestrator: BackupOrchestrator<C, S>,
}

impl<C, S> BackupHandler<C, S>
where
    C: SnapshotSource + Sync,
    S: ObjectStore + Sync,
{
    pub fn new(config: BackupConfig, source: C, store: S) -> Self {
        let writer = ObjectStoreWriter::new(store, config.write_timeout);
        let orchestrator = BackupOrchestrator::new(source, writer, config.source_id.clone())
            .with_fetch_timeout(config.fetch_timeout)
            .with_retry_policy(RetryPolicy {
                max_retries: config.max_retries,
                backoff: config.retry_backoff,
            });
        Self {
            config,
            orchestrator,
        }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &BackupOrchestrator<C, S> {
        &self.orchestrator
    }

    /// Time this invocation may spend, given what the runtime has left.
    pub fn invocation_budget(&self, remaining: Option<Duration>) -> Duration {
        match remaining {
            Some(remaining) => remaining.saturating_sub(DEADLINE_SAFETY_MARGIN),
            None => self.config.invocation_timeout,
        }
    }

    pub async fn handle(
        &self,
        tick: &ScheduleTick,
        remaining: Option<Duration>,
    ) -> Result<BackupResponse, BackupFailure> {
        let budget = self.invocation_budget(remaining);
        let started_at = Instant::now();
        info!(
            component = COMPONENT,
            event = "backup_started",
            tick_id = tick.correlation_id(),
            tick_time = tick.time.as_deref().unwrap_or_default(),
            source_id = self.orchestrator.source_id(),
            budget_ms = budget.as_millis() as u64,
        );

        let run = self
            .orchestrator
            .run_backup(&self.config.admin_endpoint_url);
        let result = match tokio::time::timeout(budget, run).await {
            Ok(result) => result,
            Err(_) => {
                let detail = format!("invocation timed out after {budget:?}");
                error!(
                    component = COMPONENT,
                    event = "backup_abandoned",
                    tick_id = tick.correlation_id(),
                    error = detail.as_str(),
                );
                return Err(BackupFailure {
                    detail,
                    attempts: 0,
                });
            }
        };

        let (Some(record), Some(write)) = (result.record.as_ref(), result.write) else {
            let detail = result
                .error_detail
                .clone()
                .unwrap_or_else(|| result.outcome.as_str().to_string());
            error!(
                component = COMPONENT,
                event = "backup_completed",
                status = "failure",
                tick_id = tick.correlation_id(),
                attempts = result.attempt_number,
                duration_ms = started_at.elapsed().as_millis() as u64,
                error = detail.as_str(),
            );
            return Err(BackupFailure {
                detail,
                attempts: result.attempt_number,
            });
        };

        let remaining_budget = budget.saturating_sub(started_at.elapsed());
        let pruned = match tokio::time::timeout(remaining_budget, self.prune_expired(&record.key))
            .await
        {
            Ok(pruned) => pruned,
            Err(_) => {
                warn!(
                    component = COMPONENT,
                    event = "retention_skipped",
                    reason = "invocation budget exhausted",
                );
                0
            }
        };

        info!(
            component = COMPONENT,
            event = "backup_completed",
            status = "success",
            tick_id = tick.correlation_id(),
            key = record.key.as_str(),
            write = write.as_str(),
            attempts = result.attempt_number,
            pruned,
            duration_ms = started_at.elapsed().as_millis() as u64,
        );
        Ok(BackupResponse::from_record(
            record,
            write,
            result.attempt_number,
            pruned,
        ))
    }

    /// Best-effort deletion of backups past retention; never fails the run.
    async fn prune_expired(&self, confirmed_key: &str) -> usize {
        let Some(policy) = self.config.retention_policy() else {
            return 0;
        };
        let now = Utc::now();
        if policy.threshold(now).is_none() {
            warn!(
                component = COMPONENT,
                event = "retention_skipped",
                reason = "retention window out of calendar range",
                max_age_days = policy.max_age_days,
            );
            return 0;
        }
        let source_id = self.orchestrator.source_id();
        let writer = self.orchestrator.writer();

        let objects = match writer.list(&source_prefix(source_id)).await {
            Ok(objects) => objects,
            Err(error) => {
                warn!(
                    component = COMPONENT,
                    event = "retention_list_failed",
                    error = %error,
                );
                return 0;
            }
        };

        let mut deleted = 0;
        for key in select_expired(source_id, &objects, confirmed_key, policy, now) {
            match writer.delete(&key).await {
                Ok(()) => {
                    info!(component = COMPONENT, event = "backup_pruned", key = key.as_str());
                    deleted += 1;
                }
                Err(error) => warn!(
                    component = COMPONENT,
                    event = "retention_delete_failed",
                    key = key.as_str(),
                    error = %error,
                ),
            }
        }
        deleted
    }
}
