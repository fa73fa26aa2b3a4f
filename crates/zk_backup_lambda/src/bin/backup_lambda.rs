use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing::info;
use zk_backup_lambda::adapters::object_store::{
    ObjectHead, ObjectMetadata, ObjectStore, PutOutcome, StoreError, CHECKSUM_METADATA_KEY,
};
use zk_backup_lambda::adapters::snapshot_source::AdminHttpSnapshotSource;
use zk_backup_lambda::handlers::entry::BackupHandler;
use zk_backup_lambda::runtime::config::BackupConfig;
use zk_backup_lambda::runtime::contract::ScheduleTick;
use zk_backup_lambda::runtime::retention::StoredObject;
use zk_backup_lambda::telemetry::init_tracing;

const PRECONDITION_FAILED: u16 = 412;

struct S3ObjectStore {
    bucket: String,
    s3_client: aws_sdk_s3::Client,
}

impl ObjectStore for S3ObjectStore {
    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>, StoreError> {
        match self
            .s3_client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(ObjectHead {
                checksum: output
                    .metadata()
                    .and_then(|metadata| metadata.get(CHECKSUM_METADATA_KEY))
                    .cloned(),
            })),
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|service_error| service_error.is_not_found()) =>
            {
                Ok(None)
            }
            Err(error) => Err(store_error_from_sdk("head object", &error)),
        }
    }

    async fn put_if_absent(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<PutOutcome, StoreError> {
        let mut request = self
            .s3_client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .if_none_match("*")
            .content_type("application/octet-stream")
            .body(ByteStream::from(body.to_vec()));
        for (name, value) in metadata.to_pairs() {
            request = request.metadata(name, value);
        }

        match request.send().await {
            Ok(_) => Ok(PutOutcome::Created),
            Err(error) => resolve_failed_put(&error),
        }
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<StoredObject>, StoreError> {
        let mut pages = self
            .s3_client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|error| store_error_from_sdk("list objects", &error))?;
            for object in page.contents() {
                let (Some(key), Some(modified)) = (object.key(), object.last_modified()) else {
                    continue;
                };
                let Some(last_modified) =
                    DateTime::<Utc>::from_timestamp(modified.secs(), modified.subsec_nanos())
                else {
                    continue;
                };
                objects.push(StoredObject {
                    key: key.to_string(),
                    last_modified,
                });
            }
        }
        Ok(objects)
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.s3_client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| store_error_from_sdk("delete object", &error))
    }
}

fn response_status<E>(error: &SdkError<E, HttpResponse>) -> Option<u16> {
    error
        .raw_response()
        .map(|response| response.status().as_u16())
}

/// A 412 on a conditional put means another writer created the key first.
fn resolve_failed_put<E>(error: &SdkError<E, HttpResponse>) -> Result<PutOutcome, StoreError>
where
    E: std::error::Error + Send + Sync + 'static,
{
    if response_status(error) == Some(PRECONDITION_FAILED) {
        return Ok(PutOutcome::AlreadyExists);
    }
    Err(store_error_from_sdk("put object", error))
}

fn store_error_from_sdk<E>(action: &str, error: &SdkError<E, HttpResponse>) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let detail = format!("failed to {action} in s3: {}", DisplayErrorContext(error));
    match error {
        SdkError::ConstructionFailure(_) => StoreError::Rejected(detail),
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            StoreError::Unavailable(detail)
        }
        _ => match response_status(error) {
            Some(status) => StoreError::from_status(status, detail),
            None => StoreError::Unavailable(detail),
        },
    }
}

/// Time left before the runtime deadline, `None` when no deadline is set.
fn remaining_budget(deadline_ms: u64, now: SystemTime) -> Option<Duration> {
    if deadline_ms == 0 {
        return None;
    }
    let now_ms = now
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default();
    Some(Duration::from_millis(deadline_ms.saturating_sub(now_ms)))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing("info")?;

    let config = BackupConfig::from_env()?;
    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()))
        .load()
        .await;
    let store = S3ObjectStore {
        bucket: config.target_store_id.clone(),
        s3_client: aws_sdk_s3::Client::new(&aws_config),
    };
    let source = AdminHttpSnapshotSource::new(config.admin_auth_header.clone())?;
    info!(
        component = "entry_point",
        event = "cold_start",
        source_id = config.source_id.as_str(),
        bucket = config.target_store_id.as_str(),
    );

    let handler = Arc::new(BackupHandler::new(config, source, store));
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let handler = Arc::clone(&handler);
        async move {
            let remaining = remaining_budget(event.context.deadline, SystemTime::now());
            let tick = ScheduleTick::from_event(event.payload);
            handler
                .handle(&tick, remaining)
                .await
                .map_err(Error::from)
        }
    }))
    .await
}
