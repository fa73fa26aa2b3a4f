use std::future::Future;
use std::time::Duration;

use tracing::{debug, info};

use crate::adapters::object_store::{
    ObjectHead, ObjectMetadata, ObjectStore, PutOutcome, StoreError,
};
use crate::runtime::contract::WriteOutcome;
use crate::runtime::retention::StoredObject;

const COMPONENT: &str = "object_store_writer";

/// Idempotent, write-once persistence of backup objects.
///
/// Every store call is individually bounded by `call_timeout`; an elapsed
/// call is reported as [`StoreError::Unavailable`] so it stays retryable.
#[derive(Debug)]
pub struct ObjectStoreWriter<S> {
    store: S,
    call_timeout: Duration,
}

impl<S: ObjectStore + Sync> ObjectStoreWriter<S> {
    pub fn new(store: S, call_timeout: Duration) -> Self {
        Self {
            store,
            call_timeout,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Writes `payload` under `key` unless an object is already there.
    ///
    /// An existing object with the same checksum short-circuits to
    /// [`WriteOutcome::AlreadyPresent`] without uploading. A different
    /// checksum is a [`StoreError::Collision`] and the stored object is left
    /// untouched.
    pub async fn write_if_absent(
        &self,
        key: &str,
        payload: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<WriteOutcome, StoreError> {
        if let Some(outcome) = self.resolve_existing(key, &metadata.checksum).await? {
            return Ok(outcome);
        }

        match self
            .bounded(self.store.put_if_absent(key, payload, metadata))
            .await?
        {
            PutOutcome::Created => {
                info!(
                    component = COMPONENT,
                    event = "object_written",
                    key,
                    size_bytes = payload.len(),
                );
                Ok(WriteOutcome::Written)
            }
            PutOutcome::AlreadyExists => {
                debug!(component = COMPONENT, event = "conditional_put_lost", key);
                self.resolve_existing(key, &metadata.checksum)
                    .await?
                    .ok_or_else(|| {
                        StoreError::Unavailable(format!(
                            "conditional put on '{key}' lost but no object is visible"
                        ))
                    })
            }
        }
    }

    /// Re-reads the metadata of `key`; `None` when the object is missing.
    pub async fn read_back(&self, key: &str) -> Result<Option<ObjectHead>, StoreError> {
        self.bounded(self.store.head_object(key)).await
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>, StoreError> {
        self.bounded(self.store.list_objects(prefix)).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.bounded(self.store.delete_object(key)).await
    }

    async fn resolve_existing(
        &self,
        key: &str,
        checksum: &str,
    ) -> Result<Option<WriteOutcome>, StoreError> {
        match self.read_back(key).await? {
            None => Ok(None),
            Some(head) if head.checksum.as_deref() == Some(checksum) => {
                info!(component = COMPONENT, event = "object_already_present", key);
                Ok(Some(WriteOutcome::AlreadyPresent))
            }
            Some(head) => Err(StoreError::Collision {
                key: key.to_string(),
                stored: head.checksum.unwrap_or_else(|| "<none>".to_string()),
                incoming: checksum.to_string(),
            }),
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!(
                    "object store call timed out after {:?}",
                    self.call_timeout
                ))
            })?
    }
}
