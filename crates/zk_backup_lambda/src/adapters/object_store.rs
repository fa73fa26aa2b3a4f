use std::future::Future;

use thiserror::Error;

use crate::runtime::contract::Snapshot;
use crate::runtime::retention::StoredObject;

pub const CHECKSUM_METADATA_KEY: &str = "sha256";
pub const LOGICAL_VERSION_METADATA_KEY: &str = "logical-version";
pub const CAPTURED_AT_METADATA_KEY: &str = "captured-at";

/// Raw, unclassified object store failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    #[error("object store permission denied: {0}")]
    PermissionDenied(String),
    #[error("key collision at '{key}': stored checksum {stored} differs from {incoming}")]
    Collision {
        key: String,
        stored: String,
        incoming: String,
    },
    #[error("object store rejected request: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Maps an HTTP status from the store to an error kind.
    ///
    /// Only meaningful for failed calls; 404 and 412 carry call-specific
    /// meaning and are resolved by the adapter before reaching this point.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            401 | 403 => Self::PermissionDenied(detail),
            408 | 409 | 429 => Self::Unavailable(detail),
            500..=599 => Self::Unavailable(detail),
            _ => Self::Rejected(detail),
        }
    }
}

/// User metadata stored next to every backup object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub checksum: String,
    pub logical_version: u64,
    pub captured_at: String,
}

impl ObjectMetadata {
    pub fn for_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            checksum: snapshot.checksum().to_string(),
            logical_version: snapshot.logical_version(),
            captured_at: snapshot.captured_at().to_rfc3339(),
        }
    }

    pub fn to_pairs(&self) -> [(&'static str, String); 3] {
        [
            (CHECKSUM_METADATA_KEY, self.checksum.clone()),
            (
                LOGICAL_VERSION_METADATA_KEY,
                self.logical_version.to_string(),
            ),
            (CAPTURED_AT_METADATA_KEY, self.captured_at.clone()),
        ]
    }
}

/// What a metadata read reveals about an existing object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    /// The conditional put lost: some object already occupies the key.
    AlreadyExists,
}

pub trait ObjectStore {
    /// `Ok(None)` when no object exists at `key`.
    fn head_object(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<ObjectHead>, StoreError>> + Send;

    /// Creates `key` only if nothing exists there yet.
    fn put_if_absent(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> impl Future<Output = Result<PutOutcome, StoreError>> + Send;

    fn list_objects(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<StoredObject>, StoreError>> + Send;

    fn delete_object(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn maps_statuses_to_error_kinds() {
        assert!(matches!(
            StoreError::from_status(403, "denied"),
            StoreError::PermissionDenied(_)
        ));
        assert!(matches!(
            StoreError::from_status(503, "slow down"),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::from_status(409, "conditional request conflict"),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::from_status(404, "no such bucket"),
            StoreError::Rejected(_)
        ));
    }

    #[test]
    fn metadata_carries_checksum_version_and_capture_time() {
        let captured_at = Utc
            .with_ymd_and_hms(2026, 2, 14, 3, 0, 0)
            .single()
            .expect("fixed timestamp should be valid");
        let snapshot = Snapshot::new("http://node1", captured_at, 42, b"data-42".to_vec());

        let pairs = ObjectMetadata::for_snapshot(&snapshot).to_pairs();

        assert_eq!(pairs[0], ("sha256", snapshot.checksum().to_string()));
        assert_eq!(pairs[1], ("logical-version", "42".to_string()));
        assert_eq!(pairs[2], ("captured-at", "2026-02-14T03:00:00+00:00".to_string()));
    }
}
