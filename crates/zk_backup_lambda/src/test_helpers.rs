//! In-memory doubles for the snapshot source and object store.
//!
//! Both honor the same contracts as the network adapters (conditional puts,
//! raw unclassified errors) and can be scripted to fail, race, or stall.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::adapters::object_store::{
    ObjectHead, ObjectMetadata, ObjectStore, PutOutcome, StoreError,
};
use crate::adapters::snapshot_source::{FetchError, SnapshotSource};
use crate::runtime::contract::{payload_checksum, Snapshot};
use crate::runtime::retention::StoredObject;

pub fn snapshot(endpoint: &str, logical_version: u64, payload: &[u8]) -> Snapshot {
    Snapshot::new(endpoint, Utc::now(), logical_version, payload.to_vec())
}

#[derive(Debug, Clone)]
struct MemoryObject {
    body: Vec<u8>,
    checksum: Option<String>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<String, MemoryObject>,
    put_calls: usize,
    head_calls: usize,
    put_failures: VecDeque<StoreError>,
    head_failures: BTreeMap<usize, StoreError>,
    head_delays: BTreeMap<usize, Duration>,
    list_failures: VecDeque<StoreError>,
    delete_failures: VecDeque<StoreError>,
    racing_writer: Option<(String, Vec<u8>)>,
    tamper_next_put: bool,
}

/// Object store double keyed like a bucket, with write-once semantics.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: Mutex<StoreState>,
    latency: Duration,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call, for exercising timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn seed_object(&self, key: &str, body: &[u8], checksum: Option<&str>) {
        self.seed_object_at(key, body, checksum, Utc::now());
    }

    pub fn seed_object_at(
        &self,
        key: &str,
        body: &[u8],
        checksum: Option<&str>,
        last_modified: DateTime<Utc>,
    ) {
        self.state().objects.insert(
            key.to_string(),
            MemoryObject {
                body: body.to_vec(),
                checksum: checksum.map(str::to_string),
                last_modified,
            },
        );
    }

    /// Seeds a well-formed backup whose checksum metadata matches its body.
    pub fn seed_backup(&self, key: &str, body: &[u8], last_modified: DateTime<Utc>) {
        self.seed_object_at(key, body, Some(&payload_checksum(body)), last_modified);
    }

    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.state()
            .objects
            .get(key)
            .map(|object| object.body.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    pub fn put_calls(&self) -> usize {
        self.state().put_calls
    }

    pub fn head_calls(&self) -> usize {
        self.state().head_calls
    }

    pub fn fail_next_put(&self, error: StoreError) {
        self.state().put_failures.push_back(error);
    }

    /// Fails the `call_number`-th head request (1-based, counted across the
    /// store's lifetime).
    pub fn fail_head_call(&self, call_number: usize, error: StoreError) {
        self.state().head_failures.insert(call_number, error);
    }

    /// Stalls the `call_number`-th head request (1-based) for `delay`.
    pub fn delay_head_call(&self, call_number: usize, delay: Duration) {
        self.state().head_delays.insert(call_number, delay);
    }

    pub fn fail_next_list(&self, error: StoreError) {
        self.state().list_failures.push_back(error);
    }

    pub fn fail_next_delete(&self, error: StoreError) {
        self.state().delete_failures.push_back(error);
    }

    /// Lets another writer create `key` just before the next put lands.
    pub fn race_next_put(&self, key: &str, body: &[u8]) {
        self.state().racing_writer = Some((key.to_string(), body.to_vec()));
    }

    /// Records the next successful put under a checksum that does not
    /// match its body, as if the object were corrupted at rest.
    pub fn tamper_next_put(&self) {
        self.state().tamper_next_put = true;
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    async fn head_object(&self, key: &str) -> Result<Option<ObjectHead>, StoreError> {
        let (call_number, delay) = {
            let mut state = self.state();
            state.head_calls += 1;
            let call_number = state.head_calls;
            (call_number, state.head_delays.remove(&call_number))
        };
        self.pause().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(error) = state.head_failures.remove(&call_number) {
            return Err(error);
        }
        Ok(state.objects.get(key).map(|object| ObjectHead {
            checksum: object.checksum.clone(),
        }))
    }

    async fn put_if_absent(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<PutOutcome, StoreError> {
        self.pause().await;
        let mut state = self.state();
        state.put_calls += 1;
        if let Some(error) = state.put_failures.pop_front() {
            return Err(error);
        }

        if let Some((racing_key, racing_body)) = state.racing_writer.take() {
            let checksum = payload_checksum(&racing_body);
            state.objects.insert(
                racing_key,
                MemoryObject {
                    body: racing_body,
                    checksum: Some(checksum),
                    last_modified: Utc::now(),
                },
            );
        }

        if state.objects.contains_key(key) {
            return Ok(PutOutcome::AlreadyExists);
        }

        let checksum = if std::mem::take(&mut state.tamper_next_put) {
            payload_checksum(b"tampered")
        } else {
            metadata.checksum.clone()
        };
        state.objects.insert(
            key.to_string(),
            MemoryObject {
                body: body.to_vec(),
                checksum: Some(checksum),
                last_modified: Utc::now(),
            },
        );
        Ok(PutOutcome::Created)
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<StoredObject>, StoreError> {
        self.pause().await;
        let mut state = self.state();
        if let Some(error) = state.list_failures.pop_front() {
            return Err(error);
        }
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| StoredObject {
                key: key.clone(),
                last_modified: object.last_modified,
            })
            .collect())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StoreError> {
        self.pause().await;
        let mut state = self.state();
        if let Some(error) = state.delete_failures.pop_front() {
            return Err(error);
        }
        state.objects.remove(key);
        Ok(())
    }
}

/// Snapshot source that replays a fixed script of fetch results.
#[derive(Debug, Default)]
pub struct ScriptedSnapshotSource {
    script: Mutex<VecDeque<Result<Snapshot, FetchError>>>,
    fallback: Option<Snapshot>,
    calls: Mutex<usize>,
    delay: Duration,
}

impl ScriptedSnapshotSource {
    /// Replays `script` in order; fetches past its end fail with a protocol
    /// error.
    pub fn new(script: Vec<Result<Snapshot, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Serves the same snapshot on every fetch.
    pub fn always(snapshot: Snapshot) -> Self {
        Self {
            fallback: Some(snapshot),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotSource for ScriptedSnapshotSource {
    async fn fetch_snapshot(
        &self,
        _endpoint: &str,
        timeout: Duration,
    ) -> Result<Snapshot, FetchError> {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        if !self.delay.is_zero() {
            if self.delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(FetchError::Timeout(timeout));
            }
            tokio::time::sleep(self.delay).await;
        }

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match (next, &self.fallback) {
            (Some(result), _) => result,
            (None, Some(snapshot)) => Ok(snapshot.clone()),
            (None, None) => Err(FetchError::Protocol("fetch script exhausted".to_string())),
        }
    }
}
