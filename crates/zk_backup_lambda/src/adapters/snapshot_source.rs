use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;

use crate::runtime::contract::Snapshot;

pub const SNAPSHOT_COMMAND_PATH: &str = "commands/snapshot";
pub const LAST_ZXID_HEADER: &str = "last_zxid";
pub const SNAPSHOT_SIZE_HEADER: &str = "snapshot_size";

/// Raw, unclassified failure of a single snapshot fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("admin endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("snapshot fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("snapshot protocol error: {0}")]
    Protocol(String),
}

/// Single-attempt snapshot acquisition; retrying is the caller's job.
pub trait SnapshotSource {
    fn fetch_snapshot(
        &self,
        endpoint: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Snapshot, FetchError>> + Send;
}

/// Streams a snapshot from the ZooKeeper AdminServer `snapshot` command.
#[derive(Debug, Clone)]
pub struct AdminHttpSnapshotSource {
    client: Client,
    auth_header: Option<String>,
}

impl AdminHttpSnapshotSource {
    pub fn new(auth_header: Option<String>) -> reqwest::Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            auth_header,
        })
    }

    async fn download(&self, url: Url) -> Result<(u64, Vec<u8>), FetchError> {
        let mut request = self.client.get(url);
        if let Some(value) = &self.auth_header {
            request = request.header(AUTHORIZATION, value);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(FetchError::Unreachable(format!(
                "admin endpoint answered {status}"
            )));
        }
        if !status.is_success() {
            return Err(FetchError::Protocol(format!(
                "failed to get snapshot: {status}"
            )));
        }

        let logical_version = last_zxid(response.headers())?;
        let declared_size = snapshot_size(response.headers())?;
        let payload = response.bytes().await.map_err(transport_error)?;

        if payload.is_empty() {
            return Err(FetchError::Protocol("snapshot body is empty".to_string()));
        }
        if let Some(size) = declared_size {
            if size != payload.len() as u64 {
                return Err(FetchError::Protocol(format!(
                    "snapshot body has {} bytes but {SNAPSHOT_SIZE_HEADER} declared {size}",
                    payload.len()
                )));
            }
        }

        Ok((logical_version, payload.to_vec()))
    }
}

impl SnapshotSource for AdminHttpSnapshotSource {
    async fn fetch_snapshot(
        &self,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Snapshot, FetchError> {
        let url = snapshot_url(endpoint)?;
        let (logical_version, payload) = tokio::time::timeout(timeout, self.download(url))
            .await
            .map_err(|_| FetchError::Timeout(timeout))??;

        Ok(Snapshot::new(endpoint, Utc::now(), logical_version, payload))
    }
}

pub fn snapshot_url(endpoint: &str) -> Result<Url, FetchError> {
    let base = format!(
        "{}/{SNAPSHOT_COMMAND_PATH}",
        endpoint.trim().trim_end_matches('/')
    );
    let mut url = Url::parse(&base).map_err(|error| {
        FetchError::Protocol(format!("invalid admin endpoint '{endpoint}': {error}"))
    })?;
    url.query_pairs_mut().append_pair("streaming", "true");
    Ok(url)
}

/// Parses a zxid as ZooKeeper prints it (`0x…` hex) or as plain decimal.
pub fn parse_zxid(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => trimmed.parse().ok(),
    }
}

fn last_zxid(headers: &HeaderMap) -> Result<u64, FetchError> {
    let raw = headers
        .get(LAST_ZXID_HEADER)
        .ok_or_else(|| FetchError::Protocol(format!("response is missing {LAST_ZXID_HEADER}")))?
        .to_str()
        .map_err(|_| FetchError::Protocol(format!("{LAST_ZXID_HEADER} is not valid text")))?;
    parse_zxid(raw)
        .ok_or_else(|| FetchError::Protocol(format!("unparseable {LAST_ZXID_HEADER} '{raw}'")))
}

fn snapshot_size(headers: &HeaderMap) -> Result<Option<u64>, FetchError> {
    let Some(value) = headers.get(SNAPSHOT_SIZE_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .map(Some)
        .ok_or_else(|| FetchError::Protocol(format!("unparseable {SNAPSHOT_SIZE_HEADER}")))
}

fn transport_error(error: reqwest::Error) -> FetchError {
    if error.is_decode() || error.is_builder() {
        return FetchError::Protocol(error.to_string());
    }
    let mut detail = error.to_string();
    let mut source = std::error::Error::source(&error);
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    FetchError::Unreachable(detail)
}
