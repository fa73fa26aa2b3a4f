pub const SNAPSHOT_KEY_EXTENSION: &str = "snapshot";

/// Object key for a snapshot: `{source_id}/{logical_version}.snapshot`.
pub fn backup_object_key(source_id: &str, logical_version: u64) -> String {
    format!(
        "{}{logical_version}.{SNAPSHOT_KEY_EXTENSION}",
        source_prefix(source_id)
    )
}

pub fn source_prefix(source_id: &str) -> String {
    format!("{}/", source_id.trim_matches('/'))
}

/// Recovers the logical version from a key produced by [`backup_object_key`].
///
/// Returns `None` for anything outside the source namespace or not shaped
/// like a backup, so foreign objects are never mistaken for backups.
pub fn parse_logical_version(source_id: &str, key: &str) -> Option<u64> {
    let file_name = key.strip_prefix(&source_prefix(source_id))?;
    let version = file_name
        .strip_suffix(SNAPSHOT_KEY_EXTENSION)?
        .strip_suffix('.')?;
    if version.is_empty() || !version.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    version.parse().ok()
}

pub fn sanitize_source_id(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Derives a stable source id from an admin endpoint URL.
///
/// Uses the lowercased host, suffixed with `_{port}` when the URL names one
/// explicitly: `http://node1` becomes `node1`, `http://zk-1:8080` becomes
/// `zk-1_8080`.
pub fn source_id_from_endpoint(endpoint: &str) -> Option<String> {
    let trimmed = endpoint.trim();
    let rest = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let authority = rest
        .split(|c| matches!(c, '/' | '?' | '#'))
        .next()
        .unwrap_or_default();
    let host_port = authority
        .rsplit_once('@')
        .map(|(_, host_port)| host_port)
        .unwrap_or(authority);

    let (host, port) = match host_port.strip_prefix('[') {
        Some(bracketed) => {
            let (host, tail) = bracketed.split_once(']')?;
            (host, tail.strip_prefix(':'))
        }
        None => match host_port.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        },
    };

    if host.is_empty() {
        return None;
    }

    let host = host.to_ascii_lowercase();
    let raw = match port.filter(|port| !port.is_empty()) {
        Some(port) => format!("{host}_{port}"),
        None => host,
    };
    Some(sanitize_source_id(&raw))
}
