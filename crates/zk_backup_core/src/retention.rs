use chrono::{DateTime, Duration, Utc};

use crate::storage_keys::parse_logical_version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
    pub min_keep: usize,
}

impl RetentionPolicy {
    pub fn new(max_age_days: u32, min_keep: usize) -> Self {
        Self {
            max_age_days,
            min_keep,
        }
    }

    /// `None` when the window reaches past the earliest representable time,
    /// in which case nothing is old enough to expire.
    pub fn threshold(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Duration::try_days(i64::from(self.max_age_days))
            .and_then(|window| now.checked_sub_signed(window))
    }
}

/// Listing entry for an object under a source prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Picks the backups that may be deleted, oldest logical version first.
///
/// The newest `min_keep` backups (by logical version) and `protected_key`
/// always survive, whatever their age. An unchanged cluster keeps confirming
/// the same old key, so age alone would eventually delete the only copy.
/// Keys that are not shaped like backups of `source_id` are ignored.
pub fn select_expired(
    source_id: &str,
    objects: &[StoredObject],
    protected_key: &str,
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<String> {
    let Some(threshold) = policy.threshold(now) else {
        return Vec::new();
    };

    let mut backups: Vec<(u64, &StoredObject)> = objects
        .iter()
        .filter_map(|object| {
            parse_logical_version(source_id, &object.key).map(|version| (version, object))
        })
        .collect();
    backups.sort_by(|left, right| right.0.cmp(&left.0));

    let mut expired: Vec<(u64, String)> = backups
        .into_iter()
        .skip(policy.min_keep)
        .filter(|(_, object)| object.key != protected_key && object.last_modified < threshold)
        .map(|(version, object)| (version, object.key.clone()))
        .collect();
    expired.sort_by_key(|(version, _)| *version);
    expired.into_iter().map(|(_, key)| key).collect()
}
