use std::collections::HashSet;

use casesync_core::StoredMovementKey;
use chrono::{DateTime, Timelike, Utc};
use sha2::{Digest, Sha256};

/// Descriptions are compared on their first 100 characters only.
pub const DESCRIPTION_PREFIX_CHARS: usize = 100;

/// Normalized `(date truncated to minute, lower-cased description prefix)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(movement_date: DateTime<Utc>, description: &str) -> Self {
        let minute = truncate_to_minute(movement_date);
        Self(format!(
            "{}|{}",
            minute.format("%Y-%m-%dT%H:%M"),
            normalize_description(description)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-256 of the key, stored alongside each movement.
    pub fn hash_hex(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

pub fn truncate_to_minute(value: DateTime<Utc>) -> DateTime<Utc> {
    value
        .with_second(0)
        .and_then(|v| v.with_nanosecond(0))
        .unwrap_or(value)
}

pub fn normalize_description(description: &str) -> String {
    description
        .trim()
        .to_lowercase()
        .chars()
        .take(DESCRIPTION_PREFIX_CHARS)
        .collect()
}

/// Key set of one tracked process. Admitting a key records it immediately, so
/// repeats inside the same batch are suppressed as well as repeats of stored rows.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<DedupKey>,
}

impl Deduplicator {
    pub fn from_existing(existing: &[StoredMovementKey]) -> Self {
        Self {
            seen: existing
                .iter()
                .map(|k| DedupKey::new(k.movement_date, &k.description))
                .collect(),
        }
    }

    /// Returns the key when it has not been seen before.
    pub fn admit(&mut self, movement_date: DateTime<Utc>, description: &str) -> Option<DedupKey> {
        let key = DedupKey::new(movement_date, description);
        if self.seen.insert(key.clone()) {
            Some(key)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
