//! Checksums and snapshots of records for failure diagnostics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA256 checksum of a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum from a JSON value
    ///
    /// Field order is part of the input, so two records that differ only in
    /// field order hash differently.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let canonical = serde_json::to_vec(value).unwrap_or_default();
        Self::from_bytes(&canonical)
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }

    /// Verify that a JSON value matches this checksum
    pub fn verify_json(&self, value: &serde_json::Value) -> bool {
        Self::from_json(value) == *self
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

/// Pristine copy of a record whose migration failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSnapshot {
    /// Checksum of `record`
    pub checksum: Checksum,
    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,
    /// The record exactly as it was handed to `migrate`
    pub record: serde_json::Value,
}

impl RecordSnapshot {
    pub fn capture(record: &serde_json::Value) -> Self {
        Self {
            checksum: Checksum::from_json(record),
            captured_at: Utc::now(),
            record: record.clone(),
        }
    }

    /// Whether the snapshot still matches its checksum
    pub fn is_intact(&self) -> bool {
        self.checksum.verify_json(&self.record)
    }
}
