//! Tamper-evident audit trail kept as a hash chain.
//!
//! Every state-changing operation appends an entry whose hash covers the
//! previous entry's hash and the canonical bytes of the entry itself. The
//! chain starts from a zero hash.

use serde::{Deserialize, Serialize};

use cashlock_core::{sha256_hex, CanonicalBytes, CanonicalizationError, Timestamp};

/// Hash preceding the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// What the caller records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Acting user.
    pub actor: String,
    /// Action name, e.g. `snapshot.lock`.
    pub action: String,
    /// Kind of resource touched.
    pub resource_type: String,
    /// Resource identifier.
    pub resource_id: String,
    /// State summary before the change.
    #[serde(default)]
    pub before: Option<serde_json::Value>,
    /// State summary after the change.
    #[serde(default)]
    pub after: Option<serde_json::Value>,
}

/// A chained audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the chain, starting at 1.
    pub sequence: u64,
    /// The recorded facts.
    #[serde(flatten)]
    pub record: AuditRecord,
    /// When it was recorded.
    pub timestamp: Timestamp,
    /// Hash of the previous entry.
    pub previous_hash: String,
    /// Hash of this entry.
    pub entry_hash: String,
}

#[derive(Serialize)]
struct HashInput<'a> {
    previous_hash: &'a str,
    sequence: u64,
    record: &'a AuditRecord,
    timestamp: &'a Timestamp,
}

fn entry_hash(
    previous_hash: &str,
    sequence: u64,
    record: &AuditRecord,
    timestamp: &Timestamp,
) -> Result<String, CanonicalizationError> {
    let input = HashInput {
        previous_hash,
        sequence,
        record,
        timestamp,
    };
    Ok(sha256_hex(&CanonicalBytes::new(&input)?))
}

/// Result of chain integrity verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainIntegrity {
    /// Entries checked.
    pub total_entries: usize,
    /// Sequence numbers whose link or hash does not verify.
    pub broken_links: Vec<u64>,
    /// True iff no link is broken.
    pub chain_valid: bool,
}

/// In-memory audit chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditTrail {
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    /// Empty trail.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    ///
    /// # Errors
    ///
    /// Fails when `before`/`after` contain floats, which have no canonical
    /// form.
    pub fn append(
        &mut self,
        record: AuditRecord,
        now: Timestamp,
    ) -> Result<&AuditEntry, CanonicalizationError> {
        let previous_hash = self
            .entries
            .last()
            .map_or_else(|| GENESIS_HASH.to_string(), |e| e.entry_hash.clone());
        let sequence = self.entries.len() as u64 + 1;
        let entry_hash = entry_hash(&previous_hash, sequence, &record, &now)?;
        self.entries.push(AuditEntry {
            sequence,
            record,
            timestamp: now,
            previous_hash,
            entry_hash,
        });
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Entries touching `resource_id`.
    pub fn for_resource(&self, resource_id: &str) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.record.resource_id == resource_id)
            .collect()
    }

    /// Recompute every hash and link.
    pub fn verify(&self) -> ChainIntegrity {
        let mut broken = Vec::new();
        let mut expected_prev = GENESIS_HASH.to_string();
        for e in &self.entries {
            let recomputed = entry_hash(&e.previous_hash, e.sequence, &e.record, &e.timestamp);
            let hash_ok = recomputed.as_deref().map_or(false, |h| h == e.entry_hash);
            if e.previous_hash != expected_prev || !hash_ok {
                broken.push(e.sequence);
            }
            expected_prev = e.entry_hash.clone();
        }
        ChainIntegrity {
            total_entries: self.entries.len(),
            chain_valid: broken.is_empty(),
            broken_links: broken,
        }
    }
}
