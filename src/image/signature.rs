//! Image signature records and current slot selection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sha2::{Digest, Sha256};

/// Storage partition ID type.
pub type PartitionId = u32;

/// Signature record of one image slot.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct ImageSignature {
    /// Image version held by the slot; `None` if never written.
    pub version: Option<u64>,

    /// Content signature of every partition saved into the slot.
    pub signatures: BTreeMap<PartitionId, String>,
}

impl ImageSignature {
    /// Record of a slot that has never been written.
    pub fn empty() -> Self {
        ImageSignature::default()
    }

    /// Record succeeding one at `prev_version`, holding given signatures.
    pub fn next_of(
        prev_version: Option<u64>,
        signatures: BTreeMap<PartitionId, String>,
    ) -> Self {
        ImageSignature {
            version: Some(prev_version.unwrap_or(0) + 1),
            signatures,
        }
    }

    #[inline]
    pub fn signature_of(&self, partition: PartitionId) -> Option<&str> {
        self.signatures.get(&partition).map(String::as_str)
    }
}

/// Computes the content signature of a partition's serialized bytes.
pub fn compute_signature(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Picks the current slot among given slot versions: the maximum version
/// wins, `None` being the lowest, and ties go to the highest slot index.
/// Returns `None` only if there are no slots at all.
pub fn select_current_slot(versions: &[Option<u64>]) -> Option<usize> {
    // `Option` orders `None` below any `Some`; `max_by_key` returns the last
    // maximal element, i.e. the highest index among ties
    versions
        .iter()
        .enumerate()
        .max_by_key(|&(_, version)| *version)
        .map(|(idx, _)| idx)
}
