use std::collections::BTreeSet;

/// Indices in `0..total` that are not in `existing`, ascending.
///
/// Indices in `existing` at or beyond `total` are ignored.
pub fn missing_indices(total: u32, existing: &[u32]) -> Vec<u32> {
    let have: BTreeSet<u32> = existing.iter().copied().filter(|&i| i < total).collect();
    (0..total).filter(|i| !have.contains(i)).collect()
}

/// What a resumed upload still has to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePlan {
    pub total: u32,
    /// Indices already on the server, ascending, within `0..total`.
    pub existing: Vec<u32>,
    /// Indices still to upload, ascending.
    pub missing: Vec<u32>,
}

impl ResumePlan {
    pub fn new(total: u32, existing: &[u32]) -> Self {
        let missing = missing_indices(total, existing);
        let existing = (0..total).filter(|i| missing.binary_search(i).is_err()).collect();
        Self {
            total,
            existing,
            missing,
        }
    }

    /// All chunks are on the server; only the merge remains.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}
