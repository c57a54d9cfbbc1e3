use std::fmt;

use serde::{Deserialize, Serialize};

use crate::StoreError;
use crate::id::validate_component;

/// Separator between the index and the hash in a stored chunk name.
pub const KEY_SEPARATOR: char = '_';

/// Name of a stored chunk: its ordinal index and declared content hash.
///
/// On disk a key is the file name `{index}_{hash}`. Ordering is by index
/// first, so a sorted list of keys is in merge order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub index: u32,
    pub hash: String,
}

impl ChunkKey {
    /// Builds a key for a new upload, validating the hash.
    ///
    /// The hash must not contain the separator and must be usable as a
    /// file name.
    pub fn new(index: u32, hash: &str) -> Result<Self, StoreError> {
        if hash.contains(KEY_SEPARATOR) {
            return Err(StoreError::InvalidChunkHash(format!(
                "separator '{KEY_SEPARATOR}' not allowed: {hash}"
            )));
        }
        validate_component(hash).map_err(|reason| {
            StoreError::InvalidChunkHash(format!("hash {reason}"))
        })?;
        Ok(Self {
            index,
            hash: hash.to_string(),
        })
    }

    /// Parses a stored chunk name, splitting on the first separator.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let (index, hash) = raw
            .split_once(KEY_SEPARATOR)
            .ok_or_else(|| StoreError::MalformedChunkKey(format!("no separator: {raw}")))?;

        // `u32::from_str` accepts a leading '+', stored names never carry one.
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StoreError::MalformedChunkKey(format!(
                "non-numeric index: {raw}"
            )));
        }
        // Only the canonical spelling maps back to the same file name.
        if index.len() > 1 && index.starts_with('0') {
            return Err(StoreError::MalformedChunkKey(format!(
                "zero-padded index: {raw}"
            )));
        }
        let index = index
            .parse::<u32>()
            .map_err(|e| StoreError::MalformedChunkKey(format!("{raw}: {e}")))?;

        if hash.is_empty() {
            return Err(StoreError::MalformedChunkKey(format!("empty hash: {raw}")));
        }

        Ok(Self {
            index,
            hash: hash.to_string(),
        })
    }

    /// File name under which this chunk is stored.
    pub fn file_name(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.index, self.hash)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_joins_with_separator() {
        let key = ChunkKey::new(7, "9e107d9d372bb6826bd81d3542a419d6").unwrap();
        assert_eq!(key.file_name(), "7_9e107d9d372bb6826bd81d3542a419d6");
        assert_eq!(key.to_string(), key.file_name());
    }

    #[test]
    fn parse_reverses_file_name() {
        let key = ChunkKey::new(12, "abc").unwrap();
        assert_eq!(ChunkKey::parse(&key.file_name()).unwrap(), key);
    }

    #[test]
    fn parse_splits_on_first_separator() {
        let key = ChunkKey::parse("3_ab_cd").unwrap();
        assert_eq!(key.index, 3);
        assert_eq!(key.hash, "ab_cd");
    }

    #[test]
    fn parse_rejects_non_numeric_index() {
        for raw in ["x_abc", "+1_abc", "-1_abc", "_abc", "1.5_abc"] {
            assert!(
                matches!(ChunkKey::parse(raw), Err(StoreError::MalformedChunkKey(_))),
                "{raw} should be malformed"
            );
        }
    }

    #[test]
    fn parse_rejects_missing_separator_or_hash() {
        assert!(ChunkKey::parse("12").is_err());
        assert!(ChunkKey::parse("12_").is_err());
    }

    #[test]
    fn parse_rejects_zero_padded_index() {
        for raw in ["01_h", "00_h", "007_h"] {
            assert!(
                matches!(ChunkKey::parse(raw), Err(StoreError::MalformedChunkKey(_))),
                "{raw} should be malformed"
            );
        }
        assert_eq!(ChunkKey::parse("0_h").unwrap().index, 0);
        assert_eq!(ChunkKey::parse("10_h").unwrap().index, 10);
    }

    #[test]
    fn parse_rejects_overflowing_index() {
        assert!(ChunkKey::parse("99999999999_abc").is_err());
    }

    #[test]
    fn new_rejects_separator_in_hash() {
        assert!(matches!(
            ChunkKey::new(0, "ab_cd"),
            Err(StoreError::InvalidChunkHash(_))
        ));
    }

    #[test]
    fn new_rejects_unsafe_hash() {
        assert!(ChunkKey::new(0, "").is_err());
        assert!(ChunkKey::new(0, "..").is_err());
        assert!(ChunkKey::new(0, "a/b").is_err());
    }

    #[test]
    fn keys_sort_by_index_numerically() {
        let mut keys = vec![
            ChunkKey::new(10, "a").unwrap(),
            ChunkKey::new(2, "b").unwrap(),
            ChunkKey::new(1, "c").unwrap(),
        ];
        keys.sort();
        let indices: Vec<u32> = keys.iter().map(|k| k.index).collect();
        assert_eq!(indices, vec![1, 2, 10]);
    }
}
