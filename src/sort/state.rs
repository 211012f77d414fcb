use serde::{Deserialize, Serialize};

use crate::error::{Result, SortError};

/// One sorted run inside a spill file: `[start_offset, end_offset)` plus the
/// checksum of the serialized records it holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpillRange {
    pub start_offset: u64,
    pub end_offset: u64,
    pub checksum: u32,
}

impl SpillRange {
    pub fn len(&self) -> u64 {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.start_offset == self.end_offset
    }
}

/// Everything needed to rebuild an unbounded sorter from its spill file after
/// a restart. Ranges are listed in the order they were written.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub file_name: String,
    pub ranges: Vec<SpillRange>,
}

impl PersistedState {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SortError::MissingResumableState {
            path: self.file_name.clone().into(),
            reason: format!("failed to encode persisted state: {e}"),
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SortError::MissingResumableState {
            path: Default::default(),
            reason: format!("failed to decode persisted state: {e}"),
        })
    }

    /// Ranges must be ordered by offset and must not overlap.
    pub fn check_ranges(&self) -> Result<()> {
        let mut previous_end = 0;
        for range in &self.ranges {
            if range.start_offset > range.end_offset || range.start_offset < previous_end {
                return Err(SortError::MissingResumableState {
                    path: self.file_name.clone().into(),
                    reason: format!(
                        "range [{}, {}) is inverted or overlaps a previous range",
                        range.start_offset, range.end_offset
                    ),
                });
            }
            previous_end = range.end_offset;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, end: u64) -> SpillRange {
        SpillRange {
            start_offset: start,
            end_offset: end,
            checksum: 7,
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let state = PersistedState {
            file_name: "extsort-1-2-3".to_string(),
            ranges: vec![range(0, 100), range(100, 180)],
        };
        let json = state.to_json().unwrap();
        assert_eq!(PersistedState::from_json(&json).unwrap(), state);
    }

    #[test]
    fn test_garbage_is_missing_state() {
        assert!(matches!(
            PersistedState::from_json("{not json"),
            Err(SortError::MissingResumableState { .. })
        ));
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let state = PersistedState {
            file_name: "f".to_string(),
            ranges: vec![range(0, 100), range(50, 120)],
        };
        assert!(state.check_ranges().is_err());

        let ok = PersistedState {
            file_name: "f".to_string(),
            ranges: vec![range(0, 100), range(100, 100), range(130, 200)],
        };
        assert!(ok.check_ranges().is_ok());
    }
}
