use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::diskio::protection::TmpDataProtector;
use crate::error::{Result, SortError};

const DEFAULT_MAX_MEMORY_USAGE_BYTES: usize = 64 * 1024 * 1024;

static EXTERNAL_SORT_DISALLOWED: AtomicBool = AtomicBool::new(false);

/// Marks this process as one that must never spill (for example a pure
/// router). Every later attempt to build a sorter with external sorting
/// enabled fails with a configuration error.
pub fn set_external_sort_disallowed(disallowed: bool) {
    EXTERNAL_SORT_DISALLOWED.store(disallowed, Ordering::Release);
}

pub fn external_sort_disallowed() -> bool {
    EXTERNAL_SORT_DISALLOWED.load(Ordering::Acquire)
}

pub(crate) fn check_external_sort_permitted(opts: &SortOptions) -> Result<()> {
    if opts.ext_sort_allowed && external_sort_disallowed() {
        return Err(SortError::Configuration(
            "external sort is not allowed in this process".to_string(),
        ));
    }
    Ok(())
}

/// Options fixed for the lifetime of one sorter.
///
/// Loadable from a config file through serde; the protection hook has to be
/// attached in code.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SortOptions {
    /// Number of records to return. 0 means no limit.
    pub limit: u64,

    /// Buffered footprint above which the sorter spills. Approximate.
    pub max_memory_usage_bytes: usize,

    /// Whether spilling is allowed at all.
    pub ext_sort_allowed: bool,

    /// Directory the spill file lives in. Required when spilling is allowed.
    pub temp_dir: Option<PathBuf>,

    /// Handed to the protection hook as key-derivation context.
    pub db_name: Option<String>,

    /// Move, rather than copy, in-memory results into the output iterator.
    pub move_sorted_data_into_iterator: bool,

    /// Check symmetry and reflexivity of every comparison.
    pub verify_comparator: bool,

    #[serde(skip)]
    pub protector: Option<Arc<dyn TmpDataProtector>>,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            limit: 0,
            max_memory_usage_bytes: DEFAULT_MAX_MEMORY_USAGE_BYTES,
            ext_sort_allowed: false,
            temp_dir: None,
            db_name: None,
            move_sorted_data_into_iterator: false,
            verify_comparator: cfg!(debug_assertions),
            protector: None,
        }
    }
}

impl SortOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn max_memory_usage_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_usage_bytes = bytes;
        self
    }

    pub fn ext_sort_allowed(mut self, allowed: bool) -> Self {
        self.ext_sort_allowed = allowed;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = Some(db_name.into());
        self
    }

    pub fn move_sorted_data_into_iterator(mut self, move_data: bool) -> Self {
        self.move_sorted_data_into_iterator = move_data;
        self
    }

    pub fn verify_comparator(mut self, verify: bool) -> Self {
        self.verify_comparator = verify;
        self
    }

    pub fn protector(mut self, protector: Arc<dyn TmpDataProtector>) -> Self {
        self.protector = Some(protector);
        self
    }

    /// The protection hook, if one is configured and enabled.
    pub(crate) fn active_protector(&self) -> Option<Arc<dyn TmpDataProtector>> {
        self.protector.as_ref().filter(|p| p.enabled()).cloned()
    }

    pub(crate) fn has_temp_dir(&self) -> bool {
        self.temp_dir
            .as_ref()
            .is_some_and(|d| !d.as_os_str().is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_memory_usage_bytes == 0 {
            return Err(SortError::Configuration(
                "max_memory_usage_bytes must be greater than 0".to_string(),
            ));
        }
        if self.ext_sort_allowed && !self.has_temp_dir() {
            return Err(SortError::Configuration(
                "attempting to use external sort without setting temp_dir".to_string(),
            ));
        }
        check_external_sort_permitted(self)
    }
}

impl fmt::Debug for SortOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortOptions")
            .field("limit", &self.limit)
            .field("max_memory_usage_bytes", &self.max_memory_usage_bytes)
            .field("ext_sort_allowed", &self.ext_sort_allowed)
            .field("temp_dir", &self.temp_dir)
            .field("db_name", &self.db_name)
            .field(
                "move_sorted_data_into_iterator",
                &self.move_sorted_data_into_iterator,
            )
            .field("verify_comparator", &self.verify_comparator)
            .field("protector", &self.protector.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = SortOptions::default();
        assert_eq!(opts.limit, 0);
        assert_eq!(opts.max_memory_usage_bytes, 64 * 1024 * 1024);
        assert!(!opts.ext_sort_allowed);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_external_sort_requires_temp_dir() {
        let opts = SortOptions::new().ext_sort_allowed(true);
        assert!(matches!(opts.validate(), Err(SortError::Configuration(_))));

        let opts = opts.temp_dir("");
        assert!(matches!(opts.validate(), Err(SortError::Configuration(_))));

        let opts = opts.temp_dir("/tmp/spills");
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_zero_budget_rejected() {
        let opts = SortOptions::new().max_memory_usage_bytes(0);
        assert!(matches!(opts.validate(), Err(SortError::Configuration(_))));
    }

    #[test]
    fn test_load_from_json() {
        let opts: SortOptions = serde_json::from_str(
            r#"{"limit": 10, "ext_sort_allowed": true, "temp_dir": "/var/tmp/sort"}"#,
        )
        .unwrap();
        assert_eq!(opts.limit, 10);
        assert!(opts.ext_sort_allowed);
        assert_eq!(opts.temp_dir, Some(PathBuf::from("/var/tmp/sort")));
        assert_eq!(opts.max_memory_usage_bytes, 64 * 1024 * 1024);
        assert!(opts.protector.is_none());
    }
}
