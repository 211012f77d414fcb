use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SortError>;

/// Errors surfaced by the sort engine.
///
/// Everything propagates synchronously to the caller of the operation that
/// detected it; nothing here is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum SortError {
    /// Invalid options for the requested operation.
    #[error("invalid sort configuration: {0}")]
    Configuration(String),

    /// Buffered data exceeded the budget and spilling is not allowed.
    #[error(
        "sort exceeded memory limit of {limit_bytes} bytes, but did not opt in to external sorting"
    )]
    MemoryLimitExceeded { limit_bytes: usize },

    /// The device backing the spill file ran out of space.
    #[error("out of disk space while writing {}: {source}", path.display())]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Previously written data no longer reads back as written.
    #[error("corrupt spill data in {}: {reason}", path.display())]
    CorruptData { path: PathBuf, reason: String },

    /// A persisted state references a file that is gone or empty.
    #[error("missing or invalid resumable sort state {}: {reason}", path.display())]
    MissingResumableState { path: PathBuf, reason: String },

    /// The supplied comparator is not a consistent total order.
    #[error("comparator invariant violated: {0}")]
    ComparatorInvariantViolation(String),

    /// The at-rest protection hook rejected a buffer.
    #[error("failed to {action} spill data: {reason}")]
    DataProtection { action: &'static str, reason: String },

    #[error("{context} {}: {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SortError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        SortError::CorruptData {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        SortError::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// Maps a failed write, singling out exhausted storage.
    pub(crate) fn from_write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        if source.raw_os_error() == Some(libc::ENOSPC)
            || source.kind() == io::ErrorKind::StorageFull
        {
            SortError::DiskFull {
                path: path.into(),
                source,
            }
        } else {
            SortError::io("error writing to file", path, source)
        }
    }

    /// Corruption means previously written data is broken; retrying cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SortError::CorruptData { .. })
    }
}
