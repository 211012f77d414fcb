// Bounded-memory external sort engine

pub mod codec;
pub mod diskio;
pub mod error;
pub mod sort;

pub use codec::{NullValue, RecordReader, Settings, SortRecord};
pub use diskio::io_stats::{IoStats, IoStatsTracker};
pub use diskio::protection::TmpDataProtector;
pub use error::{Result, SortError};
pub use sort::options::{external_sort_disallowed, set_external_sort_disallowed};
pub use sort::{
    InMemIterator, LimitOneSorter, MergeIterator, NoLimitSorter, PersistedState, RunIterator,
    RunWriter, SortOptions, SpillRange, TopKSorter, check_comparator, make_sorter,
    make_sorter_from_existing_ranges,
};

/// Lazily produced, sorted output of a sorter.
///
/// `next()` returning `None` means the sequence is exhausted. `close` must be
/// safe to call any number of times; once a file-backed source has been read
/// to its end, closing it verifies the checksum of what was read.
pub trait SortIterator<K, V>: Iterator<Item = Result<(K, V)>> + Send {
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// The on-disk range this iterator reads, if it reads one.
    fn spill_range(&self) -> Option<SpillRange> {
        None
    }
}

pub type SortedIter<K, V> = Box<dyn SortIterator<K, V>>;

/// Accepts records in any order and hands them back sorted.
///
/// Not safe for concurrent use; separate instances may run on separate
/// threads.
pub trait Sorter<K, V>: Send {
    /// Stores an owned copy of the record.
    fn add(&mut self, key: &K, value: &V) -> Result<()>;

    /// Like `add`, for records the caller already owns.
    fn emplace(&mut self, key: K, value: V) -> Result<()>;

    /// Finishes input and returns the sorted output. Panics if called twice.
    fn done(&mut self) -> Result<SortedIter<K, V>>;

    /// Spills everything buffered, keeps the spill file and describes where
    /// the data lives so a later process can resume.
    fn persist_data_for_shutdown(&mut self) -> Result<PersistedState>;

    fn stats(&self) -> SortStats;

    fn num_spills(&self) -> usize {
        self.stats().num_spills
    }

    fn num_sorted(&self) -> usize {
        self.stats().num_sorted
    }
}

/// Statistics about a sort operation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Spill attempts, including ranges inherited from a persisted state.
    pub num_spills: usize,
    pub num_sorted: usize,
    /// Approximate bytes of record data accepted.
    pub total_data_size_sorted: u64,
    pub io_stats: Option<IoStats>,
}

impl std::fmt::Display for SortStats {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "SortStats:")?;
        writeln!(f, "  Number of spills: {}", self.num_spills)?;
        writeln!(f, "  Records sorted: {}", self.num_sorted)?;
        writeln!(
            f,
            "  Data sorted: {} bytes ({:.2} MB)",
            self.total_data_size_sorted,
            self.total_data_size_sorted as f64 / (1024.0 * 1024.0)
        )?;
        if let Some(io) = &self.io_stats {
            writeln!(f, "  I/O stats: {}", io)?;
            if self.total_data_size_sorted > 0 && io.write_bytes > 0 {
                writeln!(
                    f,
                    "  Spill size ratio: {:.2}x",
                    io.write_bytes as f64 / self.total_data_size_sorted as f64
                )?;
            }
        }
        Ok(())
    }
}
