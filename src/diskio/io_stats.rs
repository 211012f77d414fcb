use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of I/O counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IoStats {
    pub read_ops: u64,
    pub read_bytes: u64,
    pub write_ops: u64,
    pub write_bytes: u64,
}

impl fmt::Display for IoStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read_ops={}, read_bytes={}, write_ops={}, write_bytes={}",
            self.read_ops, self.read_bytes, self.write_ops, self.write_bytes
        )
    }
}

#[derive(Default)]
struct Counters {
    read_ops: AtomicU64,
    read_bytes: AtomicU64,
    write_ops: AtomicU64,
    write_bytes: AtomicU64,
}

/// Shared I/O counters. Clones observe and update the same totals.
#[derive(Clone, Default)]
pub struct IoStatsTracker {
    counters: Arc<Counters>,
}

impl IoStatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read(&self, bytes: u64) {
        self.counters.read_ops.fetch_add(1, Ordering::Relaxed);
        self.counters.read_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_write(&self, bytes: u64) {
        self.counters.write_ops.fetch_add(1, Ordering::Relaxed);
        self.counters.write_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Returns `(read_ops, read_bytes)`.
    pub fn get_read_stats(&self) -> (u64, u64) {
        (
            self.counters.read_ops.load(Ordering::Relaxed),
            self.counters.read_bytes.load(Ordering::Relaxed),
        )
    }

    /// Returns `(write_ops, write_bytes)`.
    pub fn get_write_stats(&self) -> (u64, u64) {
        (
            self.counters.write_ops.load(Ordering::Relaxed),
            self.counters.write_bytes.load(Ordering::Relaxed),
        )
    }

    pub fn get_detailed_stats(&self) -> IoStats {
        let (read_ops, read_bytes) = self.get_read_stats();
        let (write_ops, write_bytes) = self.get_write_stats();
        IoStats {
            read_ops,
            read_bytes,
            write_ops,
            write_bytes,
        }
    }
}

impl fmt::Debug for IoStatsTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IoStatsTracker")
            .field(&self.get_detailed_stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let tracker = IoStatsTracker::new();
        let clone = tracker.clone();
        clone.add_read(100);
        clone.add_read(20);
        tracker.add_write(4096);

        assert_eq!(tracker.get_read_stats(), (2, 120));
        assert_eq!(clone.get_write_stats(), (1, 4096));
        assert_eq!(
            tracker.get_detailed_stats().to_string(),
            "read_ops=2, read_bytes=120, write_ops=1, write_bytes=4096"
        );
    }
}
