use libc::{c_void, fstat, off_t, pread};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::diskio::io_stats::{IoStats, IoStatsTracker};
use crate::error::{Result, SortError};

/// Pending writes are pushed to the OS once they reach this size.
const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

static FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns a spill file name that is unique within this process and very
/// unlikely to collide with names produced by other processes.
pub fn next_file_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!(
        "extsort-{}-{}-{}",
        std::process::id(),
        nanos,
        FILE_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

struct FileState {
    file: Option<File>,
    // End of file as seen by writers, including bytes still in `pending`.
    offset: u64,
    pending: Vec<u8>,
}

/// Append-only spill file shared by every writer and reader of one sorter.
///
/// Held behind an `Arc`; the backing file is removed when the last handle
/// goes away unless [`SpillFile::keep`] was called. The mutex only protects
/// the handle and write cursor: writers that must not interleave their runs
/// have to take turns themselves.
pub struct SpillFile {
    path: PathBuf,
    state: Mutex<FileState>,
    keep: AtomicBool,
    io_tracker: IoStatsTracker,
}

impl SpillFile {
    /// Nothing touches the disk until the first write or read.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Mutex::new(FileState {
                file: None,
                offset: 0,
                pending: Vec::new(),
            }),
            keep: AtomicBool::new(false),
            io_tracker: IoStatsTracker::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base name of the file, as recorded in a persisted state.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Leave the file on disk when the last handle is dropped.
    pub fn keep(&self) {
        self.keep.store(true, Ordering::Release);
    }

    pub fn is_kept(&self) -> bool {
        self.keep.load(Ordering::Acquire)
    }

    pub fn io_stats(&self) -> IoStats {
        self.io_tracker.get_detailed_stats()
    }

    /// Appends `data` and returns the new end offset.
    pub fn write(&self, data: &[u8]) -> Result<u64> {
        let mut state = self.state.lock();
        self.ensure_open(&mut state)?;
        state.pending.extend_from_slice(data);
        state.offset += data.len() as u64;
        if state.pending.len() >= WRITE_BUFFER_SIZE {
            self.flush_pending(&mut state)?;
        }
        Ok(state.offset)
    }

    /// Offset the next write will land at.
    pub fn current_offset(&self) -> Result<u64> {
        let mut state = self.state.lock();
        self.ensure_open(&mut state)?;
        Ok(state.offset)
    }

    /// Pushes buffered writes to the OS. A no-op if nothing was written yet.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.flush_pending(&mut state)
    }

    /// Fills `out` from `offset`. Pending writes are flushed first so freshly
    /// written runs are readable. A short read means the file no longer holds
    /// what was written and is reported as corruption.
    pub fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        let fd = {
            let mut state = self.state.lock();
            self.ensure_open(&mut state)?;
            self.flush_pending(&mut state)?;
            match &state.file {
                Some(file) => file.as_raw_fd(),
                None => unreachable!("spill file is open after ensure_open"),
            }
        };

        let mut filled = 0;
        while filled < out.len() {
            let n = pread_fd(fd, &mut out[filled..], offset + filled as u64)
                .map_err(|e| SortError::io("error reading file", &self.path, e))?;
            if n == 0 {
                return Err(SortError::corrupt(
                    &self.path,
                    format!(
                        "number of bytes read ({}) not equal to expected number ({}) at offset {}",
                        filled,
                        out.len(),
                        offset
                    ),
                ));
            }
            filled += n;
        }
        self.io_tracker.add_read(filled as u64);
        Ok(())
    }

    fn ensure_open(&self, state: &mut FileState) -> Result<()> {
        if state.file.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SortError::io("error creating directory for", &self.path, e))?;
        }

        // Append mode lets several writers share the file serially.
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| SortError::io("error opening file", &self.path, e))?;
        let size = file_size_fd(file.as_raw_fd())
            .map_err(|e| SortError::io("error reading size of", &self.path, e))?;

        tracing::debug!(path = %self.path.display(), size, "opened spill file");
        state.offset = size;
        state.file = Some(file);
        Ok(())
    }

    fn flush_pending(&self, state: &mut FileState) -> Result<()> {
        flush_pending(&self.path, &self.io_tracker, state)
    }
}

fn flush_pending(path: &Path, io_tracker: &IoStatsTracker, state: &mut FileState) -> Result<()> {
    if state.pending.is_empty() {
        return Ok(());
    }
    if let Some(file) = state.file.as_mut() {
        file.write_all(state.pending.as_slice())
            .and_then(|_| file.flush())
            .map_err(|e| SortError::from_write(path, e))?;
        io_tracker.add_write(state.pending.len() as u64);
    }
    state.pending.clear();
    Ok(())
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        let state = self.state.get_mut();

        if self.keep.load(Ordering::Acquire) {
            if let Err(e) = flush_pending(&self.path, &self.io_tracker, state) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to flush kept spill file");
            }
            tracing::debug!(path = %self.path.display(), "keeping spill file");
            return;
        }

        // Close the descriptor before unlinking the path.
        state.pending.clear();
        state.file.take();
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed spill file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove spill file")
            }
        }
    }
}

/// Get the size of a file using its raw file descriptor
pub fn file_size_fd(fd: RawFd) -> io::Result<u64> {
    let mut stat_buf: libc::stat = unsafe { std::mem::zeroed() };

    let result = unsafe { fstat(fd, &mut stat_buf) };

    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(stat_buf.st_size as u64)
    }
}

/// Perform pread using raw file descriptor
///
/// Reads at a fixed offset without moving the file position, so readers of
/// different runs never disturb each other or the append cursor.
pub fn pread_fd(fd: RawFd, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    loop {
        let result = unsafe {
            pread(
                fd,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                offset as off_t,
            )
        };

        if result >= 0 {
            return Ok(result as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
