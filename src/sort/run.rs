use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::SortIterator;
use crate::codec::{RecordReader, Settings, SortRecord};
use crate::diskio::file::SpillFile;
use crate::diskio::protection::TmpDataProtector;
use crate::error::{Result, SortError};
use crate::sort::options::{SortOptions, check_external_sort_permitted};
use crate::sort::state::SpillRange;

/// Buffered serialized records are cut into a chunk once they pass this size.
pub const CHUNK_SPILL_THRESHOLD: usize = 64 * 1024;

/// Size of the signed little-endian length in front of every chunk.
const CHUNK_HEADER_LEN: usize = 4;

const MAX_SNAPPY_EXPANSION: usize = 24;

// Codec errors know nothing about files; pin them on the spill file.
fn locate(err: SortError, path: &Path) -> SortError {
    match err {
        SortError::CorruptData { reason, .. } => SortError::corrupt(path, reason),
        other => other,
    }
}

/// Appends one sorted run to the end of a shared spill file.
///
/// Records are buffered and cut into chunks of roughly
/// [`CHUNK_SPILL_THRESHOLD`] bytes. Each chunk is stored as
/// `[i32 length][payload]`; a negative length marks a snappy-compressed
/// payload. The run checksum covers the serialized records before
/// compression or protection.
///
/// Only one writer may be active on a file at a time.
pub struct RunWriter<K: SortRecord, V: SortRecord> {
    file: Arc<SpillFile>,
    settings: Settings<K, V>,
    protector: Option<Arc<dyn TmpDataProtector>>,
    db_name: Option<String>,
    buffer: Vec<u8>,
    hasher: crc32fast::Hasher,
    start_offset: u64,
    entries: usize,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: SortRecord, V: SortRecord> RunWriter<K, V> {
    pub fn new(opts: &SortOptions, file: Arc<SpillFile>, settings: Settings<K, V>) -> Result<Self> {
        check_external_sort_permitted(opts)?;
        if !opts.has_temp_dir() {
            return Err(SortError::Configuration(
                "attempting to use external sort without setting temp_dir".to_string(),
            ));
        }

        let start_offset = file.current_offset()?;
        Ok(Self {
            file,
            settings,
            protector: opts.active_protector(),
            db_name: opts.db_name.clone(),
            buffer: Vec::with_capacity(CHUNK_SPILL_THRESHOLD + 1024),
            hasher: crc32fast::Hasher::new(),
            start_offset,
            entries: 0,
            _marker: PhantomData,
        })
    }

    /// Records must arrive in the order they should be read back.
    pub fn add_already_sorted(&mut self, key: &K, value: &V) -> Result<()> {
        let start = self.buffer.len();
        key.serialize_for_sorter(&mut self.buffer);
        value.serialize_for_sorter(&mut self.buffer);
        self.hasher.update(&self.buffer[start..]);
        self.entries += 1;

        if self.buffer.len() > CHUNK_SPILL_THRESHOLD {
            self.spill_chunk()?;
        }
        Ok(())
    }

    /// Flushes the last partial chunk and returns a reader over the run.
    pub fn done(mut self) -> Result<RunIterator<K, V>> {
        self.spill_chunk()?;
        let end_offset = self.file.current_offset()?;

        tracing::debug!(
            path = %self.file.path().display(),
            entries = self.entries,
            start = self.start_offset,
            end = end_offset,
            "wrote sorted run"
        );

        let range = SpillRange {
            start_offset: self.start_offset,
            end_offset,
            checksum: self.hasher.clone().finalize(),
        };
        Ok(RunIterator::new(
            self.file,
            range,
            self.settings,
            self.protector,
            self.db_name,
        ))
    }

    fn spill_chunk(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let compressed = snap::raw::Encoder::new()
            .compress_vec(&self.buffer)
            .map_err(|e| {
                SortError::io(
                    "error compressing chunk for",
                    self.file.path(),
                    std::io::Error::other(e),
                )
            })?;
        // Keep the compressed form only if it saves at least ~10%.
        let should_compress = compressed.len() < self.buffer.len() / 10 * 9;
        let mut payload: &[u8] = if should_compress {
            &compressed
        } else {
            &self.buffer
        };

        let protected;
        if let Some(protector) = &self.protector {
            let mut out = Vec::with_capacity(
                payload.len() + protector.additional_bytes_for_protected_buffer(),
            );
            protector
                .protect(payload, &mut out, self.db_name.as_deref())
                .map_err(|reason| SortError::DataProtection {
                    action: "protect",
                    reason,
                })?;
            protected = out;
            payload = &protected;
        }

        let len = i32::try_from(payload.len()).map_err(|_| {
            SortError::Configuration(format!(
                "chunk of {} bytes does not fit in a chunk header",
                payload.len()
            ))
        })?;
        let header = if should_compress { -len } else { len };

        self.file.write(&header.to_le_bytes())?;
        self.file.write(payload)?;
        self.buffer.clear();
        Ok(())
    }
}

/// Streams one run back from its byte range, a chunk at a time.
///
/// The checksum of everything handed out is compared against the value
/// recorded at write time once the range is fully consumed. A run that is
/// closed early is not verified.
pub struct RunIterator<K: SortRecord, V: SortRecord> {
    file: Arc<SpillFile>,
    path: PathBuf,
    settings: Settings<K, V>,
    protector: Option<Arc<dyn TmpDataProtector>>,
    db_name: Option<String>,
    range: SpillRange,
    read_offset: u64,
    buffer: Vec<u8>,
    pos: usize,
    // every chunk of the range has been loaded
    done: bool,
    closed: bool,
    hasher: crc32fast::Hasher,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: SortRecord, V: SortRecord> RunIterator<K, V> {
    pub fn new(
        file: Arc<SpillFile>,
        range: SpillRange,
        settings: Settings<K, V>,
        protector: Option<Arc<dyn TmpDataProtector>>,
        db_name: Option<String>,
    ) -> Self {
        let path = file.path().to_path_buf();
        Self {
            file,
            path,
            settings,
            protector,
            db_name,
            range,
            read_offset: range.start_offset,
            buffer: Vec::new(),
            pos: 0,
            done: false,
            closed: false,
            hasher: crc32fast::Hasher::new(),
            _marker: PhantomData,
        }
    }

    fn next_record(&mut self) -> Result<Option<(K, V)>> {
        if self.closed {
            return Ok(None);
        }

        while self.pos >= self.buffer.len() {
            if self.done {
                self.close()?;
                return Ok(None);
            }
            self.fill_buffer_from_disk()?;
        }

        let chunk = &self.buffer[self.pos..];
        let mut reader = RecordReader::new(chunk);
        let key = K::deserialize_for_sorter(&mut reader, &self.settings.0)
            .map_err(|e| locate(e, &self.path))?;
        let value = V::deserialize_for_sorter(&mut reader, &self.settings.1)
            .map_err(|e| locate(e, &self.path))?;
        let consumed = reader.position();

        self.hasher.update(&chunk[..consumed]);
        self.pos += consumed;
        Ok(Some((key, value)))
    }

    fn fill_buffer_from_disk(&mut self) -> Result<()> {
        let end = self.range.end_offset;
        if self.read_offset >= end {
            if self.read_offset > end {
                return Err(SortError::corrupt(
                    &self.path,
                    format!("read past end of range at offset {}", self.read_offset),
                ));
            }
            self.done = true;
            self.buffer.clear();
            self.pos = 0;
            return Ok(());
        }

        if end - self.read_offset < CHUNK_HEADER_LEN as u64 {
            return Err(SortError::corrupt(
                &self.path,
                format!(
                    "truncated chunk header at offset {} (range ends at {})",
                    self.read_offset, end
                ),
            ));
        }
        let mut header = [0u8; CHUNK_HEADER_LEN];
        self.file.read(self.read_offset, &mut header)?;
        self.read_offset += CHUNK_HEADER_LEN as u64;

        let raw_size = i32::from_le_bytes(header);
        let compressed = raw_size < 0;
        let block_size = u64::from(raw_size.unsigned_abs());
        if block_size > end - self.read_offset {
            return Err(SortError::corrupt(
                &self.path,
                format!(
                    "chunk of {} bytes at offset {} runs past end of range ({})",
                    block_size, self.read_offset, end
                ),
            ));
        }

        let mut data = vec![0u8; block_size as usize];
        self.file.read(self.read_offset, &mut data)?;
        self.read_offset += block_size;

        if let Some(protector) = &self.protector {
            let mut out = Vec::with_capacity(data.len());
            protector
                .unprotect(&data, &mut out, self.db_name.as_deref())
                .map_err(|reason| SortError::DataProtection {
                    action: "unprotect",
                    reason,
                })?;
            data = out;
        }

        if compressed {
            // Snappy cannot expand input by more than ~21x; a larger claim is
            // a damaged header, not a real chunk.
            let claimed = snap::raw::decompress_len(&data).map_err(|e| {
                SortError::corrupt(&self.path, format!("failed to decompress chunk: {e}"))
            })?;
            if claimed > data.len().saturating_mul(MAX_SNAPPY_EXPANSION) {
                return Err(SortError::corrupt(
                    &self.path,
                    format!(
                        "compressed chunk of {} bytes claims {} decompressed bytes",
                        data.len(),
                        claimed
                    ),
                ));
            }
            data = snap::raw::Decoder::new()
                .decompress_vec(&data)
                .map_err(|e| {
                    SortError::corrupt(&self.path, format!("failed to decompress chunk: {e}"))
                })?;
        }

        self.buffer = data;
        self.pos = 0;
        Ok(())
    }
}

impl<K: SortRecord, V: SortRecord> Iterator for RunIterator<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                // Nothing after a failure can be trusted.
                self.closed = true;
                self.buffer = Vec::new();
                Some(Err(e))
            }
        }
    }
}

impl<K: SortRecord, V: SortRecord> SortIterator<K, V> for RunIterator<K, V> {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let exhausted = self.done && self.pos >= self.buffer.len();
        self.buffer = Vec::new();
        self.pos = 0;

        if exhausted {
            let checksum = self.hasher.clone().finalize();
            if checksum != self.range.checksum {
                return Err(SortError::corrupt(
                    &self.path,
                    format!(
                        "data read from disk does not match what was written to disk \
                         (checksum {:#010x}, expected {:#010x})",
                        checksum, self.range.checksum
                    ),
                ));
            }
        }
        Ok(())
    }

    fn spill_range(&self) -> Option<SpillRange> {
        Some(self.range)
    }
}

impl<K: SortRecord, V: SortRecord> Drop for RunIterator<K, V> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(path = %self.path.display(), error = %e, "error closing sorted run");
        }
    }
}
