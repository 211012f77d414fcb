use std::mem::size_of;

use crate::error::{Result, SortError};

/// Capabilities every key and value type must provide to go through the sorter.
///
/// Records are written back-to-back inside a chunk with no separators, so
/// `serialize_for_sorter` must embed whatever framing `deserialize_for_sorter`
/// needs to find the end of the record.
pub trait SortRecord: Sized + Send + 'static {
    /// Extra context needed to rebuild a record from bytes. Use `()` if none.
    type DeserializeSettings: Clone + Default + Send + Sync + 'static;

    fn serialize_for_sorter(&self, buf: &mut Vec<u8>);

    fn deserialize_for_sorter(
        reader: &mut RecordReader<'_>,
        settings: &Self::DeserializeSettings,
    ) -> Result<Self>;

    /// A copy that does not borrow from any externally owned buffer.
    fn get_owned(&self) -> Self;

    /// Approximate number of bytes this record pins in memory.
    fn mem_usage_for_sorter(&self) -> usize;
}

/// Key/value deserialize settings travelling together.
pub type Settings<K, V> = (
    <K as SortRecord>::DeserializeSettings,
    <V as SortRecord>::DeserializeSettings,
);

/// Forward-only cursor over a decoded chunk.
///
/// Running past the end is reported as corruption: the chunk length said
/// there was more data than the codec found.
pub struct RecordReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn at_eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(SortError::corrupt(
                "<chunk>",
                format!(
                    "record needs {} bytes at offset {}, only {} left",
                    len,
                    self.pos,
                    self.remaining()
                ),
            ));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }
}

macro_rules! impl_sort_record_for_int {
    ($($t:ty),*) => {
        $(
            impl SortRecord for $t {
                type DeserializeSettings = ();

                fn serialize_for_sorter(&self, buf: &mut Vec<u8>) {
                    buf.extend_from_slice(&self.to_le_bytes());
                }

                fn deserialize_for_sorter(reader: &mut RecordReader<'_>, _: &()) -> Result<Self> {
                    Ok(<$t>::from_le_bytes(reader.read_array()?))
                }

                fn get_owned(&self) -> Self {
                    *self
                }

                fn mem_usage_for_sorter(&self) -> usize {
                    size_of::<$t>()
                }
            }
        )*
    };
}

impl_sort_record_for_int!(i32, i64, u32, u64);

// Variable-length records: [len:u32][bytes]
impl SortRecord for Vec<u8> {
    type DeserializeSettings = ();

    fn serialize_for_sorter(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.len() as u32).to_le_bytes());
        buf.extend_from_slice(self);
    }

    fn deserialize_for_sorter(reader: &mut RecordReader<'_>, _: &()) -> Result<Self> {
        let len = reader.read_u32_le()? as usize;
        Ok(reader.read_bytes(len)?.to_vec())
    }

    fn get_owned(&self) -> Self {
        self.clone()
    }

    fn mem_usage_for_sorter(&self) -> usize {
        size_of::<Self>() + self.capacity()
    }
}

impl SortRecord for String {
    type DeserializeSettings = ();

    fn serialize_for_sorter(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.as_bytes());
    }

    fn deserialize_for_sorter(reader: &mut RecordReader<'_>, _: &()) -> Result<Self> {
        let len = reader.read_u32_le()? as usize;
        let bytes = reader.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| SortError::corrupt("<chunk>", format!("invalid utf-8 in record: {e}")))
    }

    fn get_owned(&self) -> Self {
        self.clone()
    }

    fn mem_usage_for_sorter(&self) -> usize {
        size_of::<Self>() + self.capacity()
    }
}

/// Zero-sized stand-in for callers that only sort keys.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NullValue;

impl SortRecord for NullValue {
    type DeserializeSettings = ();

    fn serialize_for_sorter(&self, _buf: &mut Vec<u8>) {}

    fn deserialize_for_sorter(_reader: &mut RecordReader<'_>, _: &()) -> Result<Self> {
        Ok(NullValue)
    }

    fn get_owned(&self) -> Self {
        NullValue
    }

    fn mem_usage_for_sorter(&self) -> usize {
        0
    }
}
