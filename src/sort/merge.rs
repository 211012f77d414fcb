use std::cmp::Ordering;

use crate::error::Result;
use crate::sort::heap::{make_heap, pop_heap, push_heap};
use crate::sort::{CheckedCompare, pair};
use crate::{SortIterator, SortedIter};

struct Stream<K, V> {
    // position in the source list; breaks ties between equal records
    index: usize,
    current: (K, V),
    source: SortedIter<K, V>,
}

/// K-way merge of already sorted sources.
///
/// The source holding the smallest current record sits on top of a binary
/// heap. Equal records come out in source order. A drained source is closed
/// as soon as it runs dry, so a bad checksum surfaces before the merge moves
/// past it.
pub struct MergeIterator<K, V, C> {
    heap: Vec<Stream<K, V>>,
    // records left to hand out; u64::MAX when unlimited
    remaining: u64,
    comp: C,
    verify: bool,
}

// `less` for the heap helpers: the top of the max-heap is the smallest record.
fn comes_after<K, V, C>(
    cmp: &mut CheckedCompare<'_, C>,
    a: &Stream<K, V>,
    b: &Stream<K, V>,
) -> bool
where
    C: Fn((&K, &V), (&K, &V)) -> Ordering,
{
    cmp.compare(pair(&a.current), pair(&b.current))
        .then_with(|| a.index.cmp(&b.index))
        == Ordering::Greater
}

impl<K, V, C> MergeIterator<K, V, C>
where
    K: Send + 'static,
    V: Send + 'static,
    C: Fn((&K, &V), (&K, &V)) -> Ordering + Clone + Send + Sync + 'static,
{
    /// Pulls the first record of every source. `limit` 0 means unlimited.
    pub fn new(
        sources: Vec<SortedIter<K, V>>,
        limit: u64,
        comp: C,
        verify_comparator: bool,
    ) -> Result<Self> {
        let mut heap = Vec::with_capacity(sources.len());
        for (index, mut source) in sources.into_iter().enumerate() {
            match source.next() {
                Some(first) => heap.push(Stream {
                    index,
                    current: first?,
                    source,
                }),
                None => source.close()?,
            }
        }

        let mut cmp = CheckedCompare::new(&comp, verify_comparator);
        make_heap(&mut heap, |a, b| comes_after(&mut cmp, a, b));
        cmp.finish()?;

        tracing::debug!(sources = heap.len(), limit, "starting merge");
        Ok(Self {
            heap,
            remaining: if limit == 0 { u64::MAX } else { limit },
            comp,
            verify: verify_comparator,
        })
    }

    fn next_record(&mut self) -> Result<Option<(K, V)>> {
        if self.remaining == 0 || self.heap.is_empty() {
            return Ok(None);
        }
        self.remaining -= 1;

        let mut cmp = CheckedCompare::new(&self.comp, self.verify);
        pop_heap(&mut self.heap, |a, b| comes_after(&mut cmp, a, b));
        let Some(mut stream) = self.heap.pop() else {
            return Ok(None);
        };

        let out = match stream.source.next() {
            Some(next) => {
                let out = std::mem::replace(&mut stream.current, next?);
                self.heap.push(stream);
                push_heap(&mut self.heap, |a, b| comes_after(&mut cmp, a, b));
                out
            }
            None => {
                stream.source.close()?;
                stream.current
            }
        };
        cmp.finish()?;

        if self.remaining == 0 {
            self.close_all()?;
        }
        Ok(Some(out))
    }

    fn close_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for mut stream in self.heap.drain(..) {
            if let Err(e) = stream.source.close() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl<K, V, C> Iterator for MergeIterator<K, V, C>
where
    K: Send + 'static,
    V: Send + 'static,
    C: Fn((&K, &V), (&K, &V)) -> Ordering + Clone + Send + Sync + 'static,
{
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

impl<K, V, C> SortIterator<K, V> for MergeIterator<K, V, C>
where
    K: Send + 'static,
    V: Send + 'static,
    C: Fn((&K, &V), (&K, &V)) -> Ordering + Clone + Send + Sync + 'static,
{
    fn close(&mut self) -> Result<()> {
        self.remaining = 0;
        self.close_all()
    }
}

impl<K, V, C> Drop for MergeIterator<K, V, C> {
    fn drop(&mut self) {
        for mut stream in self.heap.drain(..) {
            if let Err(e) = stream.source.close() {
                tracing::error!(error = %e, "error closing merge source");
            }
        }
    }
}
