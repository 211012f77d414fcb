use std::collections::VecDeque;

use crate::SortIterator;
use crate::error::Result;

/// Yields records that never left memory, in the order given.
pub struct InMemIterator<K, V> {
    data: VecDeque<(K, V)>,
}

impl<K, V> InMemIterator<K, V> {
    pub fn new(data: impl Into<VecDeque<(K, V)>>) -> Self {
        Self { data: data.into() }
    }

    pub fn empty() -> Self {
        Self {
            data: VecDeque::new(),
        }
    }

    pub fn single(key: K, value: V) -> Self {
        Self {
            data: VecDeque::from([(key, value)]),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<K, V> Iterator for InMemIterator<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.data.pop_front().map(Ok)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.data.len(), Some(self.data.len()))
    }
}

impl<K: Send, V: Send> SortIterator<K, V> for InMemIterator<K, V> {
    fn close(&mut self) -> Result<()> {
        self.data.clear();
        Ok(())
    }
}
