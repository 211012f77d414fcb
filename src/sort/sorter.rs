use std::cmp::Ordering;
use std::mem::{self, size_of};
use std::sync::Arc;

use crate::codec::{Settings, SortRecord};
use crate::diskio::file::{SpillFile, next_file_name};
use crate::error::{Result, SortError};
use crate::sort::heap::{make_heap, pop_heap, push_heap, sort_heap};
use crate::sort::iter::InMemIterator;
use crate::sort::merge::MergeIterator;
use crate::sort::options::SortOptions;
use crate::sort::run::{RunIterator, RunWriter};
use crate::sort::state::{PersistedState, SpillRange};
use crate::sort::{CheckedCompare, pair};
use crate::{SortIterator, SortStats, SortedIter, Sorter};

/// Spill bookkeeping shared by the strategies that can go to disk.
struct SpillState<K: SortRecord, V: SortRecord> {
    opts: SortOptions,
    settings: Settings<K, V>,
    file: Option<Arc<SpillFile>>,
    runs: Vec<RunIterator<K, V>>,
    num_spills: usize,
    num_sorted: usize,
    total_data_size_sorted: u64,
    done: bool,
}

impl<K: SortRecord, V: SortRecord> SpillState<K, V> {
    fn new(opts: SortOptions, settings: Settings<K, V>) -> Self {
        // Named up front, created on the first spill.
        let file = match (&opts.temp_dir, opts.ext_sort_allowed) {
            (Some(dir), true) => Some(Arc::new(SpillFile::new(dir.join(next_file_name())))),
            _ => None,
        };
        Self::with_file(opts, settings, file)
    }

    fn with_file(opts: SortOptions, settings: Settings<K, V>, file: Option<Arc<SpillFile>>) -> Self {
        Self {
            opts,
            settings,
            file,
            runs: Vec::new(),
            num_spills: 0,
            num_sorted: 0,
            total_data_size_sorted: 0,
            done: false,
        }
    }

    fn assert_accepting(&self) {
        assert!(!self.done, "cannot add records to a sorter after done()");
    }

    fn mark_done(&mut self) {
        assert!(!self.done, "done() called twice on the same sorter");
        self.done = true;
    }

    fn check_spill_allowed(&self) -> Result<()> {
        if !self.opts.ext_sort_allowed {
            return Err(SortError::MemoryLimitExceeded {
                limit_bytes: self.opts.max_memory_usage_bytes,
            });
        }
        Ok(())
    }

    fn spill_file(&self) -> Result<&Arc<SpillFile>> {
        self.file.as_ref().ok_or_else(|| {
            SortError::Configuration(
                "sorter has no spill file; external sort must be allowed with a temp_dir"
                    .to_string(),
            )
        })
    }

    fn write_run<'a, I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a K, &'a V)>,
    {
        let file = Arc::clone(self.spill_file()?);
        let mut writer = RunWriter::new(&self.opts, file, self.settings.clone())?;
        for (key, value) in records {
            writer.add_already_sorted(key, value)?;
        }
        self.runs.push(writer.done()?);
        Ok(())
    }

    fn persisted_state(&self) -> Result<PersistedState> {
        let file = self.spill_file()?;
        file.flush()?;
        file.keep();

        let state = PersistedState {
            file_name: file.file_name(),
            ranges: self.runs.iter().filter_map(|r| r.spill_range()).collect(),
        };
        tracing::debug!(
            path = %file.path().display(),
            ranges = state.ranges.len(),
            "persisted sorter state for shutdown"
        );
        Ok(state)
    }

    fn merge_runs<C>(&mut self, comp: C) -> Result<SortedIter<K, V>>
    where
        C: Fn((&K, &V), (&K, &V)) -> Ordering + Clone + Send + Sync + 'static,
    {
        let sources: Vec<SortedIter<K, V>> = self
            .runs
            .drain(..)
            .map(|run| Box::new(run) as SortedIter<K, V>)
            .collect();
        let merge =
            MergeIterator::new(sources, self.opts.limit, comp, self.opts.verify_comparator)?;
        Ok(Box::new(merge))
    }

    fn stats(&self) -> SortStats {
        SortStats {
            num_spills: self.num_spills,
            num_sorted: self.num_sorted,
            total_data_size_sorted: self.total_data_size_sorted,
            io_stats: self.file.as_ref().map(|f| f.io_stats()),
        }
    }
}

fn owned_copy<K: SortRecord, V: SortRecord>(key: &K, value: &V) -> (K, V) {
    (key.get_owned(), value.get_owned())
}

/// Sorts everything it is given; spills sorted runs when the buffer outgrows
/// the memory budget and merges them at the end.
pub struct NoLimitSorter<K: SortRecord, V: SortRecord, C> {
    state: SpillState<K, V>,
    comp: C,
    data: Vec<(K, V)>,
    mem_used: usize,
}

impl<K, V, C> NoLimitSorter<K, V, C>
where
    K: SortRecord,
    V: SortRecord,
    C: Fn((&K, &V), (&K, &V)) -> Ordering + Clone + Send + Sync + 'static,
{
    pub fn new(opts: SortOptions, comp: C, settings: Settings<K, V>) -> Result<Self> {
        opts.validate()?;
        if opts.limit != 0 {
            return Err(SortError::Configuration(format!(
                "unbounded sorter needs limit 0, got {}",
                opts.limit
            )));
        }
        Ok(Self {
            state: SpillState::new(opts, settings),
            comp,
            data: Vec::new(),
            mem_used: 0,
        })
    }

    /// Rebuilds a sorter from the ranges a previous instance persisted. The
    /// ranges are trusted as-is; their checksums are verified when they are
    /// read to the end.
    pub fn from_existing_ranges(
        file_name: &str,
        ranges: &[SpillRange],
        opts: SortOptions,
        comp: C,
        settings: Settings<K, V>,
    ) -> Result<Self> {
        if opts.limit != 0 {
            return Err(SortError::Configuration(
                "creating a sorter from existing ranges is only available with limit 0"
                    .to_string(),
            ));
        }
        if !opts.ext_sort_allowed {
            return Err(SortError::Configuration(
                "creating a sorter from existing ranges requires external sort".to_string(),
            ));
        }
        if file_name.is_empty() {
            return Err(SortError::Configuration(
                "creating a sorter from existing ranges requires a file name".to_string(),
            ));
        }
        opts.validate()?;
        let Some(temp_dir) = opts.temp_dir.as_ref() else {
            return Err(SortError::Configuration(
                "creating a sorter from existing ranges requires a temp_dir".to_string(),
            ));
        };
        let path = temp_dir.join(file_name);

        let persisted = PersistedState {
            file_name: file_name.to_string(),
            ranges: ranges.to_vec(),
        };
        persisted.check_ranges()?;

        if !ranges.is_empty() {
            match std::fs::metadata(&path) {
                Err(e) => {
                    return Err(SortError::MissingResumableState {
                        path,
                        reason: format!("sorter file not found: {e}"),
                    });
                }
                Ok(meta) if meta.len() == 0 => {
                    return Err(SortError::MissingResumableState {
                        path,
                        reason: "unexpected empty file".to_string(),
                    });
                }
                Ok(_) => {}
            }
        }

        let file = Arc::new(SpillFile::new(&path));
        let protector = opts.active_protector();
        let runs = persisted
            .ranges
            .iter()
            .map(|range| {
                RunIterator::new(
                    Arc::clone(&file),
                    *range,
                    settings.clone(),
                    protector.clone(),
                    opts.db_name.clone(),
                )
            })
            .collect();

        tracing::debug!(
            path = %path.display(),
            ranges = ranges.len(),
            "resuming sorter from persisted ranges"
        );

        let mut state = SpillState::with_file(opts, settings, Some(file));
        state.runs = runs;
        state.num_spills = ranges.len();
        Ok(Self {
            state,
            comp,
            data: Vec::new(),
            mem_used: 0,
        })
    }

    fn sort(&mut self) -> Result<()> {
        let mut cmp = CheckedCompare::new(&self.comp, self.state.opts.verify_comparator);
        self.data.sort_by(|a, b| cmp.compare(pair(a), pair(b)));
        cmp.finish()?;
        self.state.num_sorted += self.data.len();
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        self.state.num_spills += 1;
        if self.data.is_empty() {
            return Ok(());
        }
        self.state.check_spill_allowed()?;

        self.sort()?;
        let data = mem::take(&mut self.data);
        self.state.write_run(data.iter().map(pair))?;

        tracing::debug!(
            records = data.len(),
            bytes = self.mem_used,
            runs = self.state.runs.len(),
            "spilled sorted run"
        );
        self.mem_used = 0;
        Ok(())
    }
}

impl<K, V, C> Sorter<K, V> for NoLimitSorter<K, V, C>
where
    K: SortRecord,
    V: SortRecord,
    C: Fn((&K, &V), (&K, &V)) -> Ordering + Clone + Send + Sync + 'static,
{
    fn add(&mut self, key: &K, value: &V) -> Result<()> {
        let (key, value) = owned_copy(key, value);
        self.emplace(key, value)
    }

    fn emplace(&mut self, key: K, value: V) -> Result<()> {
        self.state.assert_accepting();

        let mem_usage = key.mem_usage_for_sorter() + value.mem_usage_for_sorter();
        self.mem_used += mem_usage;
        self.state.total_data_size_sorted += mem_usage as u64;
        self.data.push((key, value));

        if self.mem_used > self.state.opts.max_memory_usage_bytes {
            self.spill()?;
        }
        Ok(())
    }

    fn done(&mut self) -> Result<SortedIter<K, V>> {
        self.state.mark_done();

        if self.state.runs.is_empty() {
            self.sort()?;
            let data = if self.state.opts.move_sorted_data_into_iterator {
                mem::take(&mut self.data)
            } else {
                self.data.iter().map(|(k, v)| owned_copy(k, v)).collect()
            };
            return Ok(Box::new(InMemIterator::new(data)));
        }

        self.spill()?;
        self.state.merge_runs(self.comp.clone())
    }

    fn persist_data_for_shutdown(&mut self) -> Result<PersistedState> {
        self.state.assert_accepting();
        self.state.spill_file()?;
        self.spill()?;
        self.state.persisted_state()
    }

    fn stats(&self) -> SortStats {
        self.state.stats()
    }
}

/// Keeps only the single best record. Never touches the disk.
pub struct LimitOneSorter<K, V, C> {
    opts: SortOptions,
    comp: C,
    best: Option<(K, V)>,
    num_sorted: usize,
    total_data_size_sorted: u64,
    done: bool,
}

impl<K, V, C> LimitOneSorter<K, V, C>
where
    K: SortRecord,
    V: SortRecord,
    C: Fn((&K, &V), (&K, &V)) -> Ordering + Clone + Send + Sync + 'static,
{
    pub fn new(opts: SortOptions, comp: C) -> Result<Self> {
        opts.validate()?;
        if opts.limit != 1 {
            return Err(SortError::Configuration(format!(
                "single-best sorter needs limit 1, got {}",
                opts.limit
            )));
        }
        Ok(Self {
            opts,
            comp,
            best: None,
            num_sorted: 0,
            total_data_size_sorted: 0,
            done: false,
        })
    }

    // Ties keep the incumbent.
    fn beats_best(&self, contender: (&K, &V)) -> Result<bool> {
        let Some(best) = &self.best else {
            return Ok(true);
        };
        let mut cmp = CheckedCompare::new(&self.comp, self.opts.verify_comparator);
        let ord = cmp.compare(pair(best), contender);
        cmp.finish()?;
        Ok(ord == Ordering::Greater)
    }

    fn accept(&mut self, key: K, value: V) {
        self.total_data_size_sorted +=
            (key.mem_usage_for_sorter() + value.mem_usage_for_sorter()) as u64;
        self.best = Some((key, value));
    }
}

impl<K, V, C> Sorter<K, V> for LimitOneSorter<K, V, C>
where
    K: SortRecord,
    V: SortRecord,
    C: Fn((&K, &V), (&K, &V)) -> Ordering + Clone + Send + Sync + 'static,
{
    fn add(&mut self, key: &K, value: &V) -> Result<()> {
        assert!(!self.done, "cannot add records to a sorter after done()");
        self.num_sorted += 1;
        if self.beats_best((key, value))? {
            let (key, value) = owned_copy(key, value);
            self.accept(key, value);
        }
        Ok(())
    }

    fn emplace(&mut self, key: K, value: V) -> Result<()> {
        assert!(!self.done, "cannot add records to a sorter after done()");
        self.num_sorted += 1;
        if self.beats_best((&key, &value))? {
            self.accept(key, value);
        }
        Ok(())
    }

    fn done(&mut self) -> Result<SortedIter<K, V>> {
        assert!(!self.done, "done() called twice on the same sorter");
        self.done = true;

        let best = if self.opts.move_sorted_data_into_iterator {
            self.best.take()
        } else {
            self.best.as_ref().map(|(k, v)| owned_copy(k, v))
        };
        let iter = match best {
            Some((key, value)) => InMemIterator::single(key, value),
            None => InMemIterator::empty(),
        };
        Ok(Box::new(iter))
    }

    fn persist_data_for_shutdown(&mut self) -> Result<PersistedState> {
        panic!("the single-best sorter never spills and has nothing to persist");
    }

    fn stats(&self) -> SortStats {
        SortStats {
            num_spills: 0,
            num_sorted: self.num_sorted,
            total_data_size_sorted: self.total_data_size_sorted,
            io_stats: None,
        }
    }
}

/// A kept candidate. `seq` is the arrival order and breaks comparator ties
/// so the output matches the first K records of a stable full sort.
struct Entry<K, V> {
    key: K,
    value: V,
    seq: u64,
}

impl<K: SortRecord, V: SortRecord> Entry<K, V> {
    fn view(&self) -> (&K, &V, u64) {
        (&self.key, &self.value, self.seq)
    }

    fn duplicate(&self) -> Self {
        Self {
            key: self.key.get_owned(),
            value: self.value.get_owned(),
            seq: self.seq,
        }
    }

    fn mem_usage(&self) -> usize {
        self.key.mem_usage_for_sorter() + self.value.mem_usage_for_sorter()
    }
}

fn entry_cmp<K, V, C>(cmp: &mut CheckedCompare<'_, C>, a: (&K, &V, u64), b: (&K, &V, u64)) -> Ordering
where
    C: Fn((&K, &V), (&K, &V)) -> Ordering,
{
    cmp.compare((a.0, a.1), (b.0, b.1)).then(a.2.cmp(&b.2))
}

fn entry_less<K, V, C>(cmp: &mut CheckedCompare<'_, C>, a: (&K, &V, u64), b: (&K, &V, u64)) -> bool
where
    C: Fn((&K, &V), (&K, &V)) -> Ordering,
{
    entry_cmp(cmp, a, b) == Ordering::Less
}

/// Keeps the best `limit` records in a max-heap whose root is the worst kept
/// record.
///
/// Every spill also maintains a cutoff: a record known to be dominated by
/// at least `limit` records already written to disk. Anything that does not
/// beat the cutoff is dropped without touching the heap. Two anchors feed the
/// cutoff, the worst record seen across spills and the median of the spill
/// that started the current count; each is promoted once `limit` kept records
/// are known to be no worse than it.
pub struct TopKSorter<K: SortRecord, V: SortRecord, C> {
    state: SpillState<K, V>,
    comp: C,
    limit: usize,
    data: Vec<Entry<K, V>>,
    mem_used: usize,
    next_seq: u64,

    cutoff: Option<Entry<K, V>>,
    worst_seen: Option<Entry<K, V>>,
    worst_count: usize,
    last_median: Option<Entry<K, V>>,
    median_count: usize,
}

impl<K, V, C> TopKSorter<K, V, C>
where
    K: SortRecord,
    V: SortRecord,
    C: Fn((&K, &V), (&K, &V)) -> Ordering + Clone + Send + Sync + 'static,
{
    pub fn new(opts: SortOptions, comp: C, settings: Settings<K, V>) -> Result<Self> {
        opts.validate()?;
        if opts.limit <= 1 {
            return Err(SortError::Configuration(format!(
                "top-k sorter needs a limit above 1, got {}",
                opts.limit
            )));
        }
        let limit = usize::try_from(opts.limit).unwrap_or(usize::MAX);

        // Only preallocate when the full heap is a small slice of the budget.
        let mut data = Vec::new();
        let entry_size = size_of::<Entry<K, V>>().max(1);
        if limit < opts.max_memory_usage_bytes / 10 / entry_size {
            data.reserve(limit);
        }

        Ok(Self {
            state: SpillState::new(opts, settings),
            comp,
            limit,
            data,
            mem_used: 0,
            next_seq: 0,
            cutoff: None,
            worst_seen: None,
            worst_count: 0,
            last_median: None,
            median_count: 0,
        })
    }

    fn admits(&self, key: &K, value: &V) -> Result<bool> {
        let contender = (key, value, self.next_seq);
        let mut cmp = CheckedCompare::new(&self.comp, self.state.opts.verify_comparator);
        let admitted = if self.data.len() < self.limit {
            match &self.cutoff {
                Some(cutoff) => entry_less(&mut cmp, contender, cutoff.view()),
                None => true,
            }
        } else {
            entry_less(&mut cmp, contender, self.data[0].view())
        };
        cmp.finish()?;
        Ok(admitted)
    }

    fn insert(&mut self, key: K, value: V) -> Result<()> {
        let entry = Entry {
            key,
            value,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        let mem_usage = entry.mem_usage();
        self.mem_used += mem_usage;
        self.state.total_data_size_sorted += mem_usage as u64;

        let mut cmp = CheckedCompare::new(&self.comp, self.state.opts.verify_comparator);
        if self.data.len() < self.limit {
            self.data.push(entry);
            if self.data.len() == self.limit {
                make_heap(&mut self.data, |a, b| entry_less(&mut cmp, a.view(), b.view()));
            }
        } else {
            pop_heap(&mut self.data, |a, b| entry_less(&mut cmp, a.view(), b.view()));
            if let Some(worst) = self.data.last_mut() {
                self.mem_used = self.mem_used.saturating_sub(worst.mem_usage());
                *worst = entry;
            }
            push_heap(&mut self.data, |a, b| entry_less(&mut cmp, a.view(), b.view()));
        }
        cmp.finish()?;

        if self.mem_used > self.state.opts.max_memory_usage_bytes {
            self.spill()?;
        }
        Ok(())
    }

    fn sort(&mut self) -> Result<()> {
        let mut cmp = CheckedCompare::new(&self.comp, self.state.opts.verify_comparator);
        if self.data.len() == self.limit {
            sort_heap(&mut self.data, |a, b| entry_less(&mut cmp, a.view(), b.view()));
        } else {
            self.data
                .sort_by(|a, b| entry_cmp(&mut cmp, a.view(), b.view()));
        }
        cmp.finish()
    }

    // `data` must be sorted best first.
    fn update_cutoff(&mut self) -> Result<()> {
        let Some(worst) = self.data.last() else {
            return Ok(());
        };
        let mut cmp = CheckedCompare::new(&self.comp, self.state.opts.verify_comparator);

        let replace_worst = match &self.worst_seen {
            Some(seen) if self.worst_count > 0 => {
                entry_less(&mut cmp, seen.view(), worst.view())
            }
            _ => true,
        };
        if replace_worst {
            self.worst_seen = Some(worst.duplicate());
        }
        if self.median_count == 0 || self.last_median.is_none() {
            self.last_median = Some(self.data[self.data.len() / 2].duplicate());
        }

        self.worst_count += self.data.len();
        if let Some(median) = &self.last_median {
            self.median_count += self
                .data
                .partition_point(|e| !entry_less(&mut cmp, median.view(), e.view()));
        }

        if self.worst_count >= self.limit {
            if let Some(seen) = &self.worst_seen {
                if stricter_than_cutoff(&mut cmp, seen, &self.cutoff) {
                    self.cutoff = Some(seen.duplicate());
                }
            }
            self.worst_count = 0;
        }
        if self.median_count >= self.limit {
            if let Some(median) = &self.last_median {
                if stricter_than_cutoff(&mut cmp, median, &self.cutoff) {
                    self.cutoff = Some(median.duplicate());
                }
            }
            self.median_count = 0;
        }

        cmp.finish()
    }

    fn spill(&mut self) -> Result<()> {
        self.state.num_spills += 1;
        if self.data.is_empty() {
            return Ok(());
        }
        self.state.check_spill_allowed()?;

        self.sort()?;
        self.update_cutoff()?;
        let data = mem::take(&mut self.data);
        self.state
            .write_run(data.iter().map(|e| (&e.key, &e.value)))?;

        tracing::debug!(
            records = data.len(),
            bytes = self.mem_used,
            runs = self.state.runs.len(),
            has_cutoff = self.cutoff.is_some(),
            "spilled top-k run"
        );
        self.mem_used = 0;
        Ok(())
    }
}

fn stricter_than_cutoff<K, V, C>(
    cmp: &mut CheckedCompare<'_, C>,
    anchor: &Entry<K, V>,
    cutoff: &Option<Entry<K, V>>,
) -> bool
where
    K: SortRecord,
    V: SortRecord,
    C: Fn((&K, &V), (&K, &V)) -> Ordering,
{
    match cutoff {
        Some(cutoff) => entry_less(cmp, anchor.view(), cutoff.view()),
        None => true,
    }
}

impl<K, V, C> Sorter<K, V> for TopKSorter<K, V, C>
where
    K: SortRecord,
    V: SortRecord,
    C: Fn((&K, &V), (&K, &V)) -> Ordering + Clone + Send + Sync + 'static,
{
    fn add(&mut self, key: &K, value: &V) -> Result<()> {
        self.state.assert_accepting();
        self.state.num_sorted += 1;
        if self.admits(key, value)? {
            let (key, value) = owned_copy(key, value);
            self.insert(key, value)?;
        }
        Ok(())
    }

    fn emplace(&mut self, key: K, value: V) -> Result<()> {
        self.state.assert_accepting();
        self.state.num_sorted += 1;
        if self.admits(&key, &value)? {
            self.insert(key, value)?;
        }
        Ok(())
    }

    fn done(&mut self) -> Result<SortedIter<K, V>> {
        self.state.mark_done();

        if self.state.runs.is_empty() {
            self.sort()?;
            let data: Vec<(K, V)> = if self.state.opts.move_sorted_data_into_iterator {
                mem::take(&mut self.data)
                    .into_iter()
                    .map(|e| (e.key, e.value))
                    .collect()
            } else {
                self.data
                    .iter()
                    .map(|e| owned_copy(&e.key, &e.value))
                    .collect()
            };
            return Ok(Box::new(InMemIterator::new(data)));
        }

        self.spill()?;
        self.state.merge_runs(self.comp.clone())
    }

    fn persist_data_for_shutdown(&mut self) -> Result<PersistedState> {
        self.state.assert_accepting();
        self.state.spill_file()?;
        self.spill()?;
        self.state.persisted_state()
    }

    fn stats(&self) -> SortStats {
        self.state.stats()
    }
}

/// Picks the strategy for `opts.limit`: 0 sorts everything, 1 keeps the
/// single best record, anything larger keeps the best `limit`.
pub fn make_sorter<K, V, C>(
    opts: SortOptions,
    comp: C,
    settings: Settings<K, V>,
) -> Result<Box<dyn Sorter<K, V>>>
where
    K: SortRecord,
    V: SortRecord,
    C: Fn((&K, &V), (&K, &V)) -> Ordering + Clone + Send + Sync + 'static,
{
    opts.validate()?;
    let sorter: Box<dyn Sorter<K, V>> = match opts.limit {
        0 => Box::new(NoLimitSorter::new(opts, comp, settings)?),
        1 => Box::new(LimitOneSorter::new(opts, comp)?),
        _ => Box::new(TopKSorter::new(opts, comp, settings)?),
    };
    Ok(sorter)
}

/// Resumes an unbounded sort from a [`PersistedState`]'s file and ranges.
pub fn make_sorter_from_existing_ranges<K, V, C>(
    file_name: &str,
    ranges: &[SpillRange],
    opts: SortOptions,
    comp: C,
    settings: Settings<K, V>,
) -> Result<Box<dyn Sorter<K, V>>>
where
    K: SortRecord,
    V: SortRecord,
    C: Fn((&K, &V), (&K, &V)) -> Ordering + Clone + Send + Sync + 'static,
{
    let sorter = NoLimitSorter::from_existing_ranges(file_name, ranges, opts, comp, settings)?;
    Ok(Box::new(sorter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn asc(a: (&i32, &i32), b: (&i32, &i32)) -> Ordering {
        a.0.cmp(b.0)
    }

    fn drain(mut sorter: impl Sorter<i32, i32>) -> Vec<(i32, i32)> {
        sorter.done().unwrap().collect::<Result<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_no_limit_in_memory() {
        let mut sorter = NoLimitSorter::new(SortOptions::new(), asc, ((), ())).unwrap();
        for k in [3, 1, 2, 1] {
            sorter.add(&k, &-k).unwrap();
        }
        assert_eq!(sorter.stats().num_spills, 0);
        assert_eq!(drain(sorter), vec![(1, -1), (1, -1), (2, -2), (3, -3)]);
    }

    #[test]
    fn test_no_limit_stable_for_equal_keys() {
        let opts = SortOptions::new().move_sorted_data_into_iterator(true);
        let mut sorter = NoLimitSorter::new(opts, asc, ((), ())).unwrap();
        for (k, v) in [(1, 0), (0, 1), (1, 2), (0, 3), (1, 4)] {
            sorter.emplace(k, v).unwrap();
        }
        assert_eq!(
            drain(sorter),
            vec![(0, 1), (0, 3), (1, 0), (1, 2), (1, 4)]
        );
    }

    #[test]
    fn test_over_budget_without_external_sort() {
        let opts = SortOptions::new().max_memory_usage_bytes(16);
        let mut sorter = NoLimitSorter::new(opts, asc, ((), ())).unwrap();
        sorter.add(&1, &1).unwrap();
        sorter.add(&2, &2).unwrap();
        let err = sorter.add(&3, &3).unwrap_err();
        assert!(matches!(
            err,
            SortError::MemoryLimitExceeded { limit_bytes: 16 }
        ));
    }

    #[test]
    fn test_spilling_no_limit_merges_runs() {
        let dir = TempDir::new().unwrap();
        let opts = SortOptions::new()
            .ext_sort_allowed(true)
            .temp_dir(dir.path())
            .max_memory_usage_bytes(8 * 10);
        let mut sorter = NoLimitSorter::new(opts, asc, ((), ())).unwrap();
        for k in (0..100).rev() {
            sorter.add(&k, &k).unwrap();
        }
        let stats = sorter.stats();
        assert!(stats.num_spills >= 9, "{stats}");
        assert_eq!(stats.total_data_size_sorted, 800);

        let keys: Vec<i32> = drain(sorter).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_limit_one_keeps_first_of_ties() {
        let mut sorter = LimitOneSorter::new(SortOptions::new().limit(1), asc).unwrap();
        for (k, v) in [(5, 0), (2, 1), (2, 2), (9, 3)] {
            sorter.add(&k, &v).unwrap();
        }
        assert_eq!(sorter.stats().num_sorted, 4);
        assert_eq!(drain(sorter), vec![(2, 1)]);
    }

    #[test]
    fn test_limit_one_empty() {
        let sorter = LimitOneSorter::new(SortOptions::new().limit(1), asc).unwrap();
        assert!(drain(sorter).is_empty());
    }

    #[test]
    #[should_panic(expected = "never spills")]
    fn test_limit_one_cannot_persist() {
        let mut sorter = LimitOneSorter::new(SortOptions::new().limit(1), asc).unwrap();
        let _ = sorter.persist_data_for_shutdown();
    }

    #[test]
    fn test_top_k_in_memory_matches_stable_prefix() {
        let mut sorter = TopKSorter::new(SortOptions::new().limit(3), asc, ((), ())).unwrap();
        for (k, v) in [(4, 0), (1, 1), (3, 2), (1, 3), (0, 4), (1, 5), (2, 6)] {
            sorter.add(&k, &v).unwrap();
        }
        assert_eq!(drain(sorter), vec![(0, 4), (1, 1), (1, 3)]);
    }

    #[test]
    fn test_top_k_below_limit_uses_stable_sort() {
        let mut sorter = TopKSorter::new(SortOptions::new().limit(10), asc, ((), ())).unwrap();
        for (k, v) in [(2, 0), (1, 1), (2, 2)] {
            sorter.emplace(k, v).unwrap();
        }
        assert_eq!(drain(sorter), vec![(1, 1), (2, 0), (2, 2)]);
    }

    #[test]
    fn test_top_k_cutoff_rejects_dominated_records() {
        let dir = TempDir::new().unwrap();
        let opts = SortOptions::new()
            .limit(2)
            .ext_sort_allowed(true)
            .temp_dir(dir.path())
            .max_memory_usage_bytes(8);
        let mut sorter = TopKSorter::new(opts, asc, ((), ())).unwrap();

        sorter.add(&10, &0).unwrap();
        sorter.add(&11, &0).unwrap();
        // two records written: both anchors are 11 and already dominated twice
        assert_eq!(sorter.stats().num_spills, 1);
        assert_eq!(sorter.cutoff.as_ref().map(|e| e.key), Some(11));

        sorter.add(&12, &0).unwrap();
        sorter.add(&11, &0).unwrap();
        assert!(sorter.data.is_empty());
        assert_eq!(sorter.stats().total_data_size_sorted, 16);

        sorter.add(&5, &0).unwrap();
        assert_eq!(sorter.data.len(), 1);
        assert_eq!(sorter.stats().num_sorted, 5);

        assert_eq!(drain(sorter), vec![(5, 0), (10, 0)]);
    }

    #[test]
    fn test_wrong_limit_for_strategy() {
        assert!(matches!(
            NoLimitSorter::<i32, i32, _>::new(SortOptions::new().limit(3), asc, ((), ())),
            Err(SortError::Configuration(_))
        ));
        assert!(matches!(
            LimitOneSorter::<i32, i32, _>::new(SortOptions::new(), asc),
            Err(SortError::Configuration(_))
        ));
        assert!(matches!(
            TopKSorter::<i32, i32, _>::new(SortOptions::new().limit(1), asc, ((), ())),
            Err(SortError::Configuration(_))
        ));
    }

    #[test]
    #[should_panic(expected = "after done()")]
    fn test_add_after_done_panics() {
        let mut sorter = NoLimitSorter::new(SortOptions::new(), asc, ((), ())).unwrap();
        let _iter = sorter.done().unwrap();
        let _ = sorter.add(&1, &1);
    }
}
