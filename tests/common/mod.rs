#![allow(dead_code)]

use std::cmp::Ordering;
use std::path::Path;

use spillsort::{Result, SortOptions, Sorter, make_sorter};
use tempfile::TempDir;

pub mod sorter_behavior;

pub type IntSorter = Box<dyn Sorter<i32, i32>>;

pub fn asc(a: (&i32, &i32), b: (&i32, &i32)) -> Ordering {
    a.0.cmp(b.0)
}

pub fn desc(a: (&i32, &i32), b: (&i32, &i32)) -> Ordering {
    b.0.cmp(a.0)
}

pub fn spill_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("spillsort_test_")
        .tempdir()
        .expect("Failed to create test directory")
}

/// Options that spill once `budget` bytes are buffered.
pub fn spilling_opts(dir: &Path, budget: usize) -> SortOptions {
    SortOptions::new()
        .ext_sort_allowed(true)
        .temp_dir(dir)
        .max_memory_usage_bytes(budget)
}

pub fn int_sorter(opts: SortOptions) -> IntSorter {
    make_sorter(opts, asc, ((), ())).unwrap()
}

pub fn drain(sorter: &mut IntSorter) -> Result<Vec<(i32, i32)>> {
    let mut iter = sorter.done()?;
    let out = iter.by_ref().collect::<Result<Vec<_>>>()?;
    iter.close()?;
    Ok(out)
}

pub fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}
