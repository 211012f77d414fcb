#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::{IntSorter, drain};

/// (2,-2),(1,-1),(0,0),(4,-4),(3,-3) comes back ordered by key.
pub fn basic_sort<F>(factory: F)
where
    F: FnOnce() -> IntSorter,
{
    let mut sorter = factory();
    for k in [2, 1, 0, 4, 3] {
        sorter.add(&k, &-k).unwrap();
    }
    assert_eq!(
        drain(&mut sorter).unwrap(),
        vec![(0, 0), (1, -1), (2, -2), (3, -3), (4, -4)]
    );
}

pub fn empty_input<F>(factory: F)
where
    F: FnOnce() -> IntSorter,
{
    let mut sorter = factory();
    assert!(drain(&mut sorter).unwrap().is_empty());
}

pub fn single_element<F>(factory: F)
where
    F: FnOnce() -> IntSorter,
{
    let mut sorter = factory();
    sorter.emplace(7, 70).unwrap();
    assert_eq!(drain(&mut sorter).unwrap(), vec![(7, 70)]);
}

/// Equal keys keep insertion order; values carry the insertion index.
pub fn duplicate_keys_are_stable<F>(factory: F)
where
    F: FnOnce() -> IntSorter,
{
    let mut sorter = factory();
    let mut rng = StdRng::seed_from_u64(7);
    let keys: Vec<i32> = (0..5000).map(|_| rng.random_range(0..50)).collect();
    for (i, k) in keys.iter().enumerate() {
        sorter.add(k, &(i as i32)).unwrap();
    }

    let results = drain(&mut sorter).unwrap();
    assert_eq!(results.len(), keys.len());
    for pair in results.windows(2) {
        let ((k1, v1), (k2, v2)) = (pair[0], pair[1]);
        assert!(k1 < k2 || (k1 == k2 && v1 < v2), "{:?} before {:?}", pair[0], pair[1]);
    }
}

/// Output is the sorted permutation of a shuffled input.
pub fn shuffled_input<F>(factory: F, n: i32)
where
    F: FnOnce() -> IntSorter,
{
    let mut sorter = factory();
    let mut data: Vec<i32> = (0..n).collect();
    data.shuffle(&mut StdRng::seed_from_u64(0x5eed));
    for k in &data {
        sorter.add(k, &(k * 2)).unwrap();
    }

    let results = drain(&mut sorter).unwrap();
    let expected: Vec<(i32, i32)> = (0..n).map(|k| (k, k * 2)).collect();
    assert_eq!(results, expected);
}

pub fn reverse_sorted_input<F>(factory: F)
where
    F: FnOnce() -> IntSorter,
{
    let mut sorter = factory();
    for k in (0..3000).rev() {
        sorter.emplace(k, 0).unwrap();
    }
    let keys: Vec<i32> = drain(&mut sorter)
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, (0..3000).collect::<Vec<_>>());
}
