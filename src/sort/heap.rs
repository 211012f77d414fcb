//! Binary heap primitives over a plain slice.
//!
//! `std::collections::BinaryHeap` owns its storage and needs `Ord`; the
//! top-K sorter keeps its candidates in a `Vec` that is sometimes a heap and
//! sometimes a sorted run, ordered by a caller comparator that may also be
//! recording invariant violations. These helpers take `less` as an `FnMut`
//! and keep the greatest element at index 0.

/// Turns `v` into a max-heap under `less`.
pub fn make_heap<T, F>(v: &mut [T], mut less: F)
where
    F: FnMut(&T, &T) -> bool,
{
    let len = v.len();
    for i in (0..len / 2).rev() {
        sift_down(v, i, len, &mut less);
    }
}

/// `v[..len - 1]` must be a heap; restores the heap property after the last
/// element was appended.
pub fn push_heap<T, F>(v: &mut [T], mut less: F)
where
    F: FnMut(&T, &T) -> bool,
{
    if v.len() > 1 {
        sift_up(v, v.len() - 1, &mut less);
    }
}

/// Moves the greatest element to the end; `v[..len - 1]` is a heap afterwards.
pub fn pop_heap<T, F>(v: &mut [T], mut less: F)
where
    F: FnMut(&T, &T) -> bool,
{
    let len = v.len();
    if len > 1 {
        v.swap(0, len - 1);
        sift_down(v, 0, len - 1, &mut less);
    }
}

/// Sorts a heap into ascending order.
pub fn sort_heap<T, F>(v: &mut [T], mut less: F)
where
    F: FnMut(&T, &T) -> bool,
{
    for end in (1..v.len()).rev() {
        v.swap(0, end);
        sift_down(v, 0, end, &mut less);
    }
}

fn sift_up<T, F>(v: &mut [T], mut i: usize, less: &mut F)
where
    F: FnMut(&T, &T) -> bool,
{
    while i > 0 {
        let parent = (i - 1) / 2;
        if !less(&v[parent], &v[i]) {
            break;
        }
        v.swap(parent, i);
        i = parent;
    }
}

fn sift_down<T, F>(v: &mut [T], mut i: usize, len: usize, less: &mut F)
where
    F: FnMut(&T, &T) -> bool,
{
    loop {
        let left = 2 * i + 1;
        if left >= len {
            break;
        }
        let mut child = left;
        if left + 1 < len && less(&v[left], &v[left + 1]) {
            child = left + 1;
        }
        if !less(&v[i], &v[child]) {
            break;
        }
        v.swap(i, child);
        i = child;
    }
}
