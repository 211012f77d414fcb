// Kept in its own binary: the guard is process-wide.
mod common;
use common::{asc, spill_dir, spilling_opts};

use spillsort::{
    SortError, SortOptions, external_sort_disallowed, make_sorter,
    make_sorter_from_existing_ranges, set_external_sort_disallowed,
};

#[test]
fn test_disallowed_process_refuses_external_sort() {
    let dir = spill_dir();
    assert!(!external_sort_disallowed());

    set_external_sort_disallowed(true);
    let spilling = make_sorter(spilling_opts(dir.path(), 64), asc, ((), ()));
    assert!(matches!(spilling, Err(SortError::Configuration(_))));

    let resumed =
        make_sorter_from_existing_ranges("f", &[], spilling_opts(dir.path(), 64), asc, ((), ()));
    assert!(matches!(resumed, Err(SortError::Configuration(_))));

    // in-memory sorting is unaffected
    let mut sorter = make_sorter(SortOptions::new(), asc, ((), ())).unwrap();
    sorter.add(&1, &1).unwrap();
    assert_eq!(sorter.done().unwrap().count(), 1);

    set_external_sort_disallowed(false);
    assert!(make_sorter(spilling_opts(dir.path(), 64), asc, ((), ())).is_ok());
}
