pub mod heap;
pub mod iter;
pub mod merge;
pub mod options;
pub mod run;
pub mod sorter;
pub mod state;

use std::cmp::Ordering;

use crate::error::{Result, SortError};

pub use self::iter::InMemIterator;
pub use self::merge::MergeIterator;
pub use self::options::SortOptions;
pub use self::run::{RunIterator, RunWriter};
pub use self::sorter::{
    LimitOneSorter, NoLimitSorter, TopKSorter, make_sorter, make_sorter_from_existing_ranges,
};
pub use self::state::{PersistedState, SpillRange};

/// Checks that `comp` is antisymmetric and reflexive on this pair.
pub fn check_comparator<K, V, C>(comp: &C, lhs: (&K, &V), rhs: (&K, &V)) -> Result<()>
where
    C: Fn((&K, &V), (&K, &V)) -> Ordering,
{
    let regular = comp(lhs, rhs);
    let reversed = comp(rhs, lhs);
    if regular != reversed.reverse() {
        return Err(SortError::ComparatorInvariantViolation(format!(
            "comparing in both directions gave {regular:?} and {reversed:?}"
        )));
    }
    if comp(lhs, lhs) != Ordering::Equal || comp(rhs, rhs) != Ordering::Equal {
        return Err(SortError::ComparatorInvariantViolation(
            "a record does not compare equal to itself".to_string(),
        ));
    }
    Ok(())
}

/// Wraps a comparator for use inside `sort_by` and heap sifts, which cannot
/// fail. The first invariant violation is kept and reported by `finish`.
pub(crate) struct CheckedCompare<'a, C> {
    comp: &'a C,
    verify: bool,
    violation: Option<SortError>,
}

impl<'a, C> CheckedCompare<'a, C> {
    pub(crate) fn new(comp: &'a C, verify: bool) -> Self {
        Self {
            comp,
            verify,
            violation: None,
        }
    }

    pub(crate) fn compare<K, V>(&mut self, lhs: (&K, &V), rhs: (&K, &V)) -> Ordering
    where
        C: Fn((&K, &V), (&K, &V)) -> Ordering,
    {
        if self.verify && self.violation.is_none() {
            if let Err(e) = check_comparator(self.comp, lhs, rhs) {
                self.violation = Some(e);
            }
        }
        (self.comp)(lhs, rhs)
    }

    pub(crate) fn finish(self) -> Result<()> {
        match self.violation {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Borrowed view of a stored pair, in the shape comparators take.
pub(crate) fn pair<K, V>(data: &(K, V)) -> (&K, &V) {
    (&data.0, &data.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_key(a: (&i32, &i32), b: (&i32, &i32)) -> Ordering {
        a.0.cmp(b.0)
    }

    // claims everything is smaller than everything else
    fn always_less(_: (&i32, &i32), _: (&i32, &i32)) -> Ordering {
        Ordering::Less
    }

    #[test]
    fn test_consistent_comparator_passes() {
        assert!(check_comparator(&by_key, (&1, &0), (&2, &0)).is_ok());
        assert!(check_comparator(&by_key, (&3, &0), (&3, &9)).is_ok());
    }

    #[test]
    fn test_asymmetric_comparator_is_caught() {
        let err = check_comparator(&always_less, (&1, &0), (&2, &0)).unwrap_err();
        assert!(matches!(err, SortError::ComparatorInvariantViolation(_)));
    }

    #[test]
    fn test_checked_compare_keeps_first_violation() {
        let mut checked = CheckedCompare::new(&always_less, true);
        assert_eq!(checked.compare((&1, &0), (&2, &0)), Ordering::Less);
        assert_eq!(checked.compare((&2, &0), (&1, &0)), Ordering::Less);
        assert!(checked.finish().is_err());

        let mut unchecked = CheckedCompare::new(&always_less, false);
        unchecked.compare((&1, &0), (&2, &0));
        assert!(unchecked.finish().is_ok());
    }
}
