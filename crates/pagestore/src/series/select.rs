//! Element selection for [`Data::select`], [`Data::count`] and [`Data::mask`].
//!
//! [`Data::select`]: super::Data::select
//! [`Data::count`]: super::Data::count
//! [`Data::mask`]: super::Data::mask

use super::element::IndexElement;
use std::cmp::Ordering;
use std::ops::{Bound, RangeBounds};

/// Bounds, predicates and slicing applied when selecting from a series.
///
/// An element is chosen when its index lies within the bounds and both
/// predicates (if set) accept it. The matching elements are then sliced as
/// `[offset : offset + limit : skip + 1]`.
///
/// ```rust,ignore
/// let odd = Selection::new()
///     .range(0.0..)
///     .value_test(|v: &f64| v % 2.0 != 0.0)
///     .limit(10);
/// let first_odd = data.select(&odd);
/// ```
pub struct Selection<'a, I, V> {
    lower: Bound<I>,
    upper: Bound<I>,
    index_test: Option<Box<dyn Fn(I) -> bool + 'a>>,
    value_test: Option<Box<dyn Fn(&V) -> bool + 'a>>,
    offset: usize,
    limit: Option<usize>,
    skip: usize,
}

impl<'a, I: IndexElement, V> Selection<'a, I, V> {
    /// Selection accepting every element.
    pub fn new() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            index_test: None,
            value_test: None,
            offset: 0,
            limit: None,
            skip: 0,
        }
    }

    /// Restricts the index to `range`.
    pub fn range(mut self, range: impl RangeBounds<I>) -> Self {
        self.lower = range.start_bound().cloned();
        self.upper = range.end_bound().cloned();
        self
    }

    /// Accepts only indices passing `test`.
    pub fn index_test(mut self, test: impl Fn(I) -> bool + 'a) -> Self {
        self.index_test = Some(Box::new(test));
        self
    }

    /// Accepts only values passing `test`.
    pub fn value_test(mut self, test: impl Fn(&V) -> bool + 'a) -> Self {
        self.value_test = Some(Box::new(test));
        self
    }

    /// Skips the first `offset` matches.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Keeps at most the next `limit` matches after the offset, before stepping.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Drops `skip` matches between consecutive chosen ones.
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub(crate) fn accepts(&self, index: I, value: &V) -> bool {
        let above = match &self.lower {
            Bound::Included(lo) => index.order(lo) != Ordering::Less,
            Bound::Excluded(lo) => index.order(lo) == Ordering::Greater,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(hi) => index.order(hi) != Ordering::Greater,
            Bound::Excluded(hi) => index.order(hi) == Ordering::Less,
            Bound::Unbounded => true,
        };
        above
            && below
            && self.index_test.as_ref().map_or(true, |test| test(index))
            && self.value_test.as_ref().map_or(true, |test| test(value))
    }

    pub(crate) fn positions(&self, mask: &[bool]) -> Vec<usize> {
        mask.iter()
            .enumerate()
            .filter_map(|(pos, hit)| hit.then_some(pos))
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .step_by(self.skip + 1)
            .collect()
    }
}

impl<I: IndexElement, V> Default for Selection<'_, I, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::series::Data;

    use super::*;

    fn cubic(start: i64, stop: i64) -> Data<f64, f64> {
        let idx: Vec<f64> = (start..=stop).map(|x| x as f64).collect();
        let rec = idx.iter().map(|x| x * x * x).collect();
        Data::new("cubic", idx, rec).unwrap()
    }

    #[test]
    fn test_count() {
        let data = cubic(-40, 60);
        assert_eq!(data.count(&Selection::new()), 101);
        assert_eq!(data.count(&Selection::new().range(0.0..)), 61);
        assert_eq!(data.count(&Selection::new().range(..=0.0)), 41);
        assert_eq!(data.count(&Selection::new().limit(3)), 3);
        assert_eq!(
            data.count(&Selection::new().offset(3).limit(3).skip(1)),
            2
        );
    }

    #[test]
    fn test_mask() {
        let data = cubic(0, 9);
        let odd = Selection::new().value_test(|v: &f64| v % 2.0 != 0.0);
        let mask = data.mask(&odd);
        assert_eq!(mask.len(), 10);
        assert_eq!(mask.iter().filter(|hit| **hit).count(), 5);
        assert!(!mask[0]);
        assert!(mask[1]);

        let filtered = data.filter(&mask);
        assert_eq!(filtered.index(), &[1.0, 3.0, 5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_select() {
        let data = cubic(-40, 60);
        let selected = data.select(&Selection::new().range(0.0..=3.0));
        assert_eq!(selected.index(), &[0.0, 1.0, 2.0, 3.0]);

        let stepped = data.select(&Selection::new().index_test(|i: f64| i >= 50.0).skip(4));
        assert_eq!(stepped.index(), &[50.0, 55.0, 60.0]);
    }
}
