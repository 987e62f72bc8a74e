//! Sorted series buffer.

use super::element::{IndexElement, SeriesValue};
use super::select::Selection;
use crate::error::{PageStoreError, Result};
use std::cmp::Ordering;
use std::ops::{Bound, RangeBounds};

/// A named series of `(index, value)` pairs.
///
/// Once sorted, the index is strictly increasing. All transforming
/// operations consume their inputs and return new buffers, so a `Data` is
/// never observed half-modified.
#[derive(Debug, Clone, PartialEq)]
pub struct Data<I, V> {
    name: String,
    idx: Vec<I>,
    rec: Vec<V>,
}

/// How [`Data::merge`] combined its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// The index ranges were disjoint and the buffers were concatenated.
    Concatenate,
    /// The ranges overlapped and a two-cursor merge walked both buffers.
    Interleave,
}

/// Result of [`Data::merge`].
#[derive(Debug, Clone, PartialEq)]
pub struct Merge<I, V> {
    /// Union of both operands in index order.
    pub merged: Data<I, V>,
    /// Values of `self` that were overwritten on shared indices.
    pub displaced: Data<I, V>,
    /// Strategy that produced the result.
    pub strategy: MergeStrategy,
}

impl<I: IndexElement, V: SeriesValue> Data<I, V> {
    /// Creates a series from parallel index and value vectors.
    ///
    /// The index is taken as given; call [`sort`](Self::sort) before using
    /// the ordered operations on unsorted input.
    ///
    /// # Errors
    ///
    /// Returns [`PageStoreError::LengthMismatch`] if the lengths differ.
    pub fn new(name: impl Into<String>, idx: Vec<I>, rec: Vec<V>) -> Result<Self> {
        if idx.len() != rec.len() {
            return Err(PageStoreError::LengthMismatch {
                index: idx.len(),
                values: rec.len(),
            });
        }
        Ok(Self {
            name: name.into(),
            idx,
            rec,
        })
    }

    /// Creates an empty series.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            idx: Vec::new(),
            rec: Vec::new(),
        }
    }

    /// Series name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the same series under another name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Index elements.
    pub fn index(&self) -> &[I] {
        &self.idx
    }

    /// Values, parallel to [`index`](Self::index).
    pub fn values(&self) -> &[V] {
        &self.rec
    }

    /// Splits the series into name, index and values.
    pub fn into_parts(self) -> (String, Vec<I>, Vec<V>) {
        (self.name, self.idx, self.rec)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.idx.len()
    }

    /// Whether the series holds no elements.
    pub fn is_empty(&self) -> bool {
        self.idx.is_empty()
    }

    /// First index element.
    pub fn begin(&self) -> Option<I> {
        self.idx.first().copied()
    }

    /// Last index element.
    pub fn end(&self) -> Option<I> {
        self.idx.last().copied()
    }

    /// Iterates over `(index, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (I, &V)> + '_ {
        self.idx.iter().copied().zip(self.rec.iter())
    }

    /// Whether the index is strictly increasing.
    pub fn is_sorted(&self) -> bool {
        self.idx
            .windows(2)
            .all(|w| w[0].order(&w[1]) == Ordering::Less)
    }

    /// Bytes occupied by the values.
    pub fn byte_size(&self) -> usize {
        match V::FIXED_WIDTH {
            Some(width) => width * self.rec.len(),
            None => self.rec.iter().map(SeriesValue::byte_len).sum(),
        }
    }

    /// Sorts by index, carrying values along.
    ///
    /// Duplicate indices are resolved rather than kept: the occurrence that
    /// came last in the input wins.
    pub fn sort(self) -> Self {
        if self.is_sorted() {
            return self;
        }

        let Self { name, idx, rec } = self;
        let mut order: Vec<usize> = (0..idx.len()).collect();
        order.sort_by(|&a, &b| idx[a].order(&idx[b]));

        let mut slots: Vec<Option<V>> = rec.into_iter().map(Some).collect();
        let mut sorted_idx: Vec<I> = Vec::with_capacity(idx.len());
        let mut sorted_rec: Vec<V> = Vec::with_capacity(idx.len());
        for pos in order {
            let Some(value) = slots[pos].take() else {
                continue;
            };
            let key = idx[pos];
            match sorted_idx.last() {
                // Stable sort keeps input order among ties, so the later one replaces.
                Some(last) if last.order(&key) == Ordering::Equal => {
                    if let Some(slot) = sorted_rec.last_mut() {
                        *slot = value;
                    }
                }
                _ => {
                    sorted_idx.push(key);
                    sorted_rec.push(value);
                }
            }
        }

        Self {
            name,
            idx: sorted_idx,
            rec: sorted_rec,
        }
    }

    /// Splits at `position` into `[0, position)` and `[position, len)`.
    ///
    /// A `position` past the end yields an empty right part.
    pub fn cut_at(self, position: usize) -> (Self, Self) {
        let Self {
            name,
            mut idx,
            mut rec,
        } = self;
        let position = position.min(idx.len());
        let right_idx = idx.split_off(position);
        let right_rec = rec.split_off(position);
        let right = Self {
            name: name.clone(),
            idx: right_idx,
            rec: right_rec,
        };
        (Self { name, idx, rec }, right)
    }

    /// Splits so that every left element is below `threshold` and every
    /// right element is at or above it.
    ///
    /// # Errors
    ///
    /// Returns [`PageStoreError::EmptyRangeQuery`] if no element lies below
    /// `threshold`.
    pub fn cut_before(self, threshold: I) -> Result<(Self, Self)> {
        let position = self
            .idx
            .partition_point(|x| x.order(&threshold) == Ordering::Less);
        if position == 0 {
            return Err(PageStoreError::EmptyRangeQuery {
                name: self.name,
                range: format!("..{threshold:?}"),
            });
        }
        Ok(self.cut_at(position))
    }

    /// Splits off the largest prefix whose value payload fits in `limit`.
    ///
    /// Exact for fixed-width values. For variable-width values the cut is
    /// estimated from the average value size and shrunk by a tenth until it
    /// fits, so the prefix may be shorter than the true maximum. The left
    /// part always keeps at least one element.
    pub fn cut_by_bytes(self, limit: usize) -> (Self, Self) {
        let total = self.byte_size();
        if self.is_empty() || total <= limit {
            let right = Self::empty(self.name.clone());
            return (self, right);
        }

        let len = self.len();
        let guess = match V::FIXED_WIDTH {
            Some(width) if width > 0 => limit / width,
            _ => {
                let mut guess = ((limit as f64 / total as f64) * len as f64) as usize;
                while guess > 0 && self.prefix_bytes(guess) > limit {
                    guess = (guess as f64 * 0.9) as usize;
                }
                guess
            }
        };
        self.cut_at(guess.clamp(1, len))
    }

    fn prefix_bytes(&self, count: usize) -> usize {
        self.rec[..count.min(self.rec.len())]
            .iter()
            .map(SeriesValue::byte_len)
            .sum()
    }

    /// Merges `other` into `self`.
    ///
    /// The result holds the union of both indices in ascending order. On a
    /// shared index the value of `other` wins and the value of `self` is
    /// reported in [`Merge::displaced`]. Disjoint inputs are concatenated
    /// without visiting their elements.
    ///
    /// The merged series keeps the name of `self`.
    pub fn merge(self, other: Self) -> Merge<I, V> {
        let displaced = Self::empty(self.name.clone());

        let disjoint = match (self.end(), other.begin(), other.end(), self.begin()) {
            (Some(self_end), Some(other_begin), _, _)
                if self_end.order(&other_begin) == Ordering::Less =>
            {
                Some(true)
            }
            (_, _, Some(other_end), Some(self_begin))
                if other_end.order(&self_begin) == Ordering::Less =>
            {
                Some(false)
            }
            _ if self.is_empty() || other.is_empty() => Some(true),
            _ => None,
        };

        match disjoint {
            Some(self_first) => {
                let merged = if self_first {
                    self.append(other)
                } else {
                    let name = self.name.clone();
                    other.append(self).with_name(name)
                };
                Merge {
                    merged,
                    displaced,
                    strategy: MergeStrategy::Concatenate,
                }
            }
            None => self.interleave(other, displaced),
        }
    }

    fn interleave(self, other: Self, mut displaced: Self) -> Merge<I, V> {
        let capacity = self.len() + other.len();
        let mut merged = Self {
            name: self.name.clone(),
            idx: Vec::with_capacity(capacity),
            rec: Vec::with_capacity(capacity),
        };

        let mut left = self.idx.into_iter().zip(self.rec).peekable();
        let mut right = other.idx.into_iter().zip(other.rec).peekable();
        loop {
            let ordering = match (left.peek(), right.peek()) {
                (Some((a, _)), Some((b, _))) => a.order(b),
                _ => break,
            };
            match ordering {
                Ordering::Less => {
                    if let Some((i, v)) = left.next() {
                        merged.push(i, v);
                    }
                }
                Ordering::Greater => {
                    if let Some((i, v)) = right.next() {
                        merged.push(i, v);
                    }
                }
                Ordering::Equal => {
                    if let (Some((i, old)), Some((_, new))) = (left.next(), right.next()) {
                        merged.push(i, new);
                        displaced.push(i, old);
                    }
                }
            }
        }
        for (i, v) in left.chain(right) {
            merged.push(i, v);
        }

        Merge {
            merged,
            displaced,
            strategy: MergeStrategy::Interleave,
        }
    }

    fn push(&mut self, index: I, value: V) {
        self.idx.push(index);
        self.rec.push(value);
    }

    /// Concatenates `other` after `self` without checking the order.
    pub fn append(mut self, other: Self) -> Self {
        self.idx.extend(other.idx);
        self.rec.extend(other.rec);
        self
    }

    /// Returns the contiguous sub-series within `range`.
    ///
    /// `trim(a..=b)` keeps every element with `a <= index <= b`.
    ///
    /// # Errors
    ///
    /// Returns [`PageStoreError::EmptyRangeQuery`] if no element qualifies.
    pub fn trim(&self, range: impl RangeBounds<I>) -> Result<Self> {
        let (start, stop) = self.range_positions(&range);
        if start >= stop {
            return Err(PageStoreError::EmptyRangeQuery {
                name: self.name.clone(),
                range: format!("{:?}..{:?}", range.start_bound(), range.end_bound()),
            });
        }
        Ok(Self {
            name: self.name.clone(),
            idx: self.idx[start..stop].to_vec(),
            rec: self.rec[start..stop].to_vec(),
        })
    }

    pub(crate) fn range_positions(&self, range: &impl RangeBounds<I>) -> (usize, usize) {
        let start = match range.start_bound() {
            Bound::Included(lo) => self
                .idx
                .partition_point(|x| x.order(lo) == Ordering::Less),
            Bound::Excluded(lo) => self
                .idx
                .partition_point(|x| x.order(lo) != Ordering::Greater),
            Bound::Unbounded => 0,
        };
        let stop = match range.end_bound() {
            Bound::Included(hi) => self
                .idx
                .partition_point(|x| x.order(hi) != Ordering::Greater),
            Bound::Excluded(hi) => self
                .idx
                .partition_point(|x| x.order(hi) == Ordering::Less),
            Bound::Unbounded => self.idx.len(),
        };
        (start, stop)
    }

    /// Keeps the elements whose mask entry is `true`.
    ///
    /// Missing mask entries count as `false`.
    pub fn filter(&self, mask: &[bool]) -> Self {
        let mut out = Self::empty(self.name.clone());
        for ((i, v), keep) in self.idx.iter().zip(&self.rec).zip(mask) {
            if *keep {
                out.push(*i, v.clone());
            }
        }
        out
    }

    /// Mask of the elements passing the bounds and predicates of `selection`.
    ///
    /// Offset, limit and skip are not part of the mask.
    pub fn mask(&self, selection: &Selection<'_, I, V>) -> Vec<bool> {
        self.iter()
            .map(|(i, v)| selection.accepts(i, v))
            .collect()
    }

    /// Elements chosen by `selection`.
    pub fn select(&self, selection: &Selection<'_, I, V>) -> Self {
        let mut out = Self::empty(self.name.clone());
        for pos in selection.positions(&self.mask(selection)) {
            out.push(self.idx[pos], self.rec[pos].clone());
        }
        out
    }

    /// Number of elements chosen by `selection`.
    pub fn count(&self, selection: &Selection<'_, I, V>) -> usize {
        selection.positions(&self.mask(selection)).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cubic(start: i64, stop: i64) -> Data<f64, f64> {
        let idx: Vec<f64> = (start..=stop).map(|x| x as f64).collect();
        let rec = idx.iter().map(|x| x * x * x).collect();
        Data::new("cubic", idx, rec).unwrap()
    }

    #[test]
    fn test_new_length_mismatch() {
        let err = Data::new("a", vec![1i64, 2], vec![1.0f64]).unwrap_err();
        assert!(matches!(
            err,
            PageStoreError::LengthMismatch { index: 2, values: 1 }
        ));
    }

    #[test]
    fn test_sort() {
        let data = Data::new("a", vec![3i64, 1, 2], vec![30.0f64, 10.0, 20.0])
            .unwrap()
            .sort();
        assert_eq!(data.index(), &[1, 2, 3]);
        assert_eq!(data.values(), &[10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_sort_resolves_duplicates() {
        let data = Data::new("a", vec![2i64, 1, 2, 1], vec![1.0f64, 2.0, 3.0, 4.0])
            .unwrap()
            .sort();
        assert_eq!(data.index(), &[1, 2]);
        assert_eq!(data.values(), &[4.0, 3.0]);
        assert!(data.is_sorted());
    }

    #[test]
    fn test_signed_zero_indices_collide() {
        let data = Data::new("z", vec![0.0f64, 1.0, -0.0], vec![1.0f64, 2.0, 3.0])
            .unwrap()
            .sort();
        assert_eq!(data.len(), 2);
        assert_eq!(data.values(), &[3.0, 2.0]);

        let stored = Data::new("z", vec![-1.0f64, 0.0], vec![4.0f64, 5.0]).unwrap();
        let incoming = Data::new("z", vec![-0.0f64], vec![6.0f64]).unwrap();
        let merge = stored.merge(incoming);
        assert_eq!(merge.merged.len(), 2);
        assert_eq!(merge.merged.values(), &[4.0, 6.0]);
        assert_eq!(merge.displaced.values(), &[5.0]);
    }

    #[test]
    fn test_cut_at_and_merge_back() {
        let data = cubic(0, 9);
        let (left, right) = data.clone().cut_at(4);
        assert_eq!(left.len(), 4);
        assert_eq!(right.begin(), Some(4.0));

        let merge = left.merge(right);
        assert_eq!(merge.merged, data);
        assert!(merge.displaced.is_empty());
        assert_eq!(merge.strategy, MergeStrategy::Concatenate);

        let (left, right) = data.cut_at(100);
        assert_eq!(left.len(), 10);
        assert!(right.is_empty());
    }

    #[test]
    fn test_cut_before() {
        let (left, right) = cubic(0, 9).cut_before(4.5).unwrap();
        assert_eq!(left.end(), Some(4.0));
        assert_eq!(right.begin(), Some(5.0));

        let (left, right) = cubic(0, 9).cut_before(100.0).unwrap();
        assert_eq!(left.len(), 10);
        assert!(right.is_empty());

        let err = cubic(0, 9).cut_before(0.0).unwrap_err();
        assert!(matches!(err, PageStoreError::EmptyRangeQuery { .. }));
    }

    #[test]
    fn test_cut_by_bytes() {
        let data = cubic(0, 99);
        assert_eq!(data.byte_size(), 800);

        let (left, right) = data.cut_by_bytes(280);
        assert!(left.byte_size() <= 280);
        assert_eq!(left.len(), 35);
        assert!(left.byte_size() + right.byte_size() > 280);
        assert_eq!(right.len(), 65);
    }

    #[test]
    fn test_cut_by_bytes_keeps_one_element() {
        let (left, right) = cubic(0, 9).cut_by_bytes(3);
        assert_eq!(left.len(), 1);
        assert_eq!(right.len(), 9);
    }

    #[test]
    fn test_cut_by_bytes_variable_width() {
        let idx: Vec<i64> = (0..50).collect();
        let rec: Vec<String> = idx.iter().map(|i| "x".repeat(*i as usize % 7 + 1)).collect();
        let data = Data::new("s", idx, rec).unwrap();
        let total = data.byte_size();

        let (left, right) = data.cut_by_bytes(total / 3);
        assert!(!left.is_empty());
        assert!(left.byte_size() <= total / 3);
        assert_eq!(left.len() + right.len(), 50);
        assert_eq!(right.begin(), Some(left.len() as i64));
    }

    #[test]
    fn test_merge_overlap() {
        let old = Data::new("a", vec![1i64, 2, 3], vec![0.1f64, 0.2, 0.3]).unwrap();
        let new = Data::new("a", vec![3i64, 4, 5], vec![0.35f64, 0.45, 0.55]).unwrap();

        let merge = old.merge(new);
        assert_eq!(merge.strategy, MergeStrategy::Interleave);
        assert_eq!(merge.merged.index(), &[1, 2, 3, 4, 5]);
        assert_eq!(merge.merged.values(), &[0.1, 0.2, 0.35, 0.45, 0.55]);
        assert_eq!(merge.displaced.index(), &[3]);
        assert_eq!(merge.displaced.values(), &[0.3]);
    }

    #[test]
    fn test_merge_disjoint_either_order() {
        let low = cubic(0, 4);
        let high = cubic(10, 14);

        let merge = high.clone().merge(low.clone());
        assert_eq!(merge.strategy, MergeStrategy::Concatenate);
        assert_eq!(merge.merged.len(), 10);
        assert!(merge.merged.is_sorted());
        assert!(merge.displaced.is_empty());

        let merge = low.merge(high);
        assert_eq!(merge.merged.begin(), Some(0.0));
        assert_eq!(merge.merged.end(), Some(14.0));
    }

    #[test]
    fn test_merge_with_self() {
        let data = cubic(0, 9);
        let merge = data.clone().merge(data.clone());
        assert_eq!(merge.merged, data);
        assert_eq!(merge.displaced, data);
    }

    #[test]
    fn test_merge_empty() {
        let data = cubic(0, 3);
        let merge = Data::empty("cubic").merge(data.clone());
        assert_eq!(merge.merged, data);
        let merge = data.clone().merge(Data::empty("cubic"));
        assert_eq!(merge.merged, data);
    }

    #[test]
    fn test_trim() {
        let data = cubic(-40, 60);
        let trimmed = data.trim(0.0..=3.0).unwrap();
        assert_eq!(trimmed.index(), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(trimmed.values(), &[0.0, 1.0, 8.0, 27.0]);

        assert_eq!(data.trim(..).unwrap().len(), 101);
        assert_eq!(data.trim(0.0..3.0).unwrap().len(), 3);
        assert_eq!(data.trim(59.5..).unwrap().index(), &[60.0]);
    }

    #[test]
    fn test_trim_empty_range() {
        let data = cubic(0, 9);
        assert!(matches!(
            data.trim(20.0..=30.0),
            Err(PageStoreError::EmptyRangeQuery { .. })
        ));
        assert!(data.trim(3.2..=3.8).is_err());
    }

    #[test]
    fn test_append_and_filter() {
        let data = cubic(0, 2).append(cubic(3, 5));
        assert_eq!(data.len(), 6);

        let filtered = data.filter(&[true, false, true, false, true]);
        assert_eq!(filtered.index(), &[0.0, 2.0, 4.0]);
    }
}
