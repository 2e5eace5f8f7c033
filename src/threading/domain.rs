//! Splittable units of work.
//!
//! A [`Domain`] knows how many elements it covers and what its empty value
//! looks like; the partitioners only ever cut a domain into sub-ranges by
//! element offset.

use crate::core::error::{DomainError, DomainResult};
use crate::core::region::ImageRegion;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unit of work that can be counted and cut into pieces.
pub trait Domain: Clone + Send + Sync {
    /// Number of elements covered, or [`DomainError::CountOverflow`] when
    /// the count does not fit in a `u64`.
    fn element_count(&self) -> DomainResult<u64>;

    /// The explicit empty value handed to threads that get no work.
    fn empty(&self) -> Self;

    fn is_empty_domain(&self) -> bool {
        matches!(self.element_count(), Ok(0))
    }
}

// ============================================================================
// Closed integer intervals
// ============================================================================

/// Closed interval `[begin, end]` of integer indices.
///
/// `end < begin` denotes the empty interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    pub begin: i64,
    pub end: i64,
}

impl IndexRange {
    /// Canonical empty interval.
    pub const EMPTY: IndexRange = IndexRange { begin: 0, end: -1 };

    pub const fn new(begin: i64, end: i64) -> Self {
        Self { begin, end }
    }

    /// `[0, len - 1]`, or the empty interval for `len == 0`.
    pub fn with_len(len: u64) -> Self {
        if len == 0 {
            return Self::EMPTY;
        }
        Self::new(0, (len - 1) as i64)
    }

    /// Number of indices, or `None` for `[i64::MIN, i64::MAX]`, whose 2^64
    /// indices do not fit in a `u64`.
    pub fn checked_len(&self) -> Option<u64> {
        if self.end < self.begin {
            return Some(0);
        }
        u64::try_from(self.end as i128 - self.begin as i128 + 1).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.begin
    }

    /// The `len` indices starting `offset` past `begin`.
    pub fn sub_range(&self, offset: u64, len: u64) -> Self {
        if len == 0 {
            return Self::EMPTY;
        }
        let begin = self.begin as i128 + offset as i128;
        Self::new(begin as i64, (begin + len as i128 - 1) as i64)
    }

    /// From `offset` past `begin` through `end`.
    pub fn tail(&self, offset: u64) -> Self {
        Self::new((self.begin as i128 + offset as i128) as i64, self.end)
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<i64> {
        self.begin..=self.end
    }
}

impl Default for IndexRange {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "[]")
        } else {
            write!(f, "[{}, {}]", self.begin, self.end)
        }
    }
}

impl Domain for IndexRange {
    fn element_count(&self) -> DomainResult<u64> {
        self.checked_len().ok_or_else(|| DomainError::CountOverflow {
            domain: self.to_string(),
        })
    }

    fn empty(&self) -> Self {
        Self::EMPTY
    }
}

// ============================================================================
// Indexed containers
// ============================================================================

/// A closed range of offsets into a borrowed container.
#[derive(Debug)]
pub struct IndexedContainerDomain<'a, T> {
    container: &'a [T],
    range: IndexRange,
}

impl<T> Clone for IndexedContainerDomain<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for IndexedContainerDomain<'_, T> {}

impl<'a, T> IndexedContainerDomain<'a, T> {
    /// The offsets `range` of `container`.
    pub fn new(container: &'a [T], range: IndexRange) -> DomainResult<Self> {
        if !range.is_empty() && (range.begin < 0 || range.end as i128 >= container.len() as i128)
        {
            return Err(DomainError::RangeOutOfBounds {
                begin: range.begin,
                end: range.end,
                len: container.len(),
            });
        }
        Ok(Self { container, range })
    }

    /// Every element of `container`.
    pub fn whole(container: &'a [T]) -> Self {
        Self {
            container,
            range: IndexRange::with_len(container.len() as u64),
        }
    }

    pub fn range(&self) -> IndexRange {
        self.range
    }

    pub fn container(&self) -> &'a [T] {
        self.container
    }

    /// Same container, different offsets. Callers keep `range` in bounds.
    pub(crate) fn with_range(&self, range: IndexRange) -> Self {
        Self {
            container: self.container,
            range,
        }
    }

    /// The elements in range.
    pub fn items(&self) -> &'a [T] {
        if self.range.is_empty() {
            return &[];
        }
        &self.container[self.range.begin as usize..=self.range.end as usize]
    }
}

impl<T: Sync> Domain for IndexedContainerDomain<'_, T> {
    fn element_count(&self) -> DomainResult<u64> {
        self.range.element_count()
    }

    fn empty(&self) -> Self {
        self.with_range(IndexRange::EMPTY)
    }
}

// ============================================================================
// Forward-cursor ranges
// ============================================================================

/// A position in an ordered sequence that can only step forward.
pub trait ForwardCursor: Clone + PartialEq + Send + Sync {
    type Item;

    /// Step to the next position.
    fn advance(&mut self);

    /// Element at this position; `None` past the end of the sequence.
    fn current(&self) -> Option<Self::Item>;
}

/// Cursor over a borrowed slice.
#[derive(Debug)]
pub struct SliceCursor<'a, T> {
    slice: &'a [T],
    position: usize,
}

impl<'a, T> SliceCursor<'a, T> {
    pub fn new(slice: &'a [T], position: usize) -> Self {
        Self {
            slice,
            position: position.min(slice.len()),
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

impl<T> Clone for SliceCursor<'_, T> {
    fn clone(&self) -> Self {
        Self {
            slice: self.slice,
            position: self.position,
        }
    }
}

impl<T> PartialEq for SliceCursor<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.slice, other.slice) && self.position == other.position
    }
}

impl<'a, T: Sync> ForwardCursor for SliceCursor<'a, T> {
    type Item = &'a T;

    fn advance(&mut self) {
        if self.position < self.slice.len() {
            self.position += 1;
        }
    }

    fn current(&self) -> Option<&'a T> {
        self.slice.get(self.position)
    }
}

/// Half-open range `[begin, end)` between two cursors.
///
/// Counting and cutting walk the cursor one step at a time, so both cost
/// O(n) in the length of the range. A walk also stops where the underlying
/// sequence ends.
#[derive(Debug, Clone, PartialEq)]
pub struct IteratorRange<C> {
    pub begin: C,
    pub end: C,
}

impl<C: ForwardCursor> IteratorRange<C> {
    pub fn new(begin: C, end: C) -> Self {
        Self { begin, end }
    }

    /// `begin` advanced `steps` times, stopping early at `end`.
    fn advanced(&self, mut cursor: C, steps: u64) -> C {
        for _ in 0..steps {
            if cursor == self.end || cursor.current().is_none() {
                break;
            }
            cursor.advance();
        }
        cursor
    }

    /// The `len` elements starting `offset` past `begin`.
    pub fn sub_range(&self, offset: u64, len: u64) -> Self {
        let begin = self.advanced(self.begin.clone(), offset);
        let end = self.advanced(begin.clone(), len);
        Self { begin, end }
    }

    /// From `offset` past `begin` through `end`.
    pub fn tail(&self, offset: u64) -> Self {
        Self {
            begin: self.advanced(self.begin.clone(), offset),
            end: self.end.clone(),
        }
    }

    /// Walk the range's elements.
    pub fn iter(&self) -> IteratorRangeIter<C> {
        IteratorRangeIter {
            cursor: self.begin.clone(),
            end: self.end.clone(),
        }
    }
}

impl<'a, T: Sync> IteratorRange<SliceCursor<'a, T>> {
    /// Range over every element of `slice`.
    pub fn from_slice(slice: &'a [T]) -> Self {
        Self::new(SliceCursor::new(slice, 0), SliceCursor::new(slice, slice.len()))
    }
}

impl<C: ForwardCursor> Domain for IteratorRange<C> {
    fn element_count(&self) -> DomainResult<u64> {
        let mut cursor = self.begin.clone();
        let mut count = 0u64;
        while cursor != self.end && cursor.current().is_some() {
            cursor.advance();
            count += 1;
        }
        Ok(count)
    }

    fn empty(&self) -> Self {
        Self {
            begin: self.end.clone(),
            end: self.end.clone(),
        }
    }
}

/// Iterator produced by [`IteratorRange::iter`].
pub struct IteratorRangeIter<C> {
    cursor: C,
    end: C,
}

impl<C: ForwardCursor> Iterator for IteratorRangeIter<C> {
    type Item = C::Item;

    fn next(&mut self) -> Option<C::Item> {
        if self.cursor == self.end {
            return None;
        }
        let item = self.cursor.current()?;
        self.cursor.advance();
        Some(item)
    }
}

// ============================================================================
// Image regions
// ============================================================================

impl Domain for ImageRegion {
    fn element_count(&self) -> DomainResult<u64> {
        self.checked_number_of_pixels()
            .ok_or_else(|| DomainError::CountOverflow {
                domain: self.to_string(),
            })
    }

    fn empty(&self) -> Self {
        self.empty_at()
    }
}
