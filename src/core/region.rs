//! Axis-aligned hyper-rectangles over an image grid.
//!
//! Axis 0 varies fastest in memory, so a region cut along its outermost axis
//! maps to one contiguous run of its parent's buffer.

use crate::core::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index origin and extent per dimension.
///
/// The default value has zero dimensions and stands for "unset".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRegion {
    index: Vec<i64>,
    size: Vec<u64>,
}

impl ImageRegion {
    /// Create a region from its origin and extent.
    ///
    /// # Panics
    /// Panics if `index` and `size` have different lengths.
    pub fn new(index: Vec<i64>, size: Vec<u64>) -> Self {
        assert_eq!(
            index.len(),
            size.len(),
            "region index and size must have the same dimension"
        );
        Self { index, size }
    }

    /// Fallible variant of [`new`](Self::new).
    pub fn try_new(index: Vec<i64>, size: Vec<u64>) -> Result<Self, DomainError> {
        if index.len() != size.len() {
            return Err(DomainError::DimensionMismatch {
                expected: size.len(),
                got: index.len(),
            });
        }
        Ok(Self { index, size })
    }

    /// A region starting at the origin.
    pub fn from_size(size: Vec<u64>) -> Self {
        Self {
            index: vec![0; size.len()],
            size,
        }
    }

    /// Same origin, zero extent on every axis.
    pub fn empty_at(&self) -> Self {
        Self {
            index: self.index.clone(),
            size: vec![0; self.size.len()],
        }
    }

    pub fn dimension(&self) -> usize {
        self.size.len()
    }

    pub fn index(&self) -> &[i64] {
        &self.index
    }

    pub fn size(&self) -> &[u64] {
        &self.size
    }

    /// Whether the region has never been set.
    pub fn is_unset(&self) -> bool {
        self.size.is_empty()
    }

    /// Number of grid points covered, or `None` if the count overflows a
    /// `u64`. An unset region covers none.
    pub fn checked_number_of_pixels(&self) -> Option<u64> {
        if self.size.is_empty() {
            return Some(0);
        }
        self.size.iter().try_fold(1u64, |count, &s| count.checked_mul(s))
    }

    /// Number of grid points covered, saturating at `u64::MAX`.
    ///
    /// Any region backed by a buffer fits; use
    /// [`checked_number_of_pixels`](Self::checked_number_of_pixels) for
    /// regions that only describe a grid.
    pub fn number_of_pixels(&self) -> u64 {
        self.checked_number_of_pixels().unwrap_or(u64::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_empty() || self.size.iter().any(|&s| s == 0)
    }

    /// Last index on each axis. Only meaningful for non-empty regions.
    pub fn upper_index(&self) -> Vec<i64> {
        self.index
            .iter()
            .zip(&self.size)
            .map(|(&i, &s)| i + s as i64 - 1)
            .collect()
    }

    /// Whether every point of `self` lies in `other`.
    pub fn is_inside(&self, other: &ImageRegion) -> bool {
        if self.dimension() != other.dimension() {
            return false;
        }
        (0..self.dimension()).all(|axis| {
            let lower = self.index[axis];
            let upper = lower + self.size[axis] as i64;
            lower >= other.index[axis] && upper <= other.index[axis] + other.size[axis] as i64
        })
    }

    /// Whether `index` is a point of this region.
    pub fn contains_index(&self, index: &[i64]) -> bool {
        index.len() == self.dimension()
            && index.iter().enumerate().all(|(axis, &i)| {
                i >= self.index[axis] && i < self.index[axis] + self.size[axis] as i64
            })
    }

    /// Shrink to the intersection with `other`.
    ///
    /// Returns `false` and leaves the region unchanged when the two do not
    /// overlap.
    pub fn crop(&mut self, other: &ImageRegion) -> bool {
        if self.dimension() != other.dimension() {
            return false;
        }

        let mut index = Vec::with_capacity(self.dimension());
        let mut size = Vec::with_capacity(self.dimension());
        for axis in 0..self.dimension() {
            let lower = self.index[axis].max(other.index[axis]);
            let upper = (self.index[axis] + self.size[axis] as i64)
                .min(other.index[axis] + other.size[axis] as i64);
            if upper <= lower {
                return false;
            }
            index.push(lower);
            size.push((upper - lower) as u64);
        }

        self.index = index;
        self.size = size;
        true
    }

    /// Smallest region containing both `self` and `other`.
    ///
    /// An unset or empty side yields the other one; regions of different
    /// dimension yield `self`.
    pub fn bounding_union(&self, other: &ImageRegion) -> ImageRegion {
        if self.is_unset() || self.is_empty() {
            return other.clone();
        }
        if other.is_unset() || other.is_empty() || self.dimension() != other.dimension() {
            return self.clone();
        }

        let mut index = Vec::with_capacity(self.dimension());
        let mut size = Vec::with_capacity(self.dimension());
        for axis in 0..self.dimension() {
            let lower = self.index[axis].min(other.index[axis]);
            let upper = (self.index[axis] + self.size[axis] as i64)
                .max(other.index[axis] + other.size[axis] as i64);
            index.push(lower);
            size.push((upper - lower) as u64);
        }
        ImageRegion { index, size }
    }

    /// Grow by `radius` on both sides of each axis.
    ///
    /// A radius shorter than the region's dimension is padded with its last
    /// value; an empty radius leaves the region untouched.
    pub fn pad_by_radius(&mut self, radius: &[u64]) {
        let Some(&last) = radius.last() else {
            return;
        };
        for axis in 0..self.dimension() {
            let r = radius.get(axis).copied().unwrap_or(last);
            self.index[axis] -= r as i64;
            self.size[axis] += 2 * r;
        }
    }

    /// A copy restricted to `[offset, offset + len)` along `axis`, relative
    /// to this region's origin.
    pub fn slab(&self, axis: usize, offset: u64, len: u64) -> Self {
        let mut slab = self.clone();
        slab.index[axis] += offset as i64;
        slab.size[axis] = len;
        slab
    }

    /// Element strides with axis 0 fastest.
    pub fn strides(&self) -> Vec<u64> {
        let mut strides = Vec::with_capacity(self.dimension());
        let mut stride = 1u64;
        for &extent in &self.size {
            strides.push(stride);
            stride *= extent;
        }
        strides
    }

    /// Offset of `index` into a buffer laid out over this region.
    pub fn linear_offset(&self, index: &[i64]) -> Option<usize> {
        if !self.contains_index(index) {
            return None;
        }
        let offset: u64 = index
            .iter()
            .zip(&self.index)
            .zip(self.strides())
            .map(|((&i, &origin), stride)| (i - origin) as u64 * stride)
            .sum();
        usize::try_from(offset).ok()
    }

    /// Iterate the region's points in buffer order.
    pub fn indices(&self) -> RegionIndices<'_> {
        RegionIndices {
            region: self,
            next: if self.is_empty() {
                None
            } else {
                Some(self.index.clone())
            },
        }
    }
}

impl fmt::Display for ImageRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unset() {
            return write!(f, "[unset]");
        }
        write!(f, "[index={:?}, size={:?}]", self.index, self.size)
    }
}

/// Iterator over the points of an [`ImageRegion`], axis 0 fastest.
#[derive(Debug, Clone)]
pub struct RegionIndices<'a> {
    region: &'a ImageRegion,
    next: Option<Vec<i64>>,
}

impl Iterator for RegionIndices<'_> {
    type Item = Vec<i64>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;

        let mut following = current.clone();
        for axis in 0..following.len() {
            following[axis] += 1;
            if following[axis] < self.region.index[axis] + self.region.size[axis] as i64 {
                self.next = Some(following);
                return Some(current);
            }
            following[axis] = self.region.index[axis];
        }

        Some(current)
    }
}
