//! Splitting a domain across threads.
//!
//! Every strategy follows the same arithmetic: `count` elements over
//! `requested` threads gives `ceil(count / requested)` values per thread and
//! `ceil(count / values_per_thread)` threads actually used. Threads before
//! the last used one get exactly `values_per_thread` elements; the last used
//! thread takes the remainder through the end of the domain; every other
//! thread gets the domain's empty value.

use crate::core::error::{DomainError, DomainResult};
use crate::core::region::ImageRegion;
use crate::threading::domain::{
    Domain, ForwardCursor, IndexRange, IndexedContainerDomain, IteratorRange,
};

/// One thread's share of a domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition<D> {
    pub sub_domain: D,
    /// Number of threads that receive work; never more than requested.
    pub threads_used: usize,
}

/// Strategy for cutting one shape of domain.
pub trait DomainPartitioner<D: Domain>: Send + Sync {
    /// The piece of `complete` handled by `thread_id` when it is split
    /// across `requested` threads.
    fn partition_domain(
        &self,
        thread_id: usize,
        requested: usize,
        complete: &D,
    ) -> DomainResult<Partition<D>>;
}

/// Element offsets owned by one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Share {
    /// `len` elements from `offset`.
    Chunk { offset: u64, len: u64 },
    /// From `offset` to the end of the domain.
    Tail { offset: u64 },
    None,
}

/// `(values_per_thread, threads_used)` for `count` elements.
pub fn split_counts(count: u64, requested: usize) -> DomainResult<(u64, usize)> {
    if count == 0 || requested == 0 {
        return Err(DomainError::InvalidDomain { count, requested });
    }
    let values_per_thread = count.div_ceil(requested as u64);
    let threads_used = count.div_ceil(values_per_thread) as usize;
    Ok((values_per_thread, threads_used))
}

pub(crate) fn share_of(
    thread_id: usize,
    requested: usize,
    count: u64,
) -> DomainResult<(Share, usize)> {
    let (values_per_thread, threads_used) = split_counts(count, requested)?;
    // Only computed for threads that carry work, where it stays below `count`.
    let offset = || thread_id as u64 * values_per_thread;
    let share = if thread_id + 1 < threads_used {
        Share::Chunk {
            offset: offset(),
            len: values_per_thread,
        }
    } else if thread_id + 1 == threads_used {
        Share::Tail { offset: offset() }
    } else {
        Share::None
    };
    Ok((share, threads_used))
}

/// Splits a closed [`IndexRange`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexRangePartitioner;

impl DomainPartitioner<IndexRange> for IndexRangePartitioner {
    fn partition_domain(
        &self,
        thread_id: usize,
        requested: usize,
        complete: &IndexRange,
    ) -> DomainResult<Partition<IndexRange>> {
        let (share, threads_used) = share_of(thread_id, requested, complete.element_count()?)?;
        let sub_domain = match share {
            Share::Chunk { offset, len } => complete.sub_range(offset, len),
            Share::Tail { offset } => complete.tail(offset),
            Share::None => IndexRange::EMPTY,
        };
        Ok(Partition {
            sub_domain,
            threads_used,
        })
    }
}

/// Splits the offset range of an [`IndexedContainerDomain`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexedContainerPartitioner;

impl<'a, T: Sync> DomainPartitioner<IndexedContainerDomain<'a, T>> for IndexedContainerPartitioner {
    fn partition_domain(
        &self,
        thread_id: usize,
        requested: usize,
        complete: &IndexedContainerDomain<'a, T>,
    ) -> DomainResult<Partition<IndexedContainerDomain<'a, T>>> {
        let Partition {
            sub_domain,
            threads_used,
        } = IndexRangePartitioner.partition_domain(thread_id, requested, &complete.range())?;
        Ok(Partition {
            sub_domain: complete.with_range(sub_domain),
            threads_used,
        })
    }
}

/// Splits an [`IteratorRange`] by walking it.
///
/// Counting and locating the split point both step the cursor, so each call
/// costs O(n) in the length of the range.
#[derive(Debug, Clone, Copy, Default)]
pub struct IteratorRangePartitioner;

impl<C: ForwardCursor> DomainPartitioner<IteratorRange<C>> for IteratorRangePartitioner {
    fn partition_domain(
        &self,
        thread_id: usize,
        requested: usize,
        complete: &IteratorRange<C>,
    ) -> DomainResult<Partition<IteratorRange<C>>> {
        let (share, threads_used) = share_of(thread_id, requested, complete.element_count()?)?;
        let sub_domain = match share {
            Share::Chunk { offset, len } => complete.sub_range(offset, len),
            Share::Tail { offset } => complete.tail(offset),
            Share::None => complete.empty(),
        };
        Ok(Partition {
            sub_domain,
            threads_used,
        })
    }
}

/// Splits an [`ImageRegion`] along a single axis: the outermost one with an
/// extent above one.
///
/// Because axis 0 is fastest in memory, each piece is a contiguous run of a
/// buffer laid out over the complete region.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionPartitioner;

impl RegionPartitioner {
    /// Axis the region is cut along, or `None` if every extent is one.
    pub fn split_axis(region: &ImageRegion) -> Option<usize> {
        (0..region.dimension()).rev().find(|&axis| region.size()[axis] > 1)
    }

    /// Number of pieces a split into `requested` threads produces.
    pub fn number_of_splits(region: &ImageRegion, requested: usize) -> DomainResult<usize> {
        if region.is_empty() || requested == 0 {
            return Err(DomainError::InvalidDomain {
                count: region.number_of_pixels(),
                requested,
            });
        }
        match Self::split_axis(region) {
            Some(axis) => split_counts(region.size()[axis], requested).map(|(_, used)| used),
            None => Ok(1),
        }
    }
}

impl DomainPartitioner<ImageRegion> for RegionPartitioner {
    fn partition_domain(
        &self,
        thread_id: usize,
        requested: usize,
        complete: &ImageRegion,
    ) -> DomainResult<Partition<ImageRegion>> {
        if complete.is_empty() || requested == 0 {
            return Err(DomainError::InvalidDomain {
                count: complete.number_of_pixels(),
                requested,
            });
        }

        let Some(axis) = Self::split_axis(complete) else {
            let sub_domain = if thread_id == 0 {
                complete.clone()
            } else {
                complete.empty_at()
            };
            return Ok(Partition {
                sub_domain,
                threads_used: 1,
            });
        };

        let extent = complete.size()[axis];
        let (share, threads_used) = share_of(thread_id, requested, extent)?;
        let sub_domain = match share {
            Share::Chunk { offset, len } => complete.slab(axis, offset, len),
            Share::Tail { offset } => complete.slab(axis, offset, extent - offset),
            Share::None => complete.empty_at(),
        };
        Ok(Partition {
            sub_domain,
            threads_used,
        })
    }
}
