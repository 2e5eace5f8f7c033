//! Splitting work across threads.
//!
//! - [`domain`]: what can be split (index ranges, container ranges,
//!   cursor ranges, image regions)
//! - [`partitioner`]: how a domain is cut into per-thread pieces
//! - [`driver`]: running the pieces on a worker pool and joining them

pub mod domain;
pub mod driver;
pub mod partitioner;

pub use domain::{Domain, ForwardCursor, IndexRange, IndexedContainerDomain, IteratorRange, SliceCursor};
pub use driver::{DomainThreader, ParallelDriver, RegionChunk, RunSummary, WorkItem};
pub use partitioner::{
    DomainPartitioner, IndexRangePartitioner, IndexedContainerPartitioner, IteratorRangePartitioner,
    Partition, RegionPartitioner,
};
