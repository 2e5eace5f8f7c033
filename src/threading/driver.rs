//! Fork/join execution of partitioned domains.
//!
//! The driver asks a partitioner how many threads carry work, hands each of
//! them its own sub-domain on a shared rayon pool and blocks until all of
//! them return. Failures are collected per thread: every worker runs to
//! completion and the error of the lowest failing thread id is reported.

use crate::core::config::{GlobalThreadSettings, ThreadingConfig};
use crate::core::error::{ComputationResult, ThreadingError};
use crate::core::region::ImageRegion;
use crate::core::sync::SingletonCell;
use crate::threading::domain::Domain;
use crate::threading::partitioner::{DomainPartitioner, RegionPartitioner};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

static GLOBAL_DRIVER: SingletonCell<ParallelDriver> = SingletonCell::new();

/// How a parallel call was split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Threads asked for, after clamping.
    pub threads_requested: usize,
    /// Threads that received a non-empty sub-domain.
    pub threads_used: usize,
}

/// One worker's share of a parallel call.
#[derive(Debug)]
pub struct WorkItem<'a, D, S> {
    pub thread_id: usize,
    pub sub_domain: D,
    /// Per-thread state, handed back to the caller after the join.
    pub scratch: &'a mut S,
}

/// One worker's share of an image buffer.
#[derive(Debug)]
pub struct RegionChunk<'a, P> {
    pub thread_id: usize,
    /// Sub-region covered by `pixels`.
    pub region: ImageRegion,
    /// Pixels of `region`, axis 0 fastest.
    pub pixels: &'a mut [P],
}

/// Runs partitioned work on a worker pool.
#[derive(Debug, Clone)]
pub struct ParallelDriver {
    pool: Arc<rayon::ThreadPool>,
    config: ThreadingConfig,
}

impl ParallelDriver {
    /// Build a driver with its own pool of `config.default_threads` workers.
    pub fn new(config: ThreadingConfig) -> Result<Self, ThreadingError> {
        config
            .validate()
            .map_err(|e| ThreadingError::PoolBuild(e.to_string()))?;

        let prefix = config.thread_name_prefix.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.default_threads)
            .thread_name(move |index| format!("{}-{}", prefix, index))
            .build()
            .map_err(|e| ThreadingError::PoolBuild(e.to_string()))?;

        debug!(
            "Built worker pool with {} thread(s), max {}",
            config.default_threads, config.max_threads
        );
        Ok(Self {
            pool: Arc::new(pool),
            config,
        })
    }

    /// The process-wide driver, built from [`GlobalThreadSettings`] on first
    /// use.
    pub fn global() -> Result<Arc<Self>, ThreadingError> {
        GLOBAL_DRIVER.get_or_try_init(|| Self::new((*GlobalThreadSettings::get()).clone()))
    }

    pub fn config(&self) -> &ThreadingConfig {
        &self.config
    }

    /// Default number of threads work is split into.
    pub fn number_of_threads(&self) -> usize {
        self.config.default_threads
    }

    /// Clamp a request to `[1, max_threads]`.
    pub fn clamp_threads(&self, requested: usize) -> usize {
        self.config.clamp(requested)
    }

    /// Thread count for an optional per-node override.
    pub fn threads_for(&self, requested: Option<usize>) -> usize {
        self.clamp_threads(requested.unwrap_or(self.config.default_threads))
    }

    /// Split `domain` and call `callback(thread_id, sub_domain)` once per
    /// used thread.
    pub fn run_parallel<D, P, F>(
        &self,
        partitioner: &P,
        domain: &D,
        requested: usize,
        callback: F,
    ) -> Result<RunSummary, ThreadingError>
    where
        D: Domain,
        P: DomainPartitioner<D> + ?Sized,
        F: Fn(usize, D) -> ComputationResult<()> + Sync,
    {
        let (summary, _) = self.run_parallel_with_scratch(
            partitioner,
            domain,
            requested,
            |_| (),
            |item| callback(item.thread_id, item.sub_domain),
        )?;
        Ok(summary)
    }

    /// Like [`run_parallel`](Self::run_parallel) with per-thread scratch
    /// state made by `init(thread_id)`, returned in thread order.
    pub fn run_parallel_with_scratch<D, P, S, I, F>(
        &self,
        partitioner: &P,
        domain: &D,
        requested: usize,
        init: I,
        callback: F,
    ) -> Result<(RunSummary, Vec<S>), ThreadingError>
    where
        D: Domain,
        P: DomainPartitioner<D> + ?Sized,
        S: Send,
        I: Fn(usize) -> S,
        F: Fn(WorkItem<'_, D, S>) -> ComputationResult<()> + Sync,
    {
        let threads_requested = self.clamp_threads(requested);
        let first = partitioner.partition_domain(0, threads_requested, domain)?;
        let threads_used = first.threads_used;

        let mut sub_domains = Vec::with_capacity(threads_used);
        sub_domains.push(first.sub_domain);
        for thread_id in 1..threads_used {
            let partition = partitioner.partition_domain(thread_id, threads_requested, domain)?;
            sub_domains.push(partition.sub_domain);
        }

        debug!(
            "Splitting domain over {} thread(s), {} used",
            threads_requested, threads_used
        );

        let mut scratches: Vec<S> = (0..threads_used).map(&init).collect();
        let items: Vec<(usize, WorkItem<'_, D, S>)> = sub_domains
            .into_iter()
            .zip(scratches.iter_mut())
            .enumerate()
            .map(|(thread_id, (sub_domain, scratch))| {
                (
                    thread_id,
                    WorkItem {
                        thread_id,
                        sub_domain,
                        scratch,
                    },
                )
            })
            .collect();

        self.dispatch(items, &callback)?;

        Ok((
            RunSummary {
                threads_requested,
                threads_used,
            },
            scratches,
        ))
    }

    /// Split `region` along its outermost axis and hand each worker the
    /// contiguous slice of `buffer` backing its sub-region.
    pub fn run_region_chunks<P, F>(
        &self,
        region: &ImageRegion,
        requested: usize,
        buffer: &mut [P],
        callback: F,
    ) -> Result<RunSummary, ThreadingError>
    where
        P: Send,
        F: Fn(RegionChunk<'_, P>) -> ComputationResult<()> + Sync,
    {
        let expected = region.element_count()?;
        if buffer.len() as u64 != expected {
            return Err(ThreadingError::BufferMismatch {
                expected,
                got: buffer.len(),
            });
        }

        let threads_requested = self.clamp_threads(requested);
        let first = RegionPartitioner.partition_domain(0, threads_requested, region)?;
        let threads_used = first.threads_used;

        let mut chunks = Vec::with_capacity(threads_used);
        let mut rest = buffer;
        for thread_id in 0..threads_used {
            let sub_region = if thread_id == 0 {
                first.sub_domain.clone()
            } else {
                RegionPartitioner
                    .partition_domain(thread_id, threads_requested, region)?
                    .sub_domain
            };
            let len = sub_region.number_of_pixels() as usize;
            let (pixels, tail) = std::mem::take(&mut rest).split_at_mut(len);
            rest = tail;
            chunks.push((
                thread_id,
                RegionChunk {
                    thread_id,
                    region: sub_region,
                    pixels,
                },
            ));
        }

        debug!(
            "Splitting region {} over {} thread(s), {} used",
            region, threads_requested, threads_used
        );
        self.dispatch(chunks, &callback)?;

        Ok(RunSummary {
            threads_requested,
            threads_used,
        })
    }

    /// Run every `(thread_id, task)` pair, inline when there is only one,
    /// and report the first failure in thread order once all have finished.
    fn dispatch<T, F>(&self, tasks: Vec<(usize, T)>, callback: &F) -> Result<(), ThreadingError>
    where
        T: Send,
        F: Fn(T) -> ComputationResult<()> + Sync,
    {
        if tasks.len() == 1 {
            return match tasks.into_iter().next() {
                Some((thread_id, task)) => run_guarded(thread_id, || callback(task)),
                None => Ok(()),
            };
        }

        let mut outcomes: Vec<Result<(), ThreadingError>> = tasks.iter().map(|_| Ok(())).collect();
        self.pool.scope(|scope| {
            for ((thread_id, task), outcome) in tasks.into_iter().zip(outcomes.iter_mut()) {
                scope.spawn(move |_| {
                    trace!("Worker {} started", thread_id);
                    *outcome = run_guarded(thread_id, || callback(task));
                });
            }
        });

        let mut failures = outcomes.into_iter().filter_map(Result::err);
        match failures.next() {
            Some(first) => {
                let others = failures.count();
                if others > 0 {
                    warn!("{} more worker(s) failed after the first", others);
                }
                Err(first)
            }
            None => Ok(()),
        }
    }
}

fn run_guarded<F>(thread_id: usize, work: F) -> Result<(), ThreadingError>
where
    F: FnOnce() -> ComputationResult<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(ThreadingError::Worker {
            thread_id,
            source: Box::new(source),
        }),
        Err(payload) => Err(ThreadingError::WorkerPanicked {
            thread_id,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Work expressed as before / per-thread / after hooks over one domain.
///
/// [`execute`](Self::execute) partitions the domain, calls
/// `before_threaded_execution` with the number of threads that will run,
/// runs `threaded_execution` on each of them with its own scratch, then
/// hands every scratch to `after_threaded_execution` on the calling thread.
pub trait DomainThreader: Sync {
    type Domain: Domain;
    type Partitioner: DomainPartitioner<Self::Domain>;
    type Scratch: Send;

    fn partitioner(&self) -> Self::Partitioner;

    fn before_threaded_execution(&mut self, _threads_used: usize) -> ComputationResult<()> {
        Ok(())
    }

    fn make_scratch(&self, thread_id: usize) -> Self::Scratch;

    fn threaded_execution(
        &self,
        item: WorkItem<'_, Self::Domain, Self::Scratch>,
    ) -> ComputationResult<()>;

    fn after_threaded_execution(&mut self, _scratches: Vec<Self::Scratch>) -> ComputationResult<()> {
        Ok(())
    }

    fn execute(
        &mut self,
        driver: &ParallelDriver,
        domain: &Self::Domain,
        requested: usize,
    ) -> ComputationResult<RunSummary> {
        let partitioner = self.partitioner();
        let threads = driver.clamp_threads(requested);
        let threads_used = partitioner
            .partition_domain(0, threads, domain)?
            .threads_used;
        self.before_threaded_execution(threads_used)?;

        let this = &*self;
        let (summary, scratches) = driver.run_parallel_with_scratch(
            &partitioner,
            domain,
            threads,
            |thread_id| this.make_scratch(thread_id),
            |item| this.threaded_execution(item),
        )?;

        self.after_threaded_execution(scratches)?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ComputationError;
    use crate::threading::domain::{IndexRange, IndexedContainerDomain};
    use crate::threading::partitioner::{IndexRangePartitioner, IndexedContainerPartitioner};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn driver(threads: usize) -> ParallelDriver {
        ParallelDriver::new(
            ThreadingConfig::new()
                .with_max_threads(16)
                .with_default_threads(threads)
                .with_thread_name_prefix("driver-test"),
        )
        .unwrap()
    }

    #[test]
    fn test_run_parallel_visits_every_index() {
        let driver = driver(4);
        let sum = AtomicU64::new(0);
        let summary = driver
            .run_parallel(&IndexRangePartitioner, &IndexRange::new(1, 100), 4, |_, range| {
                let partial: i64 = range.iter().sum();
                sum.fetch_add(partial as u64, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert_eq!(sum.load(Ordering::SeqCst), 5050);
        assert_eq!(
            summary,
            RunSummary {
                threads_requested: 4,
                threads_used: 4
            }
        );
    }

    #[test]
    fn test_single_thread_runs_inline() {
        let driver = driver(2);
        let caller = thread::current().id();
        driver
            .run_parallel(&IndexRangePartitioner, &IndexRange::new(0, 0), 8, |t, _| {
                assert_eq!(t, 0);
                assert_eq!(thread::current().id(), caller);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_requested_threads_are_clamped() {
        let driver = driver(2);
        let summary = driver
            .run_parallel(&IndexRangePartitioner, &IndexRange::new(0, 999), 500, |_, _| Ok(()))
            .unwrap();
        assert_eq!(summary.threads_requested, 16);
        assert_eq!(summary.threads_used, 16);
    }

    #[test]
    fn test_failure_reported_after_all_workers_finish() {
        let driver = driver(4);
        let finished = AtomicUsize::new(0);
        let result = driver.run_parallel(
            &IndexRangePartitioner,
            &IndexRange::new(0, 7),
            4,
            |thread_id, _| {
                if thread_id == 1 {
                    return Err(ComputationError::failed("bad chunk"));
                }
                thread::sleep(Duration::from_millis(10));
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );

        assert_eq!(finished.load(Ordering::SeqCst), 3);
        let error = result.unwrap_err();
        assert_eq!(error.thread_id(), Some(1));
        assert!(error.to_string().contains("bad chunk"));
    }

    #[test]
    fn test_lowest_failing_thread_wins() {
        let driver = driver(4);
        let error = driver
            .run_parallel(&IndexRangePartitioner, &IndexRange::new(0, 7), 4, |thread_id, _| {
                if thread_id == 3 {
                    Err(ComputationError::failed("three"))
                } else if thread_id == 2 {
                    thread::sleep(Duration::from_millis(20));
                    Err(ComputationError::failed("two"))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert_eq!(error.thread_id(), Some(2));
    }

    #[test]
    fn test_panic_is_captured() {
        let driver = driver(2);
        let error = driver
            .run_parallel(&IndexRangePartitioner, &IndexRange::new(0, 3), 2, |thread_id, _| {
                if thread_id == 1 {
                    panic!("worker exploded");
                }
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(
            error,
            ThreadingError::WorkerPanicked { thread_id: 1, ref message } if message == "worker exploded"
        ));
    }

    #[test]
    fn test_invalid_domain_is_reported() {
        let driver = driver(2);
        let result = driver.run_parallel(&IndexRangePartitioner, &IndexRange::EMPTY, 2, |_, _| Ok(()));
        assert!(matches!(result, Err(ThreadingError::Domain(_))));
    }

    #[test]
    fn test_scratch_reduction() {
        let driver = driver(3);
        let data: Vec<u32> = (1..=10).collect();
        let domain = IndexedContainerDomain::whole(&data);
        let (summary, partials) = driver
            .run_parallel_with_scratch(
                &IndexedContainerPartitioner,
                &domain,
                3,
                |_| 0u32,
                |item| {
                    *item.scratch = item.sub_domain.items().iter().sum();
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(summary.threads_used, 3);
        assert_eq!(partials, vec![10, 26, 19]);
    }

    #[test]
    fn test_region_chunks_cover_buffer() {
        let driver = driver(4);
        let region = ImageRegion::new(vec![0, 0], vec![3, 5]);
        let mut buffer = vec![usize::MAX; 15];
        let summary = driver
            .run_region_chunks(&region, 4, &mut buffer, |chunk| {
                assert_eq!(chunk.pixels.len() as u64, chunk.region.number_of_pixels());
                chunk.pixels.fill(chunk.thread_id);
                Ok(())
            })
            .unwrap();
        assert_eq!(summary.threads_used, 3);
        assert_eq!(
            buffer,
            vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 2, 2, 2]
        );
    }

    #[test]
    fn test_region_chunks_buffer_mismatch() {
        let driver = driver(2);
        let mut buffer = vec![0u8; 3];
        let result = driver.run_region_chunks(&ImageRegion::from_size(vec![2, 2]), 2, &mut buffer, |_| Ok(()));
        assert!(matches!(
            result,
            Err(ThreadingError::BufferMismatch { expected: 4, got: 3 })
        ));
    }

    struct Histogram<'a> {
        values: &'a [u8],
        bins: [u64; 4],
        threads_seen: usize,
    }

    impl<'a> DomainThreader for Histogram<'a> {
        type Domain = IndexRange;
        type Partitioner = IndexRangePartitioner;
        type Scratch = [u64; 4];

        fn partitioner(&self) -> IndexRangePartitioner {
            IndexRangePartitioner
        }

        fn before_threaded_execution(&mut self, threads_used: usize) -> ComputationResult<()> {
            self.threads_seen = threads_used;
            Ok(())
        }

        fn make_scratch(&self, _thread_id: usize) -> [u64; 4] {
            [0; 4]
        }

        fn threaded_execution(&self, item: WorkItem<'_, IndexRange, [u64; 4]>) -> ComputationResult<()> {
            for i in item.sub_domain.iter() {
                item.scratch[(self.values[i as usize] % 4) as usize] += 1;
            }
            Ok(())
        }

        fn after_threaded_execution(&mut self, scratches: Vec<[u64; 4]>) -> ComputationResult<()> {
            for scratch in scratches {
                for (bin, count) in self.bins.iter_mut().zip(scratch) {
                    *bin += count;
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_domain_threader_hooks() {
        let values: Vec<u8> = (0..40).collect();
        let mut histogram = Histogram {
            values: &values,
            bins: [0; 4],
            threads_seen: 0,
        };
        let summary = histogram
            .execute(&driver(4), &IndexRange::with_len(values.len() as u64), 4)
            .unwrap();
        assert_eq!(histogram.threads_seen, summary.threads_used);
        assert_eq!(histogram.bins, [10, 10, 10, 10]);
    }
}
