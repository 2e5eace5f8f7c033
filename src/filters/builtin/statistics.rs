//! Reductions of an image to summary values.

use crate::core::context::GenerateContext;
use crate::core::data::{DataObject, Decorated, Image};
use crate::core::error::ComputationResult;
use crate::core::node::{Category, Filter, NodeMetadata, RegionEnlargeable};
use crate::core::region::ImageRegion;
use crate::core::types::Pixel;
use crate::execution::progress::ProgressReporter;
use crate::filters::registry::FilterRegistry;
use crate::threading::driver::{DomainThreader, WorkItem};
use crate::threading::partitioner::RegionPartitioner;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Register statistics nodes.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(Statistics::<f32>::default()));
}

/// Summary of an image's pixel values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageStatistics {
    pub count: u64,
    pub minimum: f64,
    pub maximum: f64,
    pub sum: f64,
    pub mean: f64,
    /// Population variance.
    pub variance: f64,
}

impl ImageStatistics {
    pub fn sigma(&self) -> f64 {
        self.variance.sqrt()
    }
}

/// Per-thread running moments (Welford), merged pairwise across threads.
#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: u64,
    sum: f64,
    mean: f64,
    /// Sum of squared deviations from `mean`.
    m2: f64,
    minimum: f64,
    maximum: f64,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            mean: 0.0,
            m2: 0.0,
            minimum: f64::INFINITY,
            maximum: f64::NEG_INFINITY,
        }
    }
}

impl Accumulator {
    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.minimum = self.minimum.min(value);
        self.maximum = self.maximum.max(value);
    }

    fn merge(&mut self, other: &Accumulator) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let count = self.count + other.count;
        let (left, right, total) = (self.count as f64, other.count as f64, count as f64);
        let delta = other.mean - self.mean;
        self.mean += delta * right / total;
        self.m2 += other.m2 + delta * delta * left * right / total;
        self.count = count;
        self.sum += other.sum;
        self.minimum = self.minimum.min(other.minimum);
        self.maximum = self.maximum.max(other.maximum);
    }

    fn finish(&self) -> ImageStatistics {
        if self.count == 0 {
            return ImageStatistics::default();
        }
        ImageStatistics {
            count: self.count,
            minimum: self.minimum,
            maximum: self.maximum,
            sum: self.sum,
            mean: self.mean,
            variance: (self.m2 / self.count as f64).max(0.0),
        }
    }
}

/// Reduction of one image over the region it buffers.
struct StatisticsThreader<'a, P: Pixel> {
    image: &'a Image<P>,
    progress: &'a ProgressReporter,
    total: Accumulator,
}

impl<'a, P: Pixel> DomainThreader for StatisticsThreader<'a, P> {
    type Domain = ImageRegion;
    type Partitioner = RegionPartitioner;
    type Scratch = Accumulator;

    fn partitioner(&self) -> RegionPartitioner {
        RegionPartitioner
    }

    fn make_scratch(&self, _thread_id: usize) -> Accumulator {
        Accumulator::default()
    }

    fn threaded_execution(&self, item: WorkItem<'_, ImageRegion, Accumulator>) -> ComputationResult<()> {
        for index in item.sub_domain.indices() {
            if let Some(value) = self.image.get(&index) {
                item.scratch.add(value.to_f64());
            }
        }
        self.progress
            .completed_pixels(item.thread_id, item.sub_domain.number_of_pixels())
    }

    fn after_threaded_execution(&mut self, scratches: Vec<Accumulator>) -> ComputationResult<()> {
        for scratch in &scratches {
            self.total.merge(scratch);
        }
        Ok(())
    }
}

/// Minimum, maximum, mean and variance of its input.
#[derive(Debug, Clone)]
pub struct Statistics<P> {
    _pixel: PhantomData<fn() -> P>,
}

impl<P> Default for Statistics<P> {
    fn default() -> Self {
        Self {
            _pixel: PhantomData,
        }
    }
}

impl<P: Pixel> RegionEnlargeable for Statistics<P> {}

impl<P: Pixel> Filter for Statistics<P> {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("statistics", "Statistics")
            .description("Minimum, maximum, mean and variance of an image")
            .category(Category::Statistics)
            .input()
            .output("statistics")
            .build()
    }

    fn make_output(&self, _index: usize) -> Box<dyn DataObject> {
        Box::new(Decorated::<ImageStatistics>::empty())
    }

    fn generate_data(&mut self, ctx: &mut GenerateContext<'_>) -> ComputationResult<()> {
        let image = ctx.input_image::<P>(0)?;
        let region = image.buffered_region().clone();

        let statistics = if region.is_empty() {
            ImageStatistics::default()
        } else {
            ctx.progress().reset(region.number_of_pixels());
            let mut threader = StatisticsThreader {
                image,
                progress: ctx.progress(),
                total: Accumulator::default(),
            };
            threader.execute(ctx.driver(), &region, ctx.threads())?;
            threader.total.finish()
        };

        ctx.set_output_value(0, statistics)
    }
}
