//! Filters reading a neighborhood around each pixel.

use super::{assign, size_value};
use crate::core::context::{GenerateContext, Inputs};
use crate::core::data::{DataObject, Image};
use crate::core::error::{ComputationError, ComputationResult, ParameterError};
use crate::core::node::{
    Category, Filter, InputRegionRequest, NodeMetadata, ParameterDefinition, RegionEnlargeable,
    ThreadedComputable,
};
use crate::core::region::ImageRegion;
use crate::core::types::{Pixel, Value};
use crate::execution::progress::ProgressReporter;
use crate::filters::registry::FilterRegistry;
use crate::threading::driver::RegionChunk;
use std::marker::PhantomData;

/// Register neighborhood nodes.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(BoxMean::<f32>::default()));
}

/// Mean over a box of `2 * radius + 1` pixels per axis.
///
/// Near the image border only the pixels inside the image are averaged.
#[derive(Debug, Clone)]
pub struct BoxMean<P> {
    radius: Vec<u64>,
    _pixel: PhantomData<fn() -> P>,
}

impl<P> BoxMean<P> {
    /// `radius` is per axis; a shorter list repeats its last entry.
    pub fn new(radius: Vec<u64>) -> Self {
        Self {
            radius,
            _pixel: PhantomData,
        }
    }
}

impl<P> Default for BoxMean<P> {
    fn default() -> Self {
        Self::new(vec![1])
    }
}

impl<P: Pixel> RegionEnlargeable for BoxMean<P> {
    fn generate_input_requested_region(
        &self,
        outputs: &[Box<dyn DataObject>],
        inputs: &mut [Option<InputRegionRequest>],
    ) {
        let Some(requested) = outputs
            .first()
            .and_then(|output| output.regions())
            .map(|regions| regions.requested.clone())
        else {
            return;
        };

        for request in inputs.iter_mut().flatten() {
            let mut region = requested.clone();
            region.pad_by_radius(&self.radius);
            // Without overlap the padded region is kept, and the producer
            // rejects it as lying outside its largest possible region.
            region.crop(&request.largest_possible);
            request.requested = region;
        }
    }
}

impl<P: Pixel> Filter for BoxMean<P> {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("box_mean", "Box Mean")
            .description("Average over a rectangular neighborhood")
            .category(Category::Neighborhood)
            .input()
            .output("output")
            .parameter(
                ParameterDefinition::new("radius", Value::Size(vec![1]))
                    .with_description("Neighborhood radius per axis"),
            )
            .build()
    }

    fn make_output(&self, _index: usize) -> Box<dyn DataObject> {
        Box::new(Image::<P>::unset())
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<bool, ParameterError> {
        match name {
            "radius" => Ok(assign(&mut self.radius, size_value(name, value)?)),
            _ => Err(ParameterError::Unknown(name.to_string())),
        }
    }

    fn parameter(&self, name: &str) -> Option<Value> {
        match name {
            "radius" => Some(Value::Size(self.radius.clone())),
            _ => None,
        }
    }

    fn generate_data(&mut self, ctx: &mut GenerateContext<'_>) -> ComputationResult<()> {
        ctx.threaded_generate::<P, _>(self, 0)?;
        Ok(())
    }
}

impl<P: Pixel> ThreadedComputable<P> for BoxMean<P> {
    fn threaded_generate_data(
        &self,
        inputs: &Inputs<'_>,
        chunk: RegionChunk<'_, P>,
        progress: &ProgressReporter,
    ) -> ComputationResult<()> {
        let input = inputs.image::<P>(0)?;
        let available = input.buffered_region();
        if !chunk.region.is_inside(available) {
            return Err(ComputationError::RegionMismatch {
                left: chunk.region,
                right: available.clone(),
            });
        }

        let ones = vec![1; chunk.region.dimension()];
        for (pixel, index) in chunk.pixels.iter_mut().zip(chunk.region.indices()) {
            let mut window = ImageRegion::new(index, ones.clone());
            window.pad_by_radius(&self.radius);
            window.crop(input.largest_possible_region());
            window.crop(available);

            let mut sum = 0.0;
            let mut count = 0u64;
            for neighbor in window.indices() {
                if let Some(value) = input.get(&neighbor) {
                    sum += value.to_f64();
                    count += 1;
                }
            }
            *pixel = P::from_f64(if count > 0 { sum / count as f64 } else { 0.0 });
        }
        progress.completed_pixels(chunk.thread_id, chunk.pixels.len() as u64)
    }
}
