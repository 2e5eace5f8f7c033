//! Pixel-wise arithmetic between images.

use super::copy_output_region_to_inputs;
use crate::core::context::{GenerateContext, Inputs};
use crate::core::data::{DataObject, Image};
use crate::core::error::{ComputationError, ComputationResult};
use crate::core::node::{
    Category, Filter, InputRegionRequest, NodeMetadata, RegionEnlargeable, ThreadedComputable,
};
use crate::core::types::Pixel;
use crate::execution::progress::ProgressReporter;
use crate::filters::registry::FilterRegistry;
use crate::threading::driver::RegionChunk;
use std::marker::PhantomData;

/// Register arithmetic nodes.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(Add::<f32>::default()));
}

/// Sum of two images over the same grid.
#[derive(Debug, Clone)]
pub struct Add<P> {
    _pixel: PhantomData<fn() -> P>,
}

impl<P> Default for Add<P> {
    fn default() -> Self {
        Self {
            _pixel: PhantomData,
        }
    }
}

impl<P: Pixel> RegionEnlargeable for Add<P> {
    fn generate_input_requested_region(
        &self,
        outputs: &[Box<dyn DataObject>],
        inputs: &mut [Option<InputRegionRequest>],
    ) {
        copy_output_region_to_inputs(outputs, inputs);
    }
}

impl<P: Pixel> Filter for Add<P> {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("add", "Add")
            .description("Add two images (a + b)")
            .category(Category::Arithmetic)
            .input()
            .input()
            .output("sum")
            .build()
    }

    fn make_output(&self, _index: usize) -> Box<dyn DataObject> {
        Box::new(Image::<P>::unset())
    }

    /// Both inputs must cover the same largest possible region.
    fn verify_input_information(&self, inputs: &Inputs<'_>) -> ComputationResult<()> {
        if let (Some(a), Some(b)) = (inputs.get(0), inputs.get(1)) {
            if let (Some(a), Some(b)) = (a.regions(), b.regions()) {
                if a.largest_possible != b.largest_possible {
                    return Err(ComputationError::RegionMismatch {
                        left: a.largest_possible.clone(),
                        right: b.largest_possible.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn generate_data(&mut self, ctx: &mut GenerateContext<'_>) -> ComputationResult<()> {
        ctx.threaded_generate::<P, _>(self, 0)?;
        Ok(())
    }
}

impl<P: Pixel> ThreadedComputable<P> for Add<P> {
    fn threaded_generate_data(
        &self,
        inputs: &Inputs<'_>,
        chunk: RegionChunk<'_, P>,
        progress: &ProgressReporter,
    ) -> ComputationResult<()> {
        let a = inputs.image::<P>(0)?;
        let b = inputs.image::<P>(1)?;
        for input in [a, b] {
            if !chunk.region.is_inside(input.buffered_region()) {
                return Err(ComputationError::RegionMismatch {
                    left: chunk.region.clone(),
                    right: input.buffered_region().clone(),
                });
            }
        }

        for (pixel, index) in chunk.pixels.iter_mut().zip(chunk.region.indices()) {
            let sum = a.get(&index).unwrap_or_default().to_f64() + b.get(&index).unwrap_or_default().to_f64();
            *pixel = P::from_f64(sum);
        }
        progress.completed_pixels(chunk.thread_id, chunk.pixels.len() as u64)
    }
}
