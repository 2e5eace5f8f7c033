//! Per-pixel intensity mappings.

use super::{assign, copy_output_region_to_inputs, float_value};
use crate::core::context::{GenerateContext, Inputs};
use crate::core::data::{DataObject, Image};
use crate::core::error::{ComputationError, ComputationResult, ParameterError};
use crate::core::node::{
    Category, Filter, InputRegionRequest, NodeMetadata, ParameterDefinition, RegionEnlargeable,
    ThreadedComputable,
};
use crate::core::types::{Pixel, Value};
use crate::execution::progress::ProgressReporter;
use crate::filters::registry::FilterRegistry;
use crate::threading::driver::RegionChunk;
use std::marker::PhantomData;

/// Register intensity nodes.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(ShiftScale::<f32>::default()));
}

/// `(x + shift) * scale` for every pixel, saturating for integer pixels.
#[derive(Debug, Clone)]
pub struct ShiftScale<P> {
    shift: f64,
    scale: f64,
    _pixel: PhantomData<fn() -> P>,
}

impl<P> ShiftScale<P> {
    pub fn new(shift: f64, scale: f64) -> Self {
        Self {
            shift,
            scale,
            _pixel: PhantomData,
        }
    }
}

impl<P> Default for ShiftScale<P> {
    fn default() -> Self {
        Self::new(0.0, 1.0)
    }
}

impl<P: Pixel> RegionEnlargeable for ShiftScale<P> {
    fn generate_input_requested_region(
        &self,
        outputs: &[Box<dyn DataObject>],
        inputs: &mut [Option<InputRegionRequest>],
    ) {
        copy_output_region_to_inputs(outputs, inputs);
    }
}

impl<P: Pixel> Filter for ShiftScale<P> {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("shift_scale", "Shift Scale")
            .description("Shift then scale every pixel")
            .category(Category::Intensity)
            .input()
            .output("output")
            .parameter(ParameterDefinition::new("shift", Value::Float(0.0)).with_description("Added before scaling"))
            .parameter(ParameterDefinition::new("scale", Value::Float(1.0)).with_description("Multiplier"))
            .build()
    }

    fn make_output(&self, _index: usize) -> Box<dyn DataObject> {
        Box::new(Image::<P>::unset())
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<bool, ParameterError> {
        match name {
            "shift" => Ok(assign(&mut self.shift, float_value(name, value)?)),
            "scale" => Ok(assign(&mut self.scale, float_value(name, value)?)),
            _ => Err(ParameterError::Unknown(name.to_string())),
        }
    }

    fn parameter(&self, name: &str) -> Option<Value> {
        match name {
            "shift" => Some(Value::Float(self.shift)),
            "scale" => Some(Value::Float(self.scale)),
            _ => None,
        }
    }

    fn generate_data(&mut self, ctx: &mut GenerateContext<'_>) -> ComputationResult<()> {
        ctx.threaded_generate::<P, _>(self, 0)?;
        Ok(())
    }
}

impl<P: Pixel> ThreadedComputable<P> for ShiftScale<P> {
    fn threaded_generate_data(
        &self,
        inputs: &Inputs<'_>,
        chunk: RegionChunk<'_, P>,
        progress: &ProgressReporter,
    ) -> ComputationResult<()> {
        let input = inputs.image::<P>(0)?;
        if !chunk.region.is_inside(input.buffered_region()) {
            return Err(ComputationError::RegionMismatch {
                left: chunk.region,
                right: input.buffered_region().clone(),
            });
        }

        for (pixel, index) in chunk.pixels.iter_mut().zip(chunk.region.indices()) {
            let value = input.get(&index).unwrap_or_default().to_f64();
            *pixel = P::from_f64((value + self.shift) * self.scale);
        }
        progress.completed_pixels(chunk.thread_id, chunk.pixels.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::region::ImageRegion;
    use crate::filters::builtin::ConstantSource;
    use crate::graph::structure::PipelineGraph;

    #[test]
    fn test_shift_scale_pipeline() {
        let mut graph = PipelineGraph::new();
        let source = graph.add_node(Box::new(ConstantSource::new(vec![6, 4], 100.0)));
        let shift = graph.add_node(Box::new(ShiftScale::<f32>::new(20.0, 2.0)));
        graph.connect(source, 0, shift, 0).unwrap();
        graph.update(shift).unwrap();
        assert_eq!(graph.output_image::<f32>(shift, 0).unwrap().pixels(), &[240.0; 24]);

        // The source produces f32 pixels.
        let cast = graph.add_node(Box::new(ShiftScale::<u8>::new(0.0, 1.0)));
        graph.connect(source, 0, cast, 0).unwrap();
        assert!(graph.update(cast).is_err());
    }

    #[test]
    fn test_shift_scale_saturates() {
        let input = Image::<u8>::from_fn(ImageRegion::from_size(vec![3]), |index| index[0] as u8 * 100);
        let inputs = Inputs::new(vec![Some(&input as &dyn DataObject)]);
        let mut pixels = vec![0u8; 3];
        let chunk = RegionChunk {
            thread_id: 0,
            region: ImageRegion::from_size(vec![3]),
            pixels: &mut pixels,
        };
        let filter = ShiftScale::<u8>::new(-50.0, 3.0);
        filter
            .threaded_generate_data(&inputs, chunk, &ProgressReporter::detached(Default::default()))
            .unwrap();
        assert_eq!(pixels, vec![0, 150, 255]);
    }

    #[test]
    fn test_shift_scale_rejects_short_input() {
        let input = Image::<f32>::new(ImageRegion::from_size(vec![2, 2]));
        let inputs = Inputs::new(vec![Some(&input as &dyn DataObject)]);
        let mut pixels = vec![0.0f32; 6];
        let chunk = RegionChunk {
            thread_id: 0,
            region: ImageRegion::from_size(vec![2, 3]),
            pixels: &mut pixels,
        };
        let filter = ShiftScale::<f32>::default();
        let result = filter.threaded_generate_data(&inputs, chunk, &ProgressReporter::detached(Default::default()));
        assert!(matches!(result, Err(ComputationError::RegionMismatch { .. })));
    }
}
