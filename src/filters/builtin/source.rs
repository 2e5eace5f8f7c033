//! Image sources.

use super::{assign, float_value, size_value};
use crate::core::context::{GenerateContext, Inputs};
use crate::core::data::{DataObject, Image};
use crate::core::error::{ComputationError, ComputationResult, ParameterError};
use crate::core::node::{
    Category, Filter, NodeMetadata, NodeMetadataBuilder, ParameterDefinition, RegionEnlargeable,
    ThreadedComputable,
};
use crate::core::region::ImageRegion;
use crate::core::types::Value;
use crate::execution::progress::ProgressReporter;
use crate::filters::registry::FilterRegistry;
use crate::threading::driver::RegionChunk;

/// Register source nodes.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(ConstantSource::default()));
    registry.register(|| Box::new(GradientSource::default()));
}

/// Extent and origin of a generated image.
#[derive(Debug, Clone, PartialEq)]
struct Geometry {
    size: Vec<u64>,
    origin: Vec<i64>,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            size: vec![64, 64],
            origin: vec![0, 0],
        }
    }
}

impl Geometry {
    fn describe(builder: NodeMetadataBuilder) -> NodeMetadataBuilder {
        let defaults = Self::default();
        builder
            .parameter(
                ParameterDefinition::new("size", Value::Size(defaults.size))
                    .with_description("Extent per dimension"),
            )
            .parameter(
                ParameterDefinition::new("origin", Value::Index(defaults.origin))
                    .with_description("Index of the first pixel; missing axes start at 0"),
            )
    }

    /// `Ok(None)` when `name` is not a geometry parameter.
    fn set(&mut self, name: &str, value: &Value) -> Result<Option<bool>, ParameterError> {
        match name {
            "size" => Ok(Some(assign(&mut self.size, size_value(name, value)?))),
            "origin" => {
                let origin = value
                    .as_index()
                    .ok_or_else(|| ParameterError::invalid(format!("origin expects an index, got {}", value)))?;
                Ok(Some(assign(&mut self.origin, origin)))
            }
            _ => Ok(None),
        }
    }

    fn get(&self, name: &str) -> Option<Value> {
        match name {
            "size" => Some(Value::Size(self.size.clone())),
            "origin" => Some(Value::Index(self.origin.clone())),
            _ => None,
        }
    }

    fn region(&self) -> ImageRegion {
        let index = (0..self.size.len())
            .map(|axis| self.origin.get(axis).copied().unwrap_or(0))
            .collect();
        ImageRegion::new(index, self.size.clone())
    }

    fn write_information(&self, outputs: &mut [Box<dyn DataObject>]) -> ComputationResult<()> {
        let output = outputs
            .first_mut()
            .and_then(|output| output.regions_mut())
            .ok_or(ComputationError::MissingOutput { index: 0 })?;
        output.largest_possible = self.region();
        Ok(())
    }
}

// ============================================================================
// Constant
// ============================================================================

/// An `f32` image with the same value everywhere.
#[derive(Debug, Clone, Default)]
pub struct ConstantSource {
    geometry: Geometry,
    value: f64,
}

impl ConstantSource {
    pub fn new(size: Vec<u64>, value: f64) -> Self {
        Self {
            geometry: Geometry {
                origin: vec![0; size.len()],
                size,
            },
            value,
        }
    }
}

impl RegionEnlargeable for ConstantSource {}

impl Filter for ConstantSource {
    fn metadata(&self) -> NodeMetadata {
        let builder = NodeMetadata::builder("constant_source", "Constant Source")
            .description("Image filled with a single value")
            .category(Category::Source)
            .output("output");
        Geometry::describe(builder)
            .parameter(ParameterDefinition::new("value", Value::Float(0.0)).with_description("Pixel value"))
            .build()
    }

    fn make_output(&self, _index: usize) -> Box<dyn DataObject> {
        Box::new(Image::<f32>::unset())
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<bool, ParameterError> {
        if let Some(changed) = self.geometry.set(name, value)? {
            return Ok(changed);
        }
        match name {
            "value" => Ok(assign(&mut self.value, float_value(name, value)?)),
            _ => Err(ParameterError::Unknown(name.to_string())),
        }
    }

    fn parameter(&self, name: &str) -> Option<Value> {
        match name {
            "value" => Some(Value::Float(self.value)),
            _ => self.geometry.get(name),
        }
    }

    fn generate_output_information(
        &mut self,
        _inputs: &Inputs<'_>,
        outputs: &mut [Box<dyn DataObject>],
    ) -> ComputationResult<()> {
        self.geometry.write_information(outputs)
    }

    fn generate_data(&mut self, ctx: &mut GenerateContext<'_>) -> ComputationResult<()> {
        ctx.threaded_generate::<f32, _>(self, 0)?;
        Ok(())
    }
}

impl ThreadedComputable<f32> for ConstantSource {
    fn threaded_generate_data(
        &self,
        _inputs: &Inputs<'_>,
        chunk: RegionChunk<'_, f32>,
        progress: &ProgressReporter,
    ) -> ComputationResult<()> {
        chunk.pixels.fill(self.value as f32);
        progress.completed_pixels(chunk.thread_id, chunk.pixels.len() as u64)
    }
}

// ============================================================================
// Gradient
// ============================================================================

/// An `f32` ramp along one axis: `offset + step * index[axis]`.
#[derive(Debug, Clone)]
pub struct GradientSource {
    geometry: Geometry,
    axis: usize,
    step: f64,
    offset: f64,
}

impl Default for GradientSource {
    fn default() -> Self {
        Self {
            geometry: Geometry::default(),
            axis: 0,
            step: 1.0,
            offset: 0.0,
        }
    }
}

impl RegionEnlargeable for GradientSource {}

impl Filter for GradientSource {
    fn metadata(&self) -> NodeMetadata {
        let builder = NodeMetadata::builder("gradient_source", "Gradient Source")
            .description("Linear ramp along one axis")
            .category(Category::Source)
            .output("output");
        Geometry::describe(builder)
            .parameter(ParameterDefinition::new("axis", Value::Integer(0)).with_description("Axis the ramp runs along"))
            .parameter(ParameterDefinition::new("step", Value::Float(1.0)).with_description("Increment per pixel"))
            .parameter(ParameterDefinition::new("offset", Value::Float(0.0)).with_description("Value at index 0"))
            .build()
    }

    fn make_output(&self, _index: usize) -> Box<dyn DataObject> {
        Box::new(Image::<f32>::unset())
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<bool, ParameterError> {
        if let Some(changed) = self.geometry.set(name, value)? {
            return Ok(changed);
        }
        match name {
            "axis" => {
                let axis = value
                    .as_integer()
                    .and_then(|axis| usize::try_from(axis).ok())
                    .ok_or_else(|| ParameterError::invalid(format!("axis expects a non-negative integer, got {}", value)))?;
                Ok(assign(&mut self.axis, axis))
            }
            "step" => Ok(assign(&mut self.step, float_value(name, value)?)),
            "offset" => Ok(assign(&mut self.offset, float_value(name, value)?)),
            _ => Err(ParameterError::Unknown(name.to_string())),
        }
    }

    fn parameter(&self, name: &str) -> Option<Value> {
        match name {
            "axis" => Some(Value::Integer(self.axis as i64)),
            "step" => Some(Value::Float(self.step)),
            "offset" => Some(Value::Float(self.offset)),
            _ => self.geometry.get(name),
        }
    }

    fn generate_output_information(
        &mut self,
        _inputs: &Inputs<'_>,
        outputs: &mut [Box<dyn DataObject>],
    ) -> ComputationResult<()> {
        if self.axis >= self.geometry.size.len() {
            return Err(ComputationError::failed(format!(
                "gradient axis {} does not exist in a {}-dimensional image",
                self.axis,
                self.geometry.size.len()
            )));
        }
        self.geometry.write_information(outputs)
    }

    fn generate_data(&mut self, ctx: &mut GenerateContext<'_>) -> ComputationResult<()> {
        ctx.threaded_generate::<f32, _>(self, 0)?;
        Ok(())
    }
}

impl ThreadedComputable<f32> for GradientSource {
    fn threaded_generate_data(
        &self,
        _inputs: &Inputs<'_>,
        chunk: RegionChunk<'_, f32>,
        progress: &ProgressReporter,
    ) -> ComputationResult<()> {
        for (pixel, index) in chunk.pixels.iter_mut().zip(chunk.region.indices()) {
            *pixel = (self.offset + self.step * index[self.axis] as f64) as f32;
        }
        progress.completed_pixels(chunk.thread_id, chunk.pixels.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::structure::PipelineGraph;

    #[test]
    fn test_constant_source_parameters() {
        let mut source = ConstantSource::default();
        assert!(source.set_parameter("value", &Value::Float(2.0)).unwrap());
        assert!(!source.set_parameter("value", &Value::Integer(2)).unwrap());
        assert!(source.set_parameter("size", &Value::Size(vec![3, 4, 5])).unwrap());
        assert_eq!(source.geometry.region(), ImageRegion::new(vec![0, 0, 0], vec![3, 4, 5]));
        assert!(matches!(
            source.set_parameter("radius", &Value::Integer(1)),
            Err(ParameterError::Unknown(_))
        ));
        assert!(source.set_parameter("size", &Value::Boolean(true)).is_err());
    }

    #[test]
    fn test_constant_source_fills_region() {
        let mut graph = PipelineGraph::new();
        let id = graph.add_node(Box::new(ConstantSource::new(vec![5, 3], 7.0)));
        graph.update(id).unwrap();

        let image = graph.output_image::<f32>(id, 0).unwrap();
        assert_eq!(image.largest_possible_region(), &ImageRegion::from_size(vec![5, 3]));
        assert_eq!(image.pixels(), &[7.0; 15]);
    }

    #[test]
    fn test_gradient_source() {
        let mut graph = PipelineGraph::new();
        let id = graph.add_node(Box::new(GradientSource::default()));
        graph.set_parameter(id, "size", vec![4u64, 2]).unwrap();
        graph.set_parameter(id, "origin", Value::Index(vec![-1, 0])).unwrap();
        graph.set_parameter(id, "step", 0.5).unwrap();
        graph.update(id).unwrap();

        let image = graph.output_image::<f32>(id, 0).unwrap();
        assert_eq!(image.get(&[-1, 0]), Some(-0.5));
        assert_eq!(image.get(&[2, 1]), Some(1.0));
    }

    #[test]
    fn test_gradient_axis_out_of_range() {
        let mut graph = PipelineGraph::new();
        let id = graph.add_node(Box::new(GradientSource::default()));
        graph.set_parameter(id, "axis", 2i64).unwrap();
        assert!(graph.update(id).is_err());
    }
}
