//! Stochastic filters.

use super::{assign, copy_output_region_to_inputs, float_value};
use crate::core::context::{GenerateContext, Inputs};
use crate::core::data::{DataObject, Image};
use crate::core::error::{ComputationError, ComputationResult, ParameterError};
use crate::core::node::{
    Category, Filter, InputRegionRequest, NodeMetadata, ParameterDefinition, RegionEnlargeable,
    ThreadedComputable,
};
use crate::core::random::{sample_normal, RandomVariateGenerator, DEFAULT_SEED};
use crate::core::types::{Pixel, Value};
use crate::execution::progress::ProgressReporter;
use crate::filters::registry::FilterRegistry;
use crate::threading::driver::RegionChunk;
use std::marker::PhantomData;

/// Register noise nodes.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(|| Box::new(AdditiveGaussianNoise::<f32>::default()));
}

/// Adds normally distributed noise to every pixel.
///
/// Before each run the shared [`RandomVariateGenerator`] is reseeded with
/// `seed`; each worker then draws from its own stream forked off it, so a
/// given seed and thread count always give the same image.
#[derive(Debug)]
pub struct AdditiveGaussianNoise<P> {
    mean: f64,
    standard_deviation: f64,
    seed: u64,
    _pixel: PhantomData<fn() -> P>,
}

impl<P> AdditiveGaussianNoise<P> {
    pub fn new(mean: f64, standard_deviation: f64, seed: u64) -> Self {
        Self {
            mean,
            standard_deviation,
            seed,
            _pixel: PhantomData,
        }
    }
}

impl<P> Default for AdditiveGaussianNoise<P> {
    fn default() -> Self {
        Self::new(0.0, 1.0, DEFAULT_SEED)
    }
}

impl<P: Pixel> RegionEnlargeable for AdditiveGaussianNoise<P> {
    fn generate_input_requested_region(
        &self,
        outputs: &[Box<dyn DataObject>],
        inputs: &mut [Option<InputRegionRequest>],
    ) {
        copy_output_region_to_inputs(outputs, inputs);
    }
}

impl<P: Pixel> Filter for AdditiveGaussianNoise<P> {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::builder("additive_noise", "Additive Gaussian Noise")
            .description("Add normally distributed noise")
            .category(Category::Noise)
            .input()
            .output("output")
            .parameter(ParameterDefinition::new("mean", Value::Float(0.0)))
            .parameter(ParameterDefinition::new("standard_deviation", Value::Float(1.0)))
            .parameter(
                ParameterDefinition::new("seed", Value::Integer(DEFAULT_SEED as i64))
                    .with_description("Seed of the per-thread generators"),
            )
            .build()
    }

    fn make_output(&self, _index: usize) -> Box<dyn DataObject> {
        Box::new(Image::<P>::unset())
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<bool, ParameterError> {
        match name {
            "mean" => Ok(assign(&mut self.mean, float_value(name, value)?)),
            "standard_deviation" => {
                let sigma = float_value(name, value)?;
                if sigma < 0.0 {
                    return Err(ParameterError::invalid("standard_deviation must not be negative"));
                }
                Ok(assign(&mut self.standard_deviation, sigma))
            }
            "seed" => {
                let seed = value
                    .as_integer()
                    .and_then(|seed| u64::try_from(seed).ok())
                    .ok_or_else(|| ParameterError::invalid(format!("seed expects a non-negative integer, got {}", value)))?;
                Ok(assign(&mut self.seed, seed))
            }
            _ => Err(ParameterError::Unknown(name.to_string())),
        }
    }

    fn parameter(&self, name: &str) -> Option<Value> {
        match name {
            "mean" => Some(Value::Float(self.mean)),
            "standard_deviation" => Some(Value::Float(self.standard_deviation)),
            "seed" => Some(Value::Integer(self.seed as i64)),
            _ => None,
        }
    }

    fn generate_data(&mut self, ctx: &mut GenerateContext<'_>) -> ComputationResult<()> {
        ctx.threaded_generate::<P, _>(self, 0)?;
        Ok(())
    }
}

impl<P: Pixel> ThreadedComputable<P> for AdditiveGaussianNoise<P> {
    fn before_threaded_generate_data(&mut self, _inputs: &Inputs<'_>) -> ComputationResult<()> {
        RandomVariateGenerator::instance().initialize(self.seed);
        Ok(())
    }

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

        let mut rng = RandomVariateGenerator::instance().fork(chunk.thread_id as u64);
        for (pixel, index) in chunk.pixels.iter_mut().zip(chunk.region.indices()) {
            let value = input.get(&index).unwrap_or_default().to_f64();
            let noise = self.mean + self.standard_deviation * sample_normal(&mut rng);
            *pixel = P::from_f64(value + noise);
        }
        progress.completed_pixels(chunk.thread_id, chunk.pixels.len() as u64)
    }
}
