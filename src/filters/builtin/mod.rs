//! Built-in filter implementations.
//!
//! This module contains the standard filters that ship with Strata.

mod arithmetic;
mod intensity;
mod neighborhood;
mod noise;
mod source;
mod statistics;

use crate::core::data::DataObject;
use crate::core::error::ParameterError;
use crate::core::node::InputRegionRequest;
use crate::core::types::Value;
use crate::filters::registry::FilterRegistry;

/// Register all built-in filters.
pub fn register_all(registry: &mut FilterRegistry) {
    source::register(registry);
    intensity::register(registry);
    neighborhood::register(registry);
    arithmetic::register(registry);
    noise::register(registry);
    statistics::register(registry);
}

// Re-export for direct access
pub use arithmetic::Add;
pub use intensity::ShiftScale;
pub use neighborhood::BoxMean;
pub use noise::AdditiveGaussianNoise;
pub use source::{ConstantSource, GradientSource};
pub use statistics::{ImageStatistics, Statistics};

/// Store `value` in `slot`, reporting whether it changed.
fn assign<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

fn float_value(name: &str, value: &Value) -> Result<f64, ParameterError> {
    value
        .as_float()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParameterError::invalid(format!("{} expects a finite number, got {}", name, value)))
}

fn size_value(name: &str, value: &Value) -> Result<Vec<u64>, ParameterError> {
    value
        .as_size()
        .filter(|size| !size.is_empty())
        .ok_or_else(|| ParameterError::invalid(format!("{} expects a size, got {}", name, value)))
}

/// Request the output's region from every input, cropped to what each
/// input can provide.
fn copy_output_region_to_inputs(outputs: &[Box<dyn DataObject>], inputs: &mut [Option<InputRegionRequest>]) {
    let Some(requested) = outputs
        .first()
        .and_then(|output| output.regions())
        .map(|regions| regions.requested.clone())
    else {
        return;
    };

    for request in inputs.iter_mut().flatten() {
        let mut region = requested.clone();
        if region.crop(&request.largest_possible) {
            request.requested = region;
        } else {
            request.requested = request.largest_possible.empty_at();
        }
    }
}
