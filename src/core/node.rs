//! Filter traits and node metadata.
//!
//! A [`Filter`] is the process object at a pipeline node. The pipeline
//! drives it through the demand-driven update protocol:
//!
//! 1. **Information** (`generate_output_information`): derive each output's
//!    largest possible region from the inputs.
//! 2. **Region negotiation** ([`RegionEnlargeable`] hooks): turn the output
//!    requested regions into input requested regions.
//! 3. **Data** (`generate_data`): fill the allocated outputs, usually by
//!    splitting the output region across threads with
//!    [`GenerateContext::threaded_generate`].

use crate::core::context::{GenerateContext, Inputs};
use crate::core::data::DataObject;
use crate::core::error::{ComputationResult, ParameterError};
use crate::core::region::ImageRegion;
use crate::core::types::{Pixel, Value};
use crate::execution::progress::ProgressReporter;
use crate::threading::driver::RegionChunk;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category for grouping filters in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Nodes without inputs that produce data
    Source,
    /// Per-pixel intensity mappings
    Intensity,
    /// Filters reading a neighborhood around each pixel
    Neighborhood,
    /// Pixel-wise arithmetic between images
    Arithmetic,
    /// Stochastic filters
    Noise,
    /// Reductions to summary values
    Statistics,
    /// Anything else
    Utility,
}

impl Category {
    /// Get the display name for this category.
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Source => "Source",
            Category::Intensity => "Intensity",
            Category::Neighborhood => "Neighborhood",
            Category::Arithmetic => "Arithmetic",
            Category::Noise => "Noise",
            Category::Statistics => "Statistics",
            Category::Utility => "Utility",
        }
    }

    /// Get all categories in display order.
    pub fn all() -> &'static [Category] {
        &[
            Category::Source,
            Category::Intensity,
            Category::Neighborhood,
            Category::Arithmetic,
            Category::Noise,
            Category::Statistics,
            Category::Utility,
        ]
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::Utility
    }
}

/// A parameter a filter accepts through [`Filter::set_parameter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    pub description: String,
    pub default: Value,
}

impl ParameterDefinition {
    pub fn new(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            default,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Metadata describing a filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Registry tag (e.g. "box_mean")
    pub tag: String,
    /// Human-readable name (e.g. "Box Mean")
    pub name: String,
    pub category: Category,
    pub description: String,
    /// Inputs that must be connected before data is generated.
    pub required_inputs: usize,
    /// Input slots, connected or not.
    pub max_inputs: usize,
    /// Output names, in port order.
    pub outputs: Vec<String>,
    pub parameters: Vec<ParameterDefinition>,
}

impl NodeMetadata {
    /// Create a new metadata builder.
    pub fn builder(tag: impl Into<String>, name: impl Into<String>) -> NodeMetadataBuilder {
        NodeMetadataBuilder::new(tag, name)
    }

    pub fn number_of_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Get all parameter names.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    /// Find a parameter by name.
    pub fn get_parameter(&self, name: &str) -> Option<&ParameterDefinition> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Builder for NodeMetadata.
pub struct NodeMetadataBuilder {
    tag: String,
    name: String,
    category: Category,
    description: String,
    required_inputs: usize,
    max_inputs: usize,
    outputs: Vec<String>,
    parameters: Vec<ParameterDefinition>,
}

impl NodeMetadataBuilder {
    pub fn new(tag: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            name: name.into(),
            category: Category::default(),
            description: String::new(),
            required_inputs: 0,
            max_inputs: 0,
            outputs: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a required input slot.
    pub fn input(mut self) -> Self {
        self.required_inputs += 1;
        self.max_inputs += 1;
        self
    }

    /// Add an optional input slot after the required ones.
    pub fn optional_input(mut self) -> Self {
        self.max_inputs += 1;
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn parameter(mut self, parameter: ParameterDefinition) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn build(self) -> NodeMetadata {
        NodeMetadata {
            tag: self.tag,
            name: self.name,
            category: self.category,
            description: self.description,
            required_inputs: self.required_inputs,
            max_inputs: self.max_inputs,
            outputs: self.outputs,
            parameters: self.parameters,
        }
    }
}

/// Where a node is in its update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Never computed and never modified since creation.
    Unmodified,
    /// Changed since the last successful computation.
    Modified,
    /// Inside `generate_data`, or failed there.
    Executing,
    /// Outputs reflect the current inputs and parameters.
    UpToDate,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Unmodified => "unmodified",
            NodeState::Modified => "modified",
            NodeState::Executing => "executing",
            NodeState::UpToDate => "up-to-date",
        };
        f.write_str(name)
    }
}

/// Region negotiation for one connected input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRegionRequest {
    /// Largest region the upstream output can produce.
    pub largest_possible: ImageRegion,
    /// Region this node needs from it; starts out as the upstream output's
    /// current requested region.
    pub requested: ImageRegion,
}

/// Hooks turning output requests into input requests.
///
/// The defaults match a filter whose outputs share one requested region and
/// which reads its inputs whole.
pub trait RegionEnlargeable {
    /// Grow the requested region of `output` before it is propagated, for
    /// filters that can only compute whole blocks.
    fn enlarge_output_requested_region(&self, _output: usize, _outputs: &mut [Box<dyn DataObject>]) {}

    /// Derive the other outputs' requested regions from that of `output`.
    fn generate_output_requested_region(&self, output: usize, outputs: &mut [Box<dyn DataObject>]) {
        let Some(requested) = outputs
            .get(output)
            .and_then(|o| o.regions())
            .map(|r| r.requested.clone())
        else {
            return;
        };
        for (index, other) in outputs.iter_mut().enumerate() {
            if index == output {
                continue;
            }
            if let Some(regions) = other.regions_mut() {
                if regions.largest_possible.dimension() == requested.dimension() {
                    regions.requested = requested.clone();
                }
            }
        }
    }

    /// Fill in what each connected input must provide.
    fn generate_input_requested_region(
        &self,
        _outputs: &[Box<dyn DataObject>],
        inputs: &mut [Option<InputRegionRequest>],
    ) {
        for request in inputs.iter_mut().flatten() {
            request.requested = request.largest_possible.clone();
        }
    }
}

/// The process object at a pipeline node.
pub trait Filter: RegionEnlargeable + Send + Sync {
    /// Get the metadata for this filter.
    fn metadata(&self) -> NodeMetadata;

    /// Fresh, empty data object for output `index`.
    fn make_output(&self, index: usize) -> Box<dyn DataObject>;

    /// Assign a parameter. Returns whether the value changed.
    fn set_parameter(&mut self, name: &str, _value: &Value) -> Result<bool, ParameterError> {
        Err(ParameterError::Unknown(name.to_string()))
    }

    /// Current value of a parameter.
    fn parameter(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Check the connected inputs before anything is allocated. An error
    /// leaves the outputs of the previous run in place.
    fn verify_preconditions(&self, _inputs: &Inputs<'_>) -> ComputationResult<()> {
        Ok(())
    }

    /// Check that the inputs' meta-information fits together, e.g. that
    /// images share a grid. Runs after [`verify_preconditions`](Self::verify_preconditions).
    fn verify_input_information(&self, _inputs: &Inputs<'_>) -> ComputationResult<()> {
        Ok(())
    }

    /// Derive output meta-information from the inputs. The default copies
    /// the first input's largest possible region to every output.
    fn generate_output_information(
        &mut self,
        inputs: &Inputs<'_>,
        outputs: &mut [Box<dyn DataObject>],
    ) -> ComputationResult<()> {
        if let Some(first) = inputs.get(0) {
            for output in outputs.iter_mut() {
                output.copy_information(first);
            }
        }
        Ok(())
    }

    /// Fill the allocated outputs.
    fn generate_data(&mut self, ctx: &mut GenerateContext<'_>) -> ComputationResult<()>;
}

/// Per-thread computation over one chunk of an output image.
pub trait ThreadedComputable<P: Pixel>: Sync {
    /// Runs once on the calling thread before the split.
    fn before_threaded_generate_data(&mut self, _inputs: &Inputs<'_>) -> ComputationResult<()> {
        Ok(())
    }

    /// Fill `chunk`, whose pixels belong to `chunk.region` only.
    fn threaded_generate_data(
        &self,
        inputs: &Inputs<'_>,
        chunk: RegionChunk<'_, P>,
        progress: &ProgressReporter,
    ) -> ComputationResult<()>;

    /// Runs once on the calling thread after every worker returned.
    fn after_threaded_generate_data(&mut self) -> ComputationResult<()> {
        Ok(())
    }
}
