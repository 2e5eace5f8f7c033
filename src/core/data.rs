//! Data objects flowing between pipeline nodes.
//!
//! Every node output is a boxed [`DataObject`]. Images carry the three
//! regions the update protocol negotiates over; decorated values carry a
//! single result and no regions.

use crate::core::error::{ComputationResult, DomainError};
use crate::core::region::ImageRegion;
use crate::core::timestamp::TimeStamp;
use crate::core::types::Pixel;
use std::any::Any;
use std::fmt;

/// Largest-possible, requested and buffered regions of an output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionSet {
    /// Everything the producer could compute.
    pub largest_possible: ImageRegion,
    /// What the consumers asked for.
    pub requested: ImageRegion,
    /// What the buffer currently holds.
    pub buffered: ImageRegion,
}

impl RegionSet {
    /// All three regions set to `region`.
    pub fn uniform(region: ImageRegion) -> Self {
        Self {
            largest_possible: region.clone(),
            requested: region.clone(),
            buffered: region,
        }
    }
}

/// Generation bookkeeping shared by every data object.
#[derive(Debug, Clone, Default)]
pub struct DataState {
    timestamp: TimeStamp,
    released: bool,
}

impl DataState {
    pub fn timestamp(&self) -> TimeStamp {
        self.timestamp
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Stamp freshly generated contents.
    pub fn mark_generated(&mut self) {
        self.timestamp.modified();
        self.released = false;
    }

    pub fn mark_released(&mut self) {
        self.released = true;
    }
}

/// An output of a pipeline node.
pub trait DataObject: Any + Send + Sync + fmt::Debug {
    /// Human-readable type name, for error messages.
    fn type_name(&self) -> &'static str;

    fn state(&self) -> &DataState;

    fn state_mut(&mut self) -> &mut DataState;

    /// Region bookkeeping, for objects laid out over a grid.
    fn regions(&self) -> Option<&RegionSet> {
        None
    }

    fn regions_mut(&mut self) -> Option<&mut RegionSet> {
        None
    }

    /// Size the storage to the requested region.
    fn allocate(&mut self) -> ComputationResult<()>;

    /// Drop the contents; the next update regenerates them.
    fn release_data(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Modified time of the contents.
    fn timestamp(&self) -> TimeStamp {
        self.state().timestamp()
    }

    fn is_released(&self) -> bool {
        self.state().is_released()
    }

    /// Copy the meta-information a producer derives from its input.
    fn copy_information(&mut self, source: &dyn DataObject) {
        if let (Some(target), Some(source)) = (self.regions_mut(), source.regions()) {
            target.largest_possible = source.largest_possible.clone();
        }
    }

    fn set_requested_region_to_largest_possible_region(&mut self) {
        if let Some(regions) = self.regions_mut() {
            regions.requested = regions.largest_possible.clone();
        }
    }

    /// Whether the buffer is missing part of what was requested.
    fn requested_region_is_outside_of_buffered_region(&self) -> bool {
        match self.regions() {
            Some(regions) => !regions.requested.is_inside(&regions.buffered),
            None => false,
        }
    }

    /// Whether the requested region lies within the largest possible one.
    fn verify_requested_region(&self) -> bool {
        match self.regions() {
            Some(regions) => regions.requested.is_inside(&regions.largest_possible),
            None => true,
        }
    }
}

impl dyn DataObject {
    /// Downcast to a concrete data type.
    pub fn downcast_ref<T: DataObject>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: DataObject>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

// ============================================================================
// Images
// ============================================================================

/// Pixel buffer laid out over its buffered region, axis 0 fastest.
#[derive(Clone)]
pub struct Image<P: Pixel> {
    regions: RegionSet,
    pixels: Vec<P>,
    state: DataState,
}

impl<P: Pixel> Image<P> {
    /// An image with no regions set, as a node output before its first
    /// information pass.
    pub fn unset() -> Self {
        Self {
            regions: RegionSet::default(),
            pixels: Vec::new(),
            state: DataState::default(),
        }
    }

    /// A fully buffered image of default pixels over `region`.
    ///
    /// # Panics
    /// Panics if `region` has more pixels than can be allocated.
    pub fn new(region: ImageRegion) -> Self {
        let len = region.number_of_pixels() as usize;
        Self {
            regions: RegionSet::uniform(region),
            pixels: vec![P::default(); len],
            state: DataState::default(),
        }
    }

    /// A fully buffered image with `f(index)` at each point.
    pub fn from_fn<F>(region: ImageRegion, mut f: F) -> Self
    where
        F: FnMut(&[i64]) -> P,
    {
        let pixels = region.indices().map(|index| f(&index)).collect();
        Self {
            regions: RegionSet::uniform(region),
            pixels,
            state: DataState::default(),
        }
    }

    pub fn largest_possible_region(&self) -> &ImageRegion {
        &self.regions.largest_possible
    }

    pub fn requested_region(&self) -> &ImageRegion {
        &self.regions.requested
    }

    pub fn buffered_region(&self) -> &ImageRegion {
        &self.regions.buffered
    }

    pub fn set_largest_possible_region(&mut self, region: ImageRegion) {
        self.regions.largest_possible = region;
    }

    pub fn set_requested_region(&mut self, region: ImageRegion) {
        self.regions.requested = region;
    }

    pub fn pixels(&self) -> &[P] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [P] {
        &mut self.pixels
    }

    /// Buffered region and pixels, borrowed together.
    pub fn buffer_mut(&mut self) -> (&ImageRegion, &mut [P]) {
        (&self.regions.buffered, &mut self.pixels)
    }

    /// Pixel at `index`, if it is buffered.
    pub fn get(&self, index: &[i64]) -> Option<P> {
        self.regions
            .buffered
            .linear_offset(index)
            .and_then(|offset| self.pixels.get(offset).copied())
    }

    /// Set the pixel at `index`. Returns `false` if it is not buffered.
    pub fn set(&mut self, index: &[i64], value: P) -> bool {
        match self.regions.buffered.linear_offset(index) {
            Some(offset) if offset < self.pixels.len() => {
                self.pixels[offset] = value;
                true
            }
            _ => false,
        }
    }

    pub fn fill(&mut self, value: P) {
        self.pixels.fill(value);
    }
}

impl<P: Pixel> Default for Image<P> {
    fn default() -> Self {
        Self::unset()
    }
}

impl<P: Pixel> fmt::Debug for Image<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("pixel", &P::TYPE_NAME)
            .field("largest_possible", &self.regions.largest_possible)
            .field("requested", &self.regions.requested)
            .field("buffered", &self.regions.buffered)
            .field("pixels", &self.pixels.len())
            .field("released", &self.state.is_released())
            .finish()
    }
}

impl<P: Pixel> DataObject for Image<P> {
    fn type_name(&self) -> &'static str {
        "image"
    }

    fn state(&self) -> &DataState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut DataState {
        &mut self.state
    }

    fn regions(&self) -> Option<&RegionSet> {
        Some(&self.regions)
    }

    fn regions_mut(&mut self) -> Option<&mut RegionSet> {
        Some(&mut self.regions)
    }

    fn allocate(&mut self) -> ComputationResult<()> {
        let requested = &self.regions.requested;
        let len = requested
            .checked_number_of_pixels()
            .and_then(|count| usize::try_from(count).ok())
            .ok_or_else(|| DomainError::CountOverflow {
                domain: requested.to_string(),
            })?;
        self.regions.buffered = self.regions.requested.clone();
        // Reuses the existing allocation when it is large enough.
        self.pixels.clear();
        self.pixels.resize(len, P::default());
        Ok(())
    }

    fn release_data(&mut self) {
        self.pixels = Vec::new();
        self.regions.buffered = ImageRegion::default();
        self.state.mark_released();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Decorated values
// ============================================================================

/// A single non-image result, such as a statistic.
#[derive(Debug, Clone)]
pub struct Decorated<T> {
    value: Option<T>,
    state: DataState,
}

impl<T> Decorated<T> {
    pub fn empty() -> Self {
        Self {
            value: None,
            state: DataState::default(),
        }
    }

    pub fn new(value: T) -> Self {
        Self {
            value: Some(value),
            state: DataState::default(),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn set(&mut self, value: T) {
        self.value = Some(value);
    }
}

impl<T> Default for Decorated<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> DataObject for Decorated<T>
where
    T: Send + Sync + fmt::Debug + 'static,
{
    fn type_name(&self) -> &'static str {
        "decorated"
    }

    fn state(&self) -> &DataState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut DataState {
        &mut self.state
    }

    fn allocate(&mut self) -> ComputationResult<()> {
        Ok(())
    }

    fn release_data(&mut self) {
        self.value = None;
        self.state.mark_released();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
