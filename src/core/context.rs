//! Context handed to a filter while it generates data.
//!
//! The context borrows the upstream outputs read-only and the node's own
//! outputs mutably for the duration of one `generate_data` call.

use crate::core::data::{DataObject, Decorated, Image};
use crate::core::error::{ComputationError, ComputationResult, NodeId};
use crate::core::node::ThreadedComputable;
use crate::core::types::Pixel;
use crate::execution::progress::ProgressReporter;
use crate::threading::driver::{ParallelDriver, RunSummary};
use std::fmt;

/// The data objects feeding a node, one slot per input port.
#[derive(Clone, Default)]
pub struct Inputs<'a> {
    slots: Vec<Option<&'a dyn DataObject>>,
}

impl<'a> Inputs<'a> {
    pub fn new(slots: Vec<Option<&'a dyn DataObject>>) -> Self {
        Self { slots }
    }

    /// Number of input slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots with a connected producer.
    pub fn connected(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Data object on input `index`, if connected.
    pub fn get(&self, index: usize) -> Option<&'a dyn DataObject> {
        self.slots.get(index).copied().flatten()
    }

    /// Data object on input `index`.
    pub fn data(&self, index: usize) -> ComputationResult<&'a dyn DataObject> {
        self.get(index)
            .ok_or(ComputationError::MissingInput { index })
    }

    /// Image on input `index`.
    pub fn image<P: Pixel>(&self, index: usize) -> ComputationResult<&'a Image<P>> {
        let data = self.data(index)?;
        data.as_any()
            .downcast_ref::<Image<P>>()
            .ok_or(ComputationError::TypeMismatch {
                index,
                expected: P::TYPE_NAME,
                got: data.type_name(),
            })
    }

    /// Decorated value on input `index`.
    pub fn decorated<T>(&self, index: usize) -> ComputationResult<&'a Decorated<T>>
    where
        T: Send + Sync + fmt::Debug + 'static,
    {
        let data = self.data(index)?;
        data.as_any()
            .downcast_ref::<Decorated<T>>()
            .ok_or(ComputationError::TypeMismatch {
                index,
                expected: std::any::type_name::<T>(),
                got: data.type_name(),
            })
    }
}

impl fmt::Debug for Inputs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|s| s.map(|d| d.type_name())))
            .finish()
    }
}

/// Everything a filter can touch inside `generate_data`.
pub struct GenerateContext<'a> {
    /// ID of the node being computed.
    pub node_id: NodeId,
    inputs: Inputs<'a>,
    outputs: &'a mut [Box<dyn DataObject>],
    driver: &'a ParallelDriver,
    threads: usize,
    progress: ProgressReporter,
}

impl<'a> GenerateContext<'a> {
    pub fn new(
        node_id: NodeId,
        inputs: Inputs<'a>,
        outputs: &'a mut [Box<dyn DataObject>],
        driver: &'a ParallelDriver,
        threads: usize,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            node_id,
            inputs,
            outputs,
            driver,
            threads: driver.clamp_threads(threads),
            progress,
        }
    }

    pub fn inputs(&self) -> &Inputs<'a> {
        &self.inputs
    }

    /// Image on input `index`.
    pub fn input_image<P: Pixel>(&self, index: usize) -> ComputationResult<&'a Image<P>> {
        self.inputs.image(index)
    }

    pub fn driver(&self) -> &'a ParallelDriver {
        self.driver
    }

    /// Threads this node may split into.
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    pub fn number_of_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Output `index` as an image.
    pub fn output_image_mut<P: Pixel>(&mut self, index: usize) -> ComputationResult<&mut Image<P>> {
        downcast_output(self.outputs, index)
    }

    /// Store `value` in decorated output `index`.
    pub fn set_output_value<T>(&mut self, index: usize, value: T) -> ComputationResult<()>
    where
        T: Send + Sync + fmt::Debug + 'static,
    {
        let output: &mut Decorated<T> = downcast_output(self.outputs, index)?;
        output.set(value);
        Ok(())
    }

    /// Split image output `output` across threads and let `filter` fill each
    /// chunk.
    pub fn threaded_generate<P, T>(&mut self, filter: &mut T, output: usize) -> ComputationResult<RunSummary>
    where
        P: Pixel,
        T: ThreadedComputable<P>,
    {
        filter.before_threaded_generate_data(&self.inputs)?;

        let image: &mut Image<P> = downcast_output(self.outputs, output)?;
        let (region, pixels) = image.buffer_mut();
        let region = region.clone();
        if region.is_empty() {
            return Ok(RunSummary {
                threads_requested: self.threads,
                threads_used: 0,
            });
        }

        self.progress.reset(region.number_of_pixels());
        let inputs = &self.inputs;
        let progress = &self.progress;
        let worker = &*filter;
        let summary = self
            .driver
            .run_region_chunks(&region, self.threads, pixels, |chunk| {
                worker.threaded_generate_data(inputs, chunk, progress)
            })?;

        filter.after_threaded_generate_data()?;
        Ok(summary)
    }
}

fn downcast_output<'o, T: DataObject>(
    outputs: &'o mut [Box<dyn DataObject>],
    index: usize,
) -> ComputationResult<&'o mut T> {
    let output = outputs
        .get_mut(index)
        .ok_or(ComputationError::MissingOutput { index })?;
    let got = output.type_name();
    output
        .as_any_mut()
        .downcast_mut::<T>()
        .ok_or(ComputationError::TypeMismatch {
            index,
            expected: std::any::type_name::<T>(),
            got,
        })
}

impl fmt::Debug for GenerateContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerateContext")
            .field("node_id", &self.node_id)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs.len())
            .field("threads", &self.threads)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ThreadingConfig;
    use crate::core::region::ImageRegion;
    use crate::threading::driver::RegionChunk;

    struct FillWithThread;

    impl ThreadedComputable<u32> for FillWithThread {
        fn threaded_generate_data(
            &self,
            _inputs: &Inputs<'_>,
            chunk: RegionChunk<'_, u32>,
            progress: &ProgressReporter,
        ) -> ComputationResult<()> {
            chunk.pixels.fill(chunk.thread_id as u32 + 1);
            progress.completed_pixels(chunk.thread_id, chunk.pixels.len() as u64)
        }
    }

    fn driver() -> ParallelDriver {
        ParallelDriver::new(ThreadingConfig::new().with_max_threads(8).with_default_threads(2)).unwrap()
    }

    #[test]
    fn test_inputs_typed_access() {
        let image = Image::<u8>::new(ImageRegion::from_size(vec![2]));
        let inputs = Inputs::new(vec![Some(&image as &dyn DataObject), None]);
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs.connected(), 1);
        assert!(inputs.image::<u8>(0).is_ok());
        assert!(matches!(
            inputs.image::<f32>(0),
            Err(ComputationError::TypeMismatch { index: 0, expected: "f32", .. })
        ));
        assert!(matches!(
            inputs.image::<u8>(1),
            Err(ComputationError::MissingInput { index: 1 })
        ));
    }

    #[test]
    fn test_threaded_generate_fills_output() {
        let driver = driver();
        let mut image = Image::<u32>::unset();
        image.set_largest_possible_region(ImageRegion::from_size(vec![2, 6]));
        image.set_requested_region_to_largest_possible_region();
        image.allocate().unwrap();
        let mut outputs: Vec<Box<dyn DataObject>> = vec![Box::new(image)];

        let node_id = NodeId::new();
        let mut ctx = GenerateContext::new(
            node_id,
            Inputs::default(),
            &mut outputs,
            &driver,
            3,
            ProgressReporter::detached(node_id),
        );
        let summary = ctx.threaded_generate::<u32, _>(&mut FillWithThread, 0).unwrap();
        assert_eq!(summary.threads_used, 3);
        assert_eq!(ctx.progress().fraction(), 1.0);

        let image = outputs[0].downcast_ref::<Image<u32>>().unwrap();
        assert_eq!(image.pixels(), &[1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
    }

    #[test]
    fn test_output_type_mismatch() {
        let driver = driver();
        let mut outputs: Vec<Box<dyn DataObject>> = vec![Box::new(Decorated::<f64>::empty())];
        let node_id = NodeId::new();
        let mut ctx = GenerateContext::new(
            node_id,
            Inputs::default(),
            &mut outputs,
            &driver,
            1,
            ProgressReporter::detached(node_id),
        );
        assert!(ctx.output_image_mut::<u8>(0).is_err());
        assert!(matches!(
            ctx.output_image_mut::<u8>(3),
            Err(ComputationError::MissingOutput { index: 3 })
        ));
        ctx.set_output_value(0, 2.5f64).unwrap();
        drop(ctx);
        assert_eq!(
            outputs[0].downcast_ref::<Decorated<f64>>().unwrap().get(),
            Some(&2.5)
        );
    }
}
