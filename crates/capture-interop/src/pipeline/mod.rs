//! The edge detection kernel chain.

use alloc::sync::Arc;
use core::fmt;

use thiserror::Error;
use tracing::{instrument, trace};

use crate::{
    BackendError, ComputeBackend, ComputeError, ComputeManager, Config, GpuImage, InteropError,
    KernelArg, WorkSize,
    kernels::{self, EDGE_PROGRAMS},
};

pub use signals::SignalList;

mod signals;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    #[error(transparent)]
    Interop(#[from] InteropError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error("Failed to describe the frame image:\n{0}")]
    DescribeImage(#[source] BackendError),

    #[error("The image is {image:?} but the buffers are for {buffers:?}")]
    SizeMismatch { image: [u32; 2], buffers: [u32; 2] },
}

/// Tunables of the edge pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeParameters {
    /// Edge strength at or above which a pixel is an edge.
    pub threshold: u8,
    /// If the grayscale image is blurred before the gradient.
    pub blur: bool,
}

impl Default for EdgeParameters {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EdgeParameters {
    fn from(config: &Config) -> Self {
        Self {
            threshold: config.threshold,
            blur: config.blur,
        }
    }
}

/// A kernel invocation: the kernel's inputs, outputs, and scalars in argument order.
pub struct KernelStage<'a, B: ComputeBackend> {
    /// The kernel's entry point.
    pub entry_point: &'static str,
    /// Memory the kernel reads.
    pub inputs: Vec<&'a B::Mem>,
    /// Memory the kernel writes.
    pub outputs: Vec<&'a B::Mem>,
    /// Scalar arguments following the memory arguments.
    pub scalars: Vec<KernelArg<'a, B::Mem>>,
    /// The dispatch size.
    pub work_size: WorkSize,
}

impl<'a, B: ComputeBackend> KernelStage<'a, B> {
    /// The signals the stage must wait on: the producers of its inputs.
    pub fn wait_set(&self, signals: &SignalList<B>) -> Vec<B::Event> {
        signals.producers_of(&self.inputs)
    }

    fn arguments(&self) -> Vec<KernelArg<'a, B::Mem>> {
        self.inputs
            .iter()
            .chain(&self.outputs)
            .map(|&mem| KernelArg::Mem(mem))
            .chain(self.scalars.iter().cloned())
            .collect()
    }
}

impl<B: ComputeBackend> fmt::Debug for KernelStage<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelStage")
            .field("entry_point", &self.entry_point)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("work_size", &self.work_size)
            .finish_non_exhaustive()
    }
}

const GRAY: usize = 0;
const BLURRED: usize = 1;
const MAGNITUDE: usize = 2;
const DIRECTION: usize = 3;
const SUPPRESSED: usize = 4;
const EDGES: usize = 5;

const BUFFER_NAMES: [&str; 6] = [
    "the grayscale buffer",
    "the blurred buffer",
    "the magnitude buffer",
    "the direction buffer",
    "the suppressed buffer",
    "the edge buffer",
];

/// The intermediate and output buffers of the edge pipeline for one frame size.
pub struct EdgeBuffers<B: ComputeBackend> {
    backend: Arc<B>,
    size: [u32; 2],
    buffers: Vec<B::Mem>,
}

impl<B: ComputeBackend> EdgeBuffers<B> {
    /// Allocate the buffers for a frame size in a device's context.
    pub fn new(
        manager: &ComputeManager<B>,
        device: B::Device,
        size: [u32; 2],
    ) -> Result<Self, ComputeError> {
        let backend = manager.backend();
        let context = manager.context(device)?;
        let length = size[0] as usize * size[1] as usize;

        let mut buffers = Vec::with_capacity(BUFFER_NAMES.len());
        for what in BUFFER_NAMES {
            match backend.create_buffer(&context, length) {
                Ok(buffer) => buffers.push(buffer),
                Err(source) => {
                    for buffer in buffers {
                        backend.release_mem(buffer);
                    }
                    return Err(ComputeError::Allocate { what, source });
                }
            }
        }

        Ok(Self {
            backend: Arc::clone(backend),
            size,
            buffers,
        })
    }

    /// The frame size the buffers are for.
    pub fn size(&self) -> [u32; 2] {
        self.size
    }

    /// One byte luma per pixel.
    pub fn gray(&self) -> &B::Mem {
        &self.buffers[GRAY]
    }

    /// The blurred luma.
    pub fn blurred(&self) -> &B::Mem {
        &self.buffers[BLURRED]
    }

    /// The gradient magnitude.
    pub fn magnitude(&self) -> &B::Mem {
        &self.buffers[MAGNITUDE]
    }

    /// The quantized gradient direction.
    pub fn direction(&self) -> &B::Mem {
        &self.buffers[DIRECTION]
    }

    /// The magnitude with non-maximum pixels zeroed.
    pub fn suppressed(&self) -> &B::Mem {
        &self.buffers[SUPPRESSED]
    }

    /// The `0`/`255` edge mask.
    pub fn edges(&self) -> &B::Mem {
        &self.buffers[EDGES]
    }

    /// Read the edge mask once its producer has completed.
    pub fn read_edges(
        &self,
        manager: &ComputeManager<B>,
        device: B::Device,
        signals: &SignalList<B>,
    ) -> Result<Vec<u8>, ComputeError> {
        let queue = manager.queue(device)?;
        let wait = signals.producers_of(&[self.edges()]);

        self.backend
            .read_buffer(&queue, self.edges(), &wait)
            .map_err(ComputeError::Read)
    }
}

impl<B: ComputeBackend> Drop for EdgeBuffers<B> {
    fn drop(&mut self) {
        for buffer in self.buffers.drain(..) {
            self.backend.release_mem(buffer);
        }
    }
}

/// Enqueues the edge detection kernels, chaining them through completion signals.
pub struct EdgePipeline<B: ComputeBackend> {
    manager: Arc<ComputeManager<B>>,
}

impl<B: ComputeBackend> EdgePipeline<B> {
    /// Create a pipeline over a compute manager.
    pub fn new(manager: Arc<ComputeManager<B>>) -> Self {
        Self { manager }
    }

    /// The compute manager.
    pub fn manager(&self) -> &Arc<ComputeManager<B>> {
        &self.manager
    }

    /// Build every edge program for every device.
    pub fn build(&self, options: &str) -> Result<(), ComputeError> {
        self.manager.add_programs(&EDGE_PROGRAMS, options)
    }

    /// Enqueue a stage behind the producers of its inputs, appending its signal.
    pub fn enqueue(
        &self,
        device: B::Device,
        stage: KernelStage<'_, B>,
        signals: &mut SignalList<B>,
    ) -> Result<B::Event, ComputeError> {
        let kernel = self.manager.kernel(device, stage.entry_point)?;
        let queue = self.manager.queue(device)?;
        let wait = stage.wait_set(signals);

        let event = self
            .manager
            .backend()
            .enqueue_kernel(&queue, &kernel, &stage.arguments(), stage.work_size, &wait)
            .map_err(|source| ComputeError::Enqueue {
                name: stage.entry_point,
                source,
            })?;

        trace!("Enqueued {} waiting on {} signals", stage.entry_point, wait.len());
        signals.push(event.clone(), &stage.outputs);

        Ok(event)
    }

    /// Convert an image to one byte luma per pixel.
    pub fn enqueue_grayscale(
        &self,
        device: B::Device,
        work_size: WorkSize,
        input: &B::Mem,
        output: &B::Mem,
        signals: &mut SignalList<B>,
    ) -> Result<B::Event, ComputeError> {
        let stage = KernelStage {
            entry_point: kernels::GRAYSCALE.entry_point,
            inputs: vec![input],
            outputs: vec![output],
            scalars: dimensions(kernels::GRAYSCALE.entry_point, work_size)?
                .into_iter()
                .take(1)
                .collect(),
            work_size,
        };

        self.enqueue(device, stage, signals)
    }

    /// Blur luma with a 3x3 binomial kernel.
    pub fn enqueue_blur(
        &self,
        device: B::Device,
        work_size: WorkSize,
        input: &B::Mem,
        output: &B::Mem,
        signals: &mut SignalList<B>,
    ) -> Result<B::Event, ComputeError> {
        let stage = KernelStage {
            entry_point: kernels::CANNY.entry_point,
            inputs: vec![input],
            outputs: vec![output],
            scalars: dimensions(kernels::CANNY.entry_point, work_size)?,
            work_size,
        };

        self.enqueue(device, stage, signals)
    }

    /// Compute the Sobel gradient magnitude and quantized direction.
    pub fn enqueue_gradient(
        &self,
        device: B::Device,
        work_size: WorkSize,
        input: &B::Mem,
        magnitude: &B::Mem,
        direction: &B::Mem,
        signals: &mut SignalList<B>,
    ) -> Result<B::Event, ComputeError> {
        let stage = KernelStage {
            entry_point: kernels::SOBEL.entry_point,
            inputs: vec![input],
            outputs: vec![magnitude, direction],
            scalars: dimensions(kernels::SOBEL.entry_point, work_size)?,
            work_size,
        };

        self.enqueue(device, stage, signals)
    }

    /// Zero every magnitude that is not a maximum along its gradient direction.
    pub fn enqueue_non_max_suppression(
        &self,
        device: B::Device,
        work_size: WorkSize,
        magnitude: &B::Mem,
        direction: &B::Mem,
        output: &B::Mem,
        signals: &mut SignalList<B>,
    ) -> Result<B::Event, ComputeError> {
        let stage = KernelStage {
            entry_point: kernels::NON_MAX_SUPPRESSION.entry_point,
            inputs: vec![magnitude, direction],
            outputs: vec![output],
            scalars: dimensions(kernels::NON_MAX_SUPPRESSION.entry_point, work_size)?,
            work_size,
        };

        self.enqueue(device, stage, signals)
    }

    /// Map values at or above `threshold` to `255` and the rest to `0`.
    pub fn enqueue_threshold(
        &self,
        device: B::Device,
        work_size: WorkSize,
        input: &B::Mem,
        output: &B::Mem,
        threshold: u8,
        signals: &mut SignalList<B>,
    ) -> Result<B::Event, ComputeError> {
        let stage = KernelStage {
            entry_point: kernels::THRESHOLD.entry_point,
            inputs: vec![input],
            outputs: vec![output],
            scalars: vec![KernelArg::U8(threshold)],
            work_size,
        };

        self.enqueue(device, stage, signals)
    }

    /// Enqueue the whole chain over a frame's image, bracketing a shared image with acquire and
    /// release.
    #[instrument(skip_all, err)]
    pub fn run(
        &self,
        device: B::Device,
        image: &mut GpuImage<'_, B>,
        buffers: &EdgeBuffers<B>,
        parameters: &EdgeParameters,
        signals: &mut SignalList<B>,
    ) -> Result<(), PipelineError> {
        let desc = self
            .manager
            .backend()
            .image_desc(image.image())
            .map_err(PipelineError::DescribeImage)?;
        if desc.size != buffers.size() {
            return Err(PipelineError::SizeMismatch {
                image: desc.size,
                buffers: buffers.size(),
            });
        }

        let queue = self.manager.queue(device)?;
        let work_size = WorkSize::for_image(buffers.size());

        image.acquire(&queue, signals)?;

        let grayscale =
            self.enqueue_grayscale(device, work_size, image.image(), buffers.gray(), signals);
        let grayscale = match grayscale {
            Ok(event) => event,
            Err(e) => {
                image.release(&queue, &[], signals)?;
                return Err(e.into());
            }
        };

        image.release(&queue, &[grayscale], signals)?;

        let smoothed = if parameters.blur {
            self.enqueue_blur(device, work_size, buffers.gray(), buffers.blurred(), signals)?;
            buffers.blurred()
        } else {
            buffers.gray()
        };

        self.enqueue_gradient(
            device,
            work_size,
            smoothed,
            buffers.magnitude(),
            buffers.direction(),
            signals,
        )?;
        self.enqueue_non_max_suppression(
            device,
            work_size,
            buffers.magnitude(),
            buffers.direction(),
            buffers.suppressed(),
            signals,
        )?;
        self.enqueue_threshold(
            device,
            work_size,
            buffers.suppressed(),
            buffers.edges(),
            parameters.threshold,
            signals,
        )?;

        Ok(())
    }

    /// Block until every signal in the list has fired.
    pub fn wait(&self, signals: &SignalList<B>) -> Result<(), ComputeError> {
        let events: Vec<_> = signals.events().cloned().collect();

        self.manager
            .backend()
            .wait_for_events(&events)
            .map_err(ComputeError::Wait)
    }
}

/// The `int` width and height arguments of a kernel.
fn dimensions<'a, M>(
    entry_point: &'static str,
    work_size: WorkSize,
) -> Result<Vec<KernelArg<'a, M>>, ComputeError> {
    match work_size.global.map(i32::try_from) {
        [Ok(width), Ok(height)] => Ok(vec![KernelArg::I32(width), KernelArg::I32(height)]),
        _ => Err(ComputeError::WorkSizeTooLarge {
            name: entry_point,
            global: work_size.global,
        }),
    }
}
