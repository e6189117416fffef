//! The compute collaborator and the per-device context, queue, and kernel caches.

use core::{fmt::Debug, hash::Hash};

use thiserror::Error;

use crate::{
    BackendError, BackendResult, HostFrame, NativeDevice, NativeSurface, PixelFormat,
    interop::{CapabilityError, DEFAULT_SHARING_EXTENSIONS, SharingExtension},
};

pub use kernels::KernelProgram;
pub use manager::{BuildFailure, ComputeManager};

pub mod kernels;
mod manager;

/// Size and format of a compute image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    /// Width and height in pixels.
    pub size: [u32; 2],
    /// Pixel format.
    pub format: PixelFormat,
}

/// Global and optional local work size of a 2D kernel dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkSize {
    /// Number of work items in each dimension.
    pub global: [usize; 2],
    /// Work group size, chosen by the backend if `None`.
    pub local: Option<[usize; 2]>,
}

impl WorkSize {
    /// One work item per pixel of an image.
    pub fn for_image(size: [u32; 2]) -> Self {
        Self {
            global: [size[0] as usize, size[1] as usize],
            local: None,
        }
    }
}

/// A positional kernel argument.
#[derive(Clone, Debug)]
pub enum KernelArg<'a, M> {
    /// A buffer or image.
    Mem(&'a M),
    /// `uchar`
    U8(u8),
    /// `int`
    I32(i32),
    /// `uint`
    U32(u32),
    /// `float`
    F32(f32),
}

/// A compute API exposing OpenCL style platforms, devices, contexts, queues, and programs, plus
/// the trampolines of a graphics sharing extension.
///
/// Enqueue operations never block, they return an event that completes when the work is done.
pub trait ComputeBackend: Send + Sync + 'static {
    /// A platform handle.
    type Platform: Copy + Eq + Hash + Debug + Send + Sync;
    /// A device handle.
    type Device: Copy + Eq + Hash + Debug + Send + Sync;
    /// A context handle.
    type Context: Clone + Eq + Hash + Debug + Send + Sync;
    /// A command queue handle.
    type Queue: Clone + Debug + Send + Sync;
    /// A built program.
    type Program;
    /// A kernel handle.
    type Kernel: Clone + Debug + Send + Sync;
    /// A buffer or image handle.
    type Mem: Clone + PartialEq + Debug + Send + Sync;
    /// A completion signal.
    type Event: Clone + PartialEq + Debug + Send + Sync;
    /// A resolved extension function.
    type EntryPoint: Copy + Debug + Send + Sync;

    /// List the available platforms.
    fn platforms(&self) -> BackendResult<Vec<Self::Platform>>;

    /// List the devices of a platform.
    fn devices(&self, platform: Self::Platform) -> BackendResult<Vec<Self::Device>>;

    /// The platform's space separated extension string.
    fn platform_extensions(&self, platform: Self::Platform) -> BackendResult<String>;

    /// Resolve an extension function of a platform by name.
    fn entry_point(&self, platform: Self::Platform, name: &str) -> Option<Self::EntryPoint>;

    /// The sharing extensions to look for, in order of preference.
    fn sharing_extensions(&self) -> &[SharingExtension] {
        &DEFAULT_SHARING_EXTENSIONS
    }

    /// Create a context for a device, with interop enabled for `interop` if given.
    fn create_context(
        &self,
        device: Self::Device,
        interop: Option<NativeDevice>,
    ) -> BackendResult<Self::Context>;

    /// The platform a context belongs to.
    fn context_platform(&self, context: &Self::Context) -> BackendResult<Self::Platform>;

    /// The graphics device a context was created with interop enabled for.
    fn context_interop_device(&self, context: &Self::Context) -> BackendResult<Option<NativeDevice>>;

    /// Create an in-order command queue.
    fn create_queue(&self, context: &Self::Context, device: Self::Device) -> BackendResult<Self::Queue>;

    /// Build a program for one device, the error carries the build log.
    fn build_program(
        &self,
        context: &Self::Context,
        device: Self::Device,
        source: &str,
        options: &str,
    ) -> BackendResult<Self::Program>;

    /// Create every kernel of a built program, keyed by entry point.
    fn create_kernels(&self, program: &Self::Program) -> BackendResult<Vec<(String, Self::Kernel)>>;

    /// Create a buffer of `size` bytes.
    fn create_buffer(&self, context: &Self::Context, size: usize) -> BackendResult<Self::Mem>;

    /// Create a 2D image.
    fn create_image(&self, context: &Self::Context, desc: ImageDesc) -> BackendResult<Self::Mem>;

    /// The size and format of an image.
    fn image_desc(&self, image: &Self::Mem) -> BackendResult<ImageDesc>;

    /// Release a buffer or image.
    fn release_mem(&self, mem: Self::Mem);

    /// Upload a host frame into an image once `wait` has completed.
    fn enqueue_write_image(
        &self,
        queue: &Self::Queue,
        image: &Self::Mem,
        frame: HostFrame,
        wait: &[Self::Event],
    ) -> BackendResult<Self::Event>;

    /// Run a kernel once `wait` has completed.
    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        args: &[KernelArg<'_, Self::Mem>],
        work_size: WorkSize,
        wait: &[Self::Event],
    ) -> BackendResult<Self::Event>;

    /// Read a whole buffer once `wait` has completed. Blocking.
    fn read_buffer(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Mem,
        wait: &[Self::Event],
    ) -> BackendResult<Vec<u8>>;

    /// Block until every event has completed.
    fn wait_for_events(&self, events: &[Self::Event]) -> BackendResult<()>;

    /// Call a resolved enumerate-devices function: the devices of `platform` that can share
    /// surfaces with `graphics_device`.
    fn shared_devices(
        &self,
        function: Self::EntryPoint,
        platform: Self::Platform,
        graphics_device: NativeDevice,
    ) -> BackendResult<Vec<Self::Device>>;

    /// Call a resolved create-from-surface function.
    fn create_shared_image(
        &self,
        function: Self::EntryPoint,
        context: &Self::Context,
        surface: NativeSurface,
    ) -> BackendResult<Self::Mem>;

    /// Call a resolved acquire-objects function.
    fn enqueue_acquire_shared(
        &self,
        function: Self::EntryPoint,
        queue: &Self::Queue,
        objects: &[Self::Mem],
        wait: &[Self::Event],
    ) -> BackendResult<Self::Event>;

    /// Call a resolved release-objects function.
    fn enqueue_release_shared(
        &self,
        function: Self::EntryPoint,
        queue: &Self::Queue,
        objects: &[Self::Mem],
        wait: &[Self::Event],
    ) -> BackendResult<Self::Event>;
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ComputeError {
    #[error("Failed to {action}:\n{source}")]
    Environment {
        action: &'static str,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("Failed to create a context for {device}:\n{source}")]
    CreateContext {
        device: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to create a queue for {device}:\n{source}")]
    CreateQueue {
        device: String,
        #[source]
        source: BackendError,
    },

    #[error("{0} is not a device of any platform")]
    UnknownDevice(String),

    #[error("Kernel '{name}' was never built for {device}")]
    KernelNotFound { device: String, name: String },

    #[error("Failed to allocate {what}:\n{source}")]
    Allocate {
        what: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Failed to enqueue '{name}':\n{source}")]
    Enqueue {
        name: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("The work size {global:?} of '{name}' does not fit the kernel's int arguments")]
    WorkSizeTooLarge {
        name: &'static str,
        global: [usize; 2],
    },

    #[error("Failed to read the output buffer:\n{0}")]
    Read(#[source] BackendError),

    #[error("Failed to wait for completion:\n{0}")]
    Wait(#[source] BackendError),
}

impl ComputeError {
    /// If the failure is of the platform or device enumeration, which is never retried.
    pub fn is_environment(&self) -> bool {
        matches!(self, Self::Environment { .. } | Self::Capability(_))
    }
}
