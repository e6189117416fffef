//! # Capture Interop
//! Shares display capture resources between concurrent consumers, hands captured frames to a
//! compute backend without a host copy where the platform allows it, and runs an edge detection
//! kernel pipeline over them using completion signals.
//!
//! The display and compute APIs are collaborators behind the [`DisplayBackend`] and
//! [`ComputeBackend`] traits.
//!

extern crate alloc;

pub use capture::{
    CancellationToken, CaptureError, CaptureHandle, CaptureOptions, CaptureRegistry,
    CaptureStream, LeaseKind, PendingCapture, RefKind, ResourceRef, ResourceState,
    SharedCaptureResources, StreamState, StreamStats, StreamStatsSnapshot, TeardownScheduler,
    TeardownTask, TeardownThread,
};
pub use compute::{
    BuildFailure, ComputeBackend, ComputeError, ComputeManager, ImageDesc, KernelArg,
    KernelProgram, WorkSize, kernels,
};
pub use config::{Config, LoadError, SaveError};
pub use display::{
    AcquiredFrame, DisplayBackend, Duplication, FrameInfo, FrameSurface, HostFrame,
    NativeDevice, NativeSurface, PixelFormat,
};
pub use interop::{
    CapabilityError, CapabilityDetector, ContextCapabilities, ContextCapability,
    DEFAULT_SHARING_EXTENSIONS, GpuImage, ImageFactory, InteropError, PlatformCapability,
    SharedOperation, SharingExtension, SharingFunctions,
};
pub use pipeline::{
    EdgeBuffers, EdgeParameters, EdgePipeline, KernelStage, PipelineError, SignalList,
};
pub use result::{BackendError, BackendErrorSource, BackendResult};
pub use screen::{AdapterId, Screen};

pub mod capture;
pub mod compute;
mod config;
mod display;
pub mod interop;
pub mod pipeline;
mod result;
mod screen;
