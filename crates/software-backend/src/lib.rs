//! # Software Backend
//! CPU implementations of the capture-interop collaborators.
//!
//! [`SoftwareCompute`] runs the edge detection programs on the CPU with the same semantics as
//! their OpenCL C sources. [`SyntheticDisplay`] produces generated or scripted frames. Neither
//! supports surface sharing, so frames always take the host copy path.
//!

extern crate alloc;

pub use compute::{
    ContextId, DeviceId, Event, Kernel, Memory, PlatformId, Program, Queue, SoftwareCompute,
    SoftwareDevice, SoftwarePlatform,
};
pub use display::{
    FrameSource, ScriptStep, ScriptedFrames, SourceFrame, SyntheticDisplay, SyntheticScreen,
    TestPattern,
};

mod compute;
mod display;
