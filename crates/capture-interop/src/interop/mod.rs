//! Zero-copy sharing between capture surfaces and compute images.

use thiserror::Error;

use crate::{BackendError, CaptureError};

pub use capability::{
    CapabilityDetector, D3D11_SHARING_KHR, D3D11_SHARING_NV, DEFAULT_SHARING_EXTENSIONS,
    PlatformCapability, SharingExtension, SharingFunctions,
};
pub use context::{ContextCapabilities, ContextCapability};
pub use image_factory::{GpuImage, ImageFactory};

mod capability;
mod context;
mod image_factory;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CapabilityError {
    #[error("Failed to query the extensions of {platform}:\n{source}")]
    QueryExtensions {
        platform: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to query {context}:\n{source}")]
    QueryContext {
        context: String,
        #[source]
        source: BackendError,
    },
}

/// The shared image operation that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SharedOperation {
    /// Acquiring the surface for compute use.
    Acquire,
    /// Releasing the surface back to the graphics device.
    Release,
}

impl core::fmt::Display for SharedOperation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Acquire => f.write_str("acquire"),
            Self::Release => f.write_str("release"),
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InteropError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("Failed to map the frame:\n{0}")]
    Map(#[source] CaptureError),

    #[error("Failed to create the compute image:\n{0}")]
    CreateImage(#[source] BackendError),

    #[error("Failed to upload the frame:\n{0}")]
    Upload(#[source] BackendError),

    #[error("Failed to {operation} the shared image:\n{source}")]
    SharedSync {
        operation: SharedOperation,
        #[source]
        source: BackendError,
    },
}
