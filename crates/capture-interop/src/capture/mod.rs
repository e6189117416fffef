//! Shared capture resources, capture handles, and capture streams.

use core::time::Duration;
use std::io;

use thiserror::Error;

use crate::{BackendError, Config, Screen};

pub use handle::CaptureHandle;
pub use pending::PendingCapture;
pub use registry::{CaptureRegistry, LeaseKind};
pub use shared_resources::{RefKind, ResourceRef, ResourceState, SharedCaptureResources};
pub use stream::{CancellationToken, CaptureStream, StreamState, StreamStats, StreamStatsSnapshot};
pub use teardown::{TeardownScheduler, TeardownTask, TeardownThread};

mod handle;
mod pending;
mod registry;
mod shared_resources;
mod stream;
mod teardown;

/// Options for a [`CaptureRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureOptions {
    /// How long unreferenced capture resources are kept before teardown.
    pub teardown_grace: Duration,
    /// The bounded wait of one acquire attempt.
    pub frame_timeout: Duration,
    /// How many undelivered frames a stream may buffer.
    pub buffer_depth: usize,
    /// How many access-lost recoveries in a row a stream attempts before faulting.
    pub max_consecutive_errors: usize,
}

impl From<&Config> for CaptureOptions {
    fn from(config: &Config) -> Self {
        Self {
            teardown_grace: config.teardown_grace(),
            frame_timeout: config.frame_timeout(),
            buffer_depth: config.stream_buffer_depth,
            max_consecutive_errors: config.max_consecutive_errors,
        }
    }
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CaptureError {
    #[error("A {kind} is already open for {screen}")]
    CaptureInUse { screen: Screen, kind: LeaseKind },

    #[error("The capture resources for {0} have been torn down")]
    Disposed(Screen),

    #[error("Failed to enumerate screens:\n{0}")]
    EnumerateScreens(#[source] BackendError),

    #[error("Failed to open the duplication for {screen}:\n{source}")]
    OpenDuplication {
        screen: Screen,
        #[source]
        source: BackendError,
    },

    #[error("Failed to acquire the next frame:\n{0}")]
    AcquireFrame(#[source] BackendError),

    #[error("Failed to release a frame:\n{0}")]
    ReleaseFrame(#[source] BackendError),

    #[error("Failed to map the frame into host memory:\n{0}")]
    MapFrame(#[source] BackendError),

    #[error("Failed to spawn a capture thread:\n{0}")]
    SpawnThread(#[source] io::Error),

    #[error("The capture stream has terminated")]
    StreamTerminated,
}

impl CaptureError {
    /// If the duplication can be recreated and capture continued.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::AcquireFrame(source) => source.is_access_lost(),
            Self::Disposed(_) => true,
            _ => false,
        }
    }
}
