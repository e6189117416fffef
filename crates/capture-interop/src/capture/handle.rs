use core::fmt;
use std::{thread, time::Instant};

use tracing::error;

use crate::{
    BackendError, FrameInfo, FrameSurface, HostFrame, NativeDevice, NativeSurface, PixelFormat,
    Screen,
};

use super::{CaptureError, ResourceRef, registry::ExclusiveLease};

/// One acquired frame.
///
/// Dropping or releasing the handle hands the surface back to the duplication and then releases
/// the handle's reference on the screen's resources.
pub struct CaptureHandle {
    screen: Screen,
    info: FrameInfo,
    device: NativeDevice,
    surface: Option<Box<dyn FrameSurface>>,
    reference: Option<ResourceRef>,
    lease: Option<ExclusiveLease>,
}

impl CaptureHandle {
    pub(crate) fn new(
        screen: Screen,
        surface: Box<dyn FrameSurface>,
        info: FrameInfo,
        reference: ResourceRef,
        lease: Option<ExclusiveLease>,
    ) -> Self {
        Self {
            screen,
            info,
            device: reference.resources().device(),
            surface: Some(surface),
            reference: Some(reference),
            lease,
        }
    }

    /// The captured screen.
    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    /// When the frame was acquired.
    pub fn timestamp(&self) -> Instant {
        self.info.timestamp
    }

    /// Width and height in pixels.
    pub fn size(&self) -> [u32; 2] {
        self.info.size
    }

    /// Format of the surface.
    pub fn format(&self) -> PixelFormat {
        self.info.format
    }

    /// The frame's metadata.
    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    /// The graphics device the surface belongs to.
    pub fn device(&self) -> NativeDevice {
        self.device
    }

    /// The native per-frame surface.
    pub fn native_surface(&self) -> Option<NativeSurface> {
        self.surface.as_ref().map(|surface| surface.native())
    }

    /// Copy the frame into host memory.
    ///
    /// The map is a blocking native call, it runs on its own thread while this one waits.
    pub fn map(&self) -> Result<HostFrame, CaptureError> {
        let surface = self
            .surface
            .as_deref()
            .ok_or_else(|| CaptureError::Disposed(self.screen.clone()))?;

        thread::scope(|scope| {
            let mapper = thread::Builder::new()
                .name(format!("Frame Map {}", self.screen))
                .spawn_scoped(scope, || surface.map())
                .map_err(CaptureError::SpawnThread)?;

            mapper
                .join()
                .unwrap_or_else(|_| {
                    Err(BackendError::message("the map panicked", "FrameSurface::map"))
                })
                .map_err(CaptureError::MapFrame)
        })
    }

    /// Release the frame, reporting a failure to hand the surface back.
    pub fn release(mut self) -> Result<(), CaptureError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), CaptureError> {
        let result = match (self.surface.take(), &self.reference) {
            (Some(surface), Some(reference)) => reference.resources().release_frame(surface),
            _ => Ok(()),
        };

        self.reference.take();
        self.lease.take();

        result
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            error!("Failed to release frame of {}:\n{e}", self.screen);
        }
    }
}

impl fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("screen", &self.screen)
            .field("info", &self.info)
            .field("surface", &self.native_surface())
            .finish_non_exhaustive()
    }
}
