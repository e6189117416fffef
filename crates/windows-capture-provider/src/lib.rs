//! # Windows Capture Provider
//! A [`DisplayBackend`] over DXGI desktop duplication.
//!
//! Every duplication on an adapter shares one D3D11 device, so a duplication rebuilt after access
//! loss reports the same [`NativeDevice`](capture_interop::NativeDevice). Frames are copied into a
//! texture on that device, whose pointer is the frame's
//! [`NativeSurface`](capture_interop::NativeSurface) for D3D11 sharing.
//!

#![cfg(windows)]

extern crate alloc;

use core::fmt;
use std::collections::HashMap;

use capture_interop::{AdapterId, BackendError, BackendResult, DisplayBackend, Duplication, Screen};
use parking_lot::Mutex;
use tracing::{debug, instrument};
use windows::Win32::Graphics::Dxgi::DXGI_ERROR_NOT_FOUND;

use direct3d::Direct3D;
use duplication::DxgiDuplication;
use outputs::Output;
use result::{LabelledWinResult, WinError};

mod direct3d;
mod duplication;
mod outputs;
mod result;
mod send;

/// Captures the desktop attached outputs of every adapter.
#[derive(Default)]
pub struct DxgiDisplay {
    devices: Mutex<HashMap<AdapterId, Direct3D>>,
}

impl DxgiDisplay {
    /// Create the display backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// The adapter's device, created on first use and recreated once it is lost.
    fn device(&self, output: &Output) -> LabelledWinResult<Direct3D> {
        let mut devices = self.devices.lock();
        let adapter = output.screen.adapter();

        if let Some(direct3d) = devices.get(&adapter) {
            if !direct3d.is_lost() {
                return Ok(direct3d.clone());
            }
            debug!("The device of adapter {adapter} was lost, recreating it");
        }

        let direct3d = Direct3D::for_adapter(&output.adapter)?;
        devices.insert(adapter, direct3d.clone());

        Ok(direct3d)
    }
}

impl fmt::Debug for DxgiDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DxgiDisplay")
            .field("devices", &self.devices.lock().len())
            .finish()
    }
}

impl DisplayBackend for DxgiDisplay {
    #[instrument("DxgiDisplay::enumerate_screens", skip_all, err)]
    fn enumerate_screens(&self) -> BackendResult<Vec<Screen>> {
        let outputs = outputs::enumerate()?;

        Ok(outputs.into_iter().map(|output| output.screen).collect())
    }

    #[instrument("DxgiDisplay::open_duplication", skip_all, fields(screen = %screen), err)]
    fn open_duplication(&self, screen: &Screen) -> BackendResult<Box<dyn Duplication>> {
        let output = outputs::enumerate()?
            .into_iter()
            .find(|output| output.screen == *screen)
            .ok_or_else(|| {
                BackendError::from(WinError::from_hresult(DXGI_ERROR_NOT_FOUND, "find output"))
            })?;

        let direct3d = self.device(&output)?;

        Ok(Box::new(DxgiDuplication::new(&output, direct3d)?))
    }
}
