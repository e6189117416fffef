use alloc::sync::Arc;

use capture_interop::NativeDevice;
use parking_lot::Mutex;
use tracing::{debug, instrument};
use windows::Win32::{
    Foundation::E_POINTER,
    Graphics::{
        Direct3D::{D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_UNKNOWN, D3D_DRIVER_TYPE_WARP},
        Direct3D11::{
            D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION, D3D11CreateDevice, ID3D11Device,
            ID3D11DeviceContext,
        },
        Dxgi::{DXGI_ERROR_UNSUPPORTED, IDXGIAdapter, IDXGIAdapter1},
    },
};
use windows_core::Interface;
use windows_result::Result as WindowsResult;

use crate::{
    result::{LabelledWinResult, WinError},
    send::SendCom,
};

/// A D3D11 device and its immediate context.
#[derive(Clone)]
pub(crate) struct Direct3D {
    pub device: SendCom<ID3D11Device>,
    pub context: Arc<Mutex<SendCom<ID3D11DeviceContext>>>,
}

impl Direct3D {
    /// Create a device on an adapter, falling back to WARP if the adapter does not support D3D11.
    #[instrument("Direct3D::for_adapter", skip_all, err)]
    pub fn for_adapter(adapter: &IDXGIAdapter1) -> LabelledWinResult<Self> {
        let adapter: IDXGIAdapter = adapter
            .cast()
            .map_err(|e| WinError::new(e, "IDXGIAdapter1::cast"))?;

        let mut device = None;
        let mut context = None;
        let mut result =
            create_device(Some(&adapter), D3D_DRIVER_TYPE_UNKNOWN, &mut device, &mut context);

        if let Err(error) = &result {
            if error.code() == DXGI_ERROR_UNSUPPORTED {
                debug!("Adapter does not support D3D11, falling back to WARP");
                result = create_device(None, D3D_DRIVER_TYPE_WARP, &mut device, &mut context);
            }
        }
        result.map_err(|e| WinError::new(e, "D3D11CreateDevice"))?;

        let device = device.ok_or_else(|| WinError::from_hresult(E_POINTER, "D3D11CreateDevice"))?;
        let context =
            context.ok_or_else(|| WinError::from_hresult(E_POINTER, "D3D11CreateDevice"))?;

        Ok(Self {
            device: SendCom(device),
            context: Arc::new(Mutex::new(SendCom(context))),
        })
    }

    /// If the device has been removed or reset and must be recreated.
    pub fn is_lost(&self) -> bool {
        unsafe { self.device.GetDeviceRemovedReason() }.is_err()
    }

    /// The device pointer.
    pub fn native(&self) -> NativeDevice {
        NativeDevice(self.device.as_raw() as usize)
    }
}

fn create_device(
    adapter: Option<&IDXGIAdapter>,
    driver_type: D3D_DRIVER_TYPE,
    device: &mut Option<ID3D11Device>,
    context: &mut Option<ID3D11DeviceContext>,
) -> WindowsResult<()> {
    unsafe {
        D3D11CreateDevice(
            adapter,
            driver_type,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            None,
            D3D11_SDK_VERSION,
            Some(device),
            None,
            Some(context),
        )
    }
}
