use alloc::sync::Arc;
use core::time::Duration;
use std::time::Instant;

use capture_interop::{
    AcquiredFrame, BackendResult, Duplication, FrameInfo, FrameSurface, HostFrame, NativeDevice,
    NativeSurface, PixelFormat,
};
use parking_lot::Mutex;
use tracing::instrument;
use windows::Win32::{
    Foundation::E_POINTER,
    Graphics::{
        Direct3D11::{
            D3D11_BIND_SHADER_RESOURCE, D3D11_CPU_ACCESS_READ, D3D11_MAP_READ,
            D3D11_MAPPED_SUBRESOURCE, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
            D3D11_USAGE_STAGING, ID3D11Device, ID3D11DeviceContext, ID3D11Resource,
            ID3D11Texture2D,
        },
        Dxgi::{
            Common::{
                DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_R8G8B8A8_UNORM,
                DXGI_FORMAT_R16G16B16A16_FLOAT, DXGI_SAMPLE_DESC,
            },
            DXGI_ERROR_UNSUPPORTED, DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO,
            IDXGIOutput, IDXGIOutput1, IDXGIOutput5, IDXGIOutputDuplication, IDXGIResource,
        },
    },
};
use windows_core::Interface;

use crate::{
    direct3d::Direct3D,
    outputs::Output,
    result::{LabelledWinResult, WinError},
    send::SendCom,
};

/// The desktop duplication of one output.
///
/// Acquired frames are copied into a texture owned by the frame and handed back to DXGI before
/// `acquire_next_frame` returns, so any number of frames can be alive at once.
pub(crate) struct DxgiDuplication {
    direct3d: Direct3D,
    duplication: SendCom<IDXGIOutputDuplication>,
}

impl DxgiDuplication {
    #[instrument("DxgiDuplication::new", skip_all, fields(screen = %output.screen), err)]
    pub fn new(output: &Output, direct3d: Direct3D) -> LabelledWinResult<Self> {
        let duplication = duplicate(&output.output, &direct3d.device)?;

        Ok(Self {
            direct3d,
            duplication: SendCom(duplication),
        })
    }

    fn copy_frame(&self, resource: Option<&IDXGIResource>) -> LabelledWinResult<DxgiSurface> {
        let resource = resource.ok_or_else(|| {
            WinError::from_hresult(E_POINTER, "IDXGIOutputDuplication::AcquireNextFrame")
        })?;
        let source: ID3D11Texture2D = resource
            .cast()
            .map_err(|e| WinError::new(e, "IDXGIResource::cast"))?;

        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { source.GetDesc(&mut desc) };
        let format = pixel_format(desc.Format)
            .ok_or_else(|| WinError::from_hresult(DXGI_ERROR_UNSUPPORTED, "pixel_format"))?;

        let frame_desc = D3D11_TEXTURE2D_DESC {
            MipLevels: 1,
            ArraySize: 1,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
            CPUAccessFlags: Default::default(),
            MiscFlags: Default::default(),
            ..desc
        };
        let texture = create_texture(&self.direct3d.device, &frame_desc)?;

        copy_resource(&self.direct3d.context.lock(), &texture, &source)?;

        Ok(DxgiSurface {
            texture: SendCom(texture),
            device: self.direct3d.device.clone(),
            context: Arc::clone(&self.direct3d.context),
            size: [desc.Width, desc.Height],
            format,
        })
    }
}

impl Duplication for DxgiDuplication {
    fn native_device(&self) -> NativeDevice {
        self.direct3d.native()
    }

    fn acquire_next_frame(&mut self, timeout: Duration) -> BackendResult<AcquiredFrame> {
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;

        let acquired = unsafe {
            self.duplication
                .AcquireNextFrame(timeout_ms, &mut info, &mut resource)
        };
        if let Err(e) = acquired {
            if e.code() == DXGI_ERROR_WAIT_TIMEOUT {
                return Ok(AcquiredFrame::Timeout);
            }
            return Err(WinError::new(e, "IDXGIOutputDuplication::AcquireNextFrame").into());
        }

        // Only the pointer moved if nothing was presented.
        let copied = if info.AccumulatedFrames == 0 {
            Ok(None)
        } else {
            self.copy_frame(resource.as_ref()).map(Some)
        };
        drop(resource);

        unsafe { self.duplication.ReleaseFrame() }
            .map_err(|e| WinError::new(e, "IDXGIOutputDuplication::ReleaseFrame"))?;

        let Some(surface) = copied? else {
            return Ok(AcquiredFrame::Empty);
        };

        let info = FrameInfo {
            timestamp: Instant::now(),
            size: surface.size,
            format: surface.format,
            accumulated_frames: info.AccumulatedFrames,
        };

        Ok(AcquiredFrame::Frame {
            surface: Box::new(surface),
            info,
        })
    }

    fn release_frame(&mut self, surface: Box<dyn FrameSurface>) -> BackendResult<()> {
        drop(surface);
        Ok(())
    }
}

/// A copy of one duplicated frame in a texture on the duplication's device.
struct DxgiSurface {
    texture: SendCom<ID3D11Texture2D>,
    device: SendCom<ID3D11Device>,
    context: Arc<Mutex<SendCom<ID3D11DeviceContext>>>,
    size: [u32; 2],
    format: PixelFormat,
}

impl DxgiSurface {
    fn map_staging(&self) -> LabelledWinResult<HostFrame> {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { self.texture.GetDesc(&mut desc) };

        let staging_desc = D3D11_TEXTURE2D_DESC {
            Usage: D3D11_USAGE_STAGING,
            BindFlags: Default::default(),
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: Default::default(),
            ..desc
        };
        let staging = create_texture(&self.device, &staging_desc)?;
        let staging: ID3D11Resource = staging
            .cast()
            .map_err(|e| WinError::new(e, "ID3D11Texture2D::cast"))?;

        let context = self.context.lock();
        copy_resource(&context, &staging, &self.texture.0)?;

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe { context.Map(&staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
            .map_err(|e| WinError::new(e, "ID3D11DeviceContext::Map"))?;

        let row_pitch = mapped.RowPitch as usize;
        let length = row_pitch * desc.Height as usize;
        let data: Box<[u8]> =
            unsafe { core::slice::from_raw_parts(mapped.pData as *const u8, length) }.into();

        unsafe { context.Unmap(&staging, 0) };

        Ok(HostFrame {
            size: self.size,
            format: self.format,
            row_pitch,
            data,
        })
    }
}

impl FrameSurface for DxgiSurface {
    fn native(&self) -> NativeSurface {
        NativeSurface(self.texture.as_raw() as usize)
    }

    fn map(&self) -> BackendResult<HostFrame> {
        Ok(self.map_staging()?)
    }
}

/// Duplicate an output, preferring FP16 frames on HDR outputs.
fn duplicate(output: &IDXGIOutput, device: &ID3D11Device) -> LabelledWinResult<IDXGIOutputDuplication> {
    if let Ok(output5) = output.cast::<IDXGIOutput5>() {
        let formats = [DXGI_FORMAT_R16G16B16A16_FLOAT, DXGI_FORMAT_B8G8R8A8_UNORM];
        if let Ok(duplication) = unsafe { output5.DuplicateOutput1(device, 0, &formats) } {
            return Ok(duplication);
        }
    }

    let output1: IDXGIOutput1 = output
        .cast()
        .map_err(|e| WinError::new(e, "IDXGIOutput::cast"))?;
    unsafe { output1.DuplicateOutput(device) }
        .map_err(|e| WinError::new(e, "IDXGIOutput1::DuplicateOutput"))
}

fn create_texture(
    device: &ID3D11Device,
    desc: &D3D11_TEXTURE2D_DESC,
) -> LabelledWinResult<ID3D11Texture2D> {
    let mut texture = None;
    unsafe { device.CreateTexture2D(desc, None, Some(&mut texture)) }
        .map_err(|e| WinError::new(e, "ID3D11Device::CreateTexture2D"))?;

    texture.ok_or_else(|| WinError::from_hresult(E_POINTER, "ID3D11Device::CreateTexture2D"))
}

fn copy_resource<D: Interface, S: Interface>(
    context: &ID3D11DeviceContext,
    destination: &D,
    source: &S,
) -> LabelledWinResult<()> {
    let destination: ID3D11Resource = destination
        .cast()
        .map_err(|e| WinError::new(e, "cast to ID3D11Resource"))?;
    let source: ID3D11Resource = source
        .cast()
        .map_err(|e| WinError::new(e, "cast to ID3D11Resource"))?;

    unsafe { context.CopyResource(&destination, &source) };
    Ok(())
}

fn pixel_format(format: DXGI_FORMAT) -> Option<PixelFormat> {
    match format {
        DXGI_FORMAT_B8G8R8A8_UNORM => Some(PixelFormat::Bgra8),
        DXGI_FORMAT_R8G8B8A8_UNORM => Some(PixelFormat::Rgba8),
        DXGI_FORMAT_R16G16B16A16_FLOAT => Some(PixelFormat::Rgba16Float),
        _ => None,
    }
}
