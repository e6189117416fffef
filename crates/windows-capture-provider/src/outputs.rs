use capture_interop::{AdapterId, Screen};
use windows::Win32::{
    Foundation::{LUID, RECT},
    Graphics::Dxgi::{CreateDXGIFactory1, DXGI_ERROR_NOT_FOUND, IDXGIAdapter1, IDXGIFactory1, IDXGIOutput},
};

use crate::result::{LabelledWinResult, WinError};

/// A desktop attached output and the adapter it is connected to.
pub(crate) struct Output {
    pub screen: Screen,
    pub adapter: IDXGIAdapter1,
    pub output: IDXGIOutput,
}

/// Enumerate the desktop attached outputs of every adapter.
pub(crate) fn enumerate() -> LabelledWinResult<Vec<Output>> {
    let factory: IDXGIFactory1 =
        unsafe { CreateDXGIFactory1() }.map_err(|e| WinError::new(e, "CreateDXGIFactory1"))?;

    let mut outputs = vec![];
    let mut adapter_index = 0;

    loop {
        let adapter = match unsafe { factory.EnumAdapters1(adapter_index) } {
            Ok(adapter) => adapter,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => return Err(WinError::new(e, "IDXGIFactory1::EnumAdapters1")),
        };
        adapter_index += 1;

        let adapter_desc =
            unsafe { adapter.GetDesc1() }.map_err(|e| WinError::new(e, "IDXGIAdapter1::GetDesc1"))?;
        let adapter_id = adapter_id(adapter_desc.AdapterLuid);

        let mut output_index = 0;
        loop {
            let output = match unsafe { adapter.EnumOutputs(output_index) } {
                Ok(output) => output,
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => return Err(WinError::new(e, "IDXGIAdapter::EnumOutputs")),
            };
            output_index += 1;

            let desc =
                unsafe { output.GetDesc() }.map_err(|e| WinError::new(e, "IDXGIOutput::GetDesc"))?;
            if !desc.AttachedToDesktop.as_bool() {
                continue;
            }

            let (origin, size) = origin_size_from_rect(desc.DesktopCoordinates);
            let screen =
                Screen::new(adapter_id, utf16_name(&desc.DeviceName), size).with_origin(origin);

            outputs.push(Output {
                screen,
                adapter: adapter.clone(),
                output,
            });
        }
    }

    Ok(outputs)
}

fn adapter_id(luid: LUID) -> AdapterId {
    AdapterId((u64::from(luid.HighPart as u32) << 32) | u64::from(luid.LowPart))
}

fn utf16_name(name: &[u16]) -> String {
    let length = name.iter().position(|&c| c == 0).unwrap_or(name.len());
    String::from_utf16_lossy(&name[..length])
}

/// Returns the position and size of a rect.
fn origin_size_from_rect(rect: RECT) -> ([i32; 2], [u32; 2]) {
    let origin = [rect.left, rect.top];

    let width = (rect.right - rect.left).unsigned_abs();
    let height = (rect.bottom - rect.top).unsigned_abs();

    (origin, [width, height])
}
