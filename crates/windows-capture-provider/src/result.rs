use core::fmt::Display;

use capture_interop::{BackendError, BackendErrorSource};
use thiserror::Error;
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET,
};
use windows_core::HRESULT;

/// A shortcut for `Result<T, WinError>`.
pub type LabelledWinResult<T> = Result<T, WinError>;

/// A Windows Result wrapped with some context for the call that triggered the error.
#[derive(Debug, Error)]
pub struct WinError {
    call: &'static str,
    #[source]
    source: WinErrorSource,
}

/// Possible sources for a WinError.
#[derive(Debug, Error)]
pub enum WinErrorSource {
    /// A [windows_result::Error].
    #[error(transparent)]
    WindowsError(#[from] windows_result::Error),

    /// An [HRESULT].
    #[error("HRESULT: {0}")]
    HResult(HRESULT),
}

impl WinError {
    /// Create a WinError from a `windows_result::Error` and a label.
    pub fn new(source: windows_result::Error, call: &'static str) -> Self {
        Self {
            call,
            source: source.into(),
        }
    }

    /// Create a new WinError from an `HRESULT` and a label.
    pub fn from_hresult(source: HRESULT, call: &'static str) -> Self {
        Self {
            call,
            source: WinErrorSource::HResult(source),
        }
    }

    /// The failing `HRESULT`.
    pub fn code(&self) -> HRESULT {
        match &self.source {
            WinErrorSource::WindowsError(error) => error.code(),
            WinErrorSource::HResult(code) => *code,
        }
    }
}

impl Display for WinError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Windows {} call failed:\n{}", self.call, self.source)
    }
}

impl From<WinError> for BackendError {
    fn from(error: WinError) -> Self {
        let code = error.code();

        if code == DXGI_ERROR_ACCESS_LOST {
            Self::access_lost(error.call)
        } else if code == DXGI_ERROR_DEVICE_REMOVED || code == DXGI_ERROR_DEVICE_RESET {
            Self::new(BackendErrorSource::DeviceRemoved, error.call)
        } else {
            Self::other(error.source, error.call)
        }
    }
}
