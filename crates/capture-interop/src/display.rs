//! The display capture collaborator.

use core::time::Duration;
use std::time::Instant;

use crate::{BackendResult, Screen};

/// Opaque native handle of a per-frame graphics surface, e.g. an `ID3D11Texture2D` pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeSurface(pub usize);

/// Opaque native handle of the graphics device that owns a duplication, e.g. an
/// `ID3D11Device` pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeDevice(pub usize);

/// Pixel formats a frame surface can have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit unsigned normalized, blue first.
    Bgra8,
    /// 8-bit unsigned normalized, red first.
    Rgba8,
    /// 16-bit float scRGB.
    Rgba16Float,
}

impl PixelFormat {
    /// The size of one pixel in bytes.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgra8 | Self::Rgba8 => 4,
            Self::Rgba16Float => 8,
        }
    }
}

/// Metadata of an acquired frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameInfo {
    /// When the frame was acquired.
    pub timestamp: Instant,
    /// Width and height in pixels.
    pub size: [u32; 2],
    /// Format of the surface.
    pub format: PixelFormat,
    /// Frames the compositor presented since the previous acquisition.
    pub accumulated_frames: u32,
}

/// A frame surface copied into host memory.
#[derive(Clone, Debug)]
pub struct HostFrame {
    /// Width and height in pixels.
    pub size: [u32; 2],
    /// Format of the pixels.
    pub format: PixelFormat,
    /// Bytes between the start of two rows, at least `width * bytes_per_pixel`.
    pub row_pitch: usize,
    /// Pixel data, `row_pitch * height` bytes.
    pub data: Box<[u8]>,
}

impl HostFrame {
    /// Create a frame with no row padding.
    pub fn packed(size: [u32; 2], format: PixelFormat, data: Box<[u8]>) -> Self {
        Self {
            size,
            format,
            row_pitch: size[0] as usize * format.bytes_per_pixel(),
            data,
        }
    }

    /// The pixel bytes of a row excluding any padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.row_pitch;
        let length = self.size[0] as usize * self.format.bytes_per_pixel();
        &self.data[start..start + length]
    }

    /// If the data is large enough for the size, format and row pitch.
    pub fn is_well_formed(&self) -> bool {
        let row_bytes = self.size[0] as usize * self.format.bytes_per_pixel();
        self.row_pitch >= row_bytes
            && (self.size[1] == 0
                || self.data.len()
                    >= self.row_pitch * (self.size[1] as usize - 1) + row_bytes)
    }
}

/// A graphics surface holding one acquired frame.
pub trait FrameSurface: Send + Sync {
    /// The native surface handle used for zero-copy sharing.
    fn native(&self) -> NativeSurface;

    /// Copy the surface into host memory. Synchronous.
    fn map(&self) -> BackendResult<HostFrame>;
}

/// The outcome of one acquire attempt.
pub enum AcquiredFrame {
    /// A new frame, must be handed back through [`Duplication::release_frame`].
    Frame {
        /// The frame's surface.
        surface: Box<dyn FrameSurface>,
        /// The frame's metadata.
        info: FrameInfo,
    },

    /// The acquire succeeded but nothing new was presented.
    Empty,

    /// No frame arrived within the timeout.
    Timeout,
}

/// The native adapter, device, and duplication for one display output.
pub trait Duplication: Send {
    /// The graphics device the frame surfaces belong to.
    fn native_device(&self) -> NativeDevice;

    /// Wait up to `timeout` for the next frame.
    fn acquire_next_frame(&mut self, timeout: Duration) -> BackendResult<AcquiredFrame>;

    /// Hand a frame surface back to the duplication.
    fn release_frame(&mut self, surface: Box<dyn FrameSurface>) -> BackendResult<()>;
}

/// A display capture API.
pub trait DisplayBackend: Send + Sync {
    /// List the screens that can currently be captured.
    fn enumerate_screens(&self) -> BackendResult<Vec<Screen>>;

    /// Create the adapter, device, and duplication for a screen.
    fn open_duplication(&self, screen: &Screen) -> BackendResult<Box<dyn Duplication>>;
}

#[cfg(test)]
mod tests {
    use super::{HostFrame, PixelFormat};

    #[test]
    fn padded_rows() {
        let frame = HostFrame {
            size: [2, 2],
            format: PixelFormat::Rgba8,
            row_pitch: 12,
            data: (0u8..20).collect(),
        };

        assert!(frame.is_well_formed());
        assert_eq!(frame.row(1), &[12, 13, 14, 15, 16, 17, 18, 19]);

        let short = HostFrame {
            data: vec![0; 19].into_boxed_slice(),
            ..frame
        };
        assert!(!short.is_well_formed());
    }
}
