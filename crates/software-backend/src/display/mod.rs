//! A display backend producing generated frames.

use alloc::sync::Arc;
use core::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use std::time::Instant;

use capture_interop::{
    AcquiredFrame, AdapterId, BackendError, BackendResult, DisplayBackend, Duplication, FrameInfo,
    FrameSurface, HostFrame, NativeDevice, NativeSurface, Screen,
};
use tracing::debug;

pub use source::{FrameSource, ScriptStep, ScriptedFrames, SourceFrame, TestPattern};

mod source;

/// Creates the frame source of a new duplication.
type SourceFactory = dyn Fn() -> Box<dyn FrameSource> + Send + Sync;

/// A screen of a [`SyntheticDisplay`].
#[derive(Clone)]
pub struct SyntheticScreen {
    screen: Screen,
    source: Arc<SourceFactory>,
}

impl SyntheticScreen {
    /// A screen whose duplications read from a new source created by `source`.
    pub fn new<F>(screen: Screen, source: F) -> Self
    where
        F: Fn() -> Box<dyn FrameSource> + Send + Sync + 'static,
    {
        Self {
            screen,
            source: Arc::new(source),
        }
    }

    /// A screen showing a [`TestPattern`] that presents every `interval`.
    pub fn test_pattern(screen: Screen, interval: Duration) -> Self {
        let size = screen.size();
        Self::new(screen, move || Box::new(TestPattern::new(size, interval)))
    }

    /// The screen.
    pub fn screen(&self) -> &Screen {
        &self.screen
    }
}

/// A display backend whose screens produce frames from a [`FrameSource`].
///
/// Every opened duplication gets a distinct native device, and every frame a distinct native
/// surface.
pub struct SyntheticDisplay {
    screens: Vec<SyntheticScreen>,
    next_handle: Arc<AtomicUsize>,
    opened: AtomicUsize,
}

impl SyntheticDisplay {
    /// Create a display with the given screens.
    pub fn new(screens: Vec<SyntheticScreen>) -> Self {
        Self {
            screens,
            next_handle: Arc::new(AtomicUsize::new(1)),
            opened: AtomicUsize::new(0),
        }
    }

    /// Create a display of `count` test pattern screens side by side on one adapter.
    pub fn with_test_patterns(count: usize, size: [u32; 2], interval: Duration) -> Self {
        let screens = (0..count)
            .map(|index| {
                let screen = Screen::new(AdapterId(1), format!("SYNTHETIC{}", index + 1), size)
                    .with_origin([(index as u32 * size[0]) as i32, 0]);
                SyntheticScreen::test_pattern(screen, interval)
            })
            .collect();

        Self::new(screens)
    }

    /// How many duplications have been opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }
}

impl DisplayBackend for SyntheticDisplay {
    fn enumerate_screens(&self) -> BackendResult<Vec<Screen>> {
        Ok(self
            .screens
            .iter()
            .map(|screen| screen.screen.clone())
            .collect())
    }

    fn open_duplication(&self, screen: &Screen) -> BackendResult<Box<dyn Duplication>> {
        let synthetic = self
            .screens
            .iter()
            .find(|synthetic| synthetic.screen == *screen)
            .ok_or_else(|| {
                BackendError::message(format!("{screen} is not connected"), "DuplicateOutput")
            })?;

        self.opened.fetch_add(1, Ordering::AcqRel);
        let device = NativeDevice(self.next_handle.fetch_add(1, Ordering::Relaxed));
        debug!("Opened synthetic duplication of {screen} on device {:#x}", device.0);

        Ok(Box::new(SyntheticDuplication {
            device,
            source: (synthetic.source)(),
            handles: Arc::clone(&self.next_handle),
        }))
    }
}

struct SyntheticDuplication {
    device: NativeDevice,
    source: Box<dyn FrameSource>,
    handles: Arc<AtomicUsize>,
}

impl Duplication for SyntheticDuplication {
    fn native_device(&self) -> NativeDevice {
        self.device
    }

    fn acquire_next_frame(&mut self, timeout: Duration) -> BackendResult<AcquiredFrame> {
        let frame = match self.source.next_frame(timeout)? {
            SourceFrame::Frame(frame) => frame,
            SourceFrame::Empty => return Ok(AcquiredFrame::Empty),
            SourceFrame::Timeout => return Ok(AcquiredFrame::Timeout),
        };

        let info = FrameInfo {
            timestamp: Instant::now(),
            size: frame.size,
            format: frame.format,
            accumulated_frames: 1,
        };
        let surface = SyntheticSurface {
            native: NativeSurface(self.handles.fetch_add(1, Ordering::Relaxed)),
            frame: Arc::new(frame),
        };

        Ok(AcquiredFrame::Frame {
            surface: Box::new(surface),
            info,
        })
    }

    fn release_frame(&mut self, _surface: Box<dyn FrameSurface>) -> BackendResult<()> {
        Ok(())
    }
}

struct SyntheticSurface {
    native: NativeSurface,
    frame: Arc<HostFrame>,
}

impl FrameSurface for SyntheticSurface {
    fn native(&self) -> NativeSurface {
        self.native
    }

    fn map(&self) -> BackendResult<HostFrame> {
        Ok(HostFrame::clone(&self.frame))
    }
}
