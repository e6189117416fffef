use alloc::sync::{Arc, Weak};
use core::{fmt, time::Duration};
use std::{collections::HashMap, time::Instant};

use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::{AcquiredFrame, DisplayBackend, Screen};

use super::{
    CancellationToken, CaptureError, CaptureHandle, CaptureOptions, CaptureStream,
    PendingCapture, RefKind, ResourceRef, SharedCaptureResources, TeardownScheduler,
    TeardownThread,
};

/// Which exclusive slot of a screen a consumer holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseKind {
    /// The screen's capture stream.
    Stream,
    /// The screen's in-flight single-shot capture.
    Capture,
}

impl fmt::Display for LeaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => f.write_str("capture stream"),
            Self::Capture => f.write_str("single-shot capture"),
        }
    }
}

type ResourceCell = Arc<Mutex<Option<Arc<SharedCaptureResources>>>>;

#[derive(Default)]
struct ScreenSlot {
    resources: ResourceCell,
    stream_open: bool,
    capture_open: bool,
}

impl ScreenSlot {
    fn flag(&mut self, kind: LeaseKind) -> &mut bool {
        match kind {
            LeaseKind::Stream => &mut self.stream_open,
            LeaseKind::Capture => &mut self.capture_open,
        }
    }
}

/// Owns the capture resources of every screen in use and the per-screen exclusivity slots.
pub struct CaptureRegistry {
    backend: Arc<dyn DisplayBackend>,
    scheduler: Arc<dyn TeardownScheduler>,
    options: CaptureOptions,
    screens: Mutex<HashMap<Screen, ScreenSlot>>,
    this: Weak<Self>,
}

impl CaptureRegistry {
    /// Create a registry over a display backend with an explicit teardown scheduler.
    pub fn new(
        backend: Arc<dyn DisplayBackend>,
        scheduler: Arc<dyn TeardownScheduler>,
        options: CaptureOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            backend,
            scheduler,
            options,
            screens: Mutex::new(HashMap::new()),
            this: this.clone(),
        })
    }

    /// Create a registry that runs teardowns on its own [`TeardownThread`].
    pub fn with_teardown_thread(
        backend: Arc<dyn DisplayBackend>,
        options: CaptureOptions,
    ) -> Result<Arc<Self>, CaptureError> {
        let scheduler = TeardownThread::spawn().map_err(CaptureError::SpawnThread)?;
        Ok(Self::new(backend, Arc::new(scheduler), options))
    }

    /// The registry's options.
    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// List the screens of the display backend.
    #[instrument(skip_all, err)]
    pub fn screens(&self) -> Result<Vec<Screen>, CaptureError> {
        self.backend
            .enumerate_screens()
            .map_err(CaptureError::EnumerateScreens)
    }

    /// The current resources of a screen, if it has been used.
    pub fn resources(&self, screen: &Screen) -> Option<Arc<SharedCaptureResources>> {
        let cell = self
            .screens
            .lock()
            .get(screen)
            .map(|slot| Arc::clone(&slot.resources))?;

        cell.lock().clone()
    }

    /// Take a reference on a screen's resources, creating them if there are none or the
    /// previous ones were torn down.
    ///
    /// Only the screen's own slot is locked while a duplication is opened.
    pub fn acquire(&self, screen: &Screen, kind: RefKind) -> Result<ResourceRef, CaptureError> {
        let cell = Arc::clone(
            &self
                .screens
                .lock()
                .entry(screen.clone())
                .or_default()
                .resources,
        );
        let mut slot = cell.lock();

        if let Some(resources) = slot.as_ref() {
            match resources.acquire(kind) {
                Ok(reference) => return Ok(reference),
                Err(CaptureError::Disposed(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let resources = self.open_resources(screen)?;
        let reference = resources.acquire(kind)?;
        *slot = Some(resources);

        Ok(reference)
    }

    #[instrument(skip_all, err)]
    fn open_resources(&self, screen: &Screen) -> Result<Arc<SharedCaptureResources>, CaptureError> {
        let duplication = self
            .backend
            .open_duplication(screen)
            .map_err(|source| CaptureError::OpenDuplication {
                screen: screen.clone(),
                source,
            })?;

        debug!("Opened duplication for {screen}");

        Ok(SharedCaptureResources::new(
            screen.clone(),
            duplication,
            self.options.teardown_grace,
            Arc::clone(&self.scheduler),
        ))
    }

    /// Open the capture stream of a screen.
    ///
    /// Fails with [`CaptureError::CaptureInUse`] if the screen already has a live stream.
    pub fn open_stream(&self, screen: &Screen) -> Result<CaptureStream, CaptureError> {
        let lease = self.claim(screen, LeaseKind::Stream)?;
        CaptureStream::spawn(self.registry()?, screen.clone(), lease)
    }

    /// Capture a single frame, waiting up to `wait` for one to be presented.
    ///
    /// Returns `Ok(None)` if no frame arrived in time. Fails with [`CaptureError::CaptureInUse`]
    /// if the screen already has a live single-shot capture. The slot stays held until the
    /// returned handle is dropped.
    pub fn capture_once(
        &self,
        screen: &Screen,
        wait: Duration,
    ) -> Result<Option<CaptureHandle>, CaptureError> {
        self.spawn_capture(screen, wait)?.wait()
    }

    /// Start a single-shot capture on a background thread.
    ///
    /// The exclusivity slot is claimed before returning, so contention fails immediately.
    pub fn spawn_capture(
        &self,
        screen: &Screen,
        wait: Duration,
    ) -> Result<PendingCapture, CaptureError> {
        let lease = self.claim(screen, LeaseKind::Capture)?;
        PendingCapture::spawn(self.registry()?, screen.clone(), wait, lease)
    }

    /// Poll for a non-empty frame until `deadline` or cancellation.
    pub(crate) fn poll_once(
        &self,
        screen: &Screen,
        deadline: Instant,
        lease: ExclusiveLease,
        token: &CancellationToken,
    ) -> Result<Option<CaptureHandle>, CaptureError> {
        while !token.is_cancelled() {
            let reference = self.acquire(screen, RefKind::Capture)?;
            let timeout = deadline
                .saturating_duration_since(Instant::now())
                .min(self.options.frame_timeout);

            let frame = match reference.resources().acquire_frame(timeout) {
                Ok(frame) => frame,
                Err(e) => {
                    if e.is_recoverable() {
                        reference.resources().invalidate();
                    }
                    return Err(e);
                }
            };

            match frame {
                AcquiredFrame::Frame { surface, info } => {
                    return Ok(Some(CaptureHandle::new(
                        screen.clone(),
                        surface,
                        info,
                        reference,
                        Some(lease),
                    )));
                }

                AcquiredFrame::Empty | AcquiredFrame::Timeout => {
                    if Instant::now() >= deadline {
                        debug!("No frame presented on {screen} within the wait");
                        return Ok(None);
                    }
                }
            }
        }

        debug!("Single-shot capture of {screen} cancelled");
        Ok(None)
    }

    pub(crate) fn claim(
        &self,
        screen: &Screen,
        kind: LeaseKind,
    ) -> Result<ExclusiveLease, CaptureError> {
        let registry = self.registry()?;

        let mut screens = self.screens.lock();
        let flag = screens.entry(screen.clone()).or_default().flag(kind);
        if *flag {
            return Err(CaptureError::CaptureInUse {
                screen: screen.clone(),
                kind,
            });
        }
        *flag = true;

        Ok(ExclusiveLease {
            registry,
            screen: screen.clone(),
            kind,
        })
    }

    fn registry(&self) -> Result<Arc<Self>, CaptureError> {
        self.this.upgrade().ok_or(CaptureError::StreamTerminated)
    }
}

/// A held exclusivity slot, freed on drop.
pub(crate) struct ExclusiveLease {
    registry: Arc<CaptureRegistry>,
    screen: Screen,
    kind: LeaseKind,
}

impl Drop for ExclusiveLease {
    fn drop(&mut self) {
        if let Some(slot) = self.registry.screens.lock().get_mut(&self.screen) {
            *slot.flag(self.kind) = false;
        }
    }
}
