use alloc::sync::{Arc, Weak};
use core::{
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{AcquiredFrame, Duplication, FrameSurface, NativeDevice, Screen};

use super::{CaptureError, TeardownScheduler};

/// Lifecycle of a [`SharedCaptureResources`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    /// At least one reference is held.
    Referenced,
    /// No references are held, a teardown is pending.
    Draining,
    /// The native handles have been released, the instance is unusable.
    Disposed,
}

/// The kind of demand a [`ResourceRef`] represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefKind {
    /// A capture stream.
    Stream,
    /// An in-flight single-shot capture.
    Capture,
}

/// The native capture resources for one screen, shared by every stream and capture of it.
///
/// The duplication stays alive while any [`ResourceRef`] is held and for a grace window after
/// the last one is dropped.
pub struct SharedCaptureResources {
    screen: Screen,
    device: NativeDevice,
    duplication: Mutex<Option<Box<dyn Duplication>>>,

    stream_refs: AtomicUsize,
    capture_refs: AtomicUsize,
    dirty: AtomicBool,
    epoch: AtomicU64,
    state: Mutex<ResourceState>,

    grace: Duration,
    scheduler: Arc<dyn TeardownScheduler>,
    this: Weak<Self>,
}

impl SharedCaptureResources {
    /// Take ownership of a screen's duplication.
    ///
    /// The instance starts out draining, it is torn down after the grace window unless a
    /// reference is acquired.
    pub fn new(
        screen: Screen,
        duplication: Box<dyn Duplication>,
        grace: Duration,
        scheduler: Arc<dyn TeardownScheduler>,
    ) -> Arc<Self> {
        let resources = Arc::new_cyclic(|this| Self {
            screen,
            device: duplication.native_device(),
            duplication: Mutex::new(Some(duplication)),
            stream_refs: AtomicUsize::new(0),
            capture_refs: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            state: Mutex::new(ResourceState::Draining),
            grace,
            scheduler,
            this: this.clone(),
        });

        resources.schedule_teardown(0);
        resources
    }

    /// Take a reference, cancelling any pending teardown.
    pub fn acquire(&self, kind: RefKind) -> Result<ResourceRef, CaptureError> {
        let mut state = self.state.lock();
        if *state == ResourceState::Disposed {
            return Err(CaptureError::Disposed(self.screen.clone()));
        }

        let resources = self
            .this
            .upgrade()
            .ok_or_else(|| CaptureError::Disposed(self.screen.clone()))?;

        self.counter(kind).fetch_add(1, Ordering::AcqRel);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.dirty.store(true, Ordering::Release);

        if *state == ResourceState::Draining {
            debug!("Resumed capture resources for {}", self.screen);
        }
        *state = ResourceState::Referenced;

        Ok(ResourceRef { resources, kind })
    }

    /// Take a stream reference.
    pub fn acquire_stream(&self) -> Result<ResourceRef, CaptureError> {
        self.acquire(RefKind::Stream)
    }

    /// Take a single-shot capture reference.
    pub fn acquire_capture(&self) -> Result<ResourceRef, CaptureError> {
        self.acquire(RefKind::Capture)
    }

    fn release(&self, kind: RefKind) {
        let epoch = {
            let mut state = self.state.lock();

            let previous = self.counter(kind).fetch_sub(1, Ordering::AcqRel);
            debug_assert!(previous > 0, "released a {kind:?} reference that was not held");
            self.dirty.store(true, Ordering::Release);

            if self.total_refs() != 0 || *state != ResourceState::Referenced {
                return;
            }

            *state = ResourceState::Draining;
            self.epoch.fetch_add(1, Ordering::AcqRel) + 1
        };

        debug!("Draining capture resources for {}", self.screen);
        self.schedule_teardown(epoch);
    }

    fn schedule_teardown(&self, epoch: u64) {
        let resources = self.this.clone();
        self.scheduler.schedule(
            self.grace,
            Box::new(move || {
                if let Some(resources) = resources.upgrade() {
                    resources.teardown_if_current(epoch);
                }
            }),
        );
    }

    /// Tear down if no acquire or release has happened since the teardown for `epoch` was
    /// scheduled. Returns whether the teardown happened.
    pub fn teardown_if_current(&self, epoch: u64) -> bool {
        let duplication = {
            let mut state = self.state.lock();
            let was_dirty = self.dirty.swap(false, Ordering::AcqRel);

            if *state != ResourceState::Draining || self.epoch.load(Ordering::Acquire) != epoch {
                if was_dirty {
                    debug!("Teardown of {} superseded", self.screen);
                }
                return false;
            }

            *state = ResourceState::Disposed;
            self.duplication.lock().take()
        };

        drop(duplication);
        debug!("Tore down capture resources for {}", self.screen);
        true
    }

    /// Tear down immediately regardless of references, e.g. after access to the output was lost.
    ///
    /// Held references stay valid to drop, frames released afterwards are discarded.
    pub fn invalidate(&self) {
        let duplication = {
            let mut state = self.state.lock();
            if *state == ResourceState::Disposed {
                return;
            }

            *state = ResourceState::Disposed;
            self.epoch.fetch_add(1, Ordering::AcqRel);
            self.duplication.lock().take()
        };

        drop(duplication);
        debug!("Invalidated capture resources for {}", self.screen);
    }

    pub(crate) fn acquire_frame(&self, timeout: Duration) -> Result<AcquiredFrame, CaptureError> {
        let mut duplication = self.duplication.lock();
        let duplication = duplication
            .as_mut()
            .ok_or_else(|| CaptureError::Disposed(self.screen.clone()))?;

        duplication
            .acquire_next_frame(timeout)
            .map_err(CaptureError::AcquireFrame)
    }

    pub(crate) fn release_frame(&self, surface: Box<dyn FrameSurface>) -> Result<(), CaptureError> {
        let mut duplication = self.duplication.lock();
        let Some(duplication) = duplication.as_mut() else {
            debug!("Discarding a frame of torn down resources for {}", self.screen);
            return Ok(());
        };

        duplication
            .release_frame(surface)
            .map_err(CaptureError::ReleaseFrame)
    }

    fn counter(&self, kind: RefKind) -> &AtomicUsize {
        match kind {
            RefKind::Stream => &self.stream_refs,
            RefKind::Capture => &self.capture_refs,
        }
    }

    fn total_refs(&self) -> usize {
        self.stream_refs.load(Ordering::Acquire) + self.capture_refs.load(Ordering::Acquire)
    }

    /// The screen these resources capture.
    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    /// The graphics device the frame surfaces belong to.
    pub fn device(&self) -> NativeDevice {
        self.device
    }

    /// Number of held stream references.
    pub fn stream_refs(&self) -> usize {
        self.stream_refs.load(Ordering::Acquire)
    }

    /// Number of held single-shot capture references.
    pub fn capture_refs(&self) -> usize {
        self.capture_refs.load(Ordering::Acquire)
    }

    /// If there has been an acquire or release since the last teardown check.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// The current epoch, bumped by every acquire, drain, and invalidation.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// The current state.
    pub fn state(&self) -> ResourceState {
        *self.state.lock()
    }

    /// If the native handles have been released.
    pub fn is_disposed(&self) -> bool {
        self.state() == ResourceState::Disposed
    }
}

impl core::fmt::Debug for SharedCaptureResources {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedCaptureResources")
            .field("screen", &self.screen)
            .field("stream_refs", &self.stream_refs())
            .field("capture_refs", &self.capture_refs())
            .field("epoch", &self.epoch())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// A held reference on [`SharedCaptureResources`], released on drop.
pub struct ResourceRef {
    resources: Arc<SharedCaptureResources>,
    kind: RefKind,
}

impl ResourceRef {
    /// The referenced resources.
    pub fn resources(&self) -> &Arc<SharedCaptureResources> {
        &self.resources
    }

    /// The kind of demand this reference represents.
    pub fn kind(&self) -> RefKind {
        self.kind
    }
}

impl Drop for ResourceRef {
    fn drop(&mut self) {
        self.resources.release(self.kind);
    }
}

impl core::fmt::Debug for ResourceRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ResourceRef")
            .field("screen", &self.resources.screen)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for SharedCaptureResources {
    fn drop(&mut self) {
        if self.duplication.get_mut().is_some() {
            debug!("Releasing capture resources for {} on drop", self.screen);
        }
    }
}
