use alloc::sync::Arc;
use core::{fmt, marker::PhantomData, slice};

use tracing::{debug, error, instrument};

use crate::{CaptureHandle, ComputeBackend, ComputeManager, ImageDesc, SignalList};

use super::{InteropError, SharedOperation, SharingFunctions};

/// Turns captured frames into compute images, sharing the capture surface where the context
/// allows it and uploading a host copy otherwise.
pub struct ImageFactory<B: ComputeBackend> {
    manager: Arc<ComputeManager<B>>,
}

impl<B: ComputeBackend> ImageFactory<B> {
    /// Create a factory over a compute manager's capability cache.
    pub fn new(manager: Arc<ComputeManager<B>>) -> Self {
        Self { manager }
    }

    /// Create a compute image of a frame.
    ///
    /// If the context shares surfaces with the frame's graphics device the surface is wrapped
    /// directly and must be acquired and released around its use. Otherwise the frame is mapped
    /// and uploaded into `existing` if it matches the frame, or into a new image.
    #[instrument(skip_all, err)]
    pub fn create_image<'capture>(
        &self,
        capture: &'capture CaptureHandle,
        context: &B::Context,
        queue: &B::Queue,
        existing: Option<&B::Mem>,
    ) -> Result<GpuImage<'capture, B>, InteropError> {
        let backend = self.manager.backend();
        let capability = self.manager.capabilities().get(context)?;

        if let (Some(functions), Some(surface)) = (
            capability.sharing_with(capture.device()),
            capture.native_surface(),
        ) {
            match backend.create_shared_image(functions.create_shared_image, context, surface) {
                Ok(image) => {
                    return Ok(GpuImage {
                        backend: Arc::clone(backend),
                        image,
                        sharing: Some(*functions),
                        upload: None,
                        owned: true,
                        acquired_on: None,
                        _capture: PhantomData,
                    });
                }
                Err(e) => debug!("Falling back to a host copy:\n{e}"),
            }
        }

        let frame = capture.map().map_err(InteropError::Map)?;
        let desc = ImageDesc {
            size: frame.size,
            format: frame.format,
        };

        let reusable = existing.filter(|image| match backend.image_desc(image) {
            Ok(existing_desc) if existing_desc == desc => true,
            Ok(existing_desc) => {
                debug!("Existing image is {existing_desc:?}, frame is {desc:?}");
                false
            }
            Err(e) => {
                debug!("Failed to describe the existing image:\n{e}");
                false
            }
        });

        let (image, owned) = match reusable {
            Some(image) => (image.clone(), false),
            None => (
                backend
                    .create_image(context, desc)
                    .map_err(InteropError::CreateImage)?,
                true,
            ),
        };

        let upload = match backend.enqueue_write_image(queue, &image, frame, &[]) {
            Ok(upload) => upload,
            Err(e) => {
                if owned {
                    backend.release_mem(image);
                }
                return Err(InteropError::Upload(e));
            }
        };

        Ok(GpuImage {
            backend: Arc::clone(backend),
            image,
            sharing: None,
            upload: Some(upload),
            owned,
            acquired_on: None,
            _capture: PhantomData,
        })
    }
}

/// A compute image of a captured frame.
///
/// Borrows the frame, so the frame cannot be released while the image is alive. A shared image
/// must be bracketed with [`GpuImage::acquire`] and [`GpuImage::release`].
pub struct GpuImage<'capture, B: ComputeBackend> {
    backend: Arc<B>,
    image: B::Mem,
    sharing: Option<SharingFunctions<B::EntryPoint>>,
    upload: Option<B::Event>,
    owned: bool,
    acquired_on: Option<B::Queue>,
    _capture: PhantomData<&'capture CaptureHandle>,
}

impl<B: ComputeBackend> GpuImage<'_, B> {
    /// The compute image.
    pub fn image(&self) -> &B::Mem {
        &self.image
    }

    /// If the image wraps the capture surface and must be acquired and released.
    pub fn requires_acquire_release(&self) -> bool {
        self.sharing.is_some()
    }

    /// The upload of a host copied image.
    pub fn upload_signal(&self) -> Option<&B::Event> {
        self.upload.as_ref()
    }

    /// If the image is released with this handle rather than owned by the caller.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Make the image available to `queue`, recording the signal that produced it.
    ///
    /// A shared image enqueues the acquire, a host copied image records its upload.
    pub fn acquire(
        &mut self,
        queue: &B::Queue,
        signals: &mut SignalList<B>,
    ) -> Result<(), InteropError> {
        let image = &self.image;

        let Some(functions) = &self.sharing else {
            if let Some(upload) = &self.upload {
                if !signals.contains(upload) {
                    signals.push(upload.clone(), &[image]);
                }
            }
            return Ok(());
        };

        let wait = signals.producers_of(&[image]);
        let event = self
            .backend
            .enqueue_acquire_shared(
                functions.acquire_objects,
                queue,
                slice::from_ref(image),
                &wait,
            )
            .map_err(|source| InteropError::SharedSync {
                operation: SharedOperation::Acquire,
                source,
            })?;

        signals.push(event, &[image]);
        self.acquired_on = Some(queue.clone());

        Ok(())
    }

    /// Hand a shared image back to the graphics device once `readers` have completed.
    ///
    /// Does nothing for a host copied image.
    pub fn release(
        &mut self,
        queue: &B::Queue,
        readers: &[B::Event],
        signals: &mut SignalList<B>,
    ) -> Result<(), InteropError> {
        let Some(functions) = &self.sharing else {
            return Ok(());
        };
        if self.acquired_on.is_none() {
            return Ok(());
        }
        let image = &self.image;

        let event = self
            .backend
            .enqueue_release_shared(
                functions.release_objects,
                queue,
                slice::from_ref(image),
                readers,
            )
            .map_err(|source| InteropError::SharedSync {
                operation: SharedOperation::Release,
                source,
            })?;

        signals.push(event, &[]);
        self.acquired_on = None;

        Ok(())
    }

    /// Detach an owned host copied image so it can be reused for the next frame.
    ///
    /// Returns `None` for a shared or caller supplied image.
    pub fn into_image(mut self) -> Option<B::Mem> {
        if self.sharing.is_some() || !self.owned {
            return None;
        }

        self.owned = false;
        Some(self.image.clone())
    }
}

impl<B: ComputeBackend> Drop for GpuImage<'_, B> {
    fn drop(&mut self) {
        if let (Some(queue), Some(functions)) = (self.acquired_on.take(), &self.sharing) {
            error!("Shared image dropped while acquired, releasing it");

            let released = self
                .backend
                .enqueue_release_shared(
                    functions.release_objects,
                    &queue,
                    slice::from_ref(&self.image),
                    &[],
                )
                .and_then(|event| self.backend.wait_for_events(&[event]));
            if let Err(e) = released {
                error!("Failed to release shared image:\n{e}");
            }
        }

        if self.owned {
            self.backend.release_mem(self.image.clone());
        }
    }
}

impl<B: ComputeBackend> fmt::Debug for GpuImage<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuImage")
            .field("image", &self.image)
            .field("requires_acquire_release", &self.requires_acquire_release())
            .field("owned", &self.owned)
            .finish_non_exhaustive()
    }
}
