use alloc::sync::Arc;
use std::collections::HashMap;

use parking_lot::RwLock;

use crate::{BackendError, ComputeBackend, NativeDevice};

use super::{CapabilityError, CapabilityDetector, PlatformCapability, SharingFunctions};

/// What sharing a compute context supports.
#[derive(Debug)]
pub struct ContextCapability<F> {
    platform: Arc<PlatformCapability<F>>,
    interop_device: Option<NativeDevice>,
}

impl<F> ContextCapability<F> {
    /// The capability of the context's platform.
    pub fn platform(&self) -> &PlatformCapability<F> {
        &self.platform
    }

    /// The graphics device the context was created with interop for.
    pub fn interop_device(&self) -> Option<NativeDevice> {
        self.interop_device
    }

    /// The sharing functions, if the platform supports sharing and the context was created with
    /// interop for `device`.
    pub fn sharing_with(&self, device: NativeDevice) -> Option<&SharingFunctions<F>> {
        if self.interop_device != Some(device) {
            return None;
        }

        self.platform.functions()
    }
}

/// Memoizes the [`ContextCapability`] of every context.
pub struct ContextCapabilities<B: ComputeBackend> {
    backend: Arc<B>,
    detector: CapabilityDetector<B>,
    contexts: RwLock<HashMap<B::Context, Arc<ContextCapability<B::EntryPoint>>>>,
}

impl<B: ComputeBackend> ContextCapabilities<B> {
    /// Create an empty cache.
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            detector: CapabilityDetector::new(Arc::clone(&backend)),
            backend,
            contexts: RwLock::new(HashMap::new()),
        }
    }

    /// The platform detector backing the cache.
    pub fn detector(&self) -> &CapabilityDetector<B> {
        &self.detector
    }

    /// The capability of a context, computing it on first use.
    pub fn get(
        &self,
        context: &B::Context,
    ) -> Result<Arc<ContextCapability<B::EntryPoint>>, CapabilityError> {
        if let Some(capability) = self.contexts.read().get(context) {
            return Ok(Arc::clone(capability));
        }

        let query_error = |source: BackendError| CapabilityError::QueryContext {
            context: format!("{context:?}"),
            source,
        };

        let platform = self
            .backend
            .context_platform(context)
            .map_err(query_error)?;
        let interop_device = self
            .backend
            .context_interop_device(context)
            .map_err(query_error)?;

        let capability = Arc::new(ContextCapability {
            platform: self.detector.detect(platform)?,
            interop_device,
        });

        Ok(Arc::clone(
            self.contexts
                .write()
                .entry(context.clone())
                .or_insert(capability),
        ))
    }
}
