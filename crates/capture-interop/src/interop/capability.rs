use alloc::sync::Arc;
use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, instrument};

use crate::ComputeBackend;

use super::CapabilityError;

/// A graphics sharing extension and the names of the four functions that implement it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SharingExtension {
    /// The name in the platform's extension string.
    pub name: &'static str,
    /// Lists the compute devices that can share with a graphics device.
    pub enumerate_devices: &'static str,
    /// Wraps a graphics surface as a compute image.
    pub create_from_surface: &'static str,
    /// Hands shared objects to the compute queue.
    pub acquire_objects: &'static str,
    /// Hands shared objects back to the graphics device.
    pub release_objects: &'static str,
}

/// `cl_khr_d3d11_sharing`
pub const D3D11_SHARING_KHR: SharingExtension = SharingExtension {
    name: "cl_khr_d3d11_sharing",
    enumerate_devices: "clGetDeviceIDsFromD3D11KHR",
    create_from_surface: "clCreateFromD3D11Texture2DKHR",
    acquire_objects: "clEnqueueAcquireD3D11ObjectsKHR",
    release_objects: "clEnqueueReleaseD3D11ObjectsKHR",
};

/// `cl_nv_d3d11_sharing`
pub const D3D11_SHARING_NV: SharingExtension = SharingExtension {
    name: "cl_nv_d3d11_sharing",
    enumerate_devices: "clGetDeviceIDsFromD3D11NV",
    create_from_surface: "clCreateFromD3D11Texture2DNV",
    acquire_objects: "clEnqueueAcquireD3D11ObjectsNV",
    release_objects: "clEnqueueReleaseD3D11ObjectsNV",
};

/// The sharing extensions looked for by default, in order of preference.
pub const DEFAULT_SHARING_EXTENSIONS: [SharingExtension; 2] = [D3D11_SHARING_KHR, D3D11_SHARING_NV];

/// The resolved functions of a sharing extension.
#[derive(Clone, Copy, Debug)]
pub struct SharingFunctions<F> {
    /// See [`SharingExtension::enumerate_devices`].
    pub enumerate_devices: F,
    /// See [`SharingExtension::create_from_surface`].
    pub create_shared_image: F,
    /// See [`SharingExtension::acquire_objects`].
    pub acquire_objects: F,
    /// See [`SharingExtension::release_objects`].
    pub release_objects: F,
}

/// What sharing a compute platform supports.
///
/// Either every function of an extension resolved, or sharing is unsupported.
#[derive(Clone, Debug)]
pub struct PlatformCapability<F> {
    extension: Option<&'static str>,
    functions: Option<SharingFunctions<F>>,
}

impl<F> PlatformCapability<F> {
    /// A platform without sharing.
    pub const fn unsupported() -> Self {
        Self {
            extension: None,
            functions: None,
        }
    }

    /// A platform sharing through `extension`.
    pub const fn supported(extension: &'static str, functions: SharingFunctions<F>) -> Self {
        Self {
            extension: Some(extension),
            functions: Some(functions),
        }
    }

    /// If the platform can share graphics surfaces.
    pub fn supports_sharing(&self) -> bool {
        self.functions.is_some()
    }

    /// The name of the matched extension.
    pub fn extension(&self) -> Option<&'static str> {
        self.extension
    }

    /// The resolved functions.
    pub fn functions(&self) -> Option<&SharingFunctions<F>> {
        self.functions.as_ref()
    }
}

/// Negotiates the sharing capability of each platform once.
pub struct CapabilityDetector<B: ComputeBackend> {
    backend: Arc<B>,
    platforms: RwLock<HashMap<B::Platform, Arc<PlatformCapability<B::EntryPoint>>>>,
}

impl<B: ComputeBackend> CapabilityDetector<B> {
    /// Create a detector with nothing detected yet.
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            platforms: RwLock::new(HashMap::new()),
        }
    }

    /// The capability of a platform, detecting it on first use.
    ///
    /// Only a failure to query the platform's extension string is an error.
    pub fn detect(
        &self,
        platform: B::Platform,
    ) -> Result<Arc<PlatformCapability<B::EntryPoint>>, CapabilityError> {
        if let Some(capability) = self.platforms.read().get(&platform) {
            return Ok(Arc::clone(capability));
        }

        let mut platforms = self.platforms.write();
        if let Some(capability) = platforms.get(&platform) {
            return Ok(Arc::clone(capability));
        }

        let capability = Arc::new(self.negotiate(platform)?);
        platforms.insert(platform, Arc::clone(&capability));

        Ok(capability)
    }

    #[instrument(skip_all, err)]
    fn negotiate(
        &self,
        platform: B::Platform,
    ) -> Result<PlatformCapability<B::EntryPoint>, CapabilityError> {
        let extensions = self.backend.platform_extensions(platform).map_err(|source| {
            CapabilityError::QueryExtensions {
                platform: format!("{platform:?}"),
                source,
            }
        })?;

        for extension in self.backend.sharing_extensions() {
            if !extensions.split_whitespace().any(|name| name == extension.name) {
                continue;
            }

            match self.resolve(platform, extension) {
                Some(functions) => {
                    debug!("{platform:?} shares surfaces through {}", extension.name);
                    return Ok(PlatformCapability::supported(extension.name, functions));
                }
                None => debug!("{platform:?} advertises {} but it did not resolve", extension.name),
            }
        }

        debug!("{platform:?} does not share surfaces");
        Ok(PlatformCapability::unsupported())
    }

    fn resolve(
        &self,
        platform: B::Platform,
        extension: &SharingExtension,
    ) -> Option<SharingFunctions<B::EntryPoint>> {
        let resolve = |name: &str| {
            let function = self.backend.entry_point(platform, name);
            if function.is_none() {
                debug!("Could not resolve {name}");
            }
            function
        };

        Some(SharingFunctions {
            enumerate_devices: resolve(extension.enumerate_devices)?,
            create_shared_image: resolve(extension.create_from_surface)?,
            acquire_objects: resolve(extension.acquire_objects)?,
            release_objects: resolve(extension.release_objects)?,
        })
    }
}
