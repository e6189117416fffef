use alloc::sync::Arc;
use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument, warn};
use utilities::DebugTime;

use crate::{NativeDevice, interop::ContextCapabilities};

use super::{ComputeBackend, ComputeError, KernelProgram};

/// A program that failed to build for one device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildFailure {
    /// The program's name.
    pub program: &'static str,
    /// The device it failed for.
    pub device: String,
    /// The build log.
    pub log: String,
}

/// Owns one context and one queue per compute device and the kernels built for each device.
///
/// Everything is created lazily and kept for the manager's lifetime.
pub struct ComputeManager<B: ComputeBackend> {
    backend: Arc<B>,
    capabilities: ContextCapabilities<B>,
    interop_device: Option<NativeDevice>,

    device_platforms: RwLock<HashMap<B::Device, B::Platform>>,
    contexts: RwLock<HashMap<B::Device, B::Context>>,
    queues: RwLock<HashMap<B::Device, B::Queue>>,
    kernels: RwLock<HashMap<(B::Device, String), B::Kernel>>,
    build_failures: Mutex<Vec<BuildFailure>>,
}

impl<B: ComputeBackend> ComputeManager<B> {
    /// Create a manager. Contexts of devices that can share surfaces with `interop_device` are
    /// created with interop enabled.
    pub fn new(backend: Arc<B>, interop_device: Option<NativeDevice>) -> Self {
        Self {
            capabilities: ContextCapabilities::new(Arc::clone(&backend)),
            backend,
            interop_device,
            device_platforms: RwLock::new(HashMap::new()),
            contexts: RwLock::new(HashMap::new()),
            queues: RwLock::new(HashMap::new()),
            kernels: RwLock::new(HashMap::new()),
            build_failures: Mutex::new(Vec::new()),
        }
    }

    /// The compute backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// The context capability cache.
    pub fn capabilities(&self) -> &ContextCapabilities<B> {
        &self.capabilities
    }

    /// The graphics device contexts are created with interop for.
    pub fn interop_device(&self) -> Option<NativeDevice> {
        self.interop_device
    }

    /// Every device of every platform.
    pub fn devices(&self) -> Result<Vec<B::Device>, ComputeError> {
        Ok(self
            .discover()?
            .into_iter()
            .flat_map(|(_, devices)| devices)
            .collect())
    }

    fn discover(&self) -> Result<Vec<(B::Platform, Vec<B::Device>)>, ComputeError> {
        let platforms = self
            .backend
            .platforms()
            .map_err(|source| ComputeError::Environment {
                action: "enumerate platforms",
                source,
            })?;

        let mut topology = Vec::with_capacity(platforms.len());
        for platform in platforms {
            let devices =
                self.backend
                    .devices(platform)
                    .map_err(|source| ComputeError::Environment {
                        action: "enumerate devices",
                        source,
                    })?;

            topology.push((platform, devices));
        }

        let mut device_platforms = self.device_platforms.write();
        for (platform, devices) in &topology {
            for device in devices {
                device_platforms.insert(*device, *platform);
            }
        }

        Ok(topology)
    }

    fn platform_of(&self, device: B::Device) -> Result<B::Platform, ComputeError> {
        if let Some(platform) = self.device_platforms.read().get(&device) {
            return Ok(*platform);
        }

        self.discover()?;

        self.device_platforms
            .read()
            .get(&device)
            .copied()
            .ok_or_else(|| ComputeError::UnknownDevice(format!("{device:?}")))
    }

    /// The context of a device.
    pub fn context(&self, device: B::Device) -> Result<B::Context, ComputeError> {
        if let Some(context) = self.contexts.read().get(&device) {
            return Ok(context.clone());
        }

        let mut contexts = self.contexts.write();
        if let Some(context) = contexts.get(&device) {
            return Ok(context.clone());
        }

        let interop = self.interop_for(device)?;
        let context = self.create_context(device, interop)?;
        contexts.insert(device, context.clone());

        Ok(context)
    }

    #[instrument(skip_all, err)]
    fn create_context(
        &self,
        device: B::Device,
        interop: Option<NativeDevice>,
    ) -> Result<B::Context, ComputeError> {
        let context = self
            .backend
            .create_context(device, interop)
            .map_err(|source| ComputeError::CreateContext {
                device: format!("{device:?}"),
                source,
            })?;

        debug!(
            "Created context for {device:?} {}",
            if interop.is_some() {
                "with interop"
            } else {
                "without interop"
            }
        );

        Ok(context)
    }

    /// The graphics device to enable interop for when creating a context for `device`.
    fn interop_for(&self, device: B::Device) -> Result<Option<NativeDevice>, ComputeError> {
        let Some(graphics_device) = self.interop_device else {
            return Ok(None);
        };

        let platform = self.platform_of(device)?;
        let capability = self.capabilities.detector().detect(platform)?;
        let Some(functions) = capability.functions() else {
            return Ok(None);
        };

        match self
            .backend
            .shared_devices(functions.enumerate_devices, platform, graphics_device)
        {
            Ok(devices) if devices.contains(&device) => Ok(Some(graphics_device)),
            Ok(_) => {
                debug!("{device:?} cannot share surfaces with {graphics_device:?}");
                Ok(None)
            }
            Err(e) => {
                debug!("Failed to enumerate devices sharing with {graphics_device:?}:\n{e}");
                Ok(None)
            }
        }
    }

    /// The queue of a device.
    pub fn queue(&self, device: B::Device) -> Result<B::Queue, ComputeError> {
        if let Some(queue) = self.queues.read().get(&device) {
            return Ok(queue.clone());
        }

        let context = self.context(device)?;

        let mut queues = self.queues.write();
        if let Some(queue) = queues.get(&device) {
            return Ok(queue.clone());
        }

        let queue = self
            .backend
            .create_queue(&context, device)
            .map_err(|source| ComputeError::CreateQueue {
                device: format!("{device:?}"),
                source,
            })?;
        queues.insert(device, queue.clone());

        Ok(queue)
    }

    /// A kernel built for a device.
    pub fn kernel(&self, device: B::Device, name: &str) -> Result<B::Kernel, ComputeError> {
        self.kernels
            .read()
            .get(&(device, name.to_string()))
            .cloned()
            .ok_or_else(|| ComputeError::KernelNotFound {
                device: format!("{device:?}"),
                name: name.to_string(),
            })
    }

    /// Build a program for every device of every platform.
    ///
    /// A device the program fails to build for, or that no context can be created for, is
    /// logged and recorded in [`Self::build_failures`], its kernels from the program are absent.
    /// Only enumeration failures are returned. Returns the number of devices the program was
    /// built for.
    #[instrument(skip_all, fields(program = program.name), err)]
    pub fn add_program(&self, program: &KernelProgram, options: &str) -> Result<usize, ComputeError> {
        let _timer = DebugTime::start(format!("Building '{}'", program.name));

        let mut built = 0;
        for (_, devices) in self.discover()? {
            for device in devices {
                let context = match self.context(device) {
                    Ok(context) => context,
                    Err(e) if e.is_environment() => return Err(e),
                    Err(e) => {
                        self.record_failure(program, device, e.to_string());
                        continue;
                    }
                };

                let kernels = self
                    .backend
                    .build_program(&context, device, program.source, options)
                    .and_then(|compiled| self.backend.create_kernels(&compiled));

                let kernels = match kernels {
                    Ok(kernels) => kernels,
                    Err(e) => {
                        self.record_failure(program, device, e.to_string());
                        continue;
                    }
                };

                let mut cache = self.kernels.write();
                for (name, kernel) in kernels {
                    cache.insert((device, name), kernel);
                }
                built += 1;
            }
        }

        Ok(built)
    }

    fn record_failure(&self, program: &KernelProgram, device: B::Device, log: String) {
        warn!("Failed to build '{}' for {device:?}:\n{log}", program.name);
        self.build_failures.lock().push(BuildFailure {
            program: program.name,
            device: format!("{device:?}"),
            log,
        });
    }

    /// Build every program with the same options.
    pub fn add_programs(&self, programs: &[KernelProgram], options: &str) -> Result<(), ComputeError> {
        for program in programs {
            self.add_program(program, options)?;
        }

        Ok(())
    }

    /// Every recorded build failure.
    pub fn build_failures(&self) -> Vec<BuildFailure> {
        self.build_failures.lock().clone()
    }
}
