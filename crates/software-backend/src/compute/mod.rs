//! A CPU compute backend with OpenCL call semantics.

use alloc::sync::Arc;
use core::{
    convert::Infallible,
    fmt::Write,
    sync::atomic::{AtomicU64, Ordering},
};
use std::collections::HashMap;

use capture_interop::{
    BackendError, BackendResult, ComputeBackend, HostFrame, ImageDesc, KernelArg, NativeDevice,
    NativeSurface, WorkSize,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use kernels::{Arg, Invocation, KernelFn};
use queue::Command;

pub use event::Event;
pub use memory::{Memory, MemoryKind};
pub use queue::Queue;

mod event;
mod kernels;
mod memory;
mod queue;

// OpenCL status codes for rejected calls.
const INVALID_VALUE: i32 = -30;
const INVALID_PLATFORM: i32 = -32;
const INVALID_DEVICE: i32 = -33;
const INVALID_CONTEXT: i32 = -34;
const INVALID_MEM_OBJECT: i32 = -38;
const INVALID_IMAGE_SIZE: i32 = -40;
const INVALID_WORK_GROUP_SIZE: i32 = -54;
const INVALID_OPERATION: i32 = -59;
const INVALID_BUFFER_SIZE: i32 = -61;
const INVALID_GLOBAL_WORK_SIZE: i32 = -63;

/// Index of a [`SoftwarePlatform`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlatformId(pub u32);

/// Index of a [`SoftwareDevice`] within its platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId {
    /// The platform index.
    pub platform: u32,
    /// The device index within the platform.
    pub index: u32,
}

/// A context created by a [`SoftwareCompute`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(pub(crate) u64);

/// Description of a simulated platform.
#[derive(Clone, Debug)]
pub struct SoftwarePlatform {
    /// Platform name.
    pub name: String,
    /// Space separated extension string.
    pub extensions: String,
    /// The platform's devices.
    pub devices: Vec<SoftwareDevice>,
}

impl Default for SoftwarePlatform {
    fn default() -> Self {
        Self {
            name: "Software".to_string(),
            extensions: "cl_khr_byte_addressable_store cl_khr_fp16".to_string(),
            devices: vec![SoftwareDevice::default()],
        }
    }
}

/// Description of a simulated device.
#[derive(Clone, Debug)]
pub struct SoftwareDevice {
    /// Device name.
    pub name: String,
    /// Largest width or height of an image.
    pub max_image_size: u32,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self {
            name: "CPU".to_string(),
            max_image_size: 16384,
        }
    }
}

/// A program built for one device.
#[derive(Debug)]
pub struct Program {
    device: DeviceId,
    kernels: Vec<(String, KernelFn)>,
}

impl Program {
    /// The device the program was built for.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// The program's entry points in source order.
    pub fn entry_points(&self) -> impl Iterator<Item = &str> {
        self.kernels.iter().map(|(name, _)| name.as_str())
    }
}

/// A kernel bound to its CPU implementation.
#[derive(Clone, Debug)]
pub struct Kernel {
    name: Arc<str>,
    function: KernelFn,
}

impl Kernel {
    /// The kernel's entry point.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Runs compute programs on the CPU.
///
/// Platforms and devices come from configuration. Programs bind the `__kernel` entry points found
/// in their source to CPU implementations, every queue is an in-order worker thread, and kernels
/// split their rows over the rayon pool. No sharing extension is advertised.
pub struct SoftwareCompute {
    platforms: Vec<SoftwarePlatform>,
    contexts: RwLock<HashMap<ContextId, DeviceId>>,
    next_id: AtomicU64,
}

impl SoftwareCompute {
    /// Create a backend exposing `platforms`.
    pub fn new(platforms: Vec<SoftwarePlatform>) -> Self {
        Self {
            platforms,
            contexts: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The description of a device.
    pub fn device_info(&self, device: DeviceId) -> Option<&SoftwareDevice> {
        self.platforms
            .get(device.platform as usize)?
            .devices
            .get(device.index as usize)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn context_device(&self, context: &ContextId, call: &'static str) -> BackendResult<DeviceId> {
        self.contexts
            .read()
            .get(context)
            .copied()
            .ok_or_else(|| BackendError::from_code(INVALID_CONTEXT, call))
    }

    fn submit(
        &self,
        queue: &Queue,
        wait: &[Event],
        call: &'static str,
        command: Command,
    ) -> BackendResult<Event> {
        let event = Event::pending(self.next_id());
        queue
            .submit(wait, event, command)
            .map_err(|message| BackendError::message(message, call))
    }
}

impl Default for SoftwareCompute {
    fn default() -> Self {
        Self::new(vec![SoftwarePlatform::default()])
    }
}

/// The names of the `__kernel void` functions in an OpenCL C source.
fn entry_points(source: &str) -> Vec<String> {
    source
        .split("__kernel")
        .skip(1)
        .filter_map(|declaration| {
            let rest = declaration.trim_start().strip_prefix("void")?.trim_start();
            let end = rest.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))?;
            (end > 0).then(|| rest[..end].to_string())
        })
        .collect()
}

fn check_options(options: &str) -> Result<(), String> {
    for option in options.split_whitespace() {
        let known = match option.strip_prefix("-cl-std=") {
            Some(version) => matches!(version, "CL1.1" | "CL1.2" | "CL2.0" | "CL3.0"),
            None => matches!(
                option,
                "-w" | "-Werror"
                    | "-cl-mad-enable"
                    | "-cl-fast-relaxed-math"
                    | "-cl-finite-math-only"
                    | "-cl-no-signed-zeros"
            ),
        };

        if !known {
            return Err(format!("error: invalid build option '{option}'"));
        }
    }

    Ok(())
}

impl ComputeBackend for SoftwareCompute {
    type Platform = PlatformId;
    type Device = DeviceId;
    type Context = ContextId;
    type Queue = Queue;
    type Program = Program;
    type Kernel = Kernel;
    type Mem = Memory;
    type Event = Event;
    type EntryPoint = Infallible;

    fn platforms(&self) -> BackendResult<Vec<PlatformId>> {
        Ok((0..self.platforms.len() as u32).map(PlatformId).collect())
    }

    fn devices(&self, platform: PlatformId) -> BackendResult<Vec<DeviceId>> {
        let description = self
            .platforms
            .get(platform.0 as usize)
            .ok_or_else(|| BackendError::from_code(INVALID_PLATFORM, "clGetDeviceIDs"))?;

        Ok((0..description.devices.len() as u32)
            .map(|index| DeviceId {
                platform: platform.0,
                index,
            })
            .collect())
    }

    fn platform_extensions(&self, platform: PlatformId) -> BackendResult<String> {
        self.platforms
            .get(platform.0 as usize)
            .map(|description| description.extensions.clone())
            .ok_or_else(|| BackendError::from_code(INVALID_PLATFORM, "clGetPlatformInfo"))
    }

    fn entry_point(&self, _platform: PlatformId, _name: &str) -> Option<Infallible> {
        None
    }

    fn create_context(
        &self,
        device: DeviceId,
        interop: Option<NativeDevice>,
    ) -> BackendResult<ContextId> {
        if interop.is_some() {
            return Err(BackendError::from_code(INVALID_OPERATION, "clCreateContext"));
        }
        let info = self
            .device_info(device)
            .ok_or_else(|| BackendError::from_code(INVALID_DEVICE, "clCreateContext"))?;

        let context = ContextId(self.next_id());
        self.contexts.write().insert(context, device);
        debug!("Created context {} for {}", context.0, info.name);

        Ok(context)
    }

    fn context_platform(&self, context: &ContextId) -> BackendResult<PlatformId> {
        let device = self.context_device(context, "clGetContextInfo")?;
        Ok(PlatformId(device.platform))
    }

    fn context_interop_device(&self, context: &ContextId) -> BackendResult<Option<NativeDevice>> {
        self.context_device(context, "clGetContextInfo")?;
        Ok(None)
    }

    fn create_queue(&self, context: &ContextId, device: DeviceId) -> BackendResult<Queue> {
        if self.context_device(context, "clCreateCommandQueue")? != device {
            return Err(BackendError::from_code(INVALID_DEVICE, "clCreateCommandQueue"));
        }

        Queue::spawn(self.next_id(), device)
            .map_err(|error| BackendError::other(error, "clCreateCommandQueue"))
    }

    fn build_program(
        &self,
        context: &ContextId,
        device: DeviceId,
        source: &str,
        options: &str,
    ) -> BackendResult<Program> {
        if self.context_device(context, "clBuildProgram")? != device {
            return Err(BackendError::from_code(INVALID_DEVICE, "clBuildProgram"));
        }
        check_options(options).map_err(|log| BackendError::message(log, "clBuildProgram"))?;

        let names = entry_points(source);
        if names.is_empty() {
            return Err(BackendError::message(
                "error: the program declares no kernels",
                "clBuildProgram",
            ));
        }

        let mut log = String::new();
        let mut kernels = Vec::with_capacity(names.len());
        for name in names {
            match kernels::lookup(&name) {
                Some(function) => kernels.push((name, function)),
                None => {
                    // Writing to a String cannot fail.
                    let _ = writeln!(log, "error: no implementation for kernel '{name}'");
                }
            }
        }

        if !log.is_empty() {
            return Err(BackendError::message(log, "clBuildProgram"));
        }

        Ok(Program { device, kernels })
    }

    fn create_kernels(&self, program: &Program) -> BackendResult<Vec<(String, Kernel)>> {
        Ok(program
            .kernels
            .iter()
            .map(|(name, function)| {
                let kernel = Kernel {
                    name: Arc::from(name.as_str()),
                    function: *function,
                };
                (name.clone(), kernel)
            })
            .collect())
    }

    fn create_buffer(&self, context: &ContextId, size: usize) -> BackendResult<Memory> {
        self.context_device(context, "clCreateBuffer")?;
        if size == 0 {
            return Err(BackendError::from_code(INVALID_BUFFER_SIZE, "clCreateBuffer"));
        }

        Ok(Memory::buffer(self.next_id(), *context, size))
    }

    fn create_image(&self, context: &ContextId, desc: ImageDesc) -> BackendResult<Memory> {
        let device = self.context_device(context, "clCreateImage")?;
        let max_image_size = self
            .device_info(device)
            .map_or(0, |info| info.max_image_size);

        if desc.size.contains(&0) || desc.size.iter().any(|&size| size > max_image_size) {
            return Err(BackendError::from_code(INVALID_IMAGE_SIZE, "clCreateImage"));
        }

        Ok(Memory::image(self.next_id(), *context, desc))
    }

    fn image_desc(&self, image: &Memory) -> BackendResult<ImageDesc> {
        image
            .desc()
            .ok_or_else(|| BackendError::from_code(INVALID_MEM_OBJECT, "clGetImageInfo"))
    }

    fn release_mem(&self, mem: Memory) {
        trace!("Released memory object {}", mem.id());
    }

    fn enqueue_write_image(
        &self,
        queue: &Queue,
        image: &Memory,
        frame: HostFrame,
        wait: &[Event],
    ) -> BackendResult<Event> {
        let desc = image
            .desc()
            .ok_or_else(|| BackendError::from_code(INVALID_MEM_OBJECT, "clEnqueueWriteImage"))?;
        if desc.size != frame.size || desc.format != frame.format || !frame.is_well_formed() {
            return Err(BackendError::from_code(INVALID_VALUE, "clEnqueueWriteImage"));
        }

        let target = image.clone();
        let command: Command = Box::new(move || {
            let row_bytes = frame.size[0] as usize * frame.format.bytes_per_pixel();
            let mut data = target.write();
            for (y, row) in data.chunks_exact_mut(row_bytes).enumerate() {
                row.copy_from_slice(frame.row(y as u32));
            }
            Ok(())
        });

        self.submit(queue, wait, "clEnqueueWriteImage", command)
    }

    fn enqueue_kernel(
        &self,
        queue: &Queue,
        kernel: &Kernel,
        args: &[KernelArg<'_, Memory>],
        work_size: WorkSize,
        wait: &[Event],
    ) -> BackendResult<Event> {
        if work_size.global.contains(&0) {
            return Err(BackendError::from_code(
                INVALID_GLOBAL_WORK_SIZE,
                "clEnqueueNDRangeKernel",
            ));
        }
        if let Some(local) = work_size.local {
            let divides = local
                .iter()
                .zip(work_size.global)
                .all(|(&local, global)| local != 0 && global % local == 0);
            if !divides {
                return Err(BackendError::from_code(
                    INVALID_WORK_GROUP_SIZE,
                    "clEnqueueNDRangeKernel",
                ));
            }
        }

        let args = args
            .iter()
            .map(|arg| match *arg {
                KernelArg::Mem(mem) => Arg::Mem(mem.clone()),
                KernelArg::U8(value) => Arg::U8(value),
                KernelArg::I32(value) => Arg::I32(value),
                KernelArg::U32(value) => Arg::U32(value),
                KernelArg::F32(value) => Arg::F32(value),
            })
            .collect();
        let invocation = Invocation {
            args,
            global: work_size.global,
        };

        let name = Arc::clone(&kernel.name);
        let function = kernel.function;
        trace!("Enqueue {name} over {:?}", work_size.global);

        let command: Command =
            Box::new(move || function(&invocation).map_err(|message| format!("{name}: {message}")));

        self.submit(queue, wait, "clEnqueueNDRangeKernel", command)
    }

    fn read_buffer(&self, queue: &Queue, buffer: &Memory, wait: &[Event]) -> BackendResult<Vec<u8>> {
        if buffer.kind() != MemoryKind::Buffer {
            return Err(BackendError::from_code(INVALID_MEM_OBJECT, "clEnqueueReadBuffer"));
        }

        let output = Arc::new(Mutex::new(Vec::new()));
        let command: Command = {
            let source = buffer.clone();
            let output = Arc::clone(&output);
            Box::new(move || {
                *output.lock() = source.read().to_vec();
                Ok(())
            })
        };

        self.submit(queue, wait, "clEnqueueReadBuffer", command)?
            .wait()
            .map_err(|message| BackendError::message(message, "clEnqueueReadBuffer"))?;

        Ok(core::mem::take(&mut *output.lock()))
    }

    fn wait_for_events(&self, events: &[Event]) -> BackendResult<()> {
        for event in events {
            event
                .wait()
                .map_err(|message| BackendError::message(message, "clWaitForEvents"))?;
        }

        Ok(())
    }

    fn shared_devices(
        &self,
        function: Infallible,
        _platform: PlatformId,
        _graphics_device: NativeDevice,
    ) -> BackendResult<Vec<DeviceId>> {
        match function {}
    }

    fn create_shared_image(
        &self,
        function: Infallible,
        _context: &ContextId,
        _surface: NativeSurface,
    ) -> BackendResult<Memory> {
        match function {}
    }

    fn enqueue_acquire_shared(
        &self,
        function: Infallible,
        _queue: &Queue,
        _objects: &[Memory],
        _wait: &[Event],
    ) -> BackendResult<Event> {
        match function {}
    }

    fn enqueue_release_shared(
        &self,
        function: Infallible,
        _queue: &Queue,
        _objects: &[Memory],
        _wait: &[Event],
    ) -> BackendResult<Event> {
        match function {}
    }
}

#[cfg(test)]
mod tests {
    use super::{check_options, entry_points};

    #[test]
    fn finds_kernel_entry_points() {
        let source = "
            #define AT(x) x
            __kernel void first_u8(__global uchar* a) {}
            __constant int unused = 1;
            __kernel  void\tsecond(int b) {}
            __kernel __attribute__((reqd_work_group_size(1, 1, 1))) void skipped() {}
        ";

        assert_eq!(entry_points(source), ["first_u8", "second"]);
    }

    #[test]
    fn rejects_unknown_build_options() {
        assert!(check_options("-cl-std=CL1.2 -cl-mad-enable").is_ok());
        assert!(check_options("").is_ok());
        assert!(check_options("-cl-std=CL9.9").is_err());
        assert!(check_options("-O3").is_err());
    }
}
