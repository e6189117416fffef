#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Once,
        atomic::{AtomicU64, AtomicUsize, Ordering},
        mpsc::{Receiver, SyncSender, sync_channel},
    },
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use capture_interop::{
    AcquiredFrame, AdapterId, BackendError, BackendResult, CaptureHandle, CaptureOptions,
    CaptureRegistry, ComputeBackend, DisplayBackend, Duplication, FrameInfo, FrameSurface,
    HostFrame, ImageDesc, KernelArg, NativeDevice, NativeSurface, PixelFormat, Screen,
    TeardownScheduler, TeardownTask, WorkSize,
};
use parking_lot::Mutex;
use tracing::subscriber::set_global_default;
use tracing_subscriber::{filter::LevelFilter, fmt::format::FmtSpan, layer::SubscriberExt};

pub const DEVICE: NativeDevice = NativeDevice(0xD3D);

pub fn init_logger() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = tracing_subscriber::filter::Targets::new().with_default(LevelFilter::TRACE);

        let std_logger = tracing_subscriber::fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .with_target(false)
            .without_time();

        let collector = tracing_subscriber::registry().with(std_logger).with(filter);

        set_global_default(collector).unwrap();
    });
}

pub fn screen() -> Screen {
    Screen::new(AdapterId(7), "FAKE1", [2, 2])
}

pub fn other_screen() -> Screen {
    Screen::new(AdapterId(7), "FAKE2", [2, 2])
}

/// What the next acquire of a fake duplication returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Frame,
    Empty,
    Timeout,
    AccessLost,
    Fail,
}

#[derive(Default)]
pub struct DisplayCounters {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub mapped: AtomicUsize,
    pub blocked_opens: AtomicUsize,
}

impl DisplayCounters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct DisplayState {
    screens: Vec<Screen>,
    script: Mutex<VecDeque<Step>>,
    exhausted: Step,
    counters: DisplayCounters,
    next_surface: AtomicUsize,
    acquire_threads: Mutex<Vec<ThreadId>>,
    map_threads: Mutex<Vec<ThreadId>>,
    open_gate: Mutex<Option<(Screen, Receiver<()>)>>,
}

/// A display whose duplications follow a shared script.
#[derive(Clone)]
pub struct FakeDisplay(Arc<DisplayState>);

impl FakeDisplay {
    pub fn new<I: IntoIterator<Item = Step>>(script: I, exhausted: Step) -> Self {
        Self(Arc::new(DisplayState {
            screens: vec![screen(), other_screen()],
            script: Mutex::new(script.into_iter().collect()),
            exhausted,
            counters: DisplayCounters::default(),
            next_surface: AtomicUsize::new(1),
            acquire_threads: Mutex::default(),
            map_threads: Mutex::default(),
            open_gate: Mutex::default(),
        }))
    }

    pub fn frames() -> Self {
        Self::new([], Step::Frame)
    }

    pub fn counters(&self) -> &DisplayCounters {
        &self.0.counters
    }

    pub fn opened(&self) -> usize {
        DisplayCounters::get(&self.0.counters.opened)
    }

    pub fn closed(&self) -> usize {
        DisplayCounters::get(&self.0.counters.closed)
    }

    pub fn acquired(&self) -> usize {
        DisplayCounters::get(&self.0.counters.acquired)
    }

    pub fn released(&self) -> usize {
        DisplayCounters::get(&self.0.counters.released)
    }

    pub fn mapped(&self) -> usize {
        DisplayCounters::get(&self.0.counters.mapped)
    }

    /// The threads frames were acquired on.
    pub fn acquire_threads(&self) -> Vec<ThreadId> {
        self.0.acquire_threads.lock().clone()
    }

    /// The threads surfaces were mapped on.
    pub fn map_threads(&self) -> Vec<ThreadId> {
        self.0.map_threads.lock().clone()
    }

    /// The next duplication of `screen` blocks until the returned sender sends.
    pub fn block_open(&self, screen: Screen) -> SyncSender<()> {
        let (sender, receiver) = sync_channel(0);
        *self.0.open_gate.lock() = Some((screen, receiver));
        sender
    }

    pub fn blocked_opens(&self) -> usize {
        DisplayCounters::get(&self.0.counters.blocked_opens)
    }

    pub fn duplication(&self) -> Box<dyn Duplication> {
        self.0.counters.opened.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeDuplication(Arc::clone(&self.0)))
    }
}

impl DisplayBackend for FakeDisplay {
    fn enumerate_screens(&self) -> BackendResult<Vec<Screen>> {
        Ok(self.0.screens.clone())
    }

    fn open_duplication(&self, screen: &Screen) -> BackendResult<Box<dyn Duplication>> {
        if !self.0.screens.contains(screen) {
            return Err(BackendError::message("no such output", "DuplicateOutput"));
        }

        let gate = {
            let mut gate = self.0.open_gate.lock();
            match gate.as_ref() {
                Some((blocked, _)) if blocked == screen => gate.take(),
                _ => None,
            }
        };
        if let Some((_, receiver)) = gate {
            self.0.counters.blocked_opens.fetch_add(1, Ordering::SeqCst);
            let _ = receiver.recv();
        }

        Ok(self.duplication())
    }
}

struct FakeDuplication(Arc<DisplayState>);

impl Duplication for FakeDuplication {
    fn native_device(&self) -> NativeDevice {
        DEVICE
    }

    fn acquire_next_frame(&mut self, timeout: Duration) -> BackendResult<AcquiredFrame> {
        self.0.acquire_threads.lock().push(thread::current().id());
        let step = self
            .0
            .script
            .lock()
            .pop_front()
            .unwrap_or(self.0.exhausted);

        match step {
            Step::Frame => {
                self.0.counters.acquired.fetch_add(1, Ordering::SeqCst);
                let id = self.0.next_surface.fetch_add(1, Ordering::SeqCst);

                Ok(AcquiredFrame::Frame {
                    surface: Box::new(FakeSurface {
                        id,
                        state: Arc::clone(&self.0),
                    }),
                    info: FrameInfo {
                        timestamp: Instant::now(),
                        size: [2, 2],
                        format: PixelFormat::Bgra8,
                        accumulated_frames: 1,
                    },
                })
            }
            Step::Empty => Ok(AcquiredFrame::Empty),
            Step::Timeout => {
                thread::sleep(timeout.min(Duration::from_millis(2)));
                Ok(AcquiredFrame::Timeout)
            }
            Step::AccessLost => Err(BackendError::access_lost("AcquireNextFrame")),
            Step::Fail => Err(BackendError::from_code(-1, "AcquireNextFrame")),
        }
    }

    fn release_frame(&mut self, _surface: Box<dyn FrameSurface>) -> BackendResult<()> {
        self.0.counters.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for FakeDuplication {
    fn drop(&mut self) {
        self.0.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeSurface {
    id: usize,
    state: Arc<DisplayState>,
}

impl FrameSurface for FakeSurface {
    fn native(&self) -> NativeSurface {
        NativeSurface(self.id)
    }

    fn map(&self) -> BackendResult<HostFrame> {
        self.state.counters.mapped.fetch_add(1, Ordering::SeqCst);
        self.state.map_threads.lock().push(thread::current().id());

        // white, black, red, green
        let pixels: [[u8; 4]; 4] = [
            [255, 255, 255, 255],
            [0, 0, 0, 255],
            [0, 0, 255, 255],
            [0, 255, 0, 255],
        ];

        Ok(HostFrame::packed(
            [2, 2],
            PixelFormat::Bgra8,
            pixels.concat().into_boxed_slice(),
        ))
    }
}

#[derive(Default)]
struct SchedulerState {
    now: Duration,
    sequence: u64,
    tasks: Vec<(Duration, u64, TeardownTask)>,
    observations: Vec<usize>,
}

/// A scheduler whose clock only moves when told to.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<SchedulerState>,
    observer: Option<Box<dyn Fn() -> usize + Send + Sync>>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records `observer()` every time a teardown is scheduled.
    pub fn with_observer<F: Fn() -> usize + Send + Sync + 'static>(observer: F) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::default(),
            observer: Some(Box::new(observer)),
        })
    }

    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    pub fn pending(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn observations(&self) -> Vec<usize> {
        self.state.lock().observations.clone()
    }

    /// Move the clock forward, running every task that falls due in deadline order.
    pub fn advance(&self, by: Duration) {
        let target = self.state.lock().now + by;

        loop {
            let task = {
                let mut state = self.state.lock();
                let next = state
                    .tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, (deadline, _, _))| *deadline <= target)
                    .min_by_key(|(_, (deadline, sequence, _))| (*deadline, *sequence))
                    .map(|(index, _)| index);

                match next {
                    Some(index) => {
                        let (deadline, _, task) = state.tasks.remove(index);
                        state.now = deadline;
                        task
                    }
                    None => break,
                }
            };

            task();
        }

        self.state.lock().now = target;
    }
}

impl TeardownScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TeardownTask) {
        let observed = self.observer.as_ref().map(|observer| observer());

        let mut state = self.state.lock();
        let deadline = state.now + delay;
        let sequence = state.sequence;
        state.sequence += 1;
        state.tasks.push((deadline, sequence, task));
        if let Some(observed) = observed {
            state.observations.push(observed);
        }
    }
}

pub const GRACE: Duration = Duration::from_millis(1000);

pub fn options() -> CaptureOptions {
    CaptureOptions {
        teardown_grace: GRACE,
        frame_timeout: Duration::from_millis(5),
        buffer_depth: 1,
        max_consecutive_errors: 3,
    }
}

pub fn registry(display: &FakeDisplay, scheduler: Arc<ManualScheduler>) -> Arc<CaptureRegistry> {
    CaptureRegistry::new(Arc::new(display.clone()), scheduler, options())
}

pub fn capture(registry: &CaptureRegistry) -> CaptureHandle {
    registry
        .capture_once(&screen(), Duration::from_secs(1))
        .unwrap()
        .unwrap()
}

/// The extension functions of the fake platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FakeFunction {
    EnumerateDevices,
    CreateFromSurface,
    AcquireObjects,
    ReleaseObjects,
}

pub struct FakePlatform {
    pub extensions: &'static str,
    pub devices: Vec<u32>,
    pub unresolvable: Vec<&'static str>,
}

impl FakePlatform {
    pub fn plain(devices: Vec<u32>) -> Self {
        Self {
            extensions: "cl_khr_icd cl_khr_byte_addressable_store",
            devices,
            unresolvable: Vec::new(),
        }
    }

    pub fn sharing(devices: Vec<u32>) -> Self {
        Self {
            extensions: "cl_khr_icd cl_khr_d3d11_sharing cl_khr_byte_addressable_store",
            devices,
            unresolvable: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Enqueued {
    pub label: String,
    pub event: u64,
    pub wait: Vec<u64>,
}

#[derive(Default)]
pub struct ComputeCalls {
    pub extension_queries: usize,
    pub contexts: Vec<(u32, Option<NativeDevice>)>,
    pub queues: usize,
    pub builds: Vec<u32>,
    pub images_created: usize,
    pub shared_images: usize,
    pub writes: usize,
    pub released: Vec<u64>,
    pub enqueued: Vec<Enqueued>,
    pub waited: Vec<Vec<u64>>,
}

/// A compute backend that records every call and runs nothing.
#[derive(Default)]
pub struct FakeCompute {
    pub platforms: Vec<FakePlatform>,
    pub sharing_devices: Vec<u32>,
    pub failing_builds: Vec<(u32, &'static str)>,
    pub failing_contexts: Vec<u32>,
    pub fail_enumeration: bool,
    pub fail_shared_image: bool,
    pub fail_acquire: bool,
    pub calls: Mutex<ComputeCalls>,
    pub next_id: AtomicU64,
    pub contexts: Mutex<HashMap<u64, (u32, u32, Option<NativeDevice>)>>,
    pub images: Mutex<HashMap<u64, ImageDesc>>,
}

impl FakeCompute {
    pub fn new(platforms: Vec<FakePlatform>) -> Self {
        Self {
            platforms,
            next_id: AtomicU64::new(100),
            ..Self::default()
        }
    }

    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn platform_of(&self, device: u32) -> u32 {
        self.platforms
            .iter()
            .position(|platform| platform.devices.contains(&device))
            .unwrap() as u32
    }

    fn record(&self, label: &str, wait: &[u64]) -> u64 {
        let event = self.id();
        self.calls.lock().enqueued.push(Enqueued {
            label: label.to_string(),
            event,
            wait: wait.to_vec(),
        });
        event
    }

    pub fn enqueued(&self) -> Vec<Enqueued> {
        self.calls.lock().enqueued.clone()
    }

    pub fn enqueued_labels(&self) -> Vec<String> {
        self.enqueued().into_iter().map(|call| call.label).collect()
    }
}

pub fn entry_points(source: &str) -> Vec<String> {
    source
        .split("__kernel void ")
        .skip(1)
        .filter_map(|rest| rest.split('(').next())
        .map(|name| name.trim().to_string())
        .collect()
}

impl ComputeBackend for FakeCompute {
    type Platform = u32;
    type Device = u32;
    type Context = u64;
    type Queue = u32;
    type Program = Vec<String>;
    type Kernel = String;
    type Mem = u64;
    type Event = u64;
    type EntryPoint = FakeFunction;

    fn platforms(&self) -> BackendResult<Vec<u32>> {
        if self.fail_enumeration {
            return Err(BackendError::from_code(-1001, "clGetPlatformIDs"));
        }

        Ok((0..self.platforms.len() as u32).collect())
    }

    fn devices(&self, platform: u32) -> BackendResult<Vec<u32>> {
        Ok(self.platforms[platform as usize].devices.clone())
    }

    fn platform_extensions(&self, platform: u32) -> BackendResult<String> {
        self.calls.lock().extension_queries += 1;
        Ok(self.platforms[platform as usize].extensions.to_string())
    }

    fn entry_point(&self, platform: u32, name: &str) -> Option<FakeFunction> {
        if self.platforms[platform as usize].unresolvable.contains(&name) {
            return None;
        }

        if name.contains("GetDeviceIDsFrom") {
            Some(FakeFunction::EnumerateDevices)
        } else if name.contains("CreateFrom") {
            Some(FakeFunction::CreateFromSurface)
        } else if name.contains("EnqueueAcquire") {
            Some(FakeFunction::AcquireObjects)
        } else if name.contains("EnqueueRelease") {
            Some(FakeFunction::ReleaseObjects)
        } else {
            None
        }
    }

    fn create_context(&self, device: u32, interop: Option<NativeDevice>) -> BackendResult<u64> {
        if self.failing_contexts.contains(&device) {
            return Err(BackendError::from_code(-6, "clCreateContext"));
        }

        let context = self.id();
        self.calls.lock().contexts.push((device, interop));
        self.contexts
            .lock()
            .insert(context, (device, self.platform_of(device), interop));
        Ok(context)
    }

    fn context_platform(&self, context: &u64) -> BackendResult<u32> {
        Ok(self.contexts.lock()[context].1)
    }

    fn context_interop_device(&self, context: &u64) -> BackendResult<Option<NativeDevice>> {
        Ok(self.contexts.lock()[context].2)
    }

    fn create_queue(&self, _context: &u64, device: u32) -> BackendResult<u32> {
        self.calls.lock().queues += 1;
        Ok(device)
    }

    fn build_program(
        &self,
        _context: &u64,
        device: u32,
        source: &str,
        _options: &str,
    ) -> BackendResult<Vec<String>> {
        self.calls.lock().builds.push(device);
        let entries = entry_points(source);

        if let Some((_, entry)) = self
            .failing_builds
            .iter()
            .find(|(failing, entry)| *failing == device && entries.iter().any(|e| e == entry))
        {
            return Err(BackendError::message(
                format!("<kernel>:1:1: error: cannot compile {entry}"),
                "clBuildProgram",
            ));
        }

        Ok(entries)
    }

    fn create_kernels(&self, program: &Vec<String>) -> BackendResult<Vec<(String, String)>> {
        Ok(program
            .iter()
            .map(|entry| (entry.clone(), entry.clone()))
            .collect())
    }

    fn create_buffer(&self, _context: &u64, _size: usize) -> BackendResult<u64> {
        Ok(self.id())
    }

    fn create_image(&self, _context: &u64, desc: ImageDesc) -> BackendResult<u64> {
        let image = self.id();
        self.calls.lock().images_created += 1;
        self.images.lock().insert(image, desc);
        Ok(image)
    }

    fn image_desc(&self, image: &u64) -> BackendResult<ImageDesc> {
        self.images
            .lock()
            .get(image)
            .copied()
            .ok_or_else(|| BackendError::message("not an image", "clGetImageInfo"))
    }

    fn release_mem(&self, mem: u64) {
        self.calls.lock().released.push(mem);
    }

    fn enqueue_write_image(
        &self,
        _queue: &u32,
        _image: &u64,
        _frame: HostFrame,
        wait: &[u64],
    ) -> BackendResult<u64> {
        self.calls.lock().writes += 1;
        Ok(self.record("write", wait))
    }

    fn enqueue_kernel(
        &self,
        _queue: &u32,
        kernel: &String,
        _args: &[KernelArg<'_, u64>],
        _work_size: WorkSize,
        wait: &[u64],
    ) -> BackendResult<u64> {
        Ok(self.record(kernel, wait))
    }

    fn read_buffer(&self, _queue: &u32, _buffer: &u64, wait: &[u64]) -> BackendResult<Vec<u8>> {
        self.calls.lock().waited.push(wait.to_vec());
        Ok(vec![0; 4])
    }

    fn wait_for_events(&self, events: &[u64]) -> BackendResult<()> {
        self.calls.lock().waited.push(events.to_vec());
        Ok(())
    }

    fn shared_devices(
        &self,
        function: FakeFunction,
        _platform: u32,
        _graphics_device: NativeDevice,
    ) -> BackendResult<Vec<u32>> {
        assert_eq!(function, FakeFunction::EnumerateDevices);
        Ok(self.sharing_devices.clone())
    }

    fn create_shared_image(
        &self,
        function: FakeFunction,
        _context: &u64,
        _surface: NativeSurface,
    ) -> BackendResult<u64> {
        assert_eq!(function, FakeFunction::CreateFromSurface);
        if self.fail_shared_image {
            return Err(BackendError::from_code(-1000, "clCreateFromD3D11Texture2DKHR"));
        }

        let image = self.id();
        self.calls.lock().shared_images += 1;
        self.images.lock().insert(
            image,
            ImageDesc {
                size: [2, 2],
                format: PixelFormat::Bgra8,
            },
        );
        Ok(image)
    }

    fn enqueue_acquire_shared(
        &self,
        function: FakeFunction,
        _queue: &u32,
        _objects: &[u64],
        wait: &[u64],
    ) -> BackendResult<u64> {
        assert_eq!(function, FakeFunction::AcquireObjects);
        if self.fail_acquire {
            return Err(BackendError::from_code(-1002, "clEnqueueAcquireD3D11ObjectsKHR"));
        }

        Ok(self.record("acquire", wait))
    }

    fn enqueue_release_shared(
        &self,
        function: FakeFunction,
        _queue: &u32,
        _objects: &[u64],
        wait: &[u64],
    ) -> BackendResult<u64> {
        assert_eq!(function, FakeFunction::ReleaseObjects);
        Ok(self.record("release", wait))
    }
}
