mod common;

use core::time::Duration;
use std::sync::Arc;

use capture_interop::{
    ComputeBackend, ComputeError, ComputeManager, EdgeBuffers, EdgeParameters, EdgePipeline,
    ImageFactory, KernelArg, KernelProgram, KernelStage, SignalList, WorkSize,
    kernels::DEFAULT_BUILD_OPTIONS,
};
use common::{init_logger, manager, quad_frame, registry, screen, scripted_display};
use software_backend::{ScriptStep, SoftwareCompute, SoftwareDevice, SoftwarePlatform, SyntheticDisplay};

#[test]
fn grayscale_and_threshold_produce_the_expected_mask() {
    init_logger();

    let screen = screen([2, 2]);
    let registry = registry(scripted_display(&screen, vec![ScriptStep::Frame(quad_frame())]));
    let capture = registry
        .capture_once(&screen, Duration::from_secs(1))
        .unwrap()
        .unwrap();

    let manager = Arc::new(ComputeManager::new(
        Arc::new(SoftwareCompute::default()),
        Some(capture.device()),
    ));
    let device = manager.devices().unwrap()[0];
    let context = manager.context(device).unwrap();
    let queue = manager.queue(device).unwrap();

    let pipeline = EdgePipeline::new(Arc::clone(&manager));
    pipeline.build(DEFAULT_BUILD_OPTIONS).unwrap();
    assert!(manager.build_failures().is_empty());

    let factory = ImageFactory::new(Arc::clone(&manager));
    let mut image = factory.create_image(&capture, &context, &queue, None).unwrap();
    assert!(!image.requires_acquire_release());

    let buffers = EdgeBuffers::new(&manager, device, [2, 2]).unwrap();
    let work_size = WorkSize::for_image([2, 2]);
    let mut signals = SignalList::new();

    image.acquire(&queue, &mut signals).unwrap();
    pipeline
        .enqueue_grayscale(device, work_size, image.image(), buffers.gray(), &mut signals)
        .unwrap();
    pipeline
        .enqueue_threshold(device, work_size, buffers.gray(), buffers.edges(), 128, &mut signals)
        .unwrap();

    let mask = buffers.read_edges(&manager, device, &signals).unwrap();
    assert_eq!(mask, [255, 0, 0, 255]);

    let gray = manager
        .backend()
        .read_buffer(&queue, buffers.gray(), &[])
        .unwrap();
    assert_eq!(gray, [255, 0, 76, 149]);
}

#[test]
fn stream_frames_run_through_the_whole_chain() {
    init_logger();

    let display = SyntheticDisplay::with_test_patterns(1, [64, 16], Duration::from_millis(1));
    let registry = registry(display);
    let screen = registry.screens().unwrap().remove(0);

    let (manager, device) = manager(SoftwareCompute::default());
    let context = manager.context(device).unwrap();
    let queue = manager.queue(device).unwrap();
    let pipeline = EdgePipeline::new(Arc::clone(&manager));
    pipeline.build(DEFAULT_BUILD_OPTIONS).unwrap();

    let factory = ImageFactory::new(Arc::clone(&manager));
    let buffers = EdgeBuffers::new(&manager, device, [64, 16]).unwrap();

    let mut stream = registry.open_stream(&screen).unwrap();
    let capture = stream.next().unwrap().unwrap();
    stream.stop();

    let mut image = factory.create_image(&capture, &context, &queue, None).unwrap();
    let mut signals = SignalList::new();
    pipeline
        .run(
            device,
            &mut image,
            &buffers,
            &EdgeParameters::default(),
            &mut signals,
        )
        .unwrap();
    pipeline.wait(&signals).unwrap();

    let edges = buffers.read_edges(&manager, device, &signals).unwrap();
    assert!(edges.iter().all(|&value| value == 0 || value == 255));

    // The first frame has a white bar over columns 0 to 3 and a vertical gradient elsewhere.
    for row in edges.chunks_exact(64) {
        assert!(row[2..=4].contains(&255), "{row:?}");
        assert!(row[8..].iter().all(|&value| value == 0), "{row:?}");
    }

    drop(image);
    capture.release().unwrap();
}

#[test]
fn build_fails_for_unknown_entry_points() {
    init_logger();

    let (manager, device) = manager(SoftwareCompute::default());
    let sharpen = KernelProgram {
        name: "sharpen",
        entry_point: "sharpen_u8",
        source: "__kernel void sharpen_u8(__global uchar* image) {}",
    };

    assert_eq!(manager.add_program(&sharpen, DEFAULT_BUILD_OPTIONS).unwrap(), 0);
    let failures = manager.build_failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].log.contains("sharpen_u8"), "{}", failures[0].log);

    assert!(matches!(
        manager.kernel(device, "sharpen_u8"),
        Err(ComputeError::KernelNotFound { .. })
    ));

    let bad_options = manager
        .add_program(&capture_interop::kernels::THRESHOLD, "-O3")
        .unwrap();
    assert_eq!(bad_options, 0);
    assert!(manager.kernel(device, "threshold_u8").is_err());
}

#[test]
fn failed_stage_fails_its_dependents() {
    init_logger();

    let (manager, device) = manager(SoftwareCompute::default());
    let pipeline = EdgePipeline::new(Arc::clone(&manager));
    pipeline.build(DEFAULT_BUILD_OPTIONS).unwrap();

    let buffers = EdgeBuffers::new(&manager, device, [4, 4]).unwrap();
    let work_size = WorkSize::for_image([4, 4]);
    let mut signals = SignalList::new();

    // Missing the height argument.
    let broken = KernelStage {
        entry_point: "gaussian_blur_u8",
        inputs: vec![buffers.gray()],
        outputs: vec![buffers.blurred()],
        scalars: vec![KernelArg::I32(4)],
        work_size,
    };
    pipeline.enqueue(device, broken, &mut signals).unwrap();
    pipeline
        .enqueue_threshold(device, work_size, buffers.blurred(), buffers.edges(), 1, &mut signals)
        .unwrap();

    let error = pipeline.wait(&signals).unwrap_err();
    assert!(matches!(error, ComputeError::Wait(_)));
    assert!(error.to_string().contains("gaussian_blur_u8"), "{error}");

    assert!(matches!(
        buffers.read_edges(&manager, device, &signals),
        Err(ComputeError::Read(_))
    ));
}

#[test]
fn every_device_gets_its_own_context_and_programs() {
    init_logger();

    let platform = SoftwarePlatform {
        devices: vec![
            SoftwareDevice::default(),
            SoftwareDevice {
                name: "Small".to_string(),
                max_image_size: 8,
            },
        ],
        ..SoftwarePlatform::default()
    };
    let (manager, first) = manager(SoftwareCompute::new(vec![platform]));
    let devices = manager.devices().unwrap();
    assert_eq!(devices.len(), 2);
    let second = devices[1];

    let pipeline = EdgePipeline::new(Arc::clone(&manager));
    pipeline.build(DEFAULT_BUILD_OPTIONS).unwrap();
    assert!(manager.kernel(first, "sobel_u8").is_ok());
    assert!(manager.kernel(second, "sobel_u8").is_ok());

    let first_context = manager.context(first).unwrap();
    let second_context = manager.context(second).unwrap();
    assert_ne!(first_context, second_context);
    assert_eq!(manager.context(first).unwrap(), first_context);

    let backend = manager.backend();
    let desc = capture_interop::ImageDesc {
        size: [16, 16],
        format: capture_interop::PixelFormat::Bgra8,
    };
    assert!(backend.create_image(&first_context, desc).is_ok());
    assert!(backend.create_image(&second_context, desc).is_err());
}
