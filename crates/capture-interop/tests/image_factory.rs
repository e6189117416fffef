use std::sync::Arc;

use capture_interop::{
    CapabilityDetector, ComputeManager, ImageDesc, ImageFactory, PixelFormat,
};
use common::{
    DEVICE, FakeCompute, FakeDisplay, FakePlatform, ManualScheduler, capture, init_logger,
    registry,
};

mod common;

fn manager(compute: FakeCompute, interop: bool) -> Arc<ComputeManager<FakeCompute>> {
    Arc::new(ComputeManager::new(
        Arc::new(compute),
        interop.then_some(DEVICE),
    ))
}

fn sharing_compute() -> FakeCompute {
    FakeCompute {
        sharing_devices: vec![1],
        ..FakeCompute::new(vec![FakePlatform::sharing(vec![1])])
    }
}

#[test]
fn zero_copy_never_touches_host_memory() {
    init_logger();

    let display = FakeDisplay::frames();
    let registry = registry(&display, ManualScheduler::new());
    let manager = manager(sharing_compute(), true);
    let factory = ImageFactory::new(Arc::clone(&manager));

    let context = manager.context(1).unwrap();
    let queue = manager.queue(1).unwrap();
    let frame = capture(&registry);

    let image = factory.create_image(&frame, &context, &queue, None).unwrap();

    assert!(image.requires_acquire_release());
    assert!(image.upload_signal().is_none());
    assert_eq!(display.mapped(), 0);

    let calls = manager.backend().calls.lock();
    assert_eq!(calls.contexts, vec![(1, Some(DEVICE))]);
    assert_eq!(calls.shared_images, 1);
    assert_eq!(calls.writes, 0);
    assert_eq!(calls.images_created, 0);
}

#[test]
fn copy_path_without_sharing_extension() {
    init_logger();

    let display = FakeDisplay::frames();
    let registry = registry(&display, ManualScheduler::new());
    let manager = manager(FakeCompute::new(vec![FakePlatform::plain(vec![1])]), true);
    let factory = ImageFactory::new(Arc::clone(&manager));

    let context = manager.context(1).unwrap();
    let queue = manager.queue(1).unwrap();
    let frame = capture(&registry);

    let image = factory.create_image(&frame, &context, &queue, None).unwrap();

    assert!(!image.requires_acquire_release());
    assert!(image.upload_signal().is_some());
    assert!(image.is_owned());
    assert_eq!(display.mapped(), 1);

    let mapped_on = display.map_threads();
    assert_eq!(mapped_on.len(), 1);
    assert_ne!(mapped_on[0], std::thread::current().id());

    let calls = manager.backend().calls.lock();
    assert_eq!(calls.contexts, vec![(1, None)]);
    assert_eq!(calls.shared_images, 0);
    assert_eq!(calls.writes, 1);
    assert_eq!(calls.images_created, 1);
}

#[test]
fn falls_back_when_shared_image_creation_fails() {
    init_logger();

    let display = FakeDisplay::frames();
    let registry = registry(&display, ManualScheduler::new());
    let manager = manager(
        FakeCompute {
            fail_shared_image: true,
            ..sharing_compute()
        },
        true,
    );
    let factory = ImageFactory::new(Arc::clone(&manager));

    let context = manager.context(1).unwrap();
    let queue = manager.queue(1).unwrap();
    let frame = capture(&registry);

    let image = factory.create_image(&frame, &context, &queue, None).unwrap();

    assert!(!image.requires_acquire_release());
    assert_eq!(display.mapped(), 1);
    assert_eq!(manager.backend().calls.lock().writes, 1);
}

#[test]
fn copy_path_for_contexts_without_interop() {
    init_logger();

    let display = FakeDisplay::frames();
    let registry = registry(&display, ManualScheduler::new());

    // No interop device given to the manager.
    let manager_without_interop = manager(sharing_compute(), false);
    // Interop requested but the device cannot share with the capture device.
    let manager_without_shared_device = manager(
        FakeCompute {
            sharing_devices: vec![],
            ..sharing_compute()
        },
        true,
    );

    for manager in [manager_without_interop, manager_without_shared_device] {
        let factory = ImageFactory::new(Arc::clone(&manager));
        let context = manager.context(1).unwrap();
        let queue = manager.queue(1).unwrap();
        let frame = capture(&registry);

        let mapped = display.mapped();
        let image = factory.create_image(&frame, &context, &queue, None).unwrap();

        assert!(!image.requires_acquire_release());
        assert_eq!(display.mapped(), mapped + 1);
        assert_eq!(manager.backend().calls.lock().contexts, vec![(1, None)]);
    }
}

#[test]
fn existing_image_is_reused_when_it_matches() {
    init_logger();

    let display = FakeDisplay::frames();
    let registry = registry(&display, ManualScheduler::new());
    let manager = manager(FakeCompute::new(vec![FakePlatform::plain(vec![1])]), false);
    let factory = ImageFactory::new(Arc::clone(&manager));

    let context = manager.context(1).unwrap();
    let queue = manager.queue(1).unwrap();

    let reusable = {
        let frame = capture(&registry);
        let image = factory.create_image(&frame, &context, &queue, None).unwrap();
        image.into_image().unwrap()
    };
    assert!(manager.backend().calls.lock().released.is_empty());

    {
        let frame = capture(&registry);
        let image = factory
            .create_image(&frame, &context, &queue, Some(&reusable))
            .unwrap();

        assert_eq!(image.image(), &reusable);
        assert!(!image.is_owned());
    }
    assert_eq!(manager.backend().calls.lock().images_created, 1);
    assert!(manager.backend().calls.lock().released.is_empty());

    let mismatched = {
        use capture_interop::ComputeBackend;

        manager
            .backend()
            .create_image(
                &context,
                ImageDesc {
                    size: [4, 4],
                    format: PixelFormat::Bgra8,
                },
            )
            .unwrap()
    };

    let frame = capture(&registry);
    let image = factory
        .create_image(&frame, &context, &queue, Some(&mismatched))
        .unwrap();
    let created = *image.image();

    assert_ne!(created, mismatched);
    assert!(image.is_owned());

    drop(image);
    assert_eq!(manager.backend().calls.lock().released, vec![created]);
}

#[test]
fn capability_requires_every_function() {
    init_logger();

    let compute = Arc::new(FakeCompute::new(vec![
        FakePlatform {
            unresolvable: vec!["clEnqueueReleaseD3D11ObjectsKHR"],
            ..FakePlatform::sharing(vec![1])
        },
        FakePlatform {
            extensions: "cl_khr_d3d11_sharing cl_nv_d3d11_sharing",
            devices: vec![2],
            unresolvable: vec!["clCreateFromD3D11Texture2DKHR"],
        },
        FakePlatform {
            extensions: "cl_nv_d3d11_sharing",
            devices: vec![3],
            unresolvable: vec![],
        },
    ]));
    let detector = CapabilityDetector::new(Arc::clone(&compute));

    let partial = detector.detect(0).unwrap();
    assert!(!partial.supports_sharing());
    assert!(partial.functions().is_none());
    assert!(partial.extension().is_none());

    let fallback = detector.detect(1).unwrap();
    assert!(fallback.supports_sharing());
    assert_eq!(fallback.extension(), Some("cl_nv_d3d11_sharing"));

    let vendor = detector.detect(2).unwrap();
    assert_eq!(vendor.extension(), Some("cl_nv_d3d11_sharing"));

    // Memoized per platform.
    let again = detector.detect(2).unwrap();
    assert!(Arc::ptr_eq(&vendor, &again));
    assert_eq!(compute.calls.lock().extension_queries, 3);
}
