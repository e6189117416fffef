use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::{path::Path, sync::Arc};

use capture_interop::{
    CaptureOptions, CaptureRegistry, ComputeBackend, ComputeManager, Config, EdgeBuffers,
    EdgeParameters, EdgePipeline, ImageFactory, SignalList,
};
use software_backend::SoftwareCompute;
use testing::{display_backend, save_mask, setup_logger, should_debug};
use tracing::{info, info_span, warn};
use utilities::{DebugTime, Failure, Ignore};

const CONFIG_PATH: &str = "edge-stream.toml";
const OUTPUT_PATH: &str = "edges.png";

/// `--frames=N`, defaults to 30.
fn frame_count() -> usize {
    std::env::args()
        .find_map(|arg| arg.strip_prefix("--frames=")?.parse().ok())
        .unwrap_or(30)
}

fn main() {
    let _logger = setup_logger(should_debug()).report_and_panic("Could not set up the logger");
    let _span = info_span!("[Main Thread]").entered();

    let config = Config::load_or_create(Path::new(CONFIG_PATH))
        .report_and_panic("Could not load the configuration file");
    let parameters = EdgeParameters::from(&config);

    let registry = CaptureRegistry::with_teardown_thread(
        display_backend(),
        CaptureOptions::from(&config),
    )
    .report_and_panic("Could not create the capture registry");

    let screen = registry
        .screens()
        .report_and_panic("Could not list the screens")
        .into_iter()
        .next()
        .report_and_panic("There are no screens to capture");
    info!("Streaming {screen}");

    let mut stream = registry
        .open_stream(&screen)
        .report_and_panic("Could not open a stream");

    let first = stream
        .next()
        .report_and_panic("The stream ended before the first frame")
        .report_and_panic("Could not capture the first frame");

    let manager = Arc::new(ComputeManager::new(
        Arc::new(SoftwareCompute::default()),
        Some(first.device()),
    ));
    let device = manager
        .devices()
        .report_and_panic("Could not list the compute devices")
        .into_iter()
        .next()
        .report_and_panic("There are no compute devices");
    let context = manager
        .context(device)
        .report_and_panic("Could not create a compute context");
    let queue = manager
        .queue(device)
        .report_and_panic("Could not create a compute queue");

    let pipeline = EdgePipeline::new(Arc::clone(&manager));
    pipeline
        .build(&config.build_options)
        .report_and_panic("Could not build the edge kernels");
    for failure in manager.build_failures() {
        warn!("{} failed to build:\n{}", failure.program, failure.log);
    }

    let factory = ImageFactory::new(Arc::clone(&manager));
    let mut buffers: Option<EdgeBuffers<SoftwareCompute>> = None;
    let mut reusable = None;
    let mut mask = None;

    let frames = frame_count();
    let mut capture = Some(first);
    for index in 0..frames {
        let capture = match capture.take() {
            Some(capture) => capture,
            None => stream
                .next()
                .report_and_panic("The stream ended early")
                .report_and_panic("Could not capture a frame"),
        };
        let _timing = DebugTime::start(format!("Frame {index}"));
        let size = capture.size();

        if buffers.as_ref().is_none_or(|buffers| buffers.size() != size) {
            buffers = Some(
                EdgeBuffers::new(&manager, device, size)
                    .report_and_panic("Could not allocate the edge buffers"),
            );
        }
        let Some(buffers) = buffers.as_ref() else {
            continue;
        };

        let mut image = factory
            .create_image(&capture, &context, &queue, reusable.as_ref())
            .report_and_panic("Could not create the frame image");

        let mut signals = SignalList::new();
        pipeline
            .run(device, &mut image, buffers, &parameters, &mut signals)
            .report_and_panic("Could not enqueue the edge pipeline");

        if index + 1 == frames {
            mask = Some((
                size,
                buffers
                    .read_edges(&manager, device, &signals)
                    .report_and_panic("Could not read the edge mask"),
            ));
        } else {
            pipeline
                .wait(&signals)
                .report_and_panic("The edge pipeline failed");
        }

        if let Some(image) = image.into_image() {
            if let Some(previous) = reusable.replace(image) {
                manager.backend().release_mem(previous);
            }
        }

        capture.release().ignore();
    }

    stream.stop();
    if let Some(image) = reusable.take() {
        manager.backend().release_mem(image);
    }

    if let Some((size, mask)) = mask {
        save_mask(Path::new(OUTPUT_PATH), size, mask)
            .report_and_panic("Could not save the edge mask");
        info!("Wrote the edge mask of frame {frames} to {OUTPUT_PATH}");
    }
}
