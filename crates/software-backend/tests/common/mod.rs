#![allow(dead_code)]

use std::{
    sync::{Arc, Once},
    time::Duration,
};

use capture_interop::{
    AdapterId, CaptureOptions, CaptureRegistry, ComputeManager, HostFrame, PixelFormat, Screen,
};
use software_backend::{
    DeviceId, ScriptStep, ScriptedFrames, SoftwareCompute, SyntheticDisplay, SyntheticScreen,
};
use tracing::subscriber::set_global_default;
use tracing_subscriber::{filter::LevelFilter, fmt::format::FmtSpan, layer::SubscriberExt};

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

pub fn screen(size: [u32; 2]) -> Screen {
    Screen::new(AdapterId(1), "SCRIPTED1", size)
}

/// White, black, red, green as BGRA8.
pub fn quad_frame() -> HostFrame {
    #[rustfmt::skip]
    let data = [
        255, 255, 255, 255,   0, 0, 0, 255,
          0,   0, 255, 255,   0, 255, 0, 255,
    ];

    HostFrame::packed([2, 2], PixelFormat::Bgra8, Box::new(data))
}

pub fn scripted_display(screen: &Screen, steps: Vec<ScriptStep>) -> SyntheticDisplay {
    let script = ScriptedFrames::new(steps);
    let synthetic = SyntheticScreen::new(screen.clone(), move || Box::new(script.clone()));

    SyntheticDisplay::new(vec![synthetic])
}

pub fn registry(display: SyntheticDisplay) -> Arc<CaptureRegistry> {
    let options = CaptureOptions {
        teardown_grace: Duration::from_millis(50),
        frame_timeout: Duration::from_millis(10),
        buffer_depth: 1,
        max_consecutive_errors: 3,
    };

    CaptureRegistry::with_teardown_thread(Arc::new(display), options).unwrap()
}

pub fn manager(compute: SoftwareCompute) -> (Arc<ComputeManager<SoftwareCompute>>, DeviceId) {
    let manager = Arc::new(ComputeManager::new(Arc::new(compute), None));
    let device = manager.devices().unwrap()[0];

    (manager, device)
}
