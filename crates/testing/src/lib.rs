//! # Testing
//! Shared setup for the harness binaries.
//!

use std::{path::Path, sync::Arc};

use capture_interop::DisplayBackend;
use image::{GrayImage, ImageError};
use tracing::{
    Level, info,
    subscriber::{SetGlobalDefaultError, set_global_default},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt};

/// If the binary was started with `--debug`.
pub fn should_debug() -> bool {
    std::env::args().any(|arg| arg.eq("--debug"))
}

/// Install a stdout logger, keep the guard alive until exit.
pub fn setup_logger(debug: bool) -> Result<WorkerGuard, SetGlobalDefaultError> {
    let level = if debug { Level::TRACE } else { Level::INFO };
    let filter = tracing_subscriber::filter::Targets::new().with_default(level);

    // stdout logger
    let (std_writer, std_guard) = tracing_appender::non_blocking(std::io::stdout());
    let std_logger = tracing_subscriber::fmt::layer()
        .with_writer(std_writer)
        .with_ansi(false)
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE | FmtSpan::ENTER);

    // Register loggers
    let collector = tracing_subscriber::registry().with(std_logger).with(filter);

    set_global_default(collector)?;

    info!("Application Start");
    Ok(std_guard)
}

/// The display backend of this platform, DXGI on Windows and a synthetic display elsewhere.
#[cfg(windows)]
pub fn display_backend() -> Arc<dyn DisplayBackend> {
    Arc::new(windows_capture_provider::DxgiDisplay::new())
}

/// The display backend of this platform, DXGI on Windows and a synthetic display elsewhere.
#[cfg(not(windows))]
pub fn display_backend() -> Arc<dyn DisplayBackend> {
    use core::time::Duration;

    Arc::new(software_backend::SyntheticDisplay::with_test_patterns(
        2,
        [640, 360],
        Duration::from_millis(16),
    ))
}

/// Write a one byte per pixel edge mask as a PNG.
pub fn save_mask(path: &Path, size: [u32; 2], mask: Vec<u8>) -> Result<(), ImageError> {
    let image = GrayImage::from_raw(size[0], size[1], mask).ok_or_else(|| {
        ImageError::Parameter(image::error::ParameterError::from_kind(
            image::error::ParameterErrorKind::DimensionMismatch,
        ))
    })?;

    image.save(path)
}
