use alloc::sync::Arc;
use core::time::Duration;
use std::{
    sync::mpsc::{Receiver, sync_channel},
    thread::{self, JoinHandle},
    time::Instant,
};

use tracing::{error, info_span};

use crate::Screen;

use super::{CancellationToken, CaptureError, CaptureHandle, CaptureRegistry, registry::ExclusiveLease};

type CaptureResult = Result<Option<CaptureHandle>, CaptureError>;

/// A single-shot capture running on a background thread.
///
/// Dropping it cancels the capture and releases anything it acquired.
pub struct PendingCapture {
    screen: Screen,
    token: CancellationToken,
    receiver: Receiver<CaptureResult>,
    worker: Option<JoinHandle<()>>,
}

impl PendingCapture {
    pub(crate) fn spawn(
        registry: Arc<CaptureRegistry>,
        screen: Screen,
        wait: Duration,
        lease: ExclusiveLease,
    ) -> Result<Self, CaptureError> {
        let token = CancellationToken::new();
        let (sender, receiver) = sync_channel(1);
        let deadline = Instant::now() + wait;

        let worker = {
            let token = token.clone();
            let screen = screen.clone();

            thread::Builder::new()
                .name(format!("Single Capture {screen}"))
                .spawn(move || {
                    let _span = info_span!("[Single Capture]", %screen).entered();

                    let result = registry.poll_once(&screen, deadline, lease, &token);
                    // A dropped receiver drops the handle here, releasing the frame.
                    let _ = sender.send(result);
                })
                .map_err(CaptureError::SpawnThread)?
        };

        Ok(Self {
            screen,
            token,
            receiver,
            worker: Some(worker),
        })
    }

    /// The screen being captured.
    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    /// If the capture has finished and [`Self::wait`] will not block.
    pub fn is_finished(&self) -> bool {
        self.worker
            .as_ref()
            .is_none_or(|worker| worker.is_finished())
    }

    /// Block until the capture finishes.
    pub fn wait(mut self) -> Result<Option<CaptureHandle>, CaptureError> {
        let result = self
            .receiver
            .recv()
            .unwrap_or(Err(CaptureError::StreamTerminated));
        self.join();

        result
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Single-shot capture thread of {} panicked", self.screen);
            }
        }
    }
}

impl Drop for PendingCapture {
    fn drop(&mut self) {
        self.token.cancel();
        self.join();
    }
}
