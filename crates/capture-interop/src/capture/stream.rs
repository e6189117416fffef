use alloc::sync::Arc;
use core::{
    sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    time::Duration,
};
use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel},
    thread::{self, JoinHandle},
};

use tracing::{debug, error, info_span, warn};

use crate::{AcquiredFrame, Screen};

use super::{CaptureError, CaptureHandle, CaptureRegistry, RefKind, registry::ExclusiveLease};

/// Cooperative cancellation of a [`CaptureStream`], observed at the top of every acquire
/// iteration.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// If cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Where a stream's loop currently is.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Between acquire attempts.
    Idle,
    /// Waiting for the duplication to present a frame.
    AcquiringFrame,
    /// A frame was acquired and is being delivered.
    FrameReady,
    /// The last acquire attempt timed out.
    TimedOut,
    /// The loop stopped on an error that cannot be recovered from.
    Faulted,
    /// The loop has stopped and every resource it held is released.
    Terminated,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::AcquiringFrame,
            2 => Self::FrameReady,
            3 => Self::TimedOut,
            4 => Self::Faulted,
            _ => Self::Terminated,
        }
    }
}

/// Counters of a stream's loop.
#[derive(Debug, Default)]
pub struct StreamStats {
    frames: AtomicU64,
    empty_polls: AtomicU64,
    timeouts: AtomicU64,
    recoveries: AtomicU64,
}

/// A point in time copy of [`StreamStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStatsSnapshot {
    /// Frames acquired and handed to the channel.
    pub frames: u64,
    /// Acquires that succeeded without a new frame.
    pub empty_polls: u64,
    /// Acquires that timed out.
    pub timeouts: u64,
    /// Duplications recreated after access to the output was lost.
    pub recoveries: u64,
}

impl StreamStats {
    /// Read the counters.
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
        }
    }
}

enum StreamEvent {
    Frame(CaptureHandle),
    Faulted(CaptureError),
}

/// A live sequence of frames from one screen, produced on a background thread.
///
/// Iterating yields frames until the stream is cancelled or faults, a fault is yielded once as
/// an error. Dropping or stopping the stream releases every resource it holds, including frames
/// that were never delivered, before the screen's stream slot is freed.
pub struct CaptureStream {
    screen: Screen,
    token: CancellationToken,
    receiver: Option<Receiver<StreamEvent>>,
    worker: Option<JoinHandle<()>>,
    state: Arc<AtomicU8>,
    stats: Arc<StreamStats>,
    lease: Option<ExclusiveLease>,
}

impl CaptureStream {
    pub(crate) fn spawn(
        registry: Arc<CaptureRegistry>,
        screen: Screen,
        lease: ExclusiveLease,
    ) -> Result<Self, CaptureError> {
        let options = *registry.options();
        let (sender, receiver) = sync_channel(options.buffer_depth);

        let token = CancellationToken::new();
        let state = Arc::new(AtomicU8::new(StreamState::Idle as u8));
        let stats = Arc::new(StreamStats::default());

        let worker = {
            let worker = Worker {
                registry,
                screen: screen.clone(),
                token: token.clone(),
                sender,
                state: Arc::clone(&state),
                stats: Arc::clone(&stats),
            };

            thread::Builder::new()
                .name(format!("Capture Stream {}", screen.output()))
                .spawn(move || worker.run())
                .map_err(CaptureError::SpawnThread)?
        };

        debug!("Opened capture stream for {screen}");

        Ok(Self {
            screen,
            token,
            receiver: Some(receiver),
            worker: Some(worker),
            state,
            stats,
            lease: Some(lease),
        })
    }

    /// The streamed screen.
    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    /// A token that stops the stream when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// The loop's current state.
    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The loop's counters.
    pub fn stats(&self) -> StreamStatsSnapshot {
        self.stats.snapshot()
    }

    /// Wait up to `timeout` for the next frame.
    ///
    /// Returns `Ok(None)` if no frame was delivered in time and
    /// [`CaptureError::StreamTerminated`] once the stream has stopped.
    pub fn next_timeout(&mut self, timeout: Duration) -> Result<Option<CaptureHandle>, CaptureError> {
        if self.token.is_cancelled() {
            self.shutdown();
        }

        let Some(receiver) = &self.receiver else {
            return Err(CaptureError::StreamTerminated);
        };

        match receiver.recv_timeout(timeout) {
            Ok(StreamEvent::Frame(handle)) => Ok(Some(handle)),
            Ok(StreamEvent::Faulted(e)) => {
                self.shutdown();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.shutdown();
                Err(CaptureError::StreamTerminated)
            }
        }
    }

    /// Stop the stream, waiting until every resource it held is released.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.token.cancel();

        // Undelivered frames are dropped here, which also unblocks a worker waiting on the
        // channel.
        if let Some(receiver) = self.receiver.take() {
            for event in receiver.iter() {
                drop(event);
            }
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Capture stream thread for {} panicked", self.screen);
            }
        }

        if self.lease.take().is_some() {
            self.state
                .store(StreamState::Terminated as u8, Ordering::Release);
            debug!("Closed capture stream for {}", self.screen);
        }
    }
}

impl Iterator for CaptureStream {
    type Item = Result<CaptureHandle, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.token.is_cancelled() {
            self.shutdown();
        }

        let event = self.receiver.as_ref()?.recv();

        match event {
            Ok(StreamEvent::Frame(handle)) => Some(Ok(handle)),
            Ok(StreamEvent::Faulted(e)) => {
                self.shutdown();
                Some(Err(e))
            }
            Err(_) => {
                self.shutdown();
                None
            }
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    registry: Arc<CaptureRegistry>,
    screen: Screen,
    token: CancellationToken,
    sender: SyncSender<StreamEvent>,
    state: Arc<AtomicU8>,
    stats: Arc<StreamStats>,
}

impl Worker {
    fn run(self) {
        let _span = info_span!("[Capture Stream]", screen = %self.screen).entered();

        let options = *self.registry.options();
        let mut consecutive_errors = 0;

        loop {
            if self.token.is_cancelled() {
                debug!("Capture stream cancelled");
                break;
            }

            self.set_state(StreamState::AcquiringFrame);

            let attempt = self
                .registry
                .acquire(&self.screen, RefKind::Stream)
                .and_then(|reference| {
                    match reference.resources().acquire_frame(options.frame_timeout) {
                        Ok(frame) => Ok((reference, frame)),
                        Err(e) => {
                            if e.is_recoverable() {
                                reference.resources().invalidate();
                            }
                            Err(e)
                        }
                    }
                });

            match attempt {
                Ok((reference, AcquiredFrame::Frame { surface, info })) => {
                    consecutive_errors = 0;
                    self.set_state(StreamState::FrameReady);
                    self.stats.frames.fetch_add(1, Ordering::Relaxed);

                    let handle =
                        CaptureHandle::new(self.screen.clone(), surface, info, reference, None);
                    if !self.deliver(StreamEvent::Frame(handle)) {
                        break;
                    }

                    self.set_state(StreamState::Idle);
                }

                Ok((_, AcquiredFrame::Empty)) => {
                    consecutive_errors = 0;
                    self.stats.empty_polls.fetch_add(1, Ordering::Relaxed);
                    self.set_state(StreamState::Idle);
                }

                Ok((_, AcquiredFrame::Timeout)) => {
                    consecutive_errors = 0;
                    self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    self.set_state(StreamState::TimedOut);
                }

                Err(e)
                    if e.is_recoverable()
                        && consecutive_errors < options.max_consecutive_errors =>
                {
                    consecutive_errors += 1;
                    self.stats.recoveries.fetch_add(1, Ordering::Relaxed);
                    warn!("Recreating duplication ({consecutive_errors} in a row):\n{e}");
                    self.set_state(StreamState::Idle);
                }

                Err(e) => {
                    error!("Capture stream faulted:\n{e}");
                    self.set_state(StreamState::Faulted);
                    self.deliver(StreamEvent::Faulted(e));
                    break;
                }
            }
        }
    }

    /// Blocks until the consumer takes the event or goes away, returns if it was taken.
    fn deliver(&self, event: StreamEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
    }
}
