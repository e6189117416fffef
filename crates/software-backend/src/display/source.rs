use alloc::{collections::VecDeque, sync::Arc};
use core::time::Duration;
use std::{thread, time::Instant};

use capture_interop::{BackendError, BackendResult, HostFrame, PixelFormat};
use parking_lot::Mutex;

/// The outcome of polling a [`FrameSource`].
#[derive(Debug)]
pub enum SourceFrame {
    /// A newly presented frame.
    Frame(HostFrame),
    /// Nothing new was presented.
    Empty,
    /// Nothing was presented within the timeout.
    Timeout,
}

/// Produces the frames of one synthetic duplication.
pub trait FrameSource: Send {
    /// Wait up to `timeout` for the next frame.
    fn next_frame(&mut self, timeout: Duration) -> BackendResult<SourceFrame>;
}

/// A moving bar over a gradient, presented at a fixed interval.
pub struct TestPattern {
    size: [u32; 2],
    interval: Duration,
    next_present: Instant,
    frame_index: u32,
}

impl TestPattern {
    /// Create a pattern of `size` presenting a new frame every `interval`.
    pub fn new(size: [u32; 2], interval: Duration) -> Self {
        Self {
            size,
            interval,
            next_present: Instant::now(),
            frame_index: 0,
        }
    }

    /// Render frame `index` as BGRA8.
    pub fn render(size: [u32; 2], index: u32) -> HostFrame {
        let [width, height] = size.map(|dimension| dimension as usize);
        let mut data = vec![0u8; width * height * 4].into_boxed_slice();

        if width > 0 {
            let bar_width = (width / 16).max(1);
            let bar_start = (index as usize * bar_width / 2) % width;
            let pixels: &mut [[u8; 4]] = bytemuck::cast_slice_mut(&mut data[..]);

            for (y, row) in pixels.chunks_exact_mut(width).enumerate() {
                let shade = (y * 96 / height.max(1)) as u8;
                for (x, pixel) in row.iter_mut().enumerate() {
                    let in_bar = (x + width - bar_start) % width < bar_width;
                    *pixel = if in_bar {
                        [255, 255, 255, 255]
                    } else {
                        [shade, shade / 2, shade, 255]
                    };
                }
            }
        }

        HostFrame::packed(size, PixelFormat::Bgra8, data)
    }
}

impl FrameSource for TestPattern {
    fn next_frame(&mut self, timeout: Duration) -> BackendResult<SourceFrame> {
        let now = Instant::now();
        if self.next_present > now {
            let remaining = self.next_present - now;
            if remaining > timeout {
                thread::sleep(timeout);
                return Ok(SourceFrame::Timeout);
            }
            thread::sleep(remaining);
        }

        // Frames missed while nobody polled are skipped.
        self.next_present = (self.next_present + self.interval).max(Instant::now());

        let frame = Self::render(self.size, self.frame_index);
        self.frame_index = self.frame_index.wrapping_add(1);
        Ok(SourceFrame::Frame(frame))
    }
}

/// One step of a [`ScriptedFrames`] source.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    /// Present a frame.
    Frame(HostFrame),
    /// Report that nothing new was presented.
    Empty,
    /// Report a timeout immediately.
    Timeout,
    /// Report that access to the output was lost.
    AccessLost,
    /// Fail the acquire with a message.
    Fail(String),
}

/// Plays back a queue of steps, then times out.
///
/// Clones share the queue, so a duplication recreated after access loss continues where the
/// previous one stopped.
#[derive(Clone, Default)]
pub struct ScriptedFrames {
    steps: Arc<Mutex<VecDeque<ScriptStep>>>,
}

impl ScriptedFrames {
    /// Create a source playing back `steps`.
    pub fn new<I: IntoIterator<Item = ScriptStep>>(steps: I) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into_iter().collect())),
        }
    }

    /// Append a step.
    pub fn push(&self, step: ScriptStep) {
        self.steps.lock().push_back(step);
    }

    /// The number of steps not played back yet.
    pub fn remaining(&self) -> usize {
        self.steps.lock().len()
    }
}

impl FrameSource for ScriptedFrames {
    fn next_frame(&mut self, timeout: Duration) -> BackendResult<SourceFrame> {
        let step = self.steps.lock().pop_front();

        match step {
            Some(ScriptStep::Frame(frame)) => Ok(SourceFrame::Frame(frame)),
            Some(ScriptStep::Empty) => Ok(SourceFrame::Empty),
            Some(ScriptStep::Timeout) => Ok(SourceFrame::Timeout),
            Some(ScriptStep::AccessLost) => Err(BackendError::access_lost("AcquireNextFrame")),
            Some(ScriptStep::Fail(message)) => Err(BackendError::message(message, "AcquireNextFrame")),
            None => {
                thread::sleep(timeout);
                Ok(SourceFrame::Timeout)
            }
        }
    }
}
