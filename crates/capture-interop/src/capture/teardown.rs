use alloc::collections::BinaryHeap;
use core::{cmp::Ordering, panic::AssertUnwindSafe, time::Duration};
use std::{
    panic,
    sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel},
    thread::{self, JoinHandle},
    time::Instant,
};

use tracing::{debug, error};

/// Work run when a teardown deadline passes.
pub type TeardownTask = Box<dyn FnOnce() + Send>;

/// Runs a task after a delay.
///
/// Tasks must tolerate being superseded, a scheduler never cancels them.
pub trait TeardownScheduler: Send + Sync {
    /// Run `task` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, task: TeardownTask);
}

/// A single background thread that runs delayed teardowns in deadline order.
pub struct TeardownThread {
    sender: Sender<Message>,
    thread: Option<JoinHandle<()>>,
}

enum Message {
    Schedule(Pending),
    Shutdown,
}

struct Pending {
    deadline: Instant,
    sequence: u64,
    task: TeardownTask,
}

impl TeardownThread {
    /// Spawn the teardown thread.
    pub fn spawn() -> std::io::Result<Self> {
        let (sender, receiver) = channel();

        let thread = thread::Builder::new()
            .name("Capture Teardown".to_string())
            .spawn(move || run(receiver))?;

        Ok(Self {
            sender,
            thread: Some(thread),
        })
    }
}

impl TeardownScheduler for TeardownThread {
    fn schedule(&self, delay: Duration, task: TeardownTask) {
        let pending = Pending {
            deadline: Instant::now() + delay,
            sequence: 0,
            task,
        };

        if self.sender.send(Message::Schedule(pending)).is_err() {
            error!("Teardown thread has exited, the teardown will not run");
        }
    }
}

impl Drop for TeardownThread {
    fn drop(&mut self) {
        if self.sender.send(Message::Shutdown).is_err() {
            return;
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Teardown thread panicked");
            }
        }
    }
}

fn run(receiver: Receiver<Message>) {
    let mut queue: BinaryHeap<Pending> = BinaryHeap::new();
    let mut sequence = 0;

    loop {
        let message = match queue.peek() {
            Some(next) => {
                let now = Instant::now();
                if next.deadline <= now {
                    if let Some(pending) = queue.pop() {
                        if panic::catch_unwind(AssertUnwindSafe(pending.task)).is_err() {
                            error!("A teardown task panicked, continuing with the rest");
                        }
                    }
                    continue;
                }

                receiver.recv_timeout(next.deadline - now)
            }

            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match message {
            Ok(Message::Schedule(mut pending)) => {
                pending.sequence = sequence;
                sequence += 1;
                queue.push(pending);
            }
            Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    debug!("Teardown thread dropped {} pending teardowns", queue.len());
}

// Earliest deadline first, ties in scheduling order.
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use core::time::Duration;
    use std::{sync::mpsc::channel, time::Instant};

    use parking_lot::Mutex;

    use super::{TeardownScheduler, TeardownThread};

    #[test]
    fn runs_in_deadline_order() {
        let scheduler = TeardownThread::spawn().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (done_sender, done) = channel();

        for (label, delay) in [(2, 60), (0, 10), (1, 30)] {
            let order = Arc::clone(&order);
            let done_sender = done_sender.clone();
            scheduler.schedule(
                Duration::from_millis(delay),
                Box::new(move || {
                    order.lock().push(label);
                    done_sender.send(()).unwrap();
                }),
            );
        }

        let start = Instant::now();
        for _ in 0..3 {
            done.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn panicking_task_does_not_stop_the_thread() {
        let scheduler = TeardownThread::spawn().unwrap();
        let (done_sender, done) = channel();

        scheduler.schedule(
            Duration::from_millis(1),
            Box::new(|| panic!("teardown failed")),
        );
        scheduler.schedule(
            Duration::from_millis(5),
            Box::new(move || done_sender.send(()).unwrap()),
        );

        done.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn drop_discards_pending() {
        let ran = Arc::new(Mutex::new(false));

        {
            let scheduler = TeardownThread::spawn().unwrap();
            let ran = Arc::clone(&ran);
            scheduler.schedule(
                Duration::from_secs(60),
                Box::new(move || *ran.lock() = true),
            );
        }

        assert!(!*ran.lock());
    }
}
