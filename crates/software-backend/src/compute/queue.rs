use alloc::sync::Arc;
use core::fmt::Debug;
use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::mpsc::{Sender, channel},
    thread::{self, JoinHandle},
};

use tracing::{error, trace};

use super::{DeviceId, Event};

/// Work run by a queue worker, failing with a message.
pub(crate) type Command = Box<dyn FnOnce() -> Result<(), String> + Send>;

struct Submission {
    wait: Vec<Event>,
    command: Command,
    event: Event,
}

/// An in-order command queue, backed by a worker thread.
///
/// Commands run one at a time in submission order, each after its wait list has completed.
#[derive(Clone)]
pub struct Queue(Arc<QueueInner>);

struct QueueInner {
    id: u64,
    device: DeviceId,
    sender: Option<Sender<Submission>>,
    worker: Option<JoinHandle<()>>,
}

impl Queue {
    pub(crate) fn spawn(id: u64, device: DeviceId) -> std::io::Result<Self> {
        let (sender, receiver) = channel::<Submission>();

        let worker = thread::Builder::new()
            .name(format!("Software Queue {id}"))
            .spawn(move || {
                for Submission {
                    wait,
                    command,
                    event,
                } in receiver
                {
                    let result = wait_all(&wait).and_then(|_| {
                        catch_unwind(AssertUnwindSafe(command))
                            .unwrap_or_else(|_| Err("the command panicked".to_string()))
                    });

                    if let Err(message) = &result {
                        trace!("Event {} failed: {message}", event.id());
                    }
                    event.complete(result);
                }
            })?;

        Ok(Self(Arc::new(QueueInner {
            id,
            device,
            sender: Some(sender),
            worker: Some(worker),
        })))
    }

    /// The device the queue submits to.
    pub fn device(&self) -> DeviceId {
        self.0.device
    }

    /// Submit a command that runs once every event in `wait` has completed successfully.
    pub(crate) fn submit(&self, wait: &[Event], event: Event, command: Command) -> Result<Event, String> {
        let sender = self
            .0
            .sender
            .as_ref()
            .ok_or_else(|| "the queue is shut down".to_string())?;

        sender
            .send(Submission {
                wait: wait.to_vec(),
                command,
                event: event.clone(),
            })
            .map_err(|_| "the queue worker has exited".to_string())?;

        Ok(event)
    }
}

fn wait_all(events: &[Event]) -> Result<(), String> {
    for event in events {
        event
            .wait()
            .map_err(|message| format!("event {} in the wait list failed: {message}", event.id()))?;
    }

    Ok(())
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish the submitted commands and exit.
        drop(self.sender.take());

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Software queue {} worker panicked", self.id);
            }
        }
    }
}

impl Debug for Queue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Queue")
            .field("id", &self.0.id)
            .field("device", &self.0.device)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use parking_lot::Mutex;

    use super::{DeviceId, Event, Queue};

    #[test]
    fn commands_run_in_order() {
        let queue = Queue::spawn(1, DeviceId { platform: 0, index: 0 }).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let events: Vec<Event> = (0..8)
            .map(|index| {
                let order = Arc::clone(&order);
                queue
                    .submit(
                        &[],
                        Event::pending(index),
                        Box::new(move || {
                            order.lock().push(index);
                            Ok(())
                        }),
                    )
                    .unwrap()
            })
            .collect();

        for event in &events {
            event.wait().unwrap();
        }
        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn failed_dependency_fails_the_dependent() {
        let queue = Queue::spawn(1, DeviceId { platform: 0, index: 0 }).unwrap();

        let failed = queue
            .submit(&[], Event::pending(1), Box::new(|| Err("no memory".to_string())))
            .unwrap();
        let dependent = queue
            .submit(
                &[failed.clone()],
                Event::pending(2),
                Box::new(|| panic!("must not run")),
            )
            .unwrap();
        let panicking = queue
            .submit(&[], Event::pending(3), Box::new(|| panic!("kernel bug")))
            .unwrap();

        assert_eq!(failed.wait(), Err("no memory".to_string()));
        assert!(dependent.wait().unwrap_err().contains("no memory"));
        assert_eq!(panicking.wait(), Err("the command panicked".to_string()));
    }
}
