use alloc::sync::Arc;
use core::fmt::Debug;

use parking_lot::{Condvar, Mutex};

/// A one-shot completion signal of an enqueued command.
#[derive(Clone)]
pub struct Event(Arc<EventState>);

struct EventState {
    id: u64,
    status: Mutex<Option<Result<(), String>>>,
    completed: Condvar,
}

impl Event {
    pub(crate) fn pending(id: u64) -> Self {
        Self(Arc::new(EventState {
            id,
            status: Mutex::new(None),
            completed: Condvar::new(),
        }))
    }

    /// Complete the event, waking every waiter. Only the first completion counts.
    pub(crate) fn complete(&self, result: Result<(), String>) {
        let mut status = self.0.status.lock();
        if status.is_none() {
            *status = Some(result);
            self.0.completed.notify_all();
        }
    }

    /// The id of the event, unique within a [`SoftwareCompute`](crate::SoftwareCompute).
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// If the command has finished, successfully or not.
    pub fn is_complete(&self) -> bool {
        self.0.status.lock().is_some()
    }

    /// Block until the command has finished. Returns the command's failure message if it failed.
    pub fn wait(&self) -> Result<(), String> {
        let mut status = self.0.status.lock();
        loop {
            if let Some(result) = status.as_ref() {
                return result.clone();
            }
            self.0.completed.wait(&mut status);
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Event {}

impl Debug for Event {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let status = match self.0.status.lock().as_ref() {
            None => "pending",
            Some(Ok(())) => "complete",
            Some(Err(_)) => "failed",
        };

        f.debug_struct("Event")
            .field("id", &self.0.id)
            .field("status", &status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use std::thread;

    use super::Event;

    #[test]
    fn waiters_see_the_first_completion() {
        let event = Event::pending(1);
        let waiter = {
            let event = event.clone();
            thread::spawn(move || event.wait())
        };

        event.complete(Err("out of resources".to_string()));
        event.complete(Ok(()));

        assert_eq!(waiter.join().unwrap(), Err("out of resources".to_string()));
        assert!(event.is_complete());
        assert_eq!(event, event.clone());
        assert_ne!(event, Event::pending(1));
        assert_eq!(Arc::strong_count(&event.0), 1);
    }
}
