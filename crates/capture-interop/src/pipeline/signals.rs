use core::fmt;

use crate::ComputeBackend;

struct Signal<B: ComputeBackend> {
    event: B::Event,
    outputs: Vec<B::Mem>,
}

/// The completion signals of a chain of enqueued work, each tagged with the memory objects it
/// produced.
///
/// A stage waits only on the signals that produced its inputs, the chain is complete once every
/// signal has fired.
pub struct SignalList<B: ComputeBackend> {
    signals: Vec<Signal<B>>,
}

impl<B: ComputeBackend> SignalList<B> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            signals: Vec::new(),
        }
    }

    /// Append a signal that fires once `outputs` have been written.
    pub fn push(&mut self, event: B::Event, outputs: &[&B::Mem]) {
        self.signals.push(Signal {
            event,
            outputs: outputs.iter().map(|&mem| mem.clone()).collect(),
        });
    }

    /// The latest producer of each input, without duplicates.
    pub fn producers_of(&self, inputs: &[&B::Mem]) -> Vec<B::Event> {
        let mut producers: Vec<B::Event> = Vec::with_capacity(inputs.len());

        for input in inputs {
            let producer = self
                .signals
                .iter()
                .rev()
                .find(|signal| signal.outputs.iter().any(|output| output == *input));

            if let Some(signal) = producer {
                if !producers.contains(&signal.event) {
                    producers.push(signal.event.clone());
                }
            }
        }

        producers
    }

    /// If the list holds an event.
    pub fn contains(&self, event: &B::Event) -> bool {
        self.signals.iter().any(|signal| signal.event == *event)
    }

    /// Every signal in the order it was pushed.
    pub fn events(&self) -> impl Iterator<Item = &B::Event> {
        self.signals.iter().map(|signal| &signal.event)
    }

    /// The most recently pushed signal.
    pub fn last(&self) -> Option<&B::Event> {
        self.signals.last().map(|signal| &signal.event)
    }

    /// The number of signals.
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// If no signal has been pushed.
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Forget every signal, e.g. once the chain has completed.
    pub fn clear(&mut self) {
        self.signals.clear();
    }
}

impl<B: ComputeBackend> Default for SignalList<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ComputeBackend> fmt::Debug for SignalList<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.events()).finish()
    }
}
