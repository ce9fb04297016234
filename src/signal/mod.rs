use std::collections::VecDeque;

/// Number of samples kept per device when no other length is configured
pub const DEFAULT_HISTORY_LENGTH: usize = 3;

pub type Rssi = i32;

/// Rolling window of the most recent signal strength samples for a device.
/// Once the window is full the oldest sample is dropped to make room.
#[derive(Clone, Debug, PartialEq)]
pub struct SignalHistory {
    samples: VecDeque<Rssi>,
    capacity: usize,
}

impl SignalHistory {
    /// Start a history with its first sample. A history is never empty, so
    /// `average` and `latest` always have something to work with.
    pub fn new(first: Rssi, capacity: usize) -> Self {
        // A zero sized window would throw away the sample we were just given
        let capacity = capacity.max(1);

        let mut samples = VecDeque::with_capacity(capacity);
        samples.push_back(first);

        Self { samples, capacity }
    }

    pub fn append(&mut self, sample: Rssi) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Integer mean of the window, truncated toward zero
    pub fn average(&self) -> Rssi {
        let sum: i64 = self.samples.iter().map(|&s| s as i64).sum();
        (sum / self.samples.len() as i64) as Rssi
    }

    pub fn latest(&self) -> Rssi {
        // Constructed with one sample and never drained
        self.samples.back().copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn samples(&self) -> impl Iterator<Item = Rssi> + '_ {
        self.samples.iter().copied()
    }
}
