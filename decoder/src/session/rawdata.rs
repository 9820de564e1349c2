use std::collections::VecDeque;

/// Raw samples of the current utterance, capped at a configured size. Once
/// full, the oldest samples are dropped.
#[derive(Debug, Default)]
pub struct RawDataBuffer {
    capacity: usize,
    samples: VecDeque<i16>,
}

impl RawDataBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        let excess = self.samples.len().saturating_sub(capacity);
        self.samples.drain(..excess);
    }

    pub fn push(&mut self, samples: &[i16]) {
        if self.capacity == 0 {
            return;
        }
        let tail = &samples[samples.len().saturating_sub(self.capacity)..];
        let excess = (self.samples.len() + tail.len()).saturating_sub(self.capacity);
        self.samples.drain(..excess);
        self.samples.extend(tail);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Captured samples, oldest first.
    pub fn to_vec(&self) -> Vec<i16> {
        self.samples.iter().copied().collect()
    }
}
