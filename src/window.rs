//! Rolling history of timestamped samples for live presentation.

use serde::Serialize;
use std::collections::VecDeque;

/// Default number of entries kept, matching the plotted range.
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

/// The window's length and capacity disagree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("window holds {len} entries but capacity is {capacity}")]
pub struct BufferInvariantError {
    pub len: usize,
    pub capacity: usize,
}

/// An ordered copy of the window contents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSnapshot<T> {
    pub timestamps: Vec<f64>,
    pub samples: Vec<T>,
}

impl<T> WindowSnapshot<T> {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Fixed-capacity FIFO of `(timestamp, sample)` pairs.
///
/// Appending past capacity evicts the oldest entries, so the buffer always
/// holds the most recent `capacity` appends in order.
#[derive(Debug, Clone)]
pub struct WindowBuffer<T> {
    entries: VecDeque<(f64, T)>,
    capacity: usize,
}

impl<T> WindowBuffer<T> {
    /// Create an empty window. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, evicting from the front until the window fits.
    pub fn append(&mut self, timestamp: f64, sample: T) {
        self.entries.push_back((timestamp, sample));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Most recent entry.
    pub fn latest(&self) -> Option<(f64, &T)> {
        self.entries.back().map(|(t, s)| (*t, s))
    }

    /// Iterate entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &T)> + '_ {
        self.entries.iter().map(|(t, s)| (*t, s))
    }

    /// Project one scalar per entry, e.g. a single axis for plotting.
    ///
    /// Entries for which `f` returns `None` are skipped.
    pub fn series<F>(&self, f: F) -> Vec<(f64, f64)>
    where
        F: Fn(&T) -> Option<f64>,
    {
        self.entries
            .iter()
            .filter_map(|(t, s)| f(s).map(|v| (*t, v)))
            .collect()
    }

    /// Verify the length bound.
    pub fn check(&self) -> Result<(), BufferInvariantError> {
        if self.entries.len() > self.capacity {
            return Err(BufferInvariantError {
                len: self.entries.len(),
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

impl<T: Clone> WindowBuffer<T> {
    /// Copy out the current timestamps and samples in append order.
    pub fn snapshot(&self) -> WindowSnapshot<T> {
        let (timestamps, samples): (Vec<f64>, Vec<T>) = self.entries.iter().cloned().unzip();
        WindowSnapshot {
            timestamps,
            samples,
        }
    }
}

impl<T> Default for WindowBuffer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}
