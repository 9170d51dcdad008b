//! Windowed ring buffer over filtered samples.
//!
//! The active window fills in place; completed windows move into a bounded
//! queue, oldest evicted first. Windows are aligned so that window k covers
//! sample indices `[k*window_size, (k+1)*window_size)`, which keeps
//! `sample_index % window_size` a valid in-window offset. Storage is flat
//! and recycled on eviction, so steady state allocates nothing.

use std::collections::VecDeque;

/// One fixed-capacity block of channel-interleaved samples.
#[derive(Debug)]
pub struct Window {
    start_index: u64,
    n_channel: usize,
    len: usize,
    data: Vec<f64>,
}

impl Window {
    fn with_capacity(window_size: usize, n_channel: usize) -> Self {
        Self {
            start_index: 0,
            n_channel,
            len: 0,
            data: vec![0.0; window_size * n_channel],
        }
    }

    /// Sample index of the first entry.
    pub fn start_index(&self) -> u64 {
        self.start_index
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Value at in-window `offset` for `channel`.
    #[inline]
    pub fn value(&self, offset: usize, channel: usize) -> f64 {
        debug_assert!(offset < self.len);
        self.data[offset * self.n_channel + channel]
    }

    fn push(&mut self, values: &[f64]) {
        debug_assert_eq!(values.len(), self.n_channel);
        let base = self.len * self.n_channel;
        self.data[base..base + self.n_channel].copy_from_slice(values);
        self.len += 1;
    }

    fn reset(&mut self, start_index: u64) {
        self.start_index = start_index;
        self.len = 0;
    }
}

/// Active window plus the queue of completed windows.
#[derive(Debug)]
pub struct WindowBuffer {
    window_size: usize,
    capacity: usize,
    active: Window,
    sealed: VecDeque<Window>,
    /// Pre-allocated storage pool; sized at startup so steady-state
    /// rotation never allocates.
    spare: Vec<Window>,
}

impl WindowBuffer {
    pub fn new(window_size: usize, capacity: usize, n_channel: usize) -> Self {
        let spare = (0..capacity)
            .map(|_| Window::with_capacity(window_size, n_channel))
            .collect();
        Self {
            window_size,
            capacity,
            active: Window::with_capacity(window_size, n_channel),
            sealed: VecDeque::with_capacity(capacity + 1),
            spare,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Append one sample to the active window. Indices must be contiguous.
    pub fn push(&mut self, sample_index: u64, values: &[f64]) {
        debug_assert_eq!(
            sample_index,
            self.active.start_index + self.active.len as u64,
            "samples must arrive in index order"
        );
        self.active.push(values);
    }

    /// True once the active window holds `window_size` samples; the caller
    /// must drain spike events and then `rotate`.
    pub fn active_is_full(&self) -> bool {
        self.active.len == self.window_size
    }

    /// Seal the active window into the queue, evicting the oldest window
    /// once the queue would exceed capacity. The evicted storage backs the
    /// next active window.
    pub fn rotate(&mut self) {
        let next_start = self.active.start_index + self.active.len as u64;
        let mut fresh = if self.sealed.len() >= self.capacity {
            // Oldest window leaves the in-memory history for good.
            self.sealed.pop_front().expect("capacity is at least 1")
        } else {
            self.spare
                .pop()
                .unwrap_or_else(|| Window::with_capacity(self.window_size, self.active.n_channel))
        };
        fresh.reset(next_start);
        let sealed = std::mem::replace(&mut self.active, fresh);
        self.sealed.push_back(sealed);
    }

    /// The window currently being filled.
    pub fn active(&self) -> &Window {
        &self.active
    }

    /// The most recently completed window, if any.
    pub fn previous(&self) -> Option<&Window> {
        self.sealed.back()
    }

    pub fn sealed_count(&self) -> usize {
        self.sealed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(buffer: &mut WindowBuffer, from: u64, count: u64, n_channel: usize) {
        for i in from..from + count {
            let values: Vec<f64> = (0..n_channel).map(|c| (i * 10 + c as u64) as f64).collect();
            buffer.push(i, &values);
            if buffer.active_is_full() {
                buffer.rotate();
            }
        }
    }

    #[test]
    fn windows_stay_aligned() {
        let mut buffer = WindowBuffer::new(100, 3, 2);
        fill(&mut buffer, 0, 250, 2);
        assert_eq!(buffer.sealed_count(), 2);
        assert_eq!(buffer.active().start_index(), 200);
        assert_eq!(buffer.active().len(), 50);
        let prev = buffer.previous().unwrap();
        assert_eq!(prev.start_index(), 100);
        assert_eq!(prev.len(), 100);
        // Offset/channel addressing reads back what went in.
        assert_eq!(prev.value(0, 0), 1000.0);
        assert_eq!(prev.value(99, 1), 1991.0);
    }

    #[test]
    fn eviction_is_oldest_first_and_bounded() {
        let mut buffer = WindowBuffer::new(10, 2, 1);
        fill(&mut buffer, 0, 55, 1);
        assert_eq!(buffer.sealed_count(), 2);
        // Windows [0,10) .. [20,30) evicted; [30,40) and [40,50) remain.
        assert_eq!(buffer.previous().unwrap().start_index(), 40);
        assert_eq!(buffer.active().start_index(), 50);
    }

    #[test]
    fn recycled_storage_is_reset() {
        let mut buffer = WindowBuffer::new(4, 1, 1);
        fill(&mut buffer, 0, 11, 1);
        // Third window active after two rotations through recycled storage.
        assert_eq!(buffer.active().start_index(), 8);
        assert_eq!(buffer.active().len(), 3);
        assert_eq!(buffer.previous().unwrap().value(3, 0), 70.0);
    }
}
