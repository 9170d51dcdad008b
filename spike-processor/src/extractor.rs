//! Spike event queue and waveform extraction at window boundaries.

use std::collections::VecDeque;

use crate::window::WindowBuffer;

/// A detected threshold crossing, queued until the next window boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpikeEvent {
    pub channel: usize,
    pub sample_index: u64,
    /// Set when the event's frame runs past the window it was detected in
    /// and extraction had to wait one boundary.
    pub is_cross_window: bool,
}

impl SpikeEvent {
    pub fn new(channel: usize, sample_index: u64) -> Self {
        Self {
            channel,
            sample_index,
            is_cross_window: false,
        }
    }
}

enum Outcome {
    /// Scratch buffer holds a full-length waveform.
    Extracted,
    /// Event re-enqueued for the next boundary.
    Deferred,
    /// Nothing to extract; event consumed.
    Dropped,
}

/// Drains the event queue at each window boundary and cuts fixed-length
/// snippets out of the buffered filtered samples, reading across the
/// previous/active window boundary where the frame demands it.
#[derive(Debug)]
pub struct WaveformExtractor {
    window_size: usize,
    cut_len: usize,
    queue: VecDeque<SpikeEvent>,
    waveform: Vec<f64>,
}

impl WaveformExtractor {
    pub fn new(window_size: usize, cut_len: usize) -> Self {
        Self {
            window_size,
            cut_len,
            queue: VecDeque::new(),
            waveform: Vec::with_capacity(cut_len),
        }
    }

    pub fn enqueue(&mut self, event: SpikeEvent) {
        self.queue.push_back(event);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Events currently waiting for the next boundary with the
    /// cross-window flag set.
    pub fn queued_cross_window(&self) -> usize {
        self.queue.iter().filter(|e| e.is_cross_window).count()
    }

    /// Drain every event that was queued when the boundary was reached, in
    /// FIFO order. `sink` receives `(channel, waveform)` for each event that
    /// yields a full-length snippet; deferred events are re-enqueued once
    /// with the cross-window flag and are not passed to the sink.
    pub fn drain_boundary<F>(&mut self, buffer: &WindowBuffer, mut sink: F)
    where
        F: FnMut(usize, &[f64]),
    {
        let pending = self.queue.len();
        for _ in 0..pending {
            let event = match self.queue.pop_front() {
                Some(e) => e,
                None => break,
            };
            match self.extract(&event, buffer) {
                Outcome::Extracted => sink(event.channel, &self.waveform),
                Outcome::Deferred => {
                    let mut deferred = event;
                    deferred.is_cross_window = true;
                    self.queue.push_back(deferred);
                }
                Outcome::Dropped => {}
            }
        }
    }

    fn extract(&mut self, event: &SpikeEvent, buffer: &WindowBuffer) -> Outcome {
        let window_size = self.window_size as isize;
        let half = (self.cut_len / 2) as isize;
        let pos = (event.sample_index % self.window_size as u64) as isize;
        let frame_start = pos - half;
        let frame_end = pos + half;
        let active = buffer.active();
        self.waveform.clear();

        // Deferred event: its window is now the previous one, the frame
        // tail reaches into the current active window.
        if event.is_cross_window {
            let prev = match buffer.previous() {
                Some(prev) => prev,
                None => return Outcome::Dropped,
            };
            let head = (frame_end - window_size) as usize;
            if head > active.len() {
                return Outcome::Dropped;
            }
            for offset in frame_start as usize..self.window_size {
                self.waveform.push(prev.value(offset, event.channel));
            }
            for offset in 0..head {
                self.waveform.push(active.value(offset, event.channel));
            }
            return Outcome::Extracted;
        }

        // Frame entirely inside the active window.
        if frame_start >= 0 && frame_end <= window_size - half {
            let start = frame_start as usize;
            if start + self.cut_len > active.len() {
                return Outcome::Dropped;
            }
            for offset in start..start + self.cut_len {
                self.waveform.push(active.value(offset, event.channel));
            }
            return Outcome::Extracted;
        }

        // Frame begins in the previous window.
        if frame_start < 0 {
            let prev = match buffer.previous() {
                Some(prev) => prev,
                // Cold start: nothing before the first window.
                None => return Outcome::Dropped,
            };
            let tail = (-frame_start) as usize;
            let head = self.cut_len - tail;
            if head > active.len() {
                return Outcome::Dropped;
            }
            for offset in self.window_size - tail..self.window_size {
                self.waveform.push(prev.value(offset, event.channel));
            }
            for offset in 0..head {
                self.waveform.push(active.value(offset, event.channel));
            }
            return Outcome::Extracted;
        }

        // Frame runs past the end of the active window: wait one boundary.
        if frame_end >= window_size {
            return Outcome::Deferred;
        }

        // Late-window events whose frame fits but ends inside the guard
        // zone fall through; they are consumed without a waveform.
        Outcome::Dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowBuffer;

    const WS: usize = 1000;
    const L: usize = 32;

    /// Single-channel buffer where the value at sample index i is i itself,
    /// filled through `count` samples and left sitting at the boundary: the
    /// active window is full but not yet rotated, which is exactly when the
    /// pipeline drains events.
    fn boundary_buffer(count: u64) -> WindowBuffer {
        let mut buffer = WindowBuffer::new(WS, 5, 1);
        for i in 0..count {
            if buffer.active_is_full() {
                buffer.rotate();
            }
            buffer.push(i, &[i as f64]);
        }
        buffer
    }

    fn drain(extractor: &mut WaveformExtractor, buffer: &WindowBuffer) -> Vec<Vec<f64>> {
        let mut out = Vec::new();
        extractor.drain_boundary(buffer, |_, wf| out.push(wf.to_vec()));
        out
    }

    #[test]
    fn frame_inside_active_window() {
        // Boundary state after filling [1000, 2000): window 2 is active-full.
        let buffer = boundary_buffer(2000);
        let mut ex = WaveformExtractor::new(WS, L);
        ex.enqueue(SpikeEvent::new(0, 1500));
        let got = drain(&mut ex, &buffer);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].len(), L);
        assert_eq!(got[0][0], 1484.0);
        assert_eq!(got[0][L - 1], 1515.0);
        assert_eq!(ex.queue_len(), 0);
    }

    #[test]
    fn frame_straddles_previous_window() {
        // Event at 1010 in window 2: frame [994, 1026), 6 samples from the
        // window-1 tail and 26 from the window-2 head.
        let buffer = boundary_buffer(2000);
        let mut ex = WaveformExtractor::new(WS, L);
        ex.enqueue(SpikeEvent::new(0, 1010));
        let got = drain(&mut ex, &buffer);
        assert_eq!(got.len(), 1);
        let expected: Vec<f64> = (994..1026).map(|v| v as f64).collect();
        assert_eq!(got[0], expected);
    }

    #[test]
    fn cold_start_event_is_dropped() {
        // First boundary ever; an event whose frame dips below index 0 has
        // no previous window to read.
        let buffer = boundary_buffer(1000);
        let mut ex = WaveformExtractor::new(WS, L);
        ex.enqueue(SpikeEvent::new(0, 8));
        let got = drain(&mut ex, &buffer);
        assert!(got.is_empty());
        assert_eq!(ex.queue_len(), 0);
    }

    #[test]
    fn late_event_defers_then_extracts() {
        // Event at 1998 in window 2: frame [1982, 2014) runs past the
        // window, so the first drain re-enqueues it flagged; the second
        // drain reads 18 samples from the window-2 tail and 14 from the
        // window-3 head.
        let mut buffer = boundary_buffer(2000);
        let mut ex = WaveformExtractor::new(WS, L);
        ex.enqueue(SpikeEvent::new(0, 1998));

        let got = drain(&mut ex, &buffer);
        assert!(got.is_empty());
        assert_eq!(ex.queue_len(), 1);
        assert_eq!(ex.queued_cross_window(), 1);

        // Advance to the next boundary: window 3 = [2000, 3000) now full.
        buffer.rotate();
        for i in 2000..3000u64 {
            buffer.push(i, &[i as f64]);
        }
        assert!(buffer.active_is_full());

        let got = drain(&mut ex, &buffer);
        assert_eq!(got.len(), 1);
        let expected: Vec<f64> = (1982..2014).map(|v| v as f64).collect();
        assert_eq!(got[0], expected);
        assert_eq!(ex.queue_len(), 0);
    }

    #[test]
    fn drain_leaves_only_cross_window_events() {
        let buffer = boundary_buffer(2000);
        let mut ex = WaveformExtractor::new(WS, L);
        ex.enqueue(SpikeEvent::new(0, 1500)); // extracts
        ex.enqueue(SpikeEvent::new(0, 1990)); // defers
        ex.enqueue(SpikeEvent::new(0, 1010)); // extracts
        let got = drain(&mut ex, &buffer);
        assert_eq!(got.len(), 2);
        assert_eq!(ex.queue_len(), 1);
        assert_eq!(ex.queued_cross_window(), 1);
    }

    #[test]
    fn guard_zone_event_is_consumed_empty() {
        // pos 980: frame [964, 996) fits in the window but ends inside the
        // tail guard zone (window_size - L/2 = 984): no waveform, no defer.
        let buffer = boundary_buffer(1000);
        let mut ex = WaveformExtractor::new(WS, L);
        ex.enqueue(SpikeEvent::new(0, 980));
        let got = drain(&mut ex, &buffer);
        assert!(got.is_empty());
        assert_eq!(ex.queue_len(), 0);
    }

    #[test]
    fn waveform_length_is_always_full_or_zero() {
        let buffer = boundary_buffer(2000);
        let mut ex = WaveformExtractor::new(WS, L);
        for idx in [1000u64, 1016, 1483, 1984, 1999, 1100] {
            ex.enqueue(SpikeEvent::new(0, idx));
        }
        let mut lengths = Vec::new();
        ex.drain_boundary(&buffer, |_, wf| lengths.push(wf.len()));
        assert!(lengths.iter().all(|&l| l == L));
    }
}
