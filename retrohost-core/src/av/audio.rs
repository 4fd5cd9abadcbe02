//! Audio ring buffer.
//!
//! The plugin delivers audio in per-frame bursts of interleaved stereo `i16`; the
//! output side wants a steady stream of stereo `f32` frames. The ring sits between
//! the two:
//! - `write` converts and accepts up to the free capacity; a full ring drops the
//!   whole batch and reports 0 accepted frames.
//! - `read` hands back buffered frames in order. Under [`ReadPolicy::Pad`] the
//!   shortfall is filled with silence so the consumer always gets what it asked for.
//!
//! Reallocation happens on sample-rate change and discards anything buffered.

use crate::config::ReadPolicy;
use crate::runtime::RuntimeError;

/// Stereo frames held by the single-sample accumulator before it is flushed early.
pub const ACCUMULATOR_FRAMES: usize = 512;

/// Ring capacity in frames for a sample rate: a quarter second of audio.
pub fn capacity_for_rate(sample_rate: u32, fallback: usize) -> usize {
    match sample_rate as usize / 4 {
        0 => fallback.max(1),
        n => n,
    }
}

#[derive(Debug)]
pub struct AudioRingBuffer {
    frames: Vec<[f32; 2]>,
    read: usize,
    write: usize,
    available: usize,
    policy: ReadPolicy,
}

impl AudioRingBuffer {
    pub fn new(capacity: usize, policy: ReadPolicy) -> Self {
        Self {
            frames: vec![[0.0; 2]; capacity.max(1)],
            read: 0,
            write: 0,
            available: 0,
            policy,
        }
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn available(&self) -> usize {
        self.available
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.available
    }

    pub fn policy(&self) -> ReadPolicy {
        self.policy
    }

    /// Accept interleaved stereo samples. Returns the number of frames taken.
    ///
    /// A trailing odd sample is ignored.
    pub fn write(&mut self, samples: &[i16]) -> Result<usize, RuntimeError> {
        let frame_count = samples.len() / 2;
        if frame_count == 0 {
            return Ok(0);
        }

        let accepted = frame_count.min(self.free());
        if accepted == 0 {
            return Err(RuntimeError::AudioBufferFull {
                dropped: frame_count,
            });
        }

        let capacity = self.capacity();
        for (i, pair) in samples.chunks_exact(2).take(accepted).enumerate() {
            let slot = (self.write + i) % capacity;
            self.frames[slot] = [sample_to_f32(pair[0]), sample_to_f32(pair[1])];
        }

        self.write = (self.write + accepted) % capacity;
        self.available += accepted;
        Ok(accepted)
    }

    /// Read into `out` (interleaved stereo, `out.len() / 2` frames requested).
    ///
    /// Returns the number of frames the caller should consume: the full request
    /// under `Pad`, the buffered count under `Exact`.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let requested = out.len() / 2;
        let taken = requested.min(self.available);
        let capacity = self.capacity();

        for (i, dst) in out.chunks_exact_mut(2).take(taken).enumerate() {
            let [l, r] = self.frames[(self.read + i) % capacity];
            dst[0] = l;
            dst[1] = r;
        }
        out[taken * 2..requested * 2].fill(0.0);

        self.read = (self.read + taken) % capacity;
        self.available -= taken;

        match self.policy {
            ReadPolicy::Pad => requested,
            ReadPolicy::Exact => taken,
        }
    }

    /// Drop everything buffered and reset the indices.
    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
        self.available = 0;
    }
}

#[inline]
fn sample_to_f32(s: i16) -> f32 {
    s as f32 / 32768.0
}

/// Batches audio from plugins that deliver one stereo sample per call.
///
/// Flushed into the ring once per frame, or early when it fills up.
#[derive(Debug)]
pub struct SampleAccumulator {
    samples: Vec<i16>,
}

impl Default for SampleAccumulator {
    fn default() -> Self {
        Self {
            samples: Vec::with_capacity(ACCUMULATOR_FRAMES * 2),
        }
    }
}

impl SampleAccumulator {
    pub fn is_full(&self) -> bool {
        self.samples.len() >= ACCUMULATOR_FRAMES * 2
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    pub fn push(&mut self, left: i16, right: i16) {
        self.samples.push(left);
        self.samples.push(right);
    }

    /// Write the batch into `ring` and empty the accumulator.
    ///
    /// Returns `(accepted, dropped)` frame counts.
    pub fn flush_into(&mut self, ring: Option<&mut AudioRingBuffer>) -> (usize, usize) {
        let frames = self.frames();
        if frames == 0 {
            return (0, 0);
        }
        let accepted = match ring {
            Some(ring) => ring.write(&self.samples).unwrap_or(0),
            None => 0,
        };
        self.samples.clear();
        (accepted, frames - accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(capacity: usize) -> AudioRingBuffer {
        AudioRingBuffer::new(capacity, ReadPolicy::Pad)
    }

    #[test]
    fn write_then_read_preserves_order() {
        let mut rb = ring(8);
        let samples: Vec<i16> = (0..10).map(|i| i * 1000).collect();
        assert_eq!(rb.write(&samples).unwrap(), 5);

        let mut out = [1.0f32; 10];
        assert_eq!(rb.read(&mut out), 5);
        for (got, want) in out.iter().zip(samples.iter()) {
            assert!((got - *want as f32 / 32768.0).abs() < 1e-6);
        }
        assert_eq!(rb.available(), 0);
    }

    #[test]
    fn partial_accept_up_to_free_capacity() {
        let mut rb = ring(4);
        assert_eq!(rb.write(&[1; 6]).unwrap(), 3);
        assert_eq!(rb.write(&[2; 6]).unwrap(), 1);
        assert_eq!(rb.available(), 4);
    }

    #[test]
    fn full_ring_drops_whole_batch() {
        let mut rb = ring(2);
        rb.write(&[0; 4]).unwrap();
        match rb.write(&[7; 8]) {
            Err(RuntimeError::AudioBufferFull { dropped }) => assert_eq!(dropped, 4),
            other => panic!("expected AudioBufferFull, got {other:?}"),
        }
        assert_eq!(rb.available(), 2);
    }

    #[test]
    fn empty_read_pads_with_silence() {
        let mut rb = ring(16);
        let mut out = [0.5f32; 8];
        assert_eq!(rb.read(&mut out), 4);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn exact_policy_reports_true_count() {
        let mut rb = AudioRingBuffer::new(16, ReadPolicy::Exact);
        rb.write(&[100, -100, 200, -200]).unwrap();
        let mut out = [0.5f32; 8];
        assert_eq!(rb.read(&mut out), 2);
        assert_eq!(&out[4..], &[0.0; 4]);
    }

    #[test]
    fn indices_wrap_around() {
        let mut rb = ring(3);
        let mut out = [0.0f32; 4];
        for round in 0..5i16 {
            rb.write(&[round, round, round + 1, round + 1]).unwrap();
            assert_eq!(rb.read(&mut out), 2);
            assert_eq!(out[0], round as f32 / 32768.0);
            assert_eq!(out[2], (round + 1) as f32 / 32768.0);
            assert!(rb.available() <= rb.capacity());
        }
    }

    #[test]
    fn invariant_holds_over_mixed_operations() {
        let mut rb = ring(10);
        let mut out = [0.0f32; 6];
        for step in 0..50usize {
            let batch = vec![1i16; (step % 7) * 2];
            let before = rb.free();
            let accepted = rb.write(&batch).unwrap_or(0);
            assert!(accepted <= before);
            if step % 3 == 0 {
                rb.read(&mut out);
            }
            assert!(rb.available() <= rb.capacity());
        }
    }

    #[test]
    fn capacity_is_quarter_second_with_fallback() {
        assert_eq!(capacity_for_rate(48_000, 11_025), 12_000);
        assert_eq!(capacity_for_rate(3, 11_025), 11_025);
        assert_eq!(capacity_for_rate(0, 11_025), 11_025);
    }

    #[test]
    fn clear_discards_buffered_audio() {
        let mut rb = ring(8);
        rb.write(&[5; 8]).unwrap();
        rb.clear();
        assert_eq!(rb.available(), 0);
        assert_eq!(rb.free(), 8);
    }

    #[test]
    fn accumulator_flush_reports_drops() {
        let mut acc = SampleAccumulator::default();
        let mut rb = ring(2);
        for i in 0..3 {
            acc.push(i, -i);
        }
        assert_eq!(acc.flush_into(Some(&mut rb)), (2, 1));
        assert!(acc.is_empty());

        acc.push(1, 1);
        assert_eq!(acc.flush_into(None), (0, 1));
    }

    #[test]
    fn accumulator_fills_at_limit() {
        let mut acc = SampleAccumulator::default();
        for _ in 0..ACCUMULATOR_FRAMES {
            assert!(!acc.is_full());
            acc.push(0, 0);
        }
        assert!(acc.is_full());
    }
}
