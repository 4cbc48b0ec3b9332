//! Lock-free sample FIFO between the capture and playback callbacks
//!
//! Built on crossbeam's `ArrayQueue`, so both ends work through a shared
//! reference and the buffer can sit in an `Arc` between two callbacks.
//!
//! Performance characteristics:
//! - Lock-free (no mutex contention)
//! - Fixed capacity, no allocations after construction
//! - Overflowing samples are dropped, underflow is left to the caller

use crossbeam::queue::ArrayQueue;

/// Single-producer single-consumer sample queue
pub struct LockFreeRingBuffer {
    queue: ArrayQueue<f32>,
}

impl LockFreeRingBuffer {
    /// Create a buffer holding at least `capacity` samples
    ///
    /// Capacity is rounded up to the next power of 2.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }

    /// Write samples (producer); returns how many fit
    pub fn write(&self, samples: &[f32]) -> usize {
        let mut written = 0;
        for &sample in samples {
            if self.queue.push(sample).is_err() {
                break;
            }
            written += 1;
        }
        written
    }

    /// Read samples into `buffer` (consumer); returns how many were available
    pub fn read(&self, buffer: &mut [f32]) -> usize {
        let mut read = 0;
        for slot in buffer.iter_mut() {
            match self.queue.pop() {
                Some(sample) => *slot = sample,
                None => break,
            }
            read += 1;
        }
        read
    }

    /// Write only whole frames of `channels` samples; returns samples written
    ///
    /// Frames that do not fit completely are dropped, so the consumer never
    /// sees a frame split across two reads.
    pub fn write_frames(&self, samples: &[f32], channels: usize) -> usize {
        let fit = whole_frames(samples.len().min(self.available_write()), channels);
        self.write(&samples[..fit])
    }

    /// Read only whole frames of `channels` samples; returns samples read
    pub fn read_frames(&self, buffer: &mut [f32], channels: usize) -> usize {
        let ready = whole_frames(buffer.len().min(self.available_read()), channels);
        self.read(&mut buffer[..ready])
    }

    pub fn available_write(&self) -> usize {
        self.queue.capacity() - self.queue.len()
    }

    pub fn available_read(&self) -> usize {
        self.queue.len()
    }

    /// Discard everything queued
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// `samples` rounded down to a multiple of `channels`
fn whole_frames(samples: usize, channels: usize) -> usize {
    match channels {
        0 => 0,
        c => samples - samples % c,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_lockfree_basic() {
        let buffer = LockFreeRingBuffer::with_capacity(16);

        let input = vec![1.0, 2.0, 3.0, 4.0];
        let mut output = vec![0.0; 4];

        assert_eq!(buffer.write(&input), 4);
        assert_eq!(buffer.available_read(), 4);
        assert_eq!(buffer.read(&mut output), 4);
        assert_eq!(output, input);
    }

    #[test]
    fn test_lockfree_wraparound() {
        let buffer = LockFreeRingBuffer::with_capacity(8);

        let input1 = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(buffer.write(&input1), 6);

        let mut output1 = vec![0.0; 4];
        assert_eq!(buffer.read(&mut output1), 4);
        assert_eq!(output1, vec![1.0, 2.0, 3.0, 4.0]);

        // 2 queued, 6 free
        let input2 = vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0];
        assert_eq!(buffer.write(&input2), 6);

        let mut output2 = vec![0.0; 10];
        assert_eq!(buffer.read(&mut output2), 8);
        assert_eq!(output2[..8], vec![5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_lockfree_capacity_rounding() {
        let buffer = LockFreeRingBuffer::with_capacity(10);
        assert_eq!(buffer.capacity(), 16);
    }

    #[test]
    fn test_lockfree_empty_full() {
        let buffer = LockFreeRingBuffer::with_capacity(8);

        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);

        buffer.write(&[1.0; 7]);
        assert_eq!(buffer.len(), 7);
        assert_eq!(buffer.available_write(), 1);

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_lockfree_across_threads() {
        let buffer = Arc::new(LockFreeRingBuffer::with_capacity(1024));
        let producer = Arc::clone(&buffer);

        let handle = std::thread::spawn(move || {
            let samples: Vec<f32> = (0..512).map(|i| i as f32).collect();
            let mut sent = 0;
            while sent < samples.len() {
                sent += producer.write(&samples[sent..]);
            }
        });

        let mut received = Vec::new();
        let mut chunk = [0.0; 64];
        while received.len() < 512 {
            let n = buffer.read(&mut chunk);
            received.extend_from_slice(&chunk[..n]);
        }
        handle.join().unwrap();

        let expected: Vec<f32> = (0..512).map(|i| i as f32).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_lockfree_overflow_drops_whole_frames() {
        let buffer = LockFreeRingBuffer::with_capacity(8);
        assert_eq!(buffer.write_frames(&[1.0; 7], 1), 7);
        // one slot left, a stereo frame does not fit
        assert_eq!(buffer.write_frames(&[0.1, 0.2], 2), 0);
        assert_eq!(buffer.len(), 7);
    }

    #[test]
    fn test_lockfree_reads_never_split_frames() {
        let buffer = LockFreeRingBuffer::with_capacity(16);
        buffer.write(&[1.0, -1.0, 2.0, -2.0, 3.0]);

        let mut out = [0.0; 8];
        assert_eq!(buffer.read_frames(&mut out, 2), 4);
        assert_eq!(out[..4], [1.0, -1.0, 2.0, -2.0]);

        // the lone left sample waits for its partner
        assert_eq!(buffer.read_frames(&mut out, 2), 0);
        buffer.write(&[-3.0]);
        assert_eq!(buffer.read_frames(&mut out, 2), 2);
        assert_eq!(out[..2], [3.0, -3.0]);
    }

    #[test]
    fn test_lockfree_channel_order_survives_overflow() {
        // three channels never divide the power-of-two capacity
        let buffer = LockFreeRingBuffer::with_capacity(8);
        let frames = [1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0];
        let mut out = [0.0; 9];
        for _ in 0..4 {
            buffer.write_frames(&frames, 3);
            let got = buffer.read_frames(&mut out[..3], 3);
            assert_eq!(got, 3);
            assert_eq!(out[..3], [1.0, 2.0, 3.0]);
        }
    }

    proptest! {
        #[test]
        fn prop_preserves_order(samples in proptest::collection::vec(-1.0f32..1.0, 0..200)) {
            let buffer = LockFreeRingBuffer::with_capacity(256);
            prop_assert_eq!(buffer.write(&samples), samples.len());
            let mut out = vec![0.0; samples.len()];
            prop_assert_eq!(buffer.read(&mut out), samples.len());
            prop_assert_eq!(out, samples);
        }
    }
}
