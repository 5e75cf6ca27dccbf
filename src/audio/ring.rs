//! Overwrite-on-full sample ring shared between the capture thread and ticks.
//!
//! Samples live in atomic cells. The single writer bumps a sequence counter to
//! an odd value before touching the cells and back to even afterwards; readers
//! copy their window and keep it only if the sequence did not move, so a
//! snapshot is never torn and the writer never waits on a reader.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{PipelineError, Result};

/// Attempts before a snapshot that keeps racing the writer gives up.
const MAX_SNAPSHOT_RETRIES: usize = 1000;

struct Shared {
    cells: Box<[AtomicU32]>,
    /// Total samples ever written
    written: AtomicU64,
    /// Odd while a write is in progress
    sequence: AtomicU64,
}

/// Create a ring holding the most recent `capacity` samples.
pub fn ring_buffer(capacity: usize) -> (RingWriter, RingReader) {
    let capacity = capacity.max(1);
    let cells: Vec<AtomicU32> = (0..capacity).map(|_| AtomicU32::new(0)).collect();
    let shared = Arc::new(Shared {
        cells: cells.into_boxed_slice(),
        written: AtomicU64::new(0),
        sequence: AtomicU64::new(0),
    });
    (
        RingWriter {
            shared: Arc::clone(&shared),
        },
        RingReader { shared },
    )
}

/// Sole producer. Not `Clone`.
pub struct RingWriter {
    shared: Arc<Shared>,
}

impl RingWriter {
    /// Append samples, overwriting the oldest data once full.
    pub fn push(&mut self, samples: &[f32]) {
        let shared = &*self.shared;
        let capacity = shared.cells.len();

        let seq = shared.sequence.load(Ordering::Relaxed);
        shared.sequence.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        // Only the newest `capacity` samples can survive this write
        let skip = samples.len().saturating_sub(capacity);
        let mut cursor = shared.written.load(Ordering::Relaxed) + skip as u64;
        for &sample in &samples[skip..] {
            let slot = (cursor % capacity as u64) as usize;
            shared.cells[slot].store(sample.to_bits(), Ordering::Relaxed);
            cursor += 1;
        }
        shared.written.store(cursor, Ordering::Relaxed);

        shared.sequence.store(seq.wrapping_add(2), Ordering::Release);
    }

    pub fn capacity(&self) -> usize {
        self.shared.cells.len()
    }
}

/// Snapshot side; cheap to clone.
#[derive(Clone)]
pub struct RingReader {
    shared: Arc<Shared>,
}

impl RingReader {
    pub fn capacity(&self) -> usize {
        self.shared.cells.len()
    }

    pub fn total_written(&self) -> u64 {
        self.shared.written.load(Ordering::Acquire)
    }

    /// Copy the most recent `out.len()` samples into `out`, oldest first.
    /// Zero-pads the front when fewer samples have ever been written.
    /// Returns the write cursor the window ends at.
    pub fn snapshot(&self, out: &mut [f32]) -> Result<u64> {
        let shared = &*self.shared;
        let capacity = shared.cells.len();
        let window = out.len();
        if window > capacity {
            return Err(PipelineError::AnalysisTick(format!(
                "window of {} samples exceeds ring capacity {}",
                window, capacity
            )));
        }

        for _ in 0..MAX_SNAPSHOT_RETRIES {
            let before = shared.sequence.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::thread::yield_now();
                continue;
            }

            let written = shared.written.load(Ordering::Relaxed);
            let available = (written.min(window as u64)) as usize;
            let pad = window - available;
            out[..pad].fill(0.0);

            let start = written - available as u64;
            for (i, value) in out[pad..].iter_mut().enumerate() {
                let slot = ((start + i as u64) % capacity as u64) as usize;
                *value = f32::from_bits(shared.cells[slot].load(Ordering::Relaxed));
            }

            fence(Ordering::Acquire);
            if shared.sequence.load(Ordering::Relaxed) == before {
                return Ok(written);
            }
            std::thread::yield_now();
        }

        Err(PipelineError::AnalysisTick(
            "ring snapshot kept racing the capture thread".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn is_contiguous(window: &[f32]) -> bool {
        window.windows(2).all(|pair| pair[1] == pair[0] + 1.0)
    }

    #[test]
    fn pads_with_zeros_before_first_window() {
        let (mut writer, reader) = ring_buffer(8);
        writer.push(&[1.0, 2.0, 3.0]);

        let mut out = [9.0f32; 5];
        let cursor = reader.snapshot(&mut out).unwrap();
        assert_eq!(cursor, 3);
        assert_eq!(out, [0.0, 0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn empty_ring_reads_silence() {
        let (_writer, reader) = ring_buffer(4);
        let mut out = [1.0f32; 4];
        reader.snapshot(&mut out).unwrap();
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn keeps_latest_samples_when_overwritten() {
        let (mut writer, reader) = ring_buffer(5);
        writer.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);

        let mut out = [0.0f32; 5];
        reader.snapshot(&mut out).unwrap();
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0, 7.0]);

        writer.push(&[8.0]);
        let mut out = [0.0f32; 3];
        reader.snapshot(&mut out).unwrap();
        assert_eq!(out, [6.0, 7.0, 8.0]);
        assert_eq!(reader.total_written(), 8);
    }

    #[test]
    fn rejects_window_larger_than_ring() {
        let (_writer, reader) = ring_buffer(4);
        let mut out = [0.0f32; 8];
        assert!(matches!(
            reader.snapshot(&mut out),
            Err(PipelineError::AnalysisTick(_))
        ));
    }

    #[test]
    fn stalled_then_resumed_writer_stays_contiguous() {
        let (mut writer, reader) = ring_buffer(16);
        let mut next = 0.0f32;
        let mut block = |writer: &mut RingWriter, len: usize| {
            let samples: Vec<f32> = (0..len).map(|i| next + i as f32).collect();
            next += len as f32;
            writer.push(&samples);
        };

        block(&mut writer, 8);
        let mut out = [0.0f32; 8];
        reader.snapshot(&mut out).unwrap();
        assert!(is_contiguous(&out));

        // Reader falls behind while the writer laps the ring several times
        for _ in 0..7 {
            block(&mut writer, 8);
        }
        reader.snapshot(&mut out).unwrap();
        assert!(is_contiguous(&out));
        assert_eq!(out[7], 63.0);
    }

    #[test]
    fn concurrent_reads_are_never_torn() {
        const BLOCK: usize = 256;
        const BLOCKS: usize = 1000;
        let (mut writer, reader) = ring_buffer(BLOCK * 2);

        let producer = thread::spawn(move || {
            for b in 0..BLOCKS {
                let samples: Vec<f32> = (0..BLOCK).map(|i| (b * BLOCK + i) as f32).collect();
                writer.push(&samples);
                if b % 4 == 0 {
                    thread::sleep(Duration::from_micros(50));
                }
            }
        });

        let mut window = vec![0.0f32; BLOCK];
        while !producer.is_finished() {
            if let Ok(cursor) = reader.snapshot(&mut window) {
                if cursor >= BLOCK as u64 {
                    assert!(is_contiguous(&window), "torn window at cursor {}", cursor);
                    assert_eq!(window[BLOCK - 1], (cursor - 1) as f32);
                }
            }
        }
        producer.join().unwrap();

        reader.snapshot(&mut window).unwrap();
        assert!(is_contiguous(&window));
        assert_eq!(window[BLOCK - 1], (BLOCK * BLOCKS - 1) as f32);
    }
}
