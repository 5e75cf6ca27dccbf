//! Tone-generating audio host for tests and the `--tone` CLI mode.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::device::{AudioHost, BlockReader, DeviceInfo, OpenedStream, StreamHandle, StreamSpec};
use crate::error::{PipelineError, Result};

/// A fake input endpoint producing a sine tone.
#[derive(Debug, Clone)]
pub struct SyntheticDevice {
    pub name: String,
    pub tone_hz: f32,
    pub amplitude: f32,
    pub channels: u16,
    pub sample_rate: u32,
    /// Reject opens as if another process held the device
    pub busy: bool,
    /// Fail the stream after this many blocks
    pub fail_after: Option<u64>,
    /// Block every read for this long, ignoring the caller's timeout
    pub stall: Option<Duration>,
    /// Sleep one block duration per read to mimic a real device
    pub paced: bool,
}

impl SyntheticDevice {
    pub fn tone(name: &str, tone_hz: f32, amplitude: f32) -> Self {
        Self {
            name: name.to_string(),
            tone_hz,
            amplitude,
            channels: 1,
            sample_rate: 44100,
            busy: false,
            fail_after: None,
            stall: None,
            paced: true,
        }
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn busy(mut self) -> Self {
        self.busy = true;
        self
    }

    pub fn fail_after(mut self, blocks: u64) -> Self {
        self.fail_after = Some(blocks);
        self
    }

    pub fn stalled(mut self, stall: Duration) -> Self {
        self.stall = Some(stall);
        self
    }
}

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    open_streams: AtomicUsize,
}

/// Host over a fixed list of synthetic devices. Clones share counters.
#[derive(Clone)]
pub struct SyntheticHost {
    devices: Vec<SyntheticDevice>,
    counters: Arc<Counters>,
}

impl SyntheticHost {
    pub fn new(devices: Vec<SyntheticDevice>) -> Self {
        Self {
            devices,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Successful opens so far.
    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    /// Streams opened and not yet closed.
    pub fn open_streams(&self) -> usize {
        self.counters.open_streams.load(Ordering::SeqCst)
    }
}

impl AudioHost for SyntheticHost {
    fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(index, d)| DeviceInfo {
                index,
                name: d.name.clone(),
                max_input_channels: d.channels,
                default_sample_rate: d.sample_rate,
                is_default: index == 0,
            })
            .collect())
    }

    fn open_input(&self, device_index: usize, spec: &StreamSpec) -> Result<OpenedStream> {
        let device = self.devices.get(device_index).ok_or_else(|| {
            PipelineError::DeviceOpen(format!("no input device at index {}", device_index))
        })?;
        if device.busy {
            return Err(PipelineError::DeviceOpen(format!("device '{}' is busy", device.name)));
        }
        if device.sample_rate != spec.sample_rate {
            return Err(PipelineError::DeviceOpen(format!(
                "device '{}' does not support {} Hz",
                device.name, spec.sample_rate
            )));
        }

        let closed = Arc::new(AtomicBool::new(false));
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        self.counters.open_streams.fetch_add(1, Ordering::SeqCst);

        let reader = ToneReader {
            device: device.clone(),
            phase: 0.0,
            blocks: 0,
            closed: Arc::clone(&closed),
        };
        let handle = ToneHandle {
            closed,
            counters: Arc::clone(&self.counters),
        };

        Ok(OpenedStream {
            device_name: device.name.clone(),
            channels: device.channels,
            reader: Box::new(reader),
            handle: Box::new(handle),
        })
    }
}

struct ToneReader {
    device: SyntheticDevice,
    phase: f32,
    blocks: u64,
    closed: Arc<AtomicBool>,
}

impl BlockReader for ToneReader {
    fn read_block(&mut self, out: &mut [f32], _timeout: Duration) -> Result<bool> {
        if let Some(stall) = self.device.stall {
            thread::sleep(stall);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(PipelineError::CaptureFatal("stream closed".into()));
        }
        if let Some(limit) = self.device.fail_after {
            if self.blocks >= limit {
                return Err(PipelineError::CaptureFatal(format!(
                    "device '{}' disconnected",
                    self.device.name
                )));
            }
        }

        let channels = self.device.channels.max(1) as usize;
        let step = 2.0 * PI * self.device.tone_hz / self.device.sample_rate as f32;
        for frame in out.chunks_mut(channels) {
            let value = self.device.amplitude * self.phase.sin();
            frame.fill(value);
            self.phase = (self.phase + step) % (2.0 * PI);
        }
        self.blocks += 1;

        if self.device.paced {
            let frames = out.len() / channels;
            thread::sleep(Duration::from_secs_f64(
                frames as f64 / self.device.sample_rate as f64,
            ));
        }
        Ok(true)
    }
}

struct ToneHandle {
    closed: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl StreamHandle for ToneHandle {
    fn close(self: Box<Self>) {
        self.closed.store(true, Ordering::SeqCst);
        self.counters.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_devices_in_order() {
        let host = SyntheticHost::new(vec![
            SyntheticDevice::tone("A", 100.0, 0.5),
            SyntheticDevice::tone("B", 200.0, 0.5).with_channels(2),
        ]);
        let devices = host.input_devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].index, 1);
        assert_eq!(devices[1].max_input_channels, 2);
        assert!(devices[0].is_default);
    }

    #[test]
    fn rejects_unsupported_rate() {
        let host = SyntheticHost::new(vec![SyntheticDevice::tone("A", 100.0, 0.5).with_sample_rate(48000)]);
        let spec = StreamSpec {
            sample_rate: 44100,
            block_size: 64,
        };
        assert!(matches!(host.open_input(0, &spec), Err(PipelineError::DeviceOpen(_))));
        assert_eq!(host.opens(), 0);
    }

    #[test]
    fn produces_tone_blocks() {
        let mut device = SyntheticDevice::tone("A", 441.0, 0.25);
        device.paced = false;
        let host = SyntheticHost::new(vec![device]);
        let spec = StreamSpec {
            sample_rate: 44100,
            block_size: 100,
        };
        let mut stream = host.open_input(0, &spec).unwrap();
        let mut block = vec![0.0f32; 100];
        assert!(stream.reader.read_block(&mut block, Duration::from_millis(10)).unwrap());

        // 441 Hz at 44.1 kHz is exactly one period per 100 samples
        assert!(block[0].abs() < 1e-6);
        assert!((block[25] - 0.25).abs() < 1e-3);
        assert!(block.iter().all(|s| s.abs() <= 0.25 + 1e-6));

        stream.handle.close();
        assert_eq!(host.open_streams(), 0);
        assert!(stream.reader.read_block(&mut block, Duration::from_millis(10)).is_err());
    }
}
