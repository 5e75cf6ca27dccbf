//! System audio input via cpal

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::device::{AudioHost, BlockReader, DeviceInfo, OpenedStream, StreamHandle, StreamSpec};
use crate::error::{PipelineError, Result};

/// Callback chunks buffered between the device callback and the capture thread
const CHANNEL_DEPTH: usize = 64;

#[derive(Debug)]
enum StreamEvent {
    Samples(Vec<f32>),
    Failed(String),
}

/// First stream error, kept outside the sample queue so a full queue can't lose it.
type FailureSlot = Arc<Mutex<Option<String>>>;

fn record_failure(slot: &FailureSlot, message: String) {
    slot.lock()
        .unwrap_or_else(|e| e.into_inner())
        .get_or_insert(message);
}

/// The platform's default cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalHost;

impl CpalHost {
    pub fn new() -> Self {
        Self
    }

    fn nth_input_device(device_index: usize) -> Result<cpal::Device> {
        let host = cpal::default_host();
        host.input_devices()
            .map_err(|e| PipelineError::DeviceOpen(format!("Failed to enumerate devices: {}", e)))?
            .nth(device_index)
            .ok_or_else(|| PipelineError::DeviceOpen(format!("no input device at index {}", device_index)))
    }
}

impl AudioHost for CpalHost {
    fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
        let started = Instant::now();
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let devices = host
            .input_devices()
            .map_err(|e| PipelineError::DeviceQuery(e.to_string()))?;

        let mut infos = Vec::new();
        for (index, device) in devices.enumerate() {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let default_config = match device.default_input_config() {
                Ok(config) => config,
                Err(err) => {
                    log::debug!("Skipping input device [{}] {}: {}", index, name, err);
                    continue;
                }
            };
            let max_input_channels = device
                .supported_input_configs()
                .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                .unwrap_or(0)
                .max(default_config.channels());

            infos.push(DeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                max_input_channels,
                default_sample_rate: default_config.sample_rate().0,
            });
        }

        log::debug!("Enumerated {} input devices in {:?}", infos.len(), started.elapsed());
        Ok(infos)
    }

    fn open_input(&self, device_index: usize, spec: &StreamSpec) -> Result<OpenedStream> {
        let device = Self::nth_input_device(device_index)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let open_err = |msg: String| PipelineError::DeviceOpen(format!("{}: {}", device_name, msg));

        let default_channels = device
            .default_input_config()
            .map(|c| c.channels())
            .unwrap_or(2);

        // Ranges that can run at the requested rate; prefer f32 and the default layout
        let mut candidates: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| open_err(e.to_string()))?
            .filter(|range| {
                range.min_sample_rate().0 <= spec.sample_rate
                    && spec.sample_rate <= range.max_sample_rate().0
            })
            .collect();
        candidates.sort_by_key(|range| {
            (
                range.sample_format() != SampleFormat::F32,
                range.channels() != default_channels,
            )
        });
        let supported = candidates
            .into_iter()
            .next()
            .ok_or_else(|| open_err(format!("{} Hz input is not supported", spec.sample_rate)))?
            .with_sample_rate(cpal::SampleRate(spec.sample_rate));

        let sample_format = supported.sample_format();
        let channels = supported.channels();
        let config: cpal::StreamConfig = supported.into();

        let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
        let dropped = Arc::new(AtomicU64::new(0));
        let failure: FailureSlot = Arc::new(Mutex::new(None));
        let shared = StreamShared {
            tx,
            dropped: Arc::clone(&dropped),
            failure: Arc::clone(&failure),
        };

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, shared),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, shared),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, shared),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, shared),
            other => return Err(open_err(format!("unsupported sample format {:?}", other))),
        }
        .map_err(|e| open_err(format!("failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| open_err(format!("failed to start stream: {}", e)))?;

        Ok(OpenedStream {
            device_name,
            channels,
            reader: Box::new(CpalReader::new(rx, dropped, failure)),
            handle: Box::new(CpalStream { stream }),
        })
    }
}

/// Callback-side ends of one stream.
struct StreamShared {
    tx: SyncSender<StreamEvent>,
    dropped: Arc<AtomicU64>,
    failure: FailureSlot,
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: StreamShared,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let StreamShared { tx, dropped, failure } = shared;
    let err_tx = tx.clone();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let chunk: Vec<f32> = data.iter().map(|&s| s.to_sample::<f32>()).collect();
            if tx.try_send(StreamEvent::Samples(chunk)).is_err() {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        },
        move |err| {
            log::error!("Audio input error: {}", err);
            record_failure(&failure, err.to_string());
            // Wakes a blocked reader; the slot holds the error if the queue is full
            let _ = err_tx.try_send(StreamEvent::Failed(err.to_string()));
        },
        None,
    )
}

struct CpalReader {
    rx: Receiver<StreamEvent>,
    pending: VecDeque<f32>,
    dropped: Arc<AtomicU64>,
    reported_drops: u64,
    failure: FailureSlot,
}

impl CpalReader {
    fn new(rx: Receiver<StreamEvent>, dropped: Arc<AtomicU64>, failure: FailureSlot) -> Self {
        Self {
            rx,
            pending: VecDeque::new(),
            dropped,
            reported_drops: 0,
            failure,
        }
    }

    fn check_failure(&self) -> Result<()> {
        match self.failure.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(message) => Err(PipelineError::CaptureFatal(message.clone())),
            None => Ok(()),
        }
    }
}

impl BlockReader for CpalReader {
    fn read_block(&mut self, out: &mut [f32], timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        self.check_failure()?;
        while self.pending.len() < out.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(StreamEvent::Samples(chunk)) => self.pending.extend(chunk),
                Ok(StreamEvent::Failed(message)) => return Err(PipelineError::CaptureFatal(message)),
                Err(RecvTimeoutError::Timeout) => {
                    self.check_failure()?;
                    return Ok(false);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PipelineError::CaptureFatal("input stream closed".into()))
                }
            }
        }

        let n = out.len();
        for (slot, sample) in out.iter_mut().zip(self.pending.drain(..n)) {
            *slot = sample;
        }

        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > self.reported_drops {
            log::warn!("Capture fell behind; {} callback chunks dropped", dropped);
            self.reported_drops = dropped;
        }
        Ok(true)
    }
}

struct CpalStream {
    stream: cpal::Stream,
}

impl StreamHandle for CpalStream {
    fn close(self: Box<Self>) {
        if let Err(err) = self.stream.pause() {
            log::debug!("Pausing input stream failed: {}", err);
        }
    }
}
