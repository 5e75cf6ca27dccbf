//! Capture thread: blocking reads from the device into the sample ring.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::device::{mix_to_mono, AudioHost, BlockReader, StreamHandle, StreamSpec};
use super::ring::RingWriter;
use crate::error::{PipelineError, Result};

/// How long one blocking read may wait before the stop flag is rechecked.
const READ_POLL: Duration = Duration::from_millis(100);

/// State shared between the capture thread and its owner.
struct CaptureState {
    running: AtomicBool,
    blocks: AtomicU64,
    failure: Mutex<Option<String>>,
}

impl CaptureState {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn fail(&self, message: String) {
        let mut slot = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        slot.get_or_insert(message);
    }
}

/// A running capture: one stream, one thread.
pub struct CaptureSource {
    device_name: String,
    state: Arc<CaptureState>,
    thread: Option<JoinHandle<()>>,
    done: Receiver<()>,
    stream: Option<Box<dyn StreamHandle>>,
}

impl CaptureSource {
    /// Open the device and spawn the capture thread. Nothing is spawned on failure.
    pub fn start(
        host: &dyn AudioHost,
        device_index: usize,
        spec: StreamSpec,
        writer: RingWriter,
    ) -> Result<Self> {
        let opened = host.open_input(device_index, &spec)?;
        let channels = opened.channels.max(1) as usize;

        log::info!(
            "Capture: {} @ {}Hz, {} channel(s), block {}",
            opened.device_name,
            spec.sample_rate,
            channels,
            spec.block_size
        );

        let state = Arc::new(CaptureState {
            running: AtomicBool::new(true),
            blocks: AtomicU64::new(0),
            failure: Mutex::new(None),
        });
        let (done_tx, done) = mpsc::channel();

        let thread_state = Arc::clone(&state);
        let reader = opened.reader;
        let spawned = thread::Builder::new()
            .name("audiofft-capture".into())
            .spawn(move || {
                capture_loop(reader, writer, channels, spec.block_size, &thread_state);
                let _ = done_tx.send(());
            });

        let thread = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                opened.handle.close();
                return Err(PipelineError::DeviceOpen(format!(
                    "failed to spawn capture thread: {}",
                    err
                )));
            }
        };

        Ok(Self {
            device_name: opened.device_name,
            state,
            thread: Some(thread),
            done,
            stream: Some(opened.handle),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Blocks captured so far.
    pub fn blocks_captured(&self) -> u64 {
        self.state.blocks.load(Ordering::Relaxed)
    }

    /// Message of the error that ended the capture thread, if any.
    pub fn failure(&self) -> Option<String> {
        self.state
            .failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Signal the thread, wait at most `timeout` for it, then close the stream.
    /// Returns false when the thread had to be abandoned.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.shutdown(timeout)
    }

    fn shutdown(&mut self, timeout: Duration) -> bool {
        self.state.running.store(false, Ordering::Release);

        let joined = match self.thread.take() {
            None => true,
            Some(handle) => match self.done.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if handle.join().is_err() {
                        log::error!("Capture thread panicked");
                    }
                    true
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "Capture thread did not exit within {:?}; force-closing stream",
                        timeout
                    );
                    false
                }
            },
        };

        if let Some(stream) = self.stream.take() {
            stream.close();
        }
        log::info!(
            "Capture stopped: {} ({} blocks)",
            self.device_name,
            self.blocks_captured()
        );
        joined
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        if self.thread.is_some() || self.stream.is_some() {
            self.shutdown(Duration::from_millis(100));
        }
    }
}

fn capture_loop(
    mut reader: Box<dyn BlockReader>,
    mut writer: RingWriter,
    channels: usize,
    block_size: usize,
    state: &CaptureState,
) {
    let mut interleaved = vec![0.0f32; block_size * channels];
    let mut mono = Vec::with_capacity(block_size);

    while state.is_running() {
        match reader.read_block(&mut interleaved, READ_POLL) {
            Ok(true) => {
                mix_to_mono(&interleaved, channels, &mut mono);
                writer.push(&mono);
                state.blocks.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => continue,
            Err(err) => {
                if state.is_running() {
                    log::error!("{}", err);
                    let message = match err {
                        PipelineError::CaptureFatal(message) => message,
                        other => other.to_string(),
                    };
                    state.fail(message);
                }
                break;
            }
        }
    }
}
