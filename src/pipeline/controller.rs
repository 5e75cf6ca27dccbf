//! Capture lifecycle: Idle -> Capturing -> Stopping -> Idle.
//!
//! Everything that lives for the duration of one capture (stream, ring,
//! analyzer buffers, smoothed bins) sits in a `Session` owned by the
//! controller, so two controllers never share state.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use super::scheduler::TickScheduler;
use crate::analysis::bins::BinSpec;
use crate::analysis::metrics::MetricSpec;
use crate::analysis::smoothing::{SmoothedState, TemporalSmoother};
use crate::analysis::spectrum::SpectralAnalyzer;
use crate::audio::capture::CaptureSource;
use crate::audio::device::{select_capture_device, AudioHost, DeviceInfo, StreamSpec};
use crate::audio::ring::{ring_buffer, RingReader};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::publish::{PreviewMirror, PropertyPublisher, PropertySink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Capturing,
    Stopping,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Capturing => "capturing",
            PipelineState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub device_name: Option<String>,
    pub error_message: Option<String>,
    pub ticks: u64,
    pub skipped_ticks: u64,
}

/// What one call to `tick` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published,
    /// Analysis failed this tick; state unchanged
    Skipped,
    NotRunning,
    /// The capture thread died; the controller is back to Idle
    CaptureFailed,
}

struct Session {
    config: PipelineConfig,
    capture: CaptureSource,
    reader: RingReader,
    analyzer: SpectralAnalyzer,
    smoother: TemporalSmoother,
    smoothed: SmoothedState,
    metrics: MetricSpec,
    started: Instant,
}

pub struct Controller {
    host: Box<dyn AudioHost>,
    scheduler: Box<dyn TickScheduler>,
    publisher: PropertyPublisher,
    state: PipelineState,
    session: Option<Session>,
    device_name: Option<String>,
    error_message: Option<String>,
    ticks: u64,
    skipped_ticks: u64,
}

impl Controller {
    pub fn new(
        host: Box<dyn AudioHost>,
        scheduler: Box<dyn TickScheduler>,
        sink: Box<dyn PropertySink>,
    ) -> Self {
        Self {
            host,
            scheduler,
            publisher: PropertyPublisher::new(sink),
            state: PipelineState::Idle,
            session: None,
            device_name: None,
            error_message: None,
            ticks: 0,
            skipped_ticks: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Shared view of the last published values.
    pub fn preview(&self) -> PreviewMirror {
        self.publisher.mirror()
    }

    pub fn sink(&self) -> &dyn PropertySink {
        self.publisher.sink()
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            state: self.state,
            device_name: self.device_name.clone(),
            error_message: self.error_message.clone(),
            ticks: self.ticks,
            skipped_ticks: self.skipped_ticks,
        }
    }

    /// Input devices, or an empty list when the audio subsystem is unavailable.
    pub fn list_devices(&mut self) -> Vec<DeviceInfo> {
        match self.host.input_devices() {
            Ok(devices) => devices,
            Err(err) => {
                log::error!("{}", err);
                self.error_message = Some(err.to_string());
                Vec::new()
            }
        }
    }

    /// Open the device and arm the tick. `None` picks a loopback device.
    pub fn start(&mut self, device_index: Option<usize>, config: PipelineConfig) -> Result<()> {
        if self.state != PipelineState::Idle {
            log::warn!("Start ignored: pipeline is {}", self.state);
            return Err(PipelineError::AlreadyCapturing);
        }

        let session = match self.open_session(device_index, config) {
            Ok(session) => session,
            Err(err) => {
                log::error!("Failed to start capture: {}", err);
                self.error_message = Some(err.to_string());
                return Err(err);
            }
        };

        let num_bins = session.config.num_bins;
        let interval = session.config.tick_interval();
        self.device_name = Some(session.capture.device_name().to_string());
        self.error_message = None;
        self.ticks = 0;
        self.skipped_ticks = 0;

        if let Err(err) = self.publisher.reset(num_bins) {
            self.error_message = Some(err.to_string());
        }

        self.session = Some(session);
        self.scheduler.arm(interval);
        self.state = PipelineState::Capturing;
        log::info!(
            "Capturing from {} ({} bins every {:?})",
            self.device_name.as_deref().unwrap_or("?"),
            num_bins,
            interval
        );
        Ok(())
    }

    fn open_session(&self, device_index: Option<usize>, config: PipelineConfig) -> Result<Session> {
        config.validate()?;

        let index = match device_index {
            Some(index) => index,
            None => {
                let devices = self.host.input_devices().map_err(|e| {
                    PipelineError::DeviceOpen(format!("cannot pick a capture device: {}", e))
                })?;
                let device = select_capture_device(&devices).ok_or_else(|| {
                    PipelineError::DeviceOpen("no input devices found".into())
                })?;
                log::info!("Auto-selected device [{}] {}", device.index, device.name);
                device.index
            }
        };

        let bins = BinSpec::logarithmic(config.num_bins, config.min_freq, config.sample_rate);
        let analyzer = SpectralAnalyzer::new(&config, &bins);
        let (writer, reader) = ring_buffer(config.ring_capacity());
        let spec = StreamSpec {
            sample_rate: config.sample_rate,
            block_size: config.block_size,
        };
        let capture = CaptureSource::start(self.host.as_ref(), index, spec, writer)?;

        Ok(Session {
            smoother: TemporalSmoother::from_config(&config),
            smoothed: SmoothedState::new(config.num_bins),
            metrics: MetricSpec::standard(config.num_bins),
            config,
            capture,
            reader,
            analyzer,
            started: Instant::now(),
        })
    }

    /// One analysis step: analyze, smooth, derive, publish.
    pub fn tick(&mut self, dt: Duration) -> TickOutcome {
        let session = match self.session.as_mut() {
            Some(session) if self.state == PipelineState::Capturing => session,
            _ => return TickOutcome::NotRunning,
        };

        if let Some(message) = session.capture.failure() {
            let err = PipelineError::CaptureFatal(message);
            log::error!("{}; stopping", err);
            self.teardown();
            self.error_message = Some(err.to_string());
            return TickOutcome::CaptureFailed;
        }

        let frame = match session.analyzer.analyze(&session.reader) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("Skipping tick: {}", err);
                self.skipped_ticks += 1;
                self.error_message = Some(err.to_string());
                return TickOutcome::Skipped;
            }
        };

        session
            .smoother
            .smooth(&mut session.smoothed, &frame.bins, dt.as_secs_f32());
        let metrics = session.metrics.derive(session.smoothed.values());
        let timestamp = session.started.elapsed().as_secs_f32();

        if let Err(err) = self
            .publisher
            .publish(session.smoothed.values(), &metrics, timestamp)
        {
            self.error_message = Some(err.to_string());
        }
        self.ticks += 1;

        log::debug!(
            "Tick {} (dt {:.1}ms, {} blocks captured)",
            self.ticks,
            dt.as_secs_f64() * 1000.0,
            session.capture.blocks_captured()
        );
        TickOutcome::Published
    }

    /// Cancel the tick and tear down the capture. No-op when idle.
    pub fn stop(&mut self) {
        if self.state == PipelineState::Idle {
            log::debug!("Stop ignored: pipeline is idle");
            return;
        }
        self.state = PipelineState::Stopping;
        self.teardown();
    }

    fn teardown(&mut self) {
        self.scheduler.cancel();
        if let Some(session) = self.session.take() {
            let timeout = session.config.stop_timeout();
            if !session.capture.stop(timeout) {
                log::warn!("Capture thread abandoned after {:?}", timeout);
            }
        }
        self.state = PipelineState::Idle;
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}
