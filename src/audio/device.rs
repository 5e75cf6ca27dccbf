//! Audio host abstraction: device enumeration and blocking input streams.

use serde::Serialize;
use std::time::Duration;

use crate::error::Result;

/// Name fragments that mark an endpoint mirroring system output.
const LOOPBACK_HINTS: &[&str] = &["monitor", "loopback", "pulse", "pipewire", "stereo mix", "blackhole"];

/// One input-capable endpoint as reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub default_sample_rate: u32,
    pub is_default: bool,
}

impl DeviceInfo {
    pub fn is_loopback(&self) -> bool {
        let name = self.name.to_lowercase();
        LOOPBACK_HINTS.iter().any(|hint| name.contains(hint))
    }
}

/// Stream parameters requested at open time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    /// Frames per block
    pub block_size: usize,
}

/// Pull side of an open stream. Moved onto the capture thread.
pub trait BlockReader: Send {
    /// Fill `out` with interleaved samples, waiting at most `timeout`.
    /// Returns `Ok(false)` when no full block arrived in time.
    fn read_block(&mut self, out: &mut [f32], timeout: Duration) -> Result<bool>;
}

/// Owning handle of the underlying hardware stream.
pub trait StreamHandle {
    fn close(self: Box<Self>);
}

pub struct OpenedStream {
    pub device_name: String,
    pub channels: u16,
    pub reader: Box<dyn BlockReader>,
    pub handle: Box<dyn StreamHandle>,
}

/// The audio subsystem seen by the pipeline.
pub trait AudioHost {
    fn input_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Open and start an input stream. Fails with `DeviceOpen`.
    fn open_input(&self, device_index: usize, spec: &StreamSpec) -> Result<OpenedStream>;
}

/// Loopback/monitor endpoint first, then the default input, then anything.
pub fn select_capture_device(devices: &[DeviceInfo]) -> Option<&DeviceInfo> {
    devices
        .iter()
        .find(|d| d.is_loopback() && d.max_input_channels > 0)
        .or_else(|| devices.iter().find(|d| d.is_default))
        .or_else(|| devices.first())
}

/// Average interleaved frames down to mono.
pub fn mix_to_mono(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}
