use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PipelineError;

/// How FFT magnitudes inside one bin are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinAggregation {
    #[default]
    Mean,
    Sum,
}

/// Runtime configuration handed to `Controller::start`.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Capture sample rate (Hz)
    pub sample_rate: u32,
    /// Frames pulled from the device per blocking read
    pub block_size: usize,
    /// Samples fed to each FFT (>= block_size for overlap)
    pub window_size: usize,
    /// Number of log-spaced output bins
    pub num_bins: usize,
    /// Lower edge of the first bin (Hz)
    pub min_freq: f32,
    /// Host tick period
    pub tick_interval_ms: u64,
    /// Rise time constant (seconds)
    pub attack_time_constant: f32,
    /// Fall time constant (seconds)
    pub decay_time_constant: f32,
    /// Scale applied after dividing aggregated magnitudes by window_size / 2.
    /// 2.0 maps a full-scale sine landing in one FFT index to about 1.0.
    pub normalization_gain: f32,
    pub aggregation: BinAggregation,
    /// Upper bound on how long stop() waits for the capture thread
    pub stop_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_size: default_block_size(),
            window_size: default_block_size(),
            num_bins: default_num_bins(),
            min_freq: default_min_freq(),
            tick_interval_ms: default_tick_interval_ms(),
            attack_time_constant: default_attack(),
            decay_time_constant: default_decay(),
            normalization_gain: default_normalization_gain(),
            aggregation: BinAggregation::default(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    /// Ring capacity: room for a full window plus one block in flight.
    pub fn ring_capacity(&self) -> usize {
        (2 * self.block_size).max(self.window_size + self.block_size)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        if self.sample_rate == 0 {
            return invalid("sample rate must be > 0".into());
        }
        if self.block_size == 0 {
            return invalid("block size must be > 0".into());
        }
        if self.window_size < 16 {
            return invalid(format!("window size must be >= 16, got {}", self.window_size));
        }
        if self.num_bins == 0 {
            return invalid("number of bins must be > 0".into());
        }
        if self.tick_interval_ms == 0 {
            return invalid("tick interval must be > 0 ms".into());
        }
        if !(self.min_freq > 0.0 && self.min_freq < self.nyquist()) {
            return invalid(format!(
                "min frequency {} Hz must lie in (0, {}) Hz",
                self.min_freq,
                self.nyquist()
            ));
        }
        if !(self.attack_time_constant >= 0.0 && self.decay_time_constant >= 0.0) {
            return invalid("time constants must be >= 0".into());
        }
        // Equal constants (including 0/0 snapping) give symmetric smoothing
        if self.attack_time_constant > self.decay_time_constant {
            return invalid(format!(
                "attack time constant {} s must not exceed decay time constant {} s",
                self.attack_time_constant, self.decay_time_constant
            ));
        }
        if !(self.normalization_gain > 0.0 && self.normalization_gain.is_finite()) {
            return invalid("normalization gain must be a positive number".into());
        }
        if !self.window_size.is_power_of_two() {
            log::warn!(
                "Window size {} is not a power of two; FFT will be slower",
                self.window_size
            );
        }
        Ok(())
    }
}

/// On-disk configuration (`audiofft.toml`).
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
}

#[derive(Debug, Deserialize)]
pub struct CaptureConfig {
    /// Input device index; auto-selected when absent
    #[serde(default)]
    pub device: Option<usize>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    /// Defaults to the capture block size
    #[serde(default)]
    pub window_size: Option<usize>,
    #[serde(default = "default_num_bins")]
    pub num_bins: usize,
    #[serde(default = "default_min_freq")]
    pub min_freq: f32,
    #[serde(default = "default_normalization_gain")]
    pub normalization_gain: f32,
    #[serde(default)]
    pub aggregation: BinAggregation,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct SmoothingConfig {
    #[serde(default = "default_attack")]
    pub attack_time_constant: f32,
    #[serde(default = "default_decay")]
    pub decay_time_constant: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: default_sample_rate(),
            block_size: default_block_size(),
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_size: None,
            num_bins: default_num_bins(),
            min_freq: default_min_freq(),
            normalization_gain: default_normalization_gain(),
            aggregation: BinAggregation::default(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            attack_time_constant: default_attack(),
            decay_time_constant: default_decay(),
        }
    }
}

impl Config {
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            sample_rate: self.capture.sample_rate,
            block_size: self.capture.block_size,
            window_size: self.analysis.window_size.unwrap_or(self.capture.block_size),
            num_bins: self.analysis.num_bins,
            min_freq: self.analysis.min_freq,
            tick_interval_ms: self.analysis.tick_interval_ms,
            attack_time_constant: self.smoothing.attack_time_constant,
            decay_time_constant: self.smoothing.decay_time_constant,
            normalization_gain: self.analysis.normalization_gain,
            aggregation: self.analysis.aggregation,
            stop_timeout_ms: self.capture.stop_timeout_ms,
        }
    }
}

fn default_sample_rate() -> u32 { 44100 }
fn default_block_size() -> usize { 1024 }
fn default_num_bins() -> usize { 16 }
fn default_min_freq() -> f32 { 20.0 }
fn default_tick_interval_ms() -> u64 { 50 }
fn default_attack() -> f32 { 0.03 }
fn default_decay() -> f32 { 0.25 }
fn default_normalization_gain() -> f32 { 2.0 }
fn default_stop_timeout_ms() -> u64 { 500 }

/// Explicit path, or auto-detect audiofft.toml / global config.
pub fn find_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("audiofft.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("audiofft").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("audiofft").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
}
