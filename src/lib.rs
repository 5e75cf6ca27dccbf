//! audiofft - realtime loopback FFT for animation drivers
//!
//! Captures system audio, folds a windowed FFT into log-spaced bins and
//! publishes smoothed bins plus composite metrics to a host property sink.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod publish;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::controller::{Controller, PipelineState, PipelineStatus, TickOutcome};
pub use publish::{PropertySink, SharedProperties};
