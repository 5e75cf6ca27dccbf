use thiserror::Error;

/// Everything the capture/analysis pipeline can report to its host.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Device enumeration failed; callers fall back to an empty list.
    #[error("Failed to query audio devices: {0}")]
    DeviceQuery(String),
    /// The capture stream could not be opened; the pipeline stays idle.
    #[error("Failed to open audio device: {0}")]
    DeviceOpen(String),
    /// The stream died while capturing; the pipeline returns to idle.
    #[error("Audio capture failed: {0}")]
    CaptureFatal(String),
    /// A single tick could not be analyzed; the tick is skipped.
    #[error("Analysis tick skipped: {0}")]
    AnalysisTick(String),
    /// One or more property writes failed.
    #[error("Failed to publish properties: {0}")]
    Publish(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Capture is already running")]
    AlreadyCapturing,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
