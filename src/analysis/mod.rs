pub mod bins;
pub mod metrics;
pub mod smoothing;
pub mod spectrum;
