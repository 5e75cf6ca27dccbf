//! Writes bins and metrics into the host's property store.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::analysis::metrics::Metrics;
use crate::error::{PipelineError, Result};

pub const TIMESTAMP_KEY: &str = "fft_timestamp";

/// Bins shown in the preview text.
const PREVIEW_BINS: usize = 8;

pub fn bin_key(index: usize) -> String {
    format!("fft_bin_{}", index)
}

/// Named float properties owned by the host application.
pub trait PropertySink: Send {
    fn set(&mut self, key: &str, value: f32) -> Result<()>;
    fn get(&self, key: &str) -> Option<f32>;
}

/// In-memory property store; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct SharedProperties {
    inner: Arc<RwLock<BTreeMap<String, f32>>>,
}

impl SharedProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, f32> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl PropertySink for SharedProperties {
    fn set(&mut self, key: &str, value: f32) -> Result<()> {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match map.get_mut(key) {
            Some(slot) => *slot = value,
            None => {
                map.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<f32> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
    }
}

/// Latest published values, for on-screen display.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Preview {
    pub timestamp: f32,
    pub bins: Vec<f32>,
    pub metrics: Vec<(String, f32)>,
}

impl Preview {
    /// One-line summary of the first few bins.
    pub fn summary(&self) -> String {
        if self.bins.is_empty() {
            return "no data".to_string();
        }
        let bins: Vec<String> = self
            .bins
            .iter()
            .take(PREVIEW_BINS)
            .enumerate()
            .map(|(i, v)| format!("Bin {}: {:.3}", i, v))
            .collect();
        format!("t={:.2}s  {}", self.timestamp, bins.join("  "))
    }
}

/// Thread-safe handle to the preview, readable from a UI thread.
#[derive(Debug, Clone, Default)]
pub struct PreviewMirror {
    inner: Arc<RwLock<Preview>>,
}

impl PreviewMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Preview {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn summary(&self) -> String {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).summary()
    }

    fn update(&self, timestamp: f32, bins: &[f32], metrics: &Metrics) {
        let mut preview = self.inner.write().unwrap_or_else(|e| e.into_inner());
        preview.timestamp = timestamp;
        preview.bins.clear();
        preview.bins.extend_from_slice(bins);
        preview.metrics.clear();
        preview
            .metrics
            .extend(metrics.iter().map(|(name, v)| (name.to_string(), v)));
    }

    fn clear(&self) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Preview::default();
    }
}

pub struct PropertyPublisher {
    sink: Box<dyn PropertySink>,
    mirror: PreviewMirror,
    bin_keys: Vec<String>,
}

impl PropertyPublisher {
    pub fn new(sink: Box<dyn PropertySink>) -> Self {
        Self {
            sink,
            mirror: PreviewMirror::new(),
            bin_keys: Vec::new(),
        }
    }

    pub fn mirror(&self) -> PreviewMirror {
        self.mirror.clone()
    }

    pub fn sink(&self) -> &dyn PropertySink {
        self.sink.as_ref()
    }

    /// Zero every bin key and the timestamp; called when a capture starts.
    pub fn reset(&mut self, num_bins: usize) -> Result<()> {
        self.ensure_keys(num_bins);
        self.mirror.clear();

        let mut writer = KeyWriter::new(self.sink.as_mut());
        for key in &self.bin_keys[..num_bins] {
            writer.write(key, 0.0);
        }
        writer.write(TIMESTAMP_KEY, 0.0);
        writer.finish()
    }

    /// Bins first, then metrics, then the timestamp. A failed key does not
    /// stop the rest from being written.
    pub fn publish(&mut self, bins: &[f32], metrics: &Metrics, timestamp: f32) -> Result<()> {
        self.ensure_keys(bins.len());

        let mut writer = KeyWriter::new(self.sink.as_mut());
        for (key, &value) in self.bin_keys.iter().zip(bins) {
            writer.write(key, value);
        }
        for (name, value) in metrics.iter() {
            writer.write(name, value);
        }
        writer.write(TIMESTAMP_KEY, timestamp);
        let result = writer.finish();

        self.mirror.update(timestamp, bins, metrics);
        result
    }

    fn ensure_keys(&mut self, num_bins: usize) {
        while self.bin_keys.len() < num_bins {
            self.bin_keys.push(bin_key(self.bin_keys.len()));
        }
    }
}

/// Collects rejected keys so one failure doesn't abort the batch.
struct KeyWriter<'a> {
    sink: &'a mut dyn PropertySink,
    failed: Vec<String>,
}

impl<'a> KeyWriter<'a> {
    fn new(sink: &'a mut dyn PropertySink) -> Self {
        Self {
            sink,
            failed: Vec::new(),
        }
    }

    fn write(&mut self, key: &str, value: f32) {
        if let Err(err) = self.sink.set(key, value) {
            log::warn!("Failed to write {}: {}", key, err);
            self.failed.push(key.to_string());
        }
    }

    fn finish(self) -> Result<()> {
        if self.failed.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Publish(format!(
                "{} key(s) rejected: {}",
                self.failed.len(),
                self.failed.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::metrics::MetricSpec;
    use std::sync::Mutex;

    /// Records write order and rejects one key.
    #[derive(Clone, Default)]
    struct RecordingSink {
        writes: Arc<Mutex<Vec<String>>>,
        reject: Option<&'static str>,
        values: SharedProperties,
    }

    impl PropertySink for RecordingSink {
        fn set(&mut self, key: &str, value: f32) -> Result<()> {
            self.writes.lock().unwrap().push(key.to_string());
            if self.reject == Some(key) {
                return Err(PipelineError::Publish(format!("{} is read-only", key)));
            }
            self.values.set(key, value)
        }

        fn get(&self, key: &str) -> Option<f32> {
            self.values.get(key)
        }
    }

    #[test]
    fn writes_bins_then_metrics_then_timestamp() {
        let sink = RecordingSink::default();
        let writes = Arc::clone(&sink.writes);
        let mut publisher = PropertyPublisher::new(Box::new(sink));

        let bins = [0.5, 0.25, 0.125, 0.0];
        let metrics = MetricSpec::standard(4).derive(&bins);
        publisher.publish(&bins, &metrics, 1.5).unwrap();

        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 4 + 11 + 1);
        assert_eq!(&writes[..4], &["fft_bin_0", "fft_bin_1", "fft_bin_2", "fft_bin_3"]);
        assert_eq!(writes[4], "kick_drum");
        assert_eq!(writes.last().map(String::as_str), Some(TIMESTAMP_KEY));

        assert_eq!(publisher.sink().get("fft_bin_1"), Some(0.25));
        assert_eq!(publisher.sink().get("kick_drum"), Some(0.75));
        assert_eq!(publisher.sink().get(TIMESTAMP_KEY), Some(1.5));
    }

    #[test]
    fn rejected_key_does_not_stop_others() {
        let sink = RecordingSink {
            reject: Some("fft_bin_1"),
            ..Default::default()
        };
        let mut publisher = PropertyPublisher::new(Box::new(sink));

        let bins = [0.5, 0.25];
        let metrics = MetricSpec::standard(2).derive(&bins);
        let err = publisher.publish(&bins, &metrics, 0.1).unwrap_err();

        assert!(matches!(err, PipelineError::Publish(ref msg) if msg.contains("fft_bin_1")));
        assert_eq!(publisher.sink().get("fft_bin_0"), Some(0.5));
        assert_eq!(publisher.sink().get("fft_bin_1"), None);
        assert!(publisher.sink().get("overall_energy").is_some());
        assert_eq!(publisher.sink().get(TIMESTAMP_KEY), Some(0.1));
    }

    #[test]
    fn reset_zeroes_bins_and_clears_preview() {
        let props = SharedProperties::new();
        let mut publisher = PropertyPublisher::new(Box::new(props.clone()));
        let mirror = publisher.mirror();

        let bins = [0.9, 0.8, 0.7];
        let metrics = MetricSpec::standard(3).derive(&bins);
        publisher.publish(&bins, &metrics, 2.0).unwrap();
        assert_eq!(mirror.snapshot().bins, bins.to_vec());
        assert!(mirror.summary().contains("Bin 0: 0.900"));

        publisher.reset(3).unwrap();
        let values = props.snapshot();
        assert_eq!(values["fft_bin_0"], 0.0);
        assert_eq!(values["fft_bin_2"], 0.0);
        assert_eq!(values[TIMESTAMP_KEY], 0.0);
        // Metrics keep their last value until the next publish
        assert!(values["kick_drum"] > 0.0);
        assert_eq!(mirror.summary(), "no data");
    }

    #[test]
    fn shared_properties_are_shared_between_clones() {
        let mut a = SharedProperties::new();
        let b = a.clone();
        a.set("x", 3.0).unwrap();
        assert_eq!(b.get("x"), Some(3.0));
        assert_eq!(b.get("y"), None);
    }
}
