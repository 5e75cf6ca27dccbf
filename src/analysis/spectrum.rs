use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::ops::Range;
use std::sync::Arc;

use super::bins::BinSpec;
use crate::audio::ring::RingReader;
use crate::config::{BinAggregation, PipelineConfig};
use crate::error::Result;

/// Normalized magnitude per log bin for one tick. Always finite and >= 0.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFrame {
    pub bins: Vec<f32>,
}

impl SpectrumFrame {
    pub fn zeros(num_bins: usize) -> Self {
        Self {
            bins: vec![0.0; num_bins],
        }
    }
}

/// Where a bin draws its magnitudes from.
#[derive(Debug, Clone)]
enum BinSource {
    Indices(Range<usize>),
    /// No FFT index falls inside the range
    Nearest(usize),
}

/// Hann-windowed FFT folded into log bins. Buffers are reused across ticks.
pub struct SpectralAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    hann: Vec<f32>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    sources: Vec<BinSource>,
    aggregation: BinAggregation,
    scale: f32,
}

impl SpectralAnalyzer {
    pub fn new(config: &PipelineConfig, bins: &BinSpec) -> Self {
        let size = config.window_size;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        let half = size / 2;
        let resolution = config.sample_rate as f32 / size as f32;
        let sources = bin_sources(bins, half, resolution);

        log::debug!(
            "Analyzer: window {} ({:.2} Hz/index), {} bins, {:?}",
            size,
            resolution,
            bins.len(),
            config.aggregation
        );

        Self {
            fft,
            hann: hann_window(size),
            window: vec![0.0; size],
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch,
            magnitudes: vec![0.0; half + 1],
            sources,
            aggregation: config.aggregation,
            scale: config.normalization_gain / half as f32,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window.len()
    }

    /// Analyze the newest window held by the ring.
    pub fn analyze(&mut self, reader: &RingReader) -> Result<SpectrumFrame> {
        reader.snapshot(&mut self.window)?;
        Ok(self.process())
    }

    /// Analyze the newest `window_size` samples of `samples`, zero-padding the front.
    pub fn analyze_window(&mut self, samples: &[f32]) -> SpectrumFrame {
        let size = self.window.len();
        let take = samples.len().min(size);
        let pad = size - take;
        self.window[..pad].fill(0.0);
        self.window[pad..].copy_from_slice(&samples[samples.len() - take..]);
        self.process()
    }

    fn process(&mut self) -> SpectrumFrame {
        for ((slot, &sample), &w) in self.buffer.iter_mut().zip(&self.window).zip(&self.hann) {
            let sample = if sample.is_finite() { sample } else { 0.0 };
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        for (mag, c) in self.magnitudes.iter_mut().zip(&self.buffer) {
            *mag = c.norm();
        }

        let bins = self
            .sources
            .iter()
            .map(|source| {
                let aggregated = match source {
                    BinSource::Nearest(k) => self.magnitudes[*k],
                    BinSource::Indices(range) => {
                        let sum: f32 = self.magnitudes[range.clone()].iter().sum();
                        match self.aggregation {
                            BinAggregation::Sum => sum,
                            BinAggregation::Mean => sum / range.len() as f32,
                        }
                    }
                };
                let value = aggregated * self.scale;
                if value.is_finite() {
                    value.max(0.0)
                } else {
                    0.0
                }
            })
            .collect();

        SpectrumFrame { bins }
    }
}

fn bin_sources(bins: &BinSpec, half: usize, resolution: f32) -> Vec<BinSource> {
    let mut indices: Vec<Option<Range<usize>>> = vec![None; bins.len()];
    for k in 0..=half {
        if let Some(bin) = bins.bin_for(k as f32 * resolution) {
            let range = indices[bin].get_or_insert(k..k);
            range.end = k + 1;
        }
    }

    indices
        .into_iter()
        .zip(bins.ranges())
        .map(|(range, bin)| match range {
            Some(range) => BinSource::Indices(range),
            None => {
                let nearest = (bin.center_hz() / resolution).round() as usize;
                BinSource::Nearest(nearest.min(half))
            }
        })
        .collect()
}

fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ring::ring_buffer;
    use std::f32::consts::PI;

    fn sine(freq: f32, amplitude: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    fn analyzer(config: &PipelineConfig) -> (SpectralAnalyzer, BinSpec) {
        let bins = BinSpec::logarithmic(config.num_bins, config.min_freq, config.sample_rate);
        (SpectralAnalyzer::new(config, &bins), bins)
    }

    #[test]
    fn silence_gives_zero_bins() {
        let config = PipelineConfig::default();
        let (mut analyzer, _) = analyzer(&config);
        let frame = analyzer.analyze_window(&vec![0.0; 1024]);
        assert_eq!(frame.bins.len(), 16);
        assert!(frame.bins.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn sine_energy_lands_in_its_bin() {
        let config = PipelineConfig::default();
        let (mut analyzer, bins) = analyzer(&config);
        let frame = analyzer.analyze_window(&sine(1000.0, 0.8, 44100, 1024));

        let expected = bins.bin_for(1000.0).unwrap();
        let (peak, max) = frame
            .bins
            .iter()
            .copied()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, v)| if v > best.1 { (i, v) } else { best });
        assert!(peak.abs_diff(expected) <= 1, "peak {} expected {}", peak, expected);
        assert!(max > 0.0);

        for (i, &v) in frame.bins.iter().enumerate() {
            if i.abs_diff(expected) >= 3 {
                assert!(v < 0.1 * max, "bin {} = {} vs max {}", i, v, max);
            }
        }
    }

    #[test]
    fn values_are_finite_and_non_negative() {
        let config = PipelineConfig::default();
        let (mut analyzer, _) = analyzer(&config);
        let mut samples = sine(440.0, 1.0, 44100, 1024);
        samples[10] = f32::NAN;
        samples[20] = f32::INFINITY;
        let frame = analyzer.analyze_window(&samples);
        assert!(frame.bins.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn narrow_low_bins_fall_back_to_nearest_index() {
        let config = PipelineConfig::default();
        let (mut analyzer, bins) = analyzer(&config);
        // 43 Hz per index: the 20..31 Hz bin contains none
        assert!(matches!(analyzer.sources[0], BinSource::Nearest(1)));
        assert!(bins.ranges()[0].high_hz < 44100.0 / 1024.0);

        let frame = analyzer.analyze_window(&sine(43.07, 0.5, 44100, 1024));
        assert!(frame.bins[0] > 0.0);
    }

    #[test]
    fn gain_and_aggregation_scale_output() {
        let samples = sine(2000.0, 0.5, 44100, 1024);
        let config = PipelineConfig::default();
        let (mut base, _) = analyzer(&config);
        let base = base.analyze_window(&samples);

        let doubled = PipelineConfig {
            normalization_gain: 4.0,
            ..config.clone()
        };
        let (mut louder, _) = analyzer(&doubled);
        let louder = louder.analyze_window(&samples);
        for (a, b) in base.bins.iter().zip(&louder.bins) {
            assert!((b - 2.0 * a).abs() <= 1e-5 * b.max(1.0));
        }

        let summed = PipelineConfig {
            aggregation: BinAggregation::Sum,
            ..config
        };
        let (mut sum, _) = analyzer(&summed);
        let sum = sum.analyze_window(&samples);
        for (mean, sum) in base.bins.iter().zip(&sum.bins) {
            assert!(sum + 1e-6 >= *mean);
        }
    }

    #[test]
    fn reads_latest_window_from_ring() {
        let config = PipelineConfig::default();
        let (mut analyzer, _) = analyzer(&config);
        let (mut writer, reader) = ring_buffer(config.ring_capacity());

        // Nothing written yet: zero-padded silence
        let frame = analyzer.analyze(&reader).unwrap();
        assert!(frame.bins.iter().all(|&v| v == 0.0));

        let samples = sine(1000.0, 0.8, 44100, 1024);
        writer.push(&samples);
        let from_ring = analyzer.analyze(&reader).unwrap();
        let direct = analyzer.analyze_window(&samples);
        assert_eq!(from_ring, direct);
    }

    #[test]
    fn short_input_is_zero_padded() {
        let config = PipelineConfig::default();
        let (mut analyzer, _) = analyzer(&config);
        let frame = analyzer.analyze_window(&sine(1000.0, 0.8, 44100, 100));
        assert_eq!(frame.bins.len(), 16);
        assert!(frame.bins.iter().any(|&v| v > 0.0));
    }
}
