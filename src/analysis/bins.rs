//! Logarithmic frequency bins between a floor frequency and Nyquist.

/// Half-open frequency range `[low_hz, high_hz)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinRange {
    pub low_hz: f32,
    pub high_hz: f32,
}

impl BinRange {
    pub fn contains(&self, freq: f32) -> bool {
        freq >= self.low_hz && freq < self.high_hz
    }

    /// Geometric centre, the natural midpoint on a log axis
    pub fn center_hz(&self) -> f32 {
        (self.low_hz * self.high_hz).sqrt()
    }
}

/// Bin layout for one capture session. Built once per start.
#[derive(Debug, Clone, PartialEq)]
pub struct BinSpec {
    ranges: Vec<BinRange>,
    nyquist: f32,
}

impl BinSpec {
    /// `num_bins` log-spaced ranges covering `[min_freq, sample_rate / 2)`.
    pub fn logarithmic(num_bins: usize, min_freq: f32, sample_rate: u32) -> Self {
        let nyquist = sample_rate as f32 / 2.0;
        let num_bins = num_bins.max(1);
        let ratio = (nyquist / min_freq).ln();

        let edges: Vec<f32> = (0..=num_bins)
            .map(|i| match i {
                0 => min_freq,
                i if i == num_bins => nyquist,
                i => min_freq * (ratio * i as f32 / num_bins as f32).exp(),
            })
            .collect();

        let ranges = edges
            .windows(2)
            .map(|pair| BinRange {
                low_hz: pair[0],
                high_hz: pair[1],
            })
            .collect();

        Self { ranges, nyquist }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[BinRange] {
        &self.ranges
    }

    pub fn nyquist(&self) -> f32 {
        self.nyquist
    }

    /// Index of the bin containing `freq`; Nyquist itself belongs to the last bin.
    pub fn bin_for(&self, freq: f32) -> Option<usize> {
        if freq == self.nyquist {
            return self.ranges.len().checked_sub(1);
        }
        self.ranges.iter().position(|r| r.contains(freq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_min_freq_to_nyquist() {
        let spec = BinSpec::logarithmic(16, 20.0, 44100);
        let ranges = spec.ranges();
        assert_eq!(ranges.len(), 16);
        assert_eq!(ranges[0].low_hz, 20.0);
        assert_eq!(ranges[15].high_hz, 22050.0);

        for pair in ranges.windows(2) {
            assert_eq!(pair[0].high_hz, pair[1].low_hz);
        }
        for range in ranges {
            assert!(range.low_hz < range.high_hz);
        }
    }

    #[test]
    fn widths_grow_geometrically() {
        let spec = BinSpec::logarithmic(8, 40.0, 48000);
        let ratios: Vec<f32> = spec
            .ranges()
            .iter()
            .map(|r| r.high_hz / r.low_hz)
            .collect();
        for ratio in &ratios {
            assert!((ratio - ratios[0]).abs() < 1e-3);
        }
    }

    #[test]
    fn finds_containing_bin() {
        let spec = BinSpec::logarithmic(16, 20.0, 44100);
        assert_eq!(spec.bin_for(20.0), Some(0));
        assert_eq!(spec.bin_for(10.0), None);
        assert_eq!(spec.bin_for(22050.0), Some(15));

        let bin = spec.bin_for(1000.0).unwrap();
        assert!(spec.ranges()[bin].contains(1000.0));
    }

    #[test]
    fn single_bin_spans_everything() {
        let spec = BinSpec::logarithmic(1, 20.0, 44100);
        assert_eq!(spec.len(), 1);
        assert_eq!(spec.ranges()[0].low_hz, 20.0);
        assert_eq!(spec.ranges()[0].high_hz, 22050.0);
        assert!((spec.ranges()[0].center_hz() - (20.0f32 * 22050.0).sqrt()).abs() < 1e-2);
    }
}
