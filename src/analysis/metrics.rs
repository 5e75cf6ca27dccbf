//! Named composite values derived from the smoothed bins.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Mean,
}

/// One named metric: weighted bin terms plus how they are combined.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDef {
    pub name: &'static str,
    pub terms: Vec<(usize, f32)>,
    pub aggregation: Aggregation,
}

impl MetricDef {
    fn evaluate(&self, bins: &[f32]) -> f32 {
        let sum: f32 = self
            .terms
            .iter()
            .filter_map(|&(bin, weight)| bins.get(bin).map(|v| v * weight))
            .sum();
        match self.aggregation {
            Aggregation::Sum => sum,
            Aggregation::Mean if self.terms.is_empty() => 0.0,
            Aggregation::Mean => sum / self.terms.len() as f32,
        }
    }
}

/// Metric table resolved for a fixed bin count.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    metrics: Vec<MetricDef>,
}

impl MetricSpec {
    /// The standard table (drums, bass line, vocal range, energy and bands).
    /// Terms past `num_bins` are dropped.
    pub fn standard(num_bins: usize) -> Self {
        use Aggregation::{Mean, Sum};

        let all: Vec<usize> = (0..num_bins).collect();
        let highs: Vec<usize> = (6..num_bins).collect();
        let table: [(&'static str, &[usize], Aggregation); 11] = [
            ("kick_drum", &[0, 1], Sum),
            ("snare_drum", &[4, 5, 6], Sum),
            ("hi_hat", &[6, 7], Sum),
            ("bass_line", &[1, 2], Sum),
            ("vocal_range", &[3, 4], Sum),
            ("overall_energy", &all, Sum),
            ("overall_average", &all, Mean),
            ("sub_bass", &[0], Sum),
            ("bass", &[1, 2], Mean),
            ("mids", &[3, 4, 5], Mean),
            ("highs", &highs, Mean),
        ];

        let metrics = table
            .into_iter()
            .map(|(name, bins, aggregation)| MetricDef {
                name,
                terms: bins
                    .iter()
                    .filter(|&&bin| bin < num_bins)
                    .map(|&bin| (bin, 1.0))
                    .collect(),
                aggregation,
            })
            .collect();

        Self { metrics }
    }

    pub fn metrics(&self) -> &[MetricDef] {
        &self.metrics
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.metrics.iter().map(|m| m.name)
    }

    /// Evaluate every metric in table order.
    pub fn derive(&self, bins: &[f32]) -> Metrics {
        Metrics {
            values: self
                .metrics
                .iter()
                .map(|m| (m.name, m.evaluate(bins)))
                .collect(),
        }
    }
}

/// Ordered metric values from one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    values: Vec<(&'static str, f32)>,
}

impl Metrics {
    pub fn get(&self, name: &str) -> Option<f32> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f32)> + '_ {
        self.values.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
