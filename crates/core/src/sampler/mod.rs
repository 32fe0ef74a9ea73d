use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::HarmonicSeries;

/// Distance travelled along the phase axis per sample index.
pub const PHASE_SCALE: f64 = 1.5;

/// Evaluates a [`HarmonicSeries`] over a window of sample indices.
///
/// The sampler is stateless: the same series, sample count and phase offset
/// always produce the same sequence, bit for bit. It never normalises its
/// output; consumers derive their own range from the points.
#[derive(Debug, Default, Clone, Copy)]
pub struct WaveSampler;

impl WaveSampler {
    /// Returns `sample_count + 1` points. Harmonic 0 only anchors the decay
    /// chain and does not contribute to the sum.
    pub fn sample(series: &HarmonicSeries, sample_count: usize, phase_offset: f64) -> Vec<f64> {
        let mut points = Vec::with_capacity(sample_count + 1);
        Self::sample_into(series, sample_count, phase_offset, &mut points);
        points
    }

    /// Same as [`WaveSampler::sample`] but reuses `out`.
    pub fn sample_into(
        series: &HarmonicSeries,
        sample_count: usize,
        phase_offset: f64,
        out: &mut Vec<f64>,
    ) {
        out.clear();
        let amplitude = series.amplitude().get(1..).unwrap_or_default();
        let period = series.period().get(1..).unwrap_or_default();
        let shift = series.shift().get(1..).unwrap_or_default();

        for i in 0..=sample_count {
            let position = (i as f64 + phase_offset) * PHASE_SCALE;
            let sum: f64 = amplitude
                .iter()
                .zip(period)
                .zip(shift)
                .map(|((a, p), s)| a * ((s + position) / p).sin())
                .sum();
            out.push(sum);
        }
    }
}

/// One immutable waveform snapshot produced by a scheduler tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveState {
    pub points: Vec<f64>,
    /// Phase offset the points were sampled at.
    pub phase_offset: f64,
    #[serde(skip)]
    series: Option<Arc<HarmonicSeries>>,
    /// Index of the tick that produced this snapshot, starting at 0.
    pub tick: u64,
}

impl WaveState {
    pub fn new(points: Vec<f64>, phase_offset: f64, series: Arc<HarmonicSeries>, tick: u64) -> Self {
        Self {
            points,
            phase_offset,
            series: Some(series),
            tick,
        }
    }

    /// Samples `series` directly, outside of any scheduler.
    pub fn capture(series: Arc<HarmonicSeries>, sample_count: usize, phase_offset: f64) -> Self {
        let points = WaveSampler::sample(&series, sample_count, phase_offset);
        Self::new(points, phase_offset, series, 0)
    }

    /// Series the points were derived from. `None` only for snapshots that
    /// were deserialized rather than produced in-process.
    pub fn series(&self) -> Option<&Arc<HarmonicSeries>> {
        self.series.as_ref()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
