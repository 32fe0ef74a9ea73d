use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{Result, WaveEngineError};

pub const BASE_AMPLITUDE: f64 = 100.0;
pub const BASE_PERIOD: f64 = 200.0;
/// Each harmonic is this many times smaller and faster than the previous one.
pub const DECAY: f64 = 1.4;
/// Upper bound of `shift[i]` as a multiple of `period[i]`.
pub const SHIFT_SPAN: f64 = 10.0;

/// Immutable parameter set for the additive synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHarmonicSeries")]
pub struct HarmonicSeries {
    amplitude: Vec<f64>,
    period: Vec<f64>,
    shift: Vec<f64>,
}

/// Wire shape of a series; only reaches callers through [`HarmonicSeries::from_parts`].
#[derive(Deserialize)]
struct RawHarmonicSeries {
    amplitude: Vec<f64>,
    period: Vec<f64>,
    shift: Vec<f64>,
}

impl TryFrom<RawHarmonicSeries> for HarmonicSeries {
    type Error = WaveEngineError;

    fn try_from(raw: RawHarmonicSeries) -> Result<Self> {
        Self::from_parts(raw.amplitude, raw.period, raw.shift)
    }
}

impl HarmonicSeries {
    /// Builds a series with the standard decay chain, drawing shifts from `rng`.
    pub fn generate<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Result<Self> {
        if count < 1 {
            return Err(WaveEngineError::invalid_config(
                "harmonic series needs at least one harmonic",
            ));
        }

        let mut amplitude = Vec::with_capacity(count);
        let mut period = Vec::with_capacity(count);
        let mut shift = Vec::with_capacity(count);

        let (mut a, mut p) = (BASE_AMPLITUDE, BASE_PERIOD);
        for i in 0..count {
            if i > 0 {
                a /= DECAY;
                p /= DECAY;
            }
            amplitude.push(a);
            period.push(p);
            shift.push(rng.gen_range(0.0..p * SHIFT_SPAN));
        }

        Ok(Self {
            amplitude,
            period,
            shift,
        })
    }

    /// Assembles a series from explicit parameter arrays, e.g. for fixtures
    /// that need a known shift.
    pub fn from_parts(amplitude: Vec<f64>, period: Vec<f64>, shift: Vec<f64>) -> Result<Self> {
        if amplitude.is_empty() {
            return Err(WaveEngineError::invalid_config(
                "harmonic series needs at least one harmonic",
            ));
        }
        if amplitude.len() != period.len() || amplitude.len() != shift.len() {
            return Err(WaveEngineError::invalid_config(format!(
                "harmonic arrays differ in length ({}, {}, {})",
                amplitude.len(),
                period.len(),
                shift.len()
            )));
        }
        if period.iter().any(|p| !p.is_finite() || *p == 0.0) {
            return Err(WaveEngineError::invalid_config(
                "harmonic periods must be finite and non-zero",
            ));
        }
        Ok(Self {
            amplitude,
            period,
            shift,
        })
    }

    pub fn count(&self) -> usize {
        self.amplitude.len()
    }

    pub fn amplitude(&self) -> &[f64] {
        &self.amplitude
    }

    pub fn period(&self) -> &[f64] {
        &self.period
    }

    pub fn shift(&self) -> &[f64] {
        &self.shift
    }
}

/// Produces fresh [`HarmonicSeries`] values from an owned random source.
pub struct HarmonicSeriesGenerator {
    rng: Box<dyn RngCore + Send>,
}

impl HarmonicSeriesGenerator {
    /// Generator seeded from the operating system.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Generator whose shifts are reproducible across runs.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng<R: RngCore + Send + 'static>(rng: R) -> Self {
        Self { rng: Box::new(rng) }
    }

    pub fn generate(&mut self, count: usize) -> Result<HarmonicSeries> {
        HarmonicSeries::generate(count, &mut self.rng)
    }
}

impl Default for HarmonicSeriesGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HarmonicSeriesGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarmonicSeriesGenerator").finish()
    }
}
