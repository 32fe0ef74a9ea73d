use std::{f64::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex64, RealFftPlanner, RealToComplex};

use crate::{Result, WaveEngineError, WaveState};

use super::RenderAdapter;

/// Spectrum back-end: Hann-windowed magnitude spectrum of each snapshot,
/// folded into a fixed number of bars.
pub struct SpectrumAdapter {
    bar_count: usize,
    fft: Option<FftResources>,
    magnitudes: Vec<f64>,
    bars: Vec<f64>,
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f64>>,
    scratch: Vec<Complex64>,
    spectrum: Vec<Complex64>,
    input: Vec<f64>,
}

impl SpectrumAdapter {
    pub fn new(bar_count: usize) -> Result<Self> {
        if bar_count == 0 {
            return Err(WaveEngineError::invalid_config(
                "spectrum needs at least one bar",
            ));
        }
        Ok(Self {
            bar_count,
            fft: None,
            magnitudes: Vec::new(),
            bars: vec![0.0; bar_count],
        })
    }

    /// Magnitude per FFT bin, scaled by the transform length.
    pub fn magnitudes(&self) -> &[f64] {
        &self.magnitudes
    }

    /// Bar heights in `[0, 1]`, relative to the strongest bin.
    pub fn bars(&self) -> &[f64] {
        &self.bars
    }

    /// Strongest non-DC bin, if the snapshot carries any energy.
    pub fn dominant_bin(&self) -> Option<usize> {
        self.magnitudes
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, magnitude)| **magnitude > f64::EPSILON)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(index, _)| index)
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        if self.fft.as_ref().is_some_and(|fft| fft.size != size) {
            self.fft = None;
        }

        self.fft.get_or_insert_with(|| {
            let plan = RealFftPlanner::<f64>::new().plan_fft_forward(size);
            FftResources {
                size,
                scratch: plan.make_scratch_vec(),
                spectrum: plan.make_output_vec(),
                input: plan.make_input_vec(),
                plan,
            }
        })
    }

    fn fold_bars(&mut self) {
        self.bars.iter_mut().for_each(|bar| *bar = 0.0);
        let bins = self.magnitudes.len();
        if bins == 0 {
            return;
        }

        let peak = self.magnitudes.iter().copied().fold(0.0, f64::max);
        for (index, magnitude) in self.magnitudes.iter().enumerate() {
            let bar = index * self.bar_count / bins;
            self.bars[bar] = self.bars[bar].max(*magnitude);
        }
        if peak > f64::EPSILON {
            self.bars.iter_mut().for_each(|bar| *bar /= peak);
        }
    }
}

impl RenderAdapter for SpectrumAdapter {
    fn name(&self) -> &str {
        "spectrum"
    }

    fn draw(&mut self, state: &WaveState) -> Result<()> {
        let len = state.points.len();
        if len < 2 {
            self.magnitudes.clear();
            self.fold_bars();
            return Ok(());
        }

        let fft = self.prepare_fft(len);
        for (index, value) in state.points.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }
        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let scale = 1.0 / len as f64;
        let magnitudes: Vec<f64> = fft.spectrum.iter().map(|bin| bin.norm() * scale).collect();
        self.magnitudes = magnitudes;
        self.fold_bars();
        Ok(())
    }
}

impl fmt::Debug for SpectrumAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAdapter")
            .field("bar_count", &self.bar_count)
            .field("fft", &self.fft)
            .field("bins", &self.magnitudes.len())
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn hann_value(index: usize, len: usize) -> f64 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f64) / (len as f64 - 1.0)).cos()
}
