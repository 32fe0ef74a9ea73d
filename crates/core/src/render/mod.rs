//! Consumer side of the engine: scaling helpers shared by every renderer and
//! a small adapter layer that subscribes renderers to a [`FrameScheduler`].
//!
//! Renderers never trust the snapshot length to match their surface. They
//! iterate at most `min(render_width, points.len())` samples, and a flat wave
//! (`max == min`) is drawn at mid-scale instead of dividing by a zero range.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Instant,
};

use crate::{
    FrameScheduler, PerformanceMetric, PerformanceTracker, Result, SubscriptionHandle,
    WaveEngineError, WaveState,
};

pub mod canvas;
pub mod series;
pub mod spectrum;
pub mod svg;

pub use canvas::CanvasAdapter;
pub use series::{ChartRecord, SeriesAdapter};
pub use spectrum::SpectrumAdapter;
pub use svg::SvgAdapter;

/// Normalised value used when a snapshot has no vertical extent.
pub const MID_SCALE: f64 = 0.5;

/// Minimum and maximum of a snapshot, used for vertical scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    /// Range over the finite values in `points`; `None` if there are none.
    pub fn of(points: &[f64]) -> Option<Self> {
        points
            .iter()
            .copied()
            .filter(|value| value.is_finite())
            .fold(None, |range: Option<Self>, value| match range {
                None => Some(Self {
                    min: value,
                    max: value,
                }),
                Some(range) => Some(Self {
                    min: range.min.min(value),
                    max: range.max.max(value),
                }),
            })
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// `true` when scaling by this range would divide by zero.
    pub fn is_degenerate(&self) -> bool {
        let span = self.span();
        !(span.is_finite() && span > 0.0)
    }

    /// Maps `value` into `[0, 1]`. Degenerate ranges map everything to
    /// [`MID_SCALE`].
    pub fn normalize(&self, value: f64) -> f64 {
        if self.is_degenerate() || !value.is_finite() {
            return MID_SCALE;
        }
        ((value - self.min) / self.span()).clamp(0.0, 1.0)
    }
}

/// Normalises a whole snapshot into `[0, 1]`.
pub fn normalize(points: &[f64]) -> Vec<f64> {
    match ValueRange::of(points) {
        Some(range) => points.iter().map(|value| range.normalize(*value)).collect(),
        None => vec![MID_SCALE; points.len()],
    }
}

/// Number of samples a surface `render_width` wide may read.
pub fn visible_len(render_width: usize, points_len: usize) -> usize {
    render_width.min(points_len)
}

/// Plot area inside a surface, in surface units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            left: 40.0,
            right: 20.0,
            top: 20.0,
            bottom: 20.0,
        }
    }
}

impl Margins {
    pub fn uniform(value: f64) -> Self {
        Self {
            left: value,
            right: value,
            top: value,
            bottom: value,
        }
    }
}

/// Maps sample indices and normalised values onto surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotGeometry {
    pub width: f64,
    pub height: f64,
    pub margins: Margins,
}

impl PlotGeometry {
    pub fn new(width: usize, height: usize, margins: Margins) -> Self {
        Self {
            width: width as f64,
            height: height as f64,
            margins,
        }
    }

    pub fn baseline(&self) -> f64 {
        self.height - self.margins.bottom
    }

    pub fn x(&self, index: usize, total: usize) -> f64 {
        let plot_width = (self.width - self.margins.left - self.margins.right).max(0.0);
        self.margins.left + (index as f64 / total.max(1) as f64) * plot_width
    }

    pub fn y(&self, normalized: f64) -> f64 {
        let plot_height = (self.height - self.margins.top - self.margins.bottom).max(0.0);
        self.baseline() - normalized * plot_height
    }

    /// Surface coordinates of every visible sample of `points`.
    pub fn project(&self, points: &[f64], render_width: usize) -> Vec<(f64, f64)> {
        let range = ValueRange::of(points);
        let visible = visible_len(render_width, points.len());
        points[..visible]
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let normalized = range.map(|r| r.normalize(*value)).unwrap_or(MID_SCALE);
                (self.x(i, points.len()), self.y(normalized))
            })
            .collect()
    }
}

/// A drawing back-end fed by scheduler snapshots.
pub trait RenderAdapter: Send + 'static {
    fn name(&self) -> &str;

    /// Draws one snapshot onto the adapter's own surface.
    fn draw(&mut self, state: &WaveState) -> Result<()>;
}

/// Wraps an adapter with its own render-time tracker.
#[derive(Debug)]
pub struct RenderStage<A> {
    adapter: A,
    tracker: PerformanceTracker,
    failures: u64,
}

impl<A: RenderAdapter> RenderStage<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            tracker: PerformanceTracker::new(),
            failures: 0,
        }
    }

    /// Draws `state` and records how long it took, successful or not.
    pub fn render(&mut self, state: &WaveState) -> Result<()> {
        let start = Instant::now();
        let result = self.adapter.draw(state);
        self.tracker.record(start.elapsed());
        if result.is_err() {
            self.failures += 1;
        }
        result
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn metric(&self) -> PerformanceMetric {
        self.tracker.metric()
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}

/// Adapter registered with a scheduler. Cloning shares the same stage.
#[derive(Debug)]
pub struct AttachedRenderer<A> {
    handle: SubscriptionHandle,
    stage: Arc<Mutex<RenderStage<A>>>,
}

impl<A> Clone for AttachedRenderer<A> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            stage: Arc::clone(&self.stage),
        }
    }
}

impl<A: RenderAdapter> AttachedRenderer<A> {
    /// Subscribes `adapter` inline, on the clock thread.
    pub fn attach(scheduler: &FrameScheduler, adapter: A) -> Result<Self> {
        let stage = Arc::new(Mutex::new(RenderStage::new(adapter)));
        let handle = scheduler.subscribe(Self::handler(stage.clone()))?;
        Ok(Self { handle, stage })
    }

    /// Subscribes `adapter` on its own worker thread.
    pub fn attach_worker(scheduler: &FrameScheduler, adapter: A) -> Result<Self> {
        let stage = Arc::new(Mutex::new(RenderStage::new(adapter)));
        let handle = scheduler.subscribe_worker(Self::handler(stage.clone()))?;
        Ok(Self { handle, stage })
    }

    fn handler(stage: Arc<Mutex<RenderStage<A>>>) -> impl FnMut(&WaveState) + Send + 'static {
        move |state: &WaveState| {
            let Ok(mut stage) = stage.lock() else {
                return;
            };
            if let Err(err) = stage.render(state) {
                tracing::warn!(adapter = stage.adapter().name(), %err, "render failed");
            }
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    pub fn metric(&self) -> Result<PerformanceMetric> {
        Ok(self.lock()?.metric())
    }

    /// Runs `f` against the adapter, e.g. to read its latest output.
    pub fn with_adapter<T>(&self, f: impl FnOnce(&A) -> T) -> Result<T> {
        Ok(f(self.lock()?.adapter()))
    }

    pub fn detach(&self, scheduler: &FrameScheduler) -> Result<bool> {
        scheduler.unsubscribe(self.handle)
    }

    fn lock(&self) -> Result<MutexGuard<'_, RenderStage<A>>> {
        self.stage
            .lock()
            .map_err(|_| WaveEngineError::msg("render stage has been poisoned"))
    }
}
