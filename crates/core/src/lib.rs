//! Core library for the Harmonic Wave benchmark.
//!
//! The crate produces one continuously evolving waveform and distributes it
//! to several independent renderers. Each module owns one stage of that
//! pipeline: harmonic parameter generation, sampling, the fixed-interval
//! scheduler that broadcasts snapshots, per-owner performance tracking, and
//! the reference render adapters that consume the snapshots.

pub mod config;
pub mod error;
pub mod harmonics;
pub mod metrics;
pub mod render;
pub mod sampler;
pub mod scheduler;
pub mod timer;

pub use config::{AppConfig, EngineConfig, RenderConfig};
pub use error::{Result, WaveEngineError};
pub use harmonics::{HarmonicSeries, HarmonicSeriesGenerator};
pub use metrics::{PerformanceMetric, PerformanceTracker};
pub use render::{
    AttachedRenderer, CanvasAdapter, ChartRecord, RenderAdapter, SeriesAdapter, SpectrumAdapter,
    SvgAdapter, ValueRange,
};
pub use sampler::{WaveSampler, WaveState};
pub use scheduler::{FrameScheduler, SubscriptionHandle};
pub use timer::{ManualTimer, ThreadTimer, Timer, TimerHandle};
