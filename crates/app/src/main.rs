use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use harmonic_wave_core::{
    render::Margins, AppConfig, AttachedRenderer, CanvasAdapter, FrameScheduler,
    HarmonicSeriesGenerator, ManualTimer, RenderAdapter, SeriesAdapter, SpectrumAdapter,
    SvgAdapter, ThreadTimer, Timer, WaveState,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() -> harmonic_wave_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    let generator = match cli.seed {
        Some(seed) => HarmonicSeriesGenerator::seeded(seed),
        None => HarmonicSeriesGenerator::new(),
    };

    match cli.command {
        Commands::Run { duration_ms, show } => run_live(&config, generator, duration_ms, show),
        Commands::Snapshot { phase } => run_snapshot(&config, generator, phase),
        Commands::Bench { ticks } => run_bench(&config, generator, ticks),
    }
}

fn run_live(
    config: &AppConfig,
    generator: HarmonicSeriesGenerator,
    duration_ms: u64,
    show: bool,
) -> harmonic_wave_core::Result<()> {
    tracing::info!(duration_ms, "starting live mode");

    let scheduler =
        FrameScheduler::with_timer(config.engine.clone(), Arc::new(ThreadTimer::new()), generator)?;
    scheduler.on_performance_update(|metric| {
        tracing::trace!(
            last_ms = metric.last_duration_ms,
            average_ms = metric.running_average_duration_ms,
            "compute"
        );
    })?;

    let renderers = Renderers::attach(&scheduler, config)?;
    let preview = if show {
        Some(AttachedRenderer::attach(
            &scheduler,
            CanvasAdapter::with_margins(72, 18, Margins::uniform(1.0))?,
        )?)
    } else {
        None
    };

    std::thread::sleep(Duration::from_millis(duration_ms));

    renderers.detach(&scheduler)?;
    if let Some(preview) = &preview {
        preview.detach(&scheduler)?;
        println!("{}", preview.with_adapter(|canvas| canvas.to_ascii())?);
    }

    report(&scheduler, &renderers)
}

fn run_snapshot(
    config: &AppConfig,
    mut generator: HarmonicSeriesGenerator,
    phase: f64,
) -> harmonic_wave_core::Result<()> {
    let series = Arc::new(generator.generate(config.engine.total_harmonics)?);
    let state = WaveState::capture(series, config.engine.sample_count, phase);
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn run_bench(
    config: &AppConfig,
    generator: HarmonicSeriesGenerator,
    ticks: usize,
) -> harmonic_wave_core::Result<()> {
    tracing::info!(ticks, "running bench");

    let timer = ManualTimer::new();
    let clock: Arc<dyn Timer> = Arc::new(timer.clone());
    let scheduler = FrameScheduler::with_timer(config.engine.clone(), clock, generator)?;
    let renderers = Renderers::attach(&scheduler, config)?;

    timer.fire_n(ticks)?;
    renderers.detach(&scheduler)?;
    report(&scheduler, &renderers)
}

/// The reference back-ends, each timing its own draws.
struct Renderers {
    canvas: AttachedRenderer<CanvasAdapter>,
    svg: AttachedRenderer<SvgAdapter>,
    series: AttachedRenderer<SeriesAdapter>,
    spectrum: AttachedRenderer<SpectrumAdapter>,
}

impl Renderers {
    fn attach(scheduler: &FrameScheduler, config: &AppConfig) -> harmonic_wave_core::Result<Self> {
        let (width, height) = (config.render.width, config.render.height);
        Ok(Self {
            canvas: AttachedRenderer::attach(scheduler, CanvasAdapter::new(width, height)?)?,
            svg: AttachedRenderer::attach(scheduler, SvgAdapter::new(width, height)?)?,
            series: AttachedRenderer::attach(scheduler, SeriesAdapter::new())?,
            spectrum: AttachedRenderer::attach_worker(scheduler, SpectrumAdapter::new(32)?)?,
        })
    }

    fn detach(&self, scheduler: &FrameScheduler) -> harmonic_wave_core::Result<()> {
        self.canvas.detach(scheduler)?;
        self.svg.detach(scheduler)?;
        self.series.detach(scheduler)?;
        self.spectrum.detach(scheduler)?;
        Ok(())
    }
}

fn report(scheduler: &FrameScheduler, renderers: &Renderers) -> harmonic_wave_core::Result<()> {
    let compute = scheduler.metric()?;
    let entries = [
        (renderers.canvas.with_adapter(|a| a.name().to_string())?, renderers.canvas.metric()?),
        (renderers.svg.with_adapter(|a| a.name().to_string())?, renderers.svg.metric()?),
        (
            renderers.series.with_adapter(|a| a.name().to_string())?,
            renderers.series.metric()?,
        ),
        (
            renderers.spectrum.with_adapter(|a| a.name().to_string())?,
            renderers.spectrum.metric()?,
        ),
    ];

    for (name, metric) in &entries {
        tracing::info!(
            renderer = name.as_str(),
            frames = metric.sample_count,
            last_ms = metric.last_duration_ms,
            average_ms = metric.running_average_duration_ms,
            "render cost"
        );
    }

    let renderers: serde_json::Map<String, serde_json::Value> = entries
        .iter()
        .map(
            |(name, metric)| -> harmonic_wave_core::Result<(String, serde_json::Value)> {
                Ok((name.clone(), serde_json::to_value(metric)?))
            },
        )
        .collect::<harmonic_wave_core::Result<_>>()?;
    let summary = json!({
        "ticks": scheduler.tick_count()?,
        "phase_offset": scheduler.phase_offset()?,
        "compute": compute,
        "renderers": renderers,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Harmonic wave renderer benchmark", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// JSON configuration file; flags below override its values.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Number of harmonics in the series.
    #[arg(long, global = true)]
    harmonics: Option<usize>,
    /// Phase advance per tick is speed / 10.
    #[arg(long, global = true)]
    speed: Option<f64>,
    /// Milliseconds between ticks.
    #[arg(long, global = true)]
    interval_ms: Option<u64>,
    /// Points per snapshot, minus one.
    #[arg(long, global = true)]
    samples: Option<usize>,
    /// Seed for the harmonic phase shifts.
    #[arg(long, global = true)]
    seed: Option<u64>,
}

impl Cli {
    fn resolve_config(&self) -> harmonic_wave_core::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };
        let engine = &mut config.engine;
        if let Some(harmonics) = self.harmonics {
            engine.total_harmonics = harmonics;
        }
        if let Some(speed) = self.speed {
            engine.speed = speed;
        }
        if let Some(interval_ms) = self.interval_ms {
            engine.tick_interval_ms = interval_ms;
        }
        if let Some(samples) = self.samples {
            engine.sample_count = samples;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the engine on a real clock and report per-renderer costs.
    Run {
        /// How long to keep the engine running.
        #[arg(short, long, default_value_t = 2_000)]
        duration_ms: u64,
        /// Print a text preview of the last frame.
        #[arg(long)]
        show: bool,
    },
    /// Print a single snapshot as JSON.
    Snapshot {
        /// Phase offset to sample at.
        #[arg(long, default_value_t = 0.0)]
        phase: f64,
    },
    /// Step the engine a fixed number of ticks without sleeping.
    Bench {
        #[arg(short, long, default_value_t = 1_000)]
        ticks: usize,
    },
}
