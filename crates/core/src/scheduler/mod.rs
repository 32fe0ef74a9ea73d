//! Fixed-interval producer that samples the wave and broadcasts snapshots.
//!
//! The clock starts lazily when the first subscriber registers and is
//! cancelled as soon as the last one leaves. Each tick samples the current
//! series at the current phase offset, advances the phase by `speed / 10`,
//! records the compute time and hands the snapshot to every subscriber in
//! subscription order.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex, MutexGuard, Weak,
    },
    thread::JoinHandle,
    time::Instant,
};

use crate::{
    timer::{ThreadTimer, Timer, TimerHandle},
    EngineConfig, HarmonicSeries, HarmonicSeriesGenerator, PerformanceMetric, PerformanceTracker,
    Result, WaveEngineError, WaveSampler, WaveState,
};

/// Handler invoked with every snapshot.
pub type SubscriberFn = Box<dyn FnMut(&WaveState) + Send + 'static>;
/// Receives the scheduler's compute metric after every tick.
pub type PerformanceCallback = Box<dyn FnMut(&PerformanceMetric) + Send + 'static>;

/// Identifies a registered subscriber. Returned by the `subscribe_*` methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Owns the phase offset, the active series and the clock.
pub struct FrameScheduler {
    shared: Arc<Shared>,
}

struct Shared {
    me: Weak<Shared>,
    timer: Arc<dyn Timer>,
    engine: Mutex<EngineState>,
    subscribers: Mutex<Vec<Subscriber>>,
    performance: Mutex<Option<Arc<Mutex<PerformanceCallback>>>>,
    clock: Mutex<Option<Box<dyn TimerHandle>>>,
    next_id: AtomicU64,
}

struct EngineState {
    config: EngineConfig,
    generator: HarmonicSeriesGenerator,
    series: Arc<HarmonicSeries>,
    phase_offset: f64,
    tracker: PerformanceTracker,
    ticks: u64,
    latest: Option<Arc<WaveState>>,
}

impl FrameScheduler {
    /// Scheduler driven by a [`ThreadTimer`] with OS-seeded shifts.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_timer(config, Arc::new(ThreadTimer::new()), HarmonicSeriesGenerator::new())
    }

    /// Scheduler with an explicit clock and random source.
    pub fn with_timer(
        config: EngineConfig,
        timer: Arc<dyn Timer>,
        mut generator: HarmonicSeriesGenerator,
    ) -> Result<Self> {
        config.validate()?;
        let series = Arc::new(generator.generate(config.total_harmonics)?);

        tracing::debug!(
            harmonics = config.total_harmonics,
            sample_count = config.sample_count,
            speed = config.speed,
            tick_interval_ms = config.tick_interval_ms,
            "frame scheduler created"
        );

        Ok(Self {
            shared: Arc::new_cyclic(|me| Shared {
                me: me.clone(),
                timer,
                engine: Mutex::new(EngineState {
                    config,
                    generator,
                    series,
                    phase_offset: 0.0,
                    tracker: PerformanceTracker::new(),
                    ticks: 0,
                    latest: None,
                }),
                subscribers: Mutex::new(Vec::new()),
                performance: Mutex::new(None),
                clock: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        })
    }

    /// Registers a handler that runs on the clock thread, in subscription
    /// order, once per tick.
    pub fn subscribe<F>(&self, handler: F) -> Result<SubscriptionHandle>
    where
        F: FnMut(&WaveState) + Send + 'static,
    {
        let handle = self.shared.next_handle();
        let sink = Sink::Inline(Arc::new(Mutex::new(Box::new(handler))));
        self.shared.add_subscriber(handle, sink)
    }

    /// Registers a handler that runs on its own worker thread. The worker
    /// only ever sees the newest snapshot; if it falls behind, intermediate
    /// ones are dropped rather than queued.
    pub fn subscribe_worker<F>(&self, handler: F) -> Result<SubscriptionHandle>
    where
        F: FnMut(&WaveState) + Send + 'static,
    {
        let handle = self.shared.next_handle();
        let worker = Worker::spawn(handle, Box::new(handler))?;
        self.shared.add_subscriber(handle, Sink::Worker(worker))
    }

    /// Stops notifications to `handle`. Returns `false` if it was already
    /// removed. Releases the clock when no subscribers remain.
    ///
    /// No delivery starts after this returns. A delivery already running on
    /// another thread may still be finishing.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<bool> {
        self.shared.remove_subscriber(handle)
    }

    /// Installs the callback that receives the compute metric after every
    /// tick, replacing any previous one.
    pub fn on_performance_update<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(&PerformanceMetric) + Send + 'static,
    {
        *self.shared.lock_performance()? = Some(Arc::new(Mutex::new(Box::new(callback))));
        Ok(())
    }

    pub fn clear_performance_update(&self) -> Result<()> {
        *self.shared.lock_performance()? = None;
        Ok(())
    }

    /// Runs one tick immediately, independent of the clock.
    pub fn tick(&self) -> Result<Arc<WaveState>> {
        self.shared.tick()
    }

    /// Regenerates the series with `count` harmonics. Subsequent ticks use
    /// the new series; on error the previous one stays active.
    pub fn set_total_harmonics(&self, count: usize) -> Result<()> {
        let config = EngineConfig {
            total_harmonics: count,
            ..self.config()?
        };
        self.reconfigure(config)
    }

    pub fn set_speed(&self, speed: f64) -> Result<()> {
        let config = EngineConfig {
            speed,
            ..self.config()?
        };
        self.reconfigure(config)
    }

    /// Applies a full configuration. The series is regenerated only when the
    /// harmonic count changes, and a running clock is restarted only when the
    /// interval changes. Invalid configurations leave everything untouched.
    pub fn reconfigure(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;

        let interval_changed = {
            let mut engine = self.shared.lock_engine()?;
            if config.total_harmonics != engine.config.total_harmonics {
                let series = engine.generator.generate(config.total_harmonics)?;
                engine.series = Arc::new(series);
                tracing::info!(harmonics = config.total_harmonics, "harmonic series regenerated");
            }
            let interval_changed = config.tick_interval_ms != engine.config.tick_interval_ms;
            engine.config = config;
            interval_changed
        };

        if interval_changed {
            self.shared.restart_clock()?;
        }
        Ok(())
    }

    /// Cancels the clock without touching subscriptions. The next
    /// `subscribe_*` or [`FrameScheduler::start`] call resumes it.
    pub fn stop(&self) -> Result<()> {
        let handle = self.shared.lock_clock()?.take();
        if let Some(mut handle) = handle {
            handle.cancel();
            tracing::info!("frame clock stopped");
        }
        Ok(())
    }

    /// Starts the clock if subscribers are registered and it is not running.
    pub fn start(&self) -> Result<()> {
        let subscribers = self.shared.lock_subscribers()?;
        if !subscribers.is_empty() {
            self.shared.ensure_clock()?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .clock
            .lock()
            .map(|clock| clock.is_some())
            .unwrap_or(false)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .lock()
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    pub fn phase_offset(&self) -> Result<f64> {
        Ok(self.shared.lock_engine()?.phase_offset)
    }

    pub fn series(&self) -> Result<Arc<HarmonicSeries>> {
        Ok(self.shared.lock_engine()?.series.clone())
    }

    pub fn config(&self) -> Result<EngineConfig> {
        Ok(self.shared.lock_engine()?.config.clone())
    }

    /// Compute-time metric of the sampling step.
    pub fn metric(&self) -> Result<PerformanceMetric> {
        Ok(self.shared.lock_engine()?.tracker.metric())
    }

    pub fn tick_count(&self) -> Result<u64> {
        Ok(self.shared.lock_engine()?.ticks)
    }

    /// Most recent snapshot, if any tick has run.
    pub fn latest(&self) -> Result<Option<Arc<WaveState>>> {
        Ok(self.shared.lock_engine()?.latest.clone())
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(%err, "failed to stop frame clock");
        }
        let drained: Vec<Subscriber> = match self.shared.subscribers.lock() {
            Ok(mut subscribers) => subscribers.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for subscriber in drained {
            subscriber.sink.close();
        }
    }
}

impl fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("subscribers", &self.subscriber_count())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Shared {
    fn tick(&self) -> Result<Arc<WaveState>> {
        let (state, metric) = {
            let mut engine = self.lock_engine()?;
            let start = Instant::now();
            let series = engine.series.clone();
            let phase_offset = engine.phase_offset;
            let points = WaveSampler::sample(&series, engine.config.sample_count, phase_offset);
            engine.phase_offset += engine.config.phase_step();
            engine.tracker.record(start.elapsed());

            let tick = engine.ticks;
            engine.ticks += 1;
            let state = Arc::new(WaveState::new(points, phase_offset, series, tick));
            engine.latest = Some(state.clone());
            (state, engine.tracker.metric())
        };

        tracing::trace!(tick = state.tick, phase_offset = state.phase_offset, "tick");
        self.notify_performance(&metric)?;
        self.broadcast(&state)?;
        Ok(state)
    }

    fn broadcast(&self, state: &Arc<WaveState>) -> Result<()> {
        // Handlers run without the subscriber lock so they may unsubscribe.
        let targets: Vec<(SubscriptionHandle, Delivery)> = self
            .lock_subscribers()?
            .iter()
            .map(|subscriber| (subscriber.handle, subscriber.sink.delivery()))
            .collect();

        for (handle, delivery) in targets {
            match delivery {
                Delivery::Inline(handler) => {
                    let mut handler = handler.lock().map_err(|_| {
                        WaveEngineError::msg(format!("subscriber {} has been poisoned", handle.0))
                    })?;
                    // Checked under the handler lock so an unsubscribe that
                    // returned while this tick waited for the lock wins.
                    if !self.is_subscribed(handle)? {
                        continue;
                    }
                    run_contained(handle.0, || (handler.as_mut())(&**state));
                }
                Delivery::Worker(mailbox) => {
                    if self.is_subscribed(handle)? {
                        mailbox.post(state.clone())?;
                    }
                }
            }
        }
        Ok(())
    }

    fn notify_performance(&self, metric: &PerformanceMetric) -> Result<()> {
        // The slot lock is released before the call so the callback may
        // replace or clear itself.
        let Some(callback) = self.lock_performance()?.clone() else {
            return Ok(());
        };
        let mut callback = callback
            .lock()
            .map_err(|_| WaveEngineError::msg("performance callback has been poisoned"))?;
        if panic::catch_unwind(AssertUnwindSafe(|| (callback.as_mut())(metric))).is_err() {
            tracing::warn!("performance callback panicked");
        }
        Ok(())
    }

    fn next_handle(&self) -> SubscriptionHandle {
        SubscriptionHandle(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn add_subscriber(&self, handle: SubscriptionHandle, sink: Sink) -> Result<SubscriptionHandle> {
        let failed = {
            let mut subscribers = self.lock_subscribers()?;
            subscribers.push(Subscriber { handle, sink });
            tracing::debug!(subscriber = handle.0, total = subscribers.len(), "subscribed");

            match self.ensure_clock() {
                Ok(()) => None,
                Err(err) => subscribers.pop().map(|subscriber| (subscriber, err)),
            }
        };

        if let Some((subscriber, err)) = failed {
            subscriber.sink.close();
            return Err(err);
        }
        Ok(handle)
    }

    fn remove_subscriber(&self, handle: SubscriptionHandle) -> Result<bool> {
        let (removed, clock) = {
            let mut subscribers = self.lock_subscribers()?;
            let Some(index) = subscribers.iter().position(|s| s.handle == handle) else {
                return Ok(false);
            };
            let removed = subscribers.remove(index);
            tracing::debug!(subscriber = handle.0, total = subscribers.len(), "unsubscribed");

            let clock = if subscribers.is_empty() {
                self.lock_clock()?.take()
            } else {
                None
            };
            (removed, clock)
        };

        removed.sink.close();
        if let Some(mut clock) = clock {
            clock.cancel();
            tracing::info!("last subscriber left, frame clock released");
        }
        Ok(true)
    }

    /// Caller must hold the subscriber lock.
    fn ensure_clock(&self) -> Result<()> {
        let mut clock = self.lock_clock()?;
        if clock.is_some() {
            return Ok(());
        }

        let interval = self.lock_engine()?.config.tick_interval();
        let weak = self.me.clone();
        let handle = self.timer.schedule(
            interval,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    if let Err(err) = shared.tick() {
                        tracing::error!(%err, "tick failed");
                    }
                }
            }),
        )?;
        *clock = Some(handle);
        tracing::info!(interval_ms = interval.as_millis() as u64, "frame clock started");
        Ok(())
    }

    fn restart_clock(&self) -> Result<()> {
        let previous = self.lock_clock()?.take();
        let Some(mut previous) = previous else {
            return Ok(());
        };
        previous.cancel();

        let subscribers = self.lock_subscribers()?;
        if !subscribers.is_empty() {
            self.ensure_clock()?;
        }
        Ok(())
    }

    fn is_subscribed(&self, handle: SubscriptionHandle) -> Result<bool> {
        Ok(self
            .lock_subscribers()?
            .iter()
            .any(|subscriber| subscriber.handle == handle))
    }

    fn lock_engine(&self) -> Result<MutexGuard<'_, EngineState>> {
        self.engine
            .lock()
            .map_err(|_| WaveEngineError::msg("scheduler state has been poisoned"))
    }

    fn lock_subscribers(&self) -> Result<MutexGuard<'_, Vec<Subscriber>>> {
        self.subscribers
            .lock()
            .map_err(|_| WaveEngineError::msg("subscriber list has been poisoned"))
    }

    fn lock_performance(&self) -> Result<MutexGuard<'_, Option<Arc<Mutex<PerformanceCallback>>>>> {
        self.performance
            .lock()
            .map_err(|_| WaveEngineError::msg("performance callback has been poisoned"))
    }

    fn lock_clock(&self) -> Result<MutexGuard<'_, Option<Box<dyn TimerHandle>>>> {
        self.clock
            .lock()
            .map_err(|_| WaveEngineError::msg("frame clock has been poisoned"))
    }
}

struct Subscriber {
    handle: SubscriptionHandle,
    sink: Sink,
}

enum Sink {
    Inline(Arc<Mutex<SubscriberFn>>),
    Worker(Worker),
}

enum Delivery {
    Inline(Arc<Mutex<SubscriberFn>>),
    Worker(Arc<Mailbox>),
}

impl Sink {
    fn delivery(&self) -> Delivery {
        match self {
            Sink::Inline(handler) => Delivery::Inline(handler.clone()),
            Sink::Worker(worker) => Delivery::Worker(worker.mailbox.clone()),
        }
    }

    /// Must be called without holding the subscriber lock: closing a worker
    /// joins its thread.
    fn close(self) {
        if let Sink::Worker(worker) = self {
            drop(worker);
        }
    }
}

/// Dedicated thread for one subscriber, fed through a single-slot mailbox.
struct Worker {
    mailbox: Arc<Mailbox>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(handle: SubscriptionHandle, mut handler: SubscriberFn) -> Result<Self> {
        let mailbox = Arc::new(Mailbox::default());
        let inbox = mailbox.clone();
        let thread = std::thread::Builder::new()
            .name(format!("wave-subscriber-{}", handle.0))
            .spawn(move || {
                while let Some(state) = inbox.take() {
                    run_contained(handle.0, || handler(&*state));
                }
            })?;

        Ok(Self {
            mailbox,
            thread: Some(thread),
        })
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.mailbox.close();
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
                tracing::warn!("subscriber worker thread panicked");
            }
        }
    }
}

#[derive(Default)]
struct Mailbox {
    slot: Mutex<MailboxSlot>,
    ready: Condvar,
}

#[derive(Default)]
struct MailboxSlot {
    pending: Option<Arc<WaveState>>,
    closed: bool,
}

impl Mailbox {
    fn post(&self, state: Arc<WaveState>) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| WaveEngineError::msg("subscriber mailbox has been poisoned"))?;
        if slot.closed {
            return Ok(());
        }
        if let Some(skipped) = slot.pending.replace(state) {
            tracing::trace!(tick = skipped.tick, "slow subscriber skipped a snapshot");
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Blocks until a snapshot arrives. `None` once the mailbox is closed.
    fn take(&self) -> Option<Arc<WaveState>> {
        let mut slot = self.slot.lock().ok()?;
        loop {
            if slot.closed {
                return None;
            }
            if let Some(state) = slot.pending.take() {
                return Some(state);
            }
            slot = self.ready.wait(slot).ok()?;
        }
    }

    fn close(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.closed = true;
            slot.pending = None;
        }
        self.ready.notify_all();
    }
}

fn run_contained(subscriber: u64, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!(subscriber, "subscriber panicked, snapshot skipped");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::AtomicUsize,
            mpsc::{self, RecvTimeoutError},
        },
        time::Duration,
    };

    use super::*;
    use crate::timer::ManualTimer;

    fn manual_scheduler(config: EngineConfig) -> (FrameScheduler, ManualTimer) {
        let timer = ManualTimer::new();
        let scheduler = FrameScheduler::with_timer(
            config,
            Arc::new(timer.clone()),
            HarmonicSeriesGenerator::seeded(17),
        )
        .unwrap();
        (scheduler, timer)
    }

    fn counting_handler(counter: &Arc<AtomicUsize>) -> impl FnMut(&WaveState) + Send + 'static {
        let counter = counter.clone();
        move |_state: &WaveState| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn clock_follows_subscriber_count() {
        let (scheduler, timer) = manual_scheduler(EngineConfig::default());
        assert!(!scheduler.is_running());
        assert_eq!(timer.active_count(), 0);

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let a = scheduler.subscribe(counting_handler(&first)).unwrap();
        let b = scheduler.subscribe(counting_handler(&second)).unwrap();
        assert!(scheduler.is_running());
        assert_eq!(timer.active_count(), 1);
        assert_eq!(timer.scheduled_total(), 1);
        assert_eq!(timer.interval(), Some(Duration::from_millis(50)));

        timer.fire_n(3).unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 3);
        assert_eq!(second.load(Ordering::SeqCst), 3);

        assert!(scheduler.unsubscribe(a).unwrap());
        assert_eq!(timer.active_count(), 1);
        timer.fire().unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 3);
        assert_eq!(second.load(Ordering::SeqCst), 4);

        assert!(scheduler.unsubscribe(b).unwrap());
        assert!(!scheduler.is_running());
        assert_eq!(timer.active_count(), 0);

        assert_eq!(timer.fire().unwrap(), 0);
        assert_eq!(first.load(Ordering::SeqCst), 3);
        assert_eq!(second.load(Ordering::SeqCst), 4);
        assert_eq!(scheduler.tick_count().unwrap(), 4);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let (scheduler, timer) = manual_scheduler(EngineConfig::default());
        let handle = scheduler.subscribe(|_: &WaveState| {}).unwrap();
        assert!(scheduler.unsubscribe(handle).unwrap());
        assert!(!scheduler.unsubscribe(handle).unwrap());
        assert_eq!(scheduler.subscriber_count(), 0);
        assert_eq!(timer.active_count(), 0);
    }

    #[test]
    fn phase_advances_by_a_tenth_of_speed() {
        let (scheduler, timer) = manual_scheduler(EngineConfig::default());
        let phases = Arc::new(Mutex::new(Vec::new()));
        let sink = phases.clone();
        scheduler
            .subscribe(move |state: &WaveState| sink.lock().unwrap().push(state.phase_offset))
            .unwrap();

        timer.fire_n(10).unwrap();
        assert_eq!(scheduler.phase_offset().unwrap(), 5.0);

        let phases = phases.lock().unwrap();
        let expected: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
        assert_eq!(*phases, expected);
    }

    #[test]
    fn snapshots_match_direct_sampling() {
        let (scheduler, _timer) = manual_scheduler(EngineConfig::default());
        scheduler.tick().unwrap();
        let state = scheduler.tick().unwrap();

        assert_eq!(state.len(), 301);
        assert_eq!(state.tick, 1);
        let series = state.series().unwrap();
        assert!(Arc::ptr_eq(series, &scheduler.series().unwrap()));
        assert_eq!(state.points, WaveSampler::sample(series, 300, state.phase_offset));
        assert!(Arc::ptr_eq(&scheduler.latest().unwrap().unwrap(), &state));
    }

    #[test]
    fn manual_ticks_do_not_start_the_clock() {
        let (scheduler, timer) = manual_scheduler(EngineConfig::default());
        scheduler.tick().unwrap();
        assert!(!scheduler.is_running());
        assert_eq!(timer.scheduled_total(), 0);
    }

    #[test]
    fn broadcast_follows_subscription_order() {
        let (scheduler, timer) = manual_scheduler(EngineConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["canvas", "svg", "spectrum"] {
            let log = log.clone();
            scheduler
                .subscribe(move |_: &WaveState| log.lock().unwrap().push(name))
                .unwrap();
        }

        timer.fire_n(2).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["canvas", "svg", "spectrum", "canvas", "svg", "spectrum"]
        );
    }

    #[test]
    fn panicking_subscriber_is_contained() {
        let (scheduler, timer) = manual_scheduler(EngineConfig::default());
        let healthy = Arc::new(AtomicUsize::new(0));
        scheduler
            .subscribe(|_: &WaveState| panic!("renderer exploded"))
            .unwrap();
        scheduler.subscribe(counting_handler(&healthy)).unwrap();

        timer.fire_n(3).unwrap();
        assert_eq!(healthy.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.phase_offset().unwrap(), 1.5);
    }

    #[test]
    fn subscriber_can_unsubscribe_itself() {
        let (scheduler, timer) = manual_scheduler(EngineConfig::default());
        let scheduler = Arc::new(scheduler);
        let own_handle: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&scheduler);
        let slot = own_handle.clone();
        let counter = calls.clone();
        let handle = scheduler
            .subscribe(move |_: &WaveState| {
                counter.fetch_add(1, Ordering::SeqCst);
                let own = *slot.lock().unwrap();
                if let (Some(scheduler), Some(own)) = (weak.upgrade(), own) {
                    scheduler.unsubscribe(own).unwrap();
                }
            })
            .unwrap();
        *own_handle.lock().unwrap() = Some(handle);

        timer.fire_n(3).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(timer.active_count(), 0);
        assert_eq!(scheduler.subscriber_count(), 0);
    }

    #[test]
    fn reconfiguring_harmonics_swaps_the_series() {
        let (scheduler, _timer) = manual_scheduler(EngineConfig::default());
        let before = scheduler.series().unwrap();
        let in_flight = scheduler.tick().unwrap();

        scheduler.set_total_harmonics(5).unwrap();
        let after = scheduler.series().unwrap();
        assert_eq!(after.count(), 5);
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(Arc::ptr_eq(in_flight.series().unwrap(), &before));

        let next = scheduler.tick().unwrap();
        assert!(Arc::ptr_eq(next.series().unwrap(), &after));
    }

    #[test]
    fn invalid_reconfiguration_keeps_prior_state() {
        let (scheduler, _timer) = manual_scheduler(EngineConfig::default());
        let before = scheduler.series().unwrap();

        assert!(scheduler
            .set_total_harmonics(0)
            .unwrap_err()
            .is_invalid_configuration());
        assert!(scheduler.set_speed(0.0).unwrap_err().is_invalid_configuration());
        assert!(scheduler
            .reconfigure(EngineConfig {
                tick_interval_ms: 0,
                ..Default::default()
            })
            .unwrap_err()
            .is_invalid_configuration());

        assert!(Arc::ptr_eq(&before, &scheduler.series().unwrap()));
        assert_eq!(scheduler.config().unwrap(), EngineConfig::default());
    }

    #[test]
    fn invalid_configuration_never_builds_a_scheduler() {
        let timer = ManualTimer::new();
        let result = FrameScheduler::with_timer(
            EngineConfig {
                sample_count: 0,
                ..Default::default()
            },
            Arc::new(timer.clone()),
            HarmonicSeriesGenerator::seeded(1),
        );
        assert!(result.unwrap_err().is_invalid_configuration());
        assert_eq!(timer.scheduled_total(), 0);
    }

    #[test]
    fn speed_change_applies_to_following_ticks() {
        let (scheduler, _timer) = manual_scheduler(EngineConfig::default());
        scheduler.tick().unwrap();
        scheduler.set_speed(20.0).unwrap();
        scheduler.tick().unwrap();
        assert_eq!(scheduler.phase_offset().unwrap(), 2.5);
    }

    #[test]
    fn interval_change_restarts_a_running_clock() {
        let (scheduler, timer) = manual_scheduler(EngineConfig::default());
        scheduler.subscribe(|_: &WaveState| {}).unwrap();

        scheduler
            .reconfigure(EngineConfig {
                tick_interval_ms: 20,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(timer.scheduled_total(), 2);
        assert_eq!(timer.active_count(), 1);
        assert_eq!(timer.interval(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn performance_callback_reports_compute_metric() {
        let (scheduler, timer) = manual_scheduler(EngineConfig::default());
        let counts = Arc::new(Mutex::new(Vec::new()));
        let sink = counts.clone();
        scheduler
            .on_performance_update(move |metric: &PerformanceMetric| {
                sink.lock().unwrap().push(metric.sample_count)
            })
            .unwrap();
        scheduler.subscribe(|_: &WaveState| {}).unwrap();

        timer.fire_n(4).unwrap();
        assert_eq!(*counts.lock().unwrap(), vec![1, 2, 3, 4]);

        let metric = scheduler.metric().unwrap();
        assert_eq!(metric.sample_count, 4);
        assert!(metric.running_average_duration_ms >= 0.0);

        scheduler.clear_performance_update().unwrap();
        timer.fire().unwrap();
        assert_eq!(counts.lock().unwrap().len(), 4);
    }

    #[test]
    fn stop_and_start_are_explicit() {
        let (scheduler, timer) = manual_scheduler(EngineConfig::default());
        scheduler.subscribe(|_: &WaveState| {}).unwrap();
        scheduler.stop().unwrap();
        assert_eq!(timer.active_count(), 0);
        assert_eq!(scheduler.subscriber_count(), 1);

        scheduler.start().unwrap();
        assert_eq!(timer.active_count(), 1);
        assert_eq!(timer.scheduled_total(), 2);
    }

    #[test]
    fn dropping_the_scheduler_releases_the_clock() {
        let (scheduler, timer) = manual_scheduler(EngineConfig::default());
        scheduler.subscribe(|_: &WaveState| {}).unwrap();
        assert_eq!(timer.active_count(), 1);

        drop(scheduler);
        assert_eq!(timer.active_count(), 0);
        assert_eq!(timer.fire().unwrap(), 0);
    }

    #[test]
    fn worker_subscriber_sees_snapshots_in_order() {
        let (scheduler, timer) = manual_scheduler(EngineConfig::default());
        let (tx, rx) = mpsc::channel();
        let handle = scheduler
            .subscribe_worker(move |state: &WaveState| {
                let _ = tx.send(state.tick);
            })
            .unwrap();

        timer.fire_n(5).unwrap();

        let mut seen = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(tick) => {
                    seen.push(tick);
                    if tick == 4 {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => panic!("worker never saw the last tick"),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&4));

        assert!(scheduler.unsubscribe(handle).unwrap());
        assert_eq!(timer.active_count(), 0);
    }

    #[test]
    fn slow_worker_does_not_stall_inline_subscribers() {
        let (scheduler, timer) = manual_scheduler(EngineConfig::default());
        let (release_tx, release_rx) = mpsc::channel::<()>();
        scheduler
            .subscribe_worker(move |_: &WaveState| {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
            })
            .unwrap();
        let fast = Arc::new(AtomicUsize::new(0));
        scheduler.subscribe(counting_handler(&fast)).unwrap();

        timer.fire_n(10).unwrap();
        assert_eq!(fast.load(Ordering::SeqCst), 10);
        assert_eq!(scheduler.phase_offset().unwrap(), 5.0);

        drop(release_tx);
    }

    #[test]
    fn slow_worker_only_sees_the_newest_snapshot() {
        let (scheduler, timer) = manual_scheduler(EngineConfig::default());
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (seen_tx, seen_rx) = mpsc::channel();
        let handle = scheduler
            .subscribe_worker(move |state: &WaveState| {
                let _ = seen_tx.send(state.tick);
                // Hold the worker on its first snapshot until released.
                let _ = gate_rx.recv_timeout(Duration::from_secs(5));
            })
            .unwrap();

        timer.fire_n(10).unwrap();
        drop(gate_tx);

        let mut seen = Vec::new();
        loop {
            match seen_rx.recv_timeout(Duration::from_secs(5)) {
                Ok(tick) => {
                    seen.push(tick);
                    if tick == 9 {
                        break;
                    }
                }
                Err(err) => panic!("worker stopped before the last tick: {err:?}"),
            }
        }
        assert!(seen.len() < 10, "worker saw every snapshot: {seen:?}");
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.last(), Some(&9));

        assert!(scheduler.unsubscribe(handle).unwrap());
    }

    #[test]
    fn no_delivery_starts_after_unsubscribe_returns() {
        let (scheduler, _timer) = manual_scheduler(EngineConfig::default());
        let scheduler = Arc::new(scheduler);
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let handle = scheduler
            .subscribe(move |_: &WaveState| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    let _ = entered_tx.send(());
                    let _ = gate_rx.recv_timeout(Duration::from_secs(5));
                }
            })
            .unwrap();

        // First tick holds the handler; the second queues behind it.
        let first = {
            let scheduler = scheduler.clone();
            std::thread::spawn(move || scheduler.tick().map(|_| ()))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = {
            let scheduler = scheduler.clone();
            std::thread::spawn(move || scheduler.tick().map(|_| ()))
        };
        std::thread::sleep(Duration::from_millis(50));

        assert!(scheduler.unsubscribe(handle).unwrap());
        drop(gate_tx);
        first.join().unwrap().unwrap();
        second.join().unwrap().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.tick_count().unwrap(), 2);
    }

    #[test]
    fn performance_callback_may_replace_itself() {
        let (scheduler, _timer) = manual_scheduler(EngineConfig::default());
        let scheduler = Arc::new(scheduler);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&scheduler);
        let (first_count, second_count) = (first.clone(), second.clone());
        scheduler
            .on_performance_update(move |_: &PerformanceMetric| {
                first_count.fetch_add(1, Ordering::SeqCst);
                if let Some(scheduler) = weak.upgrade() {
                    let counter = second_count.clone();
                    scheduler
                        .on_performance_update(move |_: &PerformanceMetric| {
                            counter.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
            .unwrap();

        for _ in 0..3 {
            scheduler.tick().unwrap();
        }
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);

        let weak = Arc::downgrade(&scheduler);
        scheduler
            .on_performance_update(move |_: &PerformanceMetric| {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.clear_performance_update().unwrap();
                }
            })
            .unwrap();
        scheduler.tick().unwrap();
        scheduler.tick().unwrap();
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn thread_clock_ticks_and_is_released() {
        let config = EngineConfig {
            tick_interval_ms: 2,
            sample_count: 16,
            ..Default::default()
        };
        let scheduler = FrameScheduler::with_timer(
            config,
            Arc::new(ThreadTimer::new()),
            HarmonicSeriesGenerator::seeded(5),
        )
        .unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = scheduler.subscribe(counting_handler(&counter)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        scheduler.unsubscribe(handle).unwrap();
        assert!(!scheduler.is_running());

        let seen = counter.load(Ordering::SeqCst);
        assert!(seen >= 3);
        let ticks = scheduler.tick_count().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), seen);
        assert_eq!(scheduler.tick_count().unwrap(), ticks);
    }
}
