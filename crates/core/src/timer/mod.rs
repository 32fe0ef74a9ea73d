//! Periodic clocks that drive the frame scheduler.
//!
//! [`ThreadTimer`] is the production clock. [`ManualTimer`] never fires on
//! its own; callers step it explicitly, which keeps scheduler tests
//! deterministic and lets them observe whether the clock was released.

use std::{
    fmt,
    sync::{
        mpsc::{self, RecvTimeoutError, Sender},
        Arc, Mutex, MutexGuard,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crate::{Result, WaveEngineError};

/// Callback invoked once per period.
pub type TickTask = Box<dyn FnMut() + Send + 'static>;

/// Source of periodic callbacks.
pub trait Timer: Send + Sync {
    fn schedule(&self, interval: Duration, task: TickTask) -> Result<Box<dyn TimerHandle>>;
}

/// Ownership of one running schedule. Cancelling stops future callbacks and
/// releases whatever resource backs the schedule.
pub trait TimerHandle: Send {
    fn cancel(&mut self);
}

/// Runs each schedule on its own named thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTimer;

impl ThreadTimer {
    pub fn new() -> Self {
        Self
    }
}

impl Timer for ThreadTimer {
    fn schedule(&self, interval: Duration, mut task: TickTask) -> Result<Box<dyn TimerHandle>> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("wave-clock".to_string())
            .spawn(move || {
                let mut deadline = Instant::now() + interval;
                loop {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            task();
                            deadline += interval;
                            let now = Instant::now();
                            if deadline < now {
                                // Skip missed periods instead of bursting.
                                deadline = now + interval;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("clock thread exiting");
            })?;

        Ok(Box::new(ThreadTimerHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        }))
    }
}

struct ThreadTimerHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TimerHandle for ThreadTimerHandle {
    fn cancel(&mut self) {
        // Disconnecting the channel wakes the clock thread immediately.
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            // A task may cancel its own schedule; joining itself would deadlock.
            if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
                tracing::warn!("clock thread panicked");
            }
        }
    }
}

impl Drop for ThreadTimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Deterministic clock: tasks only run when [`ManualTimer::fire`] is called.
#[derive(Clone, Default)]
pub struct ManualTimer {
    state: Arc<Mutex<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    next_id: u64,
    scheduled_total: usize,
    slots: Vec<ManualSlot>,
}

struct ManualSlot {
    id: u64,
    interval: Duration,
    task: Arc<Mutex<TickTask>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every active task once and returns how many ran.
    pub fn fire(&self) -> Result<usize> {
        let tasks: Vec<_> = self
            .lock()?
            .slots
            .iter()
            .map(|slot| slot.task.clone())
            .collect();

        for task in &tasks {
            let mut task = task
                .lock()
                .map_err(|_| WaveEngineError::msg("manual timer task has been poisoned"))?;
            (task.as_mut())();
        }
        Ok(tasks.len())
    }

    /// Fires `times` periods in a row and returns the total number of task runs.
    pub fn fire_n(&self, times: usize) -> Result<usize> {
        let mut total = 0;
        for _ in 0..times {
            total += self.fire()?;
        }
        Ok(total)
    }

    /// Schedules that have not been cancelled.
    pub fn active_count(&self) -> usize {
        self.lock().map(|state| state.slots.len()).unwrap_or(0)
    }

    /// Number of schedules ever created, cancelled or not.
    pub fn scheduled_total(&self) -> usize {
        self.lock().map(|state| state.scheduled_total).unwrap_or(0)
    }

    /// Interval of the most recent active schedule.
    pub fn interval(&self) -> Option<Duration> {
        self.lock()
            .ok()
            .and_then(|state| state.slots.last().map(|slot| slot.interval))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ManualState>> {
        self.state
            .lock()
            .map_err(|_| WaveEngineError::msg("manual timer has been poisoned"))
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, interval: Duration, task: TickTask) -> Result<Box<dyn TimerHandle>> {
        let mut state = self.lock()?;
        let id = state.next_id;
        state.next_id += 1;
        state.scheduled_total += 1;
        state.slots.push(ManualSlot {
            id,
            interval,
            task: Arc::new(Mutex::new(task)),
        });

        Ok(Box::new(ManualTimerHandle {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

impl fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualTimer")
            .field("active", &self.active_count())
            .field("scheduled_total", &self.scheduled_total())
            .finish()
    }
}

struct ManualTimerHandle {
    id: u64,
    state: Arc<Mutex<ManualState>>,
}

impl TimerHandle for ManualTimerHandle {
    fn cancel(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.slots.retain(|slot| slot.id != self.id);
        }
    }
}

impl Drop for ManualTimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
