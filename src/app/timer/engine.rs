use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::app::config::TimerSettings;
use crate::app::models::{TimeOption, TimerSnapshot, TimerState};
use crate::app::timer::format::format_hh_mm_ss;

pub const TICK: Duration = Duration::from_millis(250);
const TICK_MS: u64 = 250;
/// Lets the last tick's animation land before Finished is published.
const FINISH_GRACE: Duration = Duration::from_secs(1);
pub const ADDED_TIME_LABEL: &str = "Added time";

#[derive(Default)]
struct RunState {
    remaining_ms: u64,
    total_ms: u64,
    option_label: String,
    selected_app: Option<String>,
    /// Bumped whenever the run length changes; tick tasks from older runs stop writing.
    generation: u64,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    run: Mutex<RunState>,
    state_tx: watch::Sender<TimerState>,
    snapshot_tx: watch::Sender<TimerSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> TimerState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: TimerState) {
        self.state_tx.send_if_modified(|current| {
            if *current != state {
                debug!(from = ?current, to = ?state, "timer state changed");
                *current = state;
                true
            } else {
                false
            }
        });
    }

    /// Publishes the full snapshot for `run`, label included.
    fn publish(&self, run: &RunState) {
        let snapshot = TimerSnapshot {
            tick_ms: run.remaining_ms,
            total_ms: run.total_ms,
            label: format_hh_mm_ss(run.remaining_ms),
            progress_offset: progress_offset(run.remaining_ms, run.total_ms),
            selected_option_label: run.option_label.clone(),
            selected_app: run.selected_app.clone(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }

    /// Records one tick of run `generation`; `false` when that run has been superseded.
    fn tick(&self, generation: u64, remaining_ms: u64) -> bool {
        let mut run = self.lock();
        if run.generation != generation {
            return false;
        }
        run.remaining_ms = remaining_ms;
        let total_ms = run.total_ms;
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.tick_ms = remaining_ms;
            snapshot.total_ms = total_ms;
            snapshot.progress_offset = progress_offset(remaining_ms, total_ms);
            if remaining_ms % 1_000 == 0 {
                snapshot.label = format_hh_mm_ss(remaining_ms);
            }
        });
        true
    }

    fn finish(&self, generation: u64) {
        let mut run = self.lock();
        if run.generation != generation || !self.state().is_active() {
            return;
        }
        run.task = None;
        info!(total_ms = run.total_ms, "timer finished");
        self.set_state(TimerState::Finished);
    }
}

/// `1 - remaining / total` clamped to `[0, 1]`; 1 means fully elapsed.
pub fn progress_offset(remaining_ms: u64, total_ms: u64) -> f32 {
    if total_ms == 0 {
        return if remaining_ms == 0 { 1.0 } else { 0.0 };
    }
    (1.0 - remaining_ms as f64 / total_ms as f64).clamp(0.0, 1.0) as f32
}

async fn run_ticks(shared: Arc<Shared>, generation: u64, length_ms: u64) {
    let mut ticker = interval_at(Instant::now() + TICK, TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut remaining_ms = length_ms;
    while remaining_ms > 0 {
        ticker.tick().await;
        remaining_ms = remaining_ms.saturating_sub(TICK_MS);
        if !shared.tick(generation, remaining_ms) {
            return;
        }
    }
    tokio::time::sleep(FINISH_GRACE).await;
    shared.finish(generation);
}

/// The countdown behind the timer screen. Operations are synchronous; the ticking happens on
/// a task spawned onto the runtime handed to [`TimerEngine::new`].
pub struct TimerEngine {
    shared: Arc<Shared>,
    runtime: Handle,
    add_time_step_ms: u64,
}

impl TimerEngine {
    pub fn new(runtime: Handle, settings: &TimerSettings) -> Self {
        let (state_tx, _) = watch::channel(TimerState::Stopped);
        let (snapshot_tx, _) = watch::channel(TimerSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                run: Mutex::new(RunState::default()),
                state_tx,
                snapshot_tx,
            }),
            runtime,
            add_time_step_ms: settings.add_time_step_ms,
        }
    }

    pub fn state(&self) -> TimerState {
        self.shared.state()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        self.shared.snapshot_tx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TimerState> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<TimerSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Aborts the current tick task and invalidates any tick it may still deliver.
    fn cancel_run(run: &mut RunState) {
        run.generation = run.generation.wrapping_add(1);
        if let Some(task) = run.task.take() {
            task.abort();
        }
    }

    /// Starts ticking down from `length_ms`, publishing the first tick right away.
    fn begin_run(&self, run: &mut RunState, length_ms: u64) {
        Self::cancel_run(run);
        run.remaining_ms = length_ms;
        self.shared.publish(run);
        let generation = run.generation;
        run.task = Some(
            self.runtime
                .spawn(run_ticks(Arc::clone(&self.shared), generation, length_ms)),
        );
    }

    /// Arms `option` without ticking; [`Self::start`] or [`Self::select_app`] starts it.
    pub fn select_time(&self, option: &TimeOption) {
        let mut run = self.shared.lock();
        Self::cancel_run(&mut run);
        run.remaining_ms = option.duration_ms;
        run.total_ms = option.duration_ms;
        run.option_label = option.label.clone();
        run.selected_app = None;
        self.shared.publish(&run);
        self.shared.set_state(TimerState::Stopped);
        info!(duration_ms = option.duration_ms, label = %option.label, "time selected");
    }

    pub fn start(&self) {
        self.start_run(None);
    }

    /// Pairs `package` with the armed timer and starts it.
    pub fn select_app(&self, package: &str) {
        self.start_run(Some(package.to_string()));
    }

    fn start_run(&self, package: Option<String>) {
        let mut run = self.shared.lock();
        if run.remaining_ms == 0 {
            warn!("no time selected, ignoring start");
            return;
        }
        if package.is_some() {
            run.selected_app = package;
        }
        let length_ms = run.remaining_ms;
        self.begin_run(&mut run, length_ms);
        self.shared.set_state(TimerState::Started);
    }

    pub fn toggle_play_pause(&self) {
        let mut run = self.shared.lock();
        match self.shared.state() {
            TimerState::Started if run.remaining_ms > 0 => {
                Self::cancel_run(&mut run);
                self.shared.set_state(TimerState::Paused);
            }
            TimerState::Paused if run.remaining_ms > 0 => {
                let length_ms = run.remaining_ms;
                self.begin_run(&mut run, length_ms);
                self.shared.set_state(TimerState::Started);
            }
            state => warn!(state = ?state, remaining_ms = run.remaining_ms, "nothing to pause or resume"),
        }
    }

    pub fn stop_timer_and_reset(&self) {
        let mut run = self.shared.lock();
        Self::cancel_run(&mut run);
        run.remaining_ms = 0;
        run.total_ms = 0;
        run.option_label.clear();
        run.selected_app = None;
        self.shared.snapshot_tx.send_replace(TimerSnapshot::default());
        self.shared.set_state(TimerState::Stopped);
    }

    pub fn add_time(&self, delta_ms: u64) {
        if delta_ms == 0 {
            return;
        }
        let mut run = self.shared.lock();
        match self.shared.state() {
            TimerState::Started => {
                let length_ms = run.remaining_ms.saturating_add(delta_ms);
                run.total_ms = run.total_ms.saturating_add(delta_ms);
                self.begin_run(&mut run, length_ms);
            }
            TimerState::Paused => {
                run.remaining_ms = run.remaining_ms.saturating_add(delta_ms);
                run.total_ms = run.total_ms.saturating_add(delta_ms);
                self.shared.publish(&run);
            }
            TimerState::Finished => {
                run.total_ms = delta_ms;
                run.option_label = ADDED_TIME_LABEL.to_string();
                self.begin_run(&mut run, delta_ms);
                self.shared.set_state(TimerState::Started);
            }
            TimerState::Stopped => {
                warn!(delta_ms, "no running timer to add time to");
                return;
            }
        }
        info!(delta_ms, remaining_ms = run.remaining_ms, total_ms = run.total_ms, "time added");
    }

    /// The "+1 min" button.
    pub fn add_default_time(&self) {
        self.add_time(self.add_time_step_ms);
    }
}

impl Drop for TimerEngine {
    fn drop(&mut self) {
        let mut run = self.shared.lock();
        Self::cancel_run(&mut run);
    }
}
