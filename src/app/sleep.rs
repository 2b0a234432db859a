//! What happens around the end of a countdown: the sleep command and the overlay.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::config::{OverlaySettings, TimerSettings};
use crate::app::models::{TimerSnapshot, TimerState};
use crate::app::shell::ShellSession;
use crate::app::store::{KeyValueStore, SHOW_REVIEW_KEY};

/// Puts the device to sleep each time the timer transitions into `Finished`.
pub struct SleepTrigger {
    handle: JoinHandle<()>,
}

impl SleepTrigger {
    pub fn spawn(
        session: Arc<ShellSession>,
        mut timer_state: watch::Receiver<TimerState>,
        store: Arc<dyn KeyValueStore>,
        sleep_command: String,
    ) -> Self {
        // Read before spawning so a finish that lands before the first poll still counts.
        let mut previous = *timer_state.borrow_and_update();
        let handle = tokio::spawn(async move {
            while timer_state.changed().await.is_ok() {
                let state = *timer_state.borrow_and_update();
                if state == TimerState::Finished && previous != TimerState::Finished {
                    put_to_sleep(&session, store.as_ref(), &sleep_command).await;
                }
                previous = state;
            }
        });
        Self { handle }
    }
}

impl Drop for SleepTrigger {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn put_to_sleep(session: &ShellSession, store: &dyn KeyValueStore, sleep_command: &str) {
    match session.try_send_to_shell_process(sleep_command).await {
        Ok(true) => info!(command = sleep_command, "timer finished, putting device to sleep"),
        Ok(false) => warn!(command = sleep_command, "timer finished but no shell is running"),
        Err(err) => warn!(command = sleep_command, error = %err, "failed to send sleep command"),
    }
    if let Err(err) = store.set_bool(SHOW_REVIEW_KEY, true) {
        warn!(error = %err, "failed to persist review flag");
    }
}

struct OverlayShared {
    visible_tx: watch::Sender<bool>,
    auto_hide: Mutex<Option<JoinHandle<()>>>,
    auto_hide_after: Duration,
    runtime: Handle,
}

impl OverlayShared {
    fn cancel_auto_hide(&self) {
        if let Ok(mut guard) = self.auto_hide.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }

    fn set_visible(&self, visible: bool) {
        self.visible_tx.send_if_modified(|current| {
            if *current != visible {
                debug!(visible, "overlay visibility changed");
                *current = visible;
                true
            } else {
                false
            }
        });
    }

    fn show(self: &Arc<Self>, auto_hide: bool) {
        self.cancel_auto_hide();
        self.set_visible(true);
        if !auto_hide {
            return;
        }
        let shared = Arc::clone(self);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(shared.auto_hide_after).await;
            shared.set_visible(false);
        });
        if let Ok(mut guard) = self.auto_hide.lock() {
            *guard = Some(task);
        }
    }

    fn hide(&self) {
        self.cancel_auto_hide();
        self.set_visible(false);
    }
}

/// Decides when the countdown overlay floats above other apps.
pub struct OverlayCoordinator {
    shared: Arc<OverlayShared>,
    timer_state: watch::Receiver<TimerState>,
    final_minute: JoinHandle<()>,
}

impl OverlayCoordinator {
    pub fn spawn(
        runtime: Handle,
        overlay: &OverlaySettings,
        timer: &TimerSettings,
        timer_state: watch::Receiver<TimerState>,
        snapshots: watch::Receiver<TimerSnapshot>,
    ) -> Self {
        let (visible_tx, _) = watch::channel(false);
        let shared = Arc::new(OverlayShared {
            visible_tx,
            auto_hide: Mutex::new(None),
            auto_hide_after: Duration::from_millis(overlay.auto_hide_ms),
            runtime: runtime.clone(),
        });
        let final_minute = runtime.spawn(watch_final_minute(
            Arc::clone(&shared),
            timer_state.clone(),
            snapshots,
            timer.final_minute_ms,
        ));
        Self {
            shared,
            timer_state,
            final_minute,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shared.visible_tx.subscribe()
    }

    pub fn is_visible(&self) -> bool {
        *self.shared.visible_tx.borrow()
    }

    fn timer_running(&self) -> bool {
        *self.timer_state.borrow() == TimerState::Started
    }

    /// The paired app went to the background while the timer runs.
    pub fn on_app_background(&self) {
        if self.timer_running() {
            self.shared.show(true);
        }
    }

    pub fn on_app_foreground(&self) {
        if self.timer_running() {
            self.shared.hide();
        }
    }

    /// Shows the overlay for the auto-hide period.
    pub fn show(&self) {
        self.shared.show(true);
    }

    pub fn hide(&self) {
        self.shared.hide();
    }
}

impl Drop for OverlayCoordinator {
    fn drop(&mut self) {
        self.final_minute.abort();
        self.shared.cancel_auto_hide();
    }
}

async fn watch_final_minute(
    shared: Arc<OverlayShared>,
    mut timer_state: watch::Receiver<TimerState>,
    mut snapshots: watch::Receiver<TimerSnapshot>,
    final_minute_ms: u64,
) {
    let mut in_final_minute = false;
    loop {
        tokio::select! {
            changed = timer_state.changed() => if changed.is_err() { break },
            changed = snapshots.changed() => if changed.is_err() { break },
        }
        let state = *timer_state.borrow_and_update();
        let tick_ms = snapshots.borrow_and_update().tick_ms;
        let now_in_window = state == TimerState::Started && tick_ms > 0 && tick_ms <= final_minute_ms;
        if now_in_window && !in_final_minute {
            info!(tick_ms, "final minute, pinning overlay");
            shared.show(false);
        }
        in_final_minute = now_in_window;
    }
}
