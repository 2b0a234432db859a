use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::app::models::{ConnectionState, HomeState, TimerState};

/// Where the app should be, given connectivity and the timer.
pub fn derive_home_state(connection: &ConnectionState, timer: TimerState) -> HomeState {
    match connection {
        ConnectionState::Idle | ConnectionState::Connecting => HomeState::Connecting,
        ConnectionState::Failed(_) => HomeState::Failed,
        ConnectionState::Ready if timer.is_active() => HomeState::Timer,
        ConnectionState::Ready => HomeState::TimeSelection,
    }
}

/// Republishes [`derive_home_state`] whenever either input changes.
pub struct HomeStateWatcher {
    rx: watch::Receiver<HomeState>,
    handle: JoinHandle<()>,
}

impl HomeStateWatcher {
    pub fn spawn(
        mut connection: watch::Receiver<ConnectionState>,
        mut timer: watch::Receiver<TimerState>,
    ) -> Self {
        let initial = derive_home_state(&connection.borrow_and_update(), *timer.borrow_and_update());
        let (tx, rx) = watch::channel(initial);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = connection.changed() => if changed.is_err() { break },
                    changed = timer.changed() => if changed.is_err() { break },
                }
                let home = derive_home_state(&connection.borrow_and_update(), *timer.borrow_and_update());
                tx.send_if_modified(|current| {
                    if *current != home {
                        debug!(from = ?current, to = ?home, "home state changed");
                        *current = home;
                        true
                    } else {
                        false
                    }
                });
            }
        });
        Self { rx, handle }
    }

    pub fn current(&self) -> HomeState {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HomeState> {
        self.rx.clone()
    }
}

impl Drop for HomeStateWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
