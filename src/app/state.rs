use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::info;

use crate::app::adb::discovery::DiscoveryState;
use crate::app::adb::settings::{InMemorySettings, SettingsCli, SystemSettings, ADB_ENABLED};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::home::HomeStateWatcher;
use crate::app::shell::ShellSession;
use crate::app::sleep::{OverlayCoordinator, SleepTrigger};
use crate::app::store::{JsonFileStore, KeyValueStore};
use crate::app::timer::{TimeOptionStore, TimerEngine};

/// Every long-lived service, built once and shared with whatever drives the app.
pub struct AppState {
    pub config: AppConfig,
    pub session: Arc<ShellSession>,
    pub discovery: Arc<DiscoveryState>,
    pub timer: Arc<TimerEngine>,
    pub time_options: TimeOptionStore,
    pub store: Arc<dyn KeyValueStore>,
    pub home: HomeStateWatcher,
    pub overlay: OverlayCoordinator,
    _sleep_trigger: SleepTrigger,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl AppState {
    /// Wires the real collaborators: the `settings` binary (or host defaults) and the JSON
    /// preferences file.
    pub fn new(config: AppConfig, runtime: Handle) -> Result<Self, AppError> {
        let settings: Arc<dyn SystemSettings> = if config.bootstrap.use_device_settings {
            Arc::new(SettingsCli::new(config.shell.package_name.clone()))
        } else {
            Arc::new(InMemorySettings::new(false).with_value(ADB_ENABLED, 1))
        };
        let store = Arc::new(JsonFileStore::open(config.resolved_store_path())?);
        Self::with_collaborators(config, runtime, settings, Arc::new(DiscoveryState::new()), store)
    }

    pub fn with_collaborators(
        config: AppConfig,
        runtime: Handle,
        settings: Arc<dyn SystemSettings>,
        discovery: Arc<DiscoveryState>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, AppError> {
        let _entered = runtime.enter();

        let session = Arc::new(ShellSession::new(&config, settings, discovery.clone())?);
        let timer = Arc::new(TimerEngine::new(runtime.clone(), &config.timer));
        let time_options = TimeOptionStore::load(Arc::clone(&store))?;
        let home = HomeStateWatcher::spawn(session.subscribe(), timer.subscribe_state());
        let overlay = OverlayCoordinator::spawn(
            runtime.clone(),
            &config.overlay,
            &config.timer,
            timer.subscribe_state(),
            timer.subscribe_snapshot(),
        );
        let sleep_trigger = SleepTrigger::spawn(
            Arc::clone(&session),
            timer.subscribe_state(),
            Arc::clone(&store),
            config.sleep.sleep_command.clone(),
        );

        Ok(Self {
            config,
            session,
            discovery,
            timer,
            time_options,
            store,
            home,
            overlay,
            _sleep_trigger: sleep_trigger,
            supervisor: Mutex::new(None),
        })
    }

    /// Bootstraps the shell; the first success also starts death supervision.
    pub async fn connect(&self) -> bool {
        let ready = self.session.init_server().await;
        if ready {
            if let Ok(mut supervisor) = self.supervisor.lock() {
                if supervisor.is_none() {
                    info!("starting shell supervisor");
                    *supervisor = Some(self.session.spawn_supervisor());
                }
            }
        }
        ready
    }

    pub fn is_supervised(&self) -> bool {
        self.supervisor
            .lock()
            .map(|supervisor| supervisor.is_some())
            .unwrap_or(false)
    }

    pub async fn shutdown(&self) {
        if let Ok(mut supervisor) = self.supervisor.lock() {
            if let Some(task) = supervisor.take() {
                task.abort();
            }
        }
        self.timer.stop_timer_and_reset();
        self.session.shutdown().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::app::models::{ConnectionState, HomeState, TimeOption, TimerState};
    use crate::app::shell::bootstrap::tests::FakeAdb;
    use crate::app::store::{MemoryStore, SHOW_REVIEW_KEY};

    fn state(adb: &FakeAdb) -> AppState {
        let mut config = adb.config();
        config.sleep.sleep_command = "echo sleeping now".to_string();
        AppState::with_collaborators(
            config,
            Handle::current(),
            Arc::new(InMemorySettings::new(true).with_value(ADB_ENABLED, 1)),
            Arc::new(DiscoveryState::new()),
            Arc::new(MemoryStore::new()),
        )
        .expect("state")
    }

    #[tokio::test]
    async fn connect_drives_navigation_and_starts_supervision() {
        let adb = FakeAdb::install("connected");
        let app = state(&adb);
        assert_eq!(app.home.current(), HomeState::Connecting);
        assert!(!app.is_supervised());

        assert!(app.connect().await);
        assert!(app.is_supervised());
        let mut home = app.home.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            home.wait_for(|state| *state == HomeState::TimeSelection),
        )
        .await
        .expect("time selection")
        .expect("open");

        let options = app.time_options.options();
        app.timer.select_time(&options[0]);
        app.timer.start();
        tokio::time::timeout(Duration::from_secs(5), home.wait_for(|state| *state == HomeState::Timer))
            .await
            .expect("timer screen")
            .expect("open");

        app.shutdown().await;
        assert_eq!(app.session.state(), ConnectionState::Idle);
        assert_eq!(app.timer.state(), TimerState::Stopped);
        assert!(!app.is_supervised());
    }

    #[tokio::test]
    async fn finished_timer_reaches_the_shell() {
        let adb = FakeAdb::install("connected");
        let app = state(&adb);
        assert!(app.connect().await);

        let option = app.time_options.add_custom(1).expect("custom");
        app.timer.select_time(&option);
        app.timer.start();
        app.timer.stop_timer_and_reset();
        assert_eq!(app.store.get_bool(SHOW_REVIEW_KEY), None);

        let mut states = app.timer.subscribe_state();
        app.timer.select_time(&TimeOption::new("1 s", "Custom", 1_000));
        app.timer.start();
        tokio::time::timeout(
            Duration::from_secs(10),
            states.wait_for(|state| *state == TimerState::Finished),
        )
        .await
        .expect("finished")
        .expect("open");

        let mut output = String::new();
        for _ in 0..200 {
            output = app.session.read_output();
            if output.contains("sleeping now") && app.store.get_bool(SHOW_REVIEW_KEY).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(output.contains("sleeping now"), "output was {output:?}");
        assert_eq!(app.store.get_bool(SHOW_REVIEW_KEY), Some(true));
        app.shutdown().await;
    }
}
