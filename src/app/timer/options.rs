use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::app::error::AppError;
use crate::app::models::TimeOption;
use crate::app::store::{KeyValueStore, TIME_OPTIONS_KEY};

const MINUTE_MS: u64 = 60_000;
pub const CUSTOM_LABEL: &str = "Custom";

pub fn default_time_options() -> Vec<TimeOption> {
    vec![
        TimeOption::new("15 Minutes", "Short distraction", 15 * MINUTE_MS),
        TimeOption::new("30 Minutes", "Short distraction", 30 * MINUTE_MS),
        TimeOption::new("45 Minutes", "Short distraction", 45 * MINUTE_MS),
        TimeOption::new("1 Hour", "1 hour of peace", 60 * MINUTE_MS),
        TimeOption::new("1.5 Hours", "Movie", 90 * MINUTE_MS),
        TimeOption::new("2 Hours", "Long Movie", 120 * MINUTE_MS),
        TimeOption::new("3 Hours", "Long Movie", 180 * MINUTE_MS),
    ]
}

/// The selectable durations, persisted as a JSON list under `time_options`.
pub struct TimeOptionStore {
    store: Arc<dyn KeyValueStore>,
    options: Mutex<Vec<TimeOption>>,
}

impl TimeOptionStore {
    /// Loads the persisted list, seeding the defaults when nothing (or garbage) is stored.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, AppError> {
        let persisted = store
            .get(TIME_OPTIONS_KEY)
            .and_then(|value| match serde_json::from_value::<Vec<TimeOption>>(value) {
                Ok(options) => Some(options),
                Err(err) => {
                    warn!(error = %err, "stored time options are unreadable, using defaults");
                    None
                }
            });
        let options = match persisted {
            Some(options) => options,
            None => {
                let defaults = default_time_options();
                persist(store.as_ref(), &defaults)?;
                defaults
            }
        };
        Ok(Self {
            store,
            options: Mutex::new(options),
        })
    }

    pub fn options(&self) -> Vec<TimeOption> {
        self.options
            .lock()
            .map(|options| options.clone())
            .unwrap_or_default()
    }

    /// Puts a `"<n> min"` custom entry at the top of the list.
    pub fn add_custom(&self, minutes: u64) -> Result<TimeOption, AppError> {
        if minutes == 0 {
            return Err(AppError::validation("Custom time must be at least one minute", ""));
        }
        let duration_ms = minutes
            .checked_mul(MINUTE_MS)
            .ok_or_else(|| AppError::validation(format!("Custom time of {minutes} min is too long"), ""))?;
        let option = TimeOption::new(format!("{minutes} min"), CUSTOM_LABEL, duration_ms);
        self.update(|options| options.insert(0, option.clone()))?;
        Ok(option)
    }

    pub fn delete(&self, option: &TimeOption) -> Result<(), AppError> {
        self.update(|options| options.retain(|candidate| candidate != option))
    }

    fn update<F: FnOnce(&mut Vec<TimeOption>)>(&self, change: F) -> Result<(), AppError> {
        let mut options = self
            .options
            .lock()
            .map_err(|_| AppError::system("time options lock poisoned", ""))?;
        change(&mut *options);
        persist(self.store.as_ref(), &options)
    }
}

fn persist(store: &dyn KeyValueStore, options: &[TimeOption]) -> Result<(), AppError> {
    let value = serde_json::to_value(options)
        .map_err(|err| AppError::system(format!("Failed to serialize time options: {err}"), ""))?;
    store.set(TIME_OPTIONS_KEY, value)
}
