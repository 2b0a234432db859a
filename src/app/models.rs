use serde::{Deserialize, Serialize};

/// Connectivity of the local ADB shell session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Ready,
    Failed(String),
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    #[default]
    Stopped,
    Started,
    Paused,
    Finished,
}

impl TimerState {
    /// Whether a countdown is in progress (running or frozen).
    pub fn is_active(self) -> bool {
        !matches!(self, TimerState::Stopped | TimerState::Finished)
    }
}

/// Everything a timer surface renders, recomputed on every tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TimerSnapshot {
    pub tick_ms: u64,
    pub total_ms: u64,
    pub label: String,
    /// 0.0 = nothing elapsed, 1.0 = fully elapsed.
    pub progress_offset: f32,
    pub selected_option_label: String,
    pub selected_app: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeOption {
    #[serde(rename = "time")]
    pub display_time: String,
    pub label: String,
    #[serde(rename = "timeInMillis")]
    pub duration_ms: u64,
}

impl TimeOption {
    pub fn new(display_time: impl Into<String>, label: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            display_time: display_time.into(),
            label: label.into(),
            duration_ms,
        }
    }
}

/// Top-level navigation target derived from connectivity and timer status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HomeState {
    Connecting,
    TimeSelection,
    Timer,
    Failed,
}

/// One line of `adb devices` output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceEntry {
    pub serial: String,
    pub state: Option<String>,
}
