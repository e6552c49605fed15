use crate::alerts::{AlertKind, AlertThresholds};
use crate::schedule::WateringSchedule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Latest known value of every sensor the garden controller reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Readings {
    pub temperature: f64,
    pub humidity: f64,
    pub soil_moisture: f64,
    pub tank_water_level: f64,
    pub battery_level: f64,
    pub pump: PumpState,
}

/// Pump on/off as last seen.
///
/// `pending` is set when the value was assumed locally after a toggle and no
/// telemetry frame has confirmed it yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpState {
    pub on: bool,
    pub pending: bool,
}

impl PumpState {
    pub fn confirmed(on: bool) -> Self {
        Self { on, pending: false }
    }

    pub fn provisional(on: bool) -> Self {
        Self { on, pending: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// One point of a chart series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub ts: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistorySource {
    #[default]
    Platform,
    /// Synthetic data generated locally because the platform had nothing to give.
    Placeholder,
}

/// Ascending-by-timestamp series, replaced wholesale on every fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistorySeries {
    pub points: Vec<HistoryPoint>,
    pub source: HistorySource,
}

/// Snapshot of everything the dashboard shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppState {
    pub readings: Readings,
    pub connection: ConnectionStatus,
    pub temperature_history: HistorySeries,
    pub humidity_history: HistorySeries,
    pub thresholds: AlertThresholds,
    pub active_alerts: BTreeSet<AlertKind>,
    pub schedules: Vec<WateringSchedule>,
}

/// Login body for the platform auth endpoint. No `Debug` so the password never
/// ends up in a log line.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}
