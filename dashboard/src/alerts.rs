use crate::metrics::ALERTS_EMITTED_TOTAL;
use crate::model::Readings;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Minimum time between two notifications of the same kind (5 minutes).
pub const ALERT_COOLDOWN_MS: i64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    SoilMoistureLow,
    WaterLevelLow,
    TemperatureHigh,
    TemperatureLow,
    BatteryLow,
}

impl AlertKind {
    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::SoilMoistureLow => "Soil moisture low",
            AlertKind::WaterLevelLow => "Water level low",
            AlertKind::TemperatureHigh => "Temperature too high",
            AlertKind::TemperatureLow => "Temperature too low",
            AlertKind::BatteryLow => "Battery low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAlert {
    pub enabled: bool,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureAlert {
    pub enabled: bool,
    pub min: f64,
    pub max: f64,
}

/// User-configurable alert settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub soil_moisture: ThresholdAlert,
    pub water_level: ThresholdAlert,
    pub temperature: TemperatureAlert,
    pub battery: ThresholdAlert,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            soil_moisture: ThresholdAlert {
                enabled: true,
                threshold: 30.0,
            },
            water_level: ThresholdAlert {
                enabled: true,
                threshold: 20.0,
            },
            temperature: TemperatureAlert {
                enabled: true,
                min: 15.0,
                max: 40.0,
            },
            battery: ThresholdAlert {
                enabled: true,
                threshold: 20.0,
            },
        }
    }
}

/// A breach worth telling the user about.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub value: f64,
    pub threshold: f64,
    pub at_ms: i64,
}

impl AlertEvent {
    pub fn title(&self) -> &'static str {
        self.kind.title()
    }

    pub fn message(&self) -> String {
        match self.kind {
            AlertKind::SoilMoistureLow => format!(
                "Soil moisture is {:.0}%, below the {:.0}% threshold. The plants may need watering.",
                self.value, self.threshold
            ),
            AlertKind::WaterLevelLow => format!(
                "Tank water level is {:.0}%, below the {:.0}% threshold. Please refill the tank.",
                self.value, self.threshold
            ),
            AlertKind::TemperatureHigh => format!(
                "Temperature is {:.1}°C, above the {:.1}°C threshold.",
                self.value, self.threshold
            ),
            AlertKind::TemperatureLow => format!(
                "Temperature is {:.1}°C, below the {:.1}°C threshold.",
                self.value, self.threshold
            ),
            AlertKind::BatteryLow => format!(
                "Battery is at {:.0}%, below the {:.0}% threshold. Please charge or replace it.",
                self.value, self.threshold
            ),
        }
    }
}

/// Delivery side of alerting, e.g. OS notifications or a log line.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &AlertEvent);
}

/// Writes alerts to the log; the default when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &AlertEvent) {
        warn!("{}: {}", event.title(), event.message());
    }
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Every kind currently in breach, whether or not it was notified.
    pub active: BTreeSet<AlertKind>,
    /// Kinds whose cooldown allowed a notification this pass.
    pub events: Vec<AlertEvent>,
}

/// Threshold checks plus the per-kind cooldown table.
#[derive(Debug, Default)]
pub struct AlertEvaluator {
    last_notified: HashMap<AlertKind, i64>,
}

impl AlertEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &mut self,
        readings: &Readings,
        thresholds: &AlertThresholds,
        now_ms: i64,
    ) -> Evaluation {
        let breaches = breaches(readings, thresholds);

        let mut evaluation = Evaluation::default();
        for (kind, value, threshold) in breaches {
            evaluation.active.insert(kind);

            let due = self
                .last_notified
                .get(&kind)
                .map_or(true, |last| now_ms - last >= ALERT_COOLDOWN_MS);
            if !due {
                debug!("Alert {:?} still cooling down", kind);
                continue;
            }

            self.last_notified.insert(kind, now_ms);
            ALERTS_EMITTED_TOTAL.inc();
            evaluation.events.push(AlertEvent {
                kind,
                value,
                threshold,
                at_ms: now_ms,
            });
        }

        evaluation
    }

    pub fn last_notified(&self, kind: AlertKind) -> Option<i64> {
        self.last_notified.get(&kind).copied()
    }
}

/// Every kind in breach with the reading and the threshold it crossed.
fn breaches(readings: &Readings, t: &AlertThresholds) -> Vec<(AlertKind, f64, f64)> {
    let mut found = Vec::new();

    if t.soil_moisture.enabled && readings.soil_moisture < t.soil_moisture.threshold {
        found.push((
            AlertKind::SoilMoistureLow,
            readings.soil_moisture,
            t.soil_moisture.threshold,
        ));
    }

    if t.water_level.enabled && readings.tank_water_level < t.water_level.threshold {
        found.push((
            AlertKind::WaterLevelLow,
            readings.tank_water_level,
            t.water_level.threshold,
        ));
    }

    if t.temperature.enabled {
        if readings.temperature > t.temperature.max {
            found.push((
                AlertKind::TemperatureHigh,
                readings.temperature,
                t.temperature.max,
            ));
        }
        if readings.temperature < t.temperature.min {
            found.push((
                AlertKind::TemperatureLow,
                readings.temperature,
                t.temperature.min,
            ));
        }
    }

    // A level of exactly 0 means the board has no battery sensor
    if t.battery.enabled
        && readings.battery_level > 0.0
        && readings.battery_level < t.battery.threshold
    {
        found.push((
            AlertKind::BatteryLow,
            readings.battery_level,
            t.battery.threshold,
        ));
    }

    found
}
