use crate::errors::{Error, Result};
use crate::model::{PumpState, Readings};
use serde_json::Value;

pub const TEMPERATURE: &str = "temperature";
pub const HUMIDITY: &str = "humidity";
pub const SOIL_MOISTURE: &str = "soilMoisture";
pub const TANK_WATER_LEVEL: &str = "tankWaterLevel";
pub const BATTERY_LEVEL: &str = "batteryLevel";
pub const PUMP_STATE: &str = "pumpState";

/// Keys the device publishes and the dashboard understands.
pub const TELEMETRY_KEYS: [&str; 6] = [
    TEMPERATURE,
    HUMIDITY,
    SOIL_MOISTURE,
    TANK_WATER_LEVEL,
    BATTERY_LEVEL,
    PUMP_STATE,
];

/// Readings carried by one frame. `None` means the key was absent or its value
/// did not parse; either way the previous reading stays.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryUpdate {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub soil_moisture: Option<f64>,
    pub tank_water_level: Option<f64>,
    pub battery_level: Option<f64>,
    pub pump_on: Option<bool>,
}

impl TelemetryUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Sparse merge into the current readings.
    pub fn apply(&self, readings: &mut Readings) {
        if let Some(v) = self.temperature {
            readings.temperature = v;
        }
        if let Some(v) = self.humidity {
            readings.humidity = v;
        }
        if let Some(v) = self.soil_moisture {
            readings.soil_moisture = v;
        }
        if let Some(v) = self.tank_water_level {
            readings.tank_water_level = v;
        }
        if let Some(v) = self.battery_level {
            readings.battery_level = v;
        }
        // Telemetry is authoritative and always replaces a provisional toggle
        if let Some(on) = self.pump_on {
            readings.pump = PumpState::confirmed(on);
        }
    }
}

/// Decodes a push frame of the shape `{"data": {"<key>": [[ts, "value"]], ...}}`.
///
/// Errors only for frames that are not a JSON object with a `data` object;
/// bad individual values are dropped silently.
pub fn decode_frame(text: &str) -> Result<TelemetryUpdate> {
    let frame: Value = serde_json::from_str(text)?;

    let data = frame
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::Validation("frame has no data object".to_string()))?;

    let value_of = |key: &str| data.get(key).and_then(latest_value);

    Ok(TelemetryUpdate {
        temperature: value_of(TEMPERATURE),
        humidity: value_of(HUMIDITY),
        soil_moisture: value_of(SOIL_MOISTURE),
        tank_water_level: value_of(TANK_WATER_LEVEL),
        battery_level: value_of(BATTERY_LEVEL),
        pump_on: value_of(PUMP_STATE).map(|v| v == 1.0),
    })
}

/// First `[ts, value]` pair of a key's entry list.
fn latest_value(entries: &Value) -> Option<f64> {
    let pair = entries.as_array()?.first()?.as_array()?;
    parse_number(pair.get(1)?)
}

/// The platform sends values as strings, some firmware sends bare numbers.
pub(crate) fn parse_number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    parsed.is_finite().then_some(parsed)
}
