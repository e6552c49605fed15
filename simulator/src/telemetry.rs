use rand::Rng;
use serde_json::{json, Map, Value};

/// Crude model of the garden the controller sits in.
#[derive(Debug, Clone)]
pub struct Garden {
    pub temperature: f64,
    pub humidity: f64,
    pub soil_moisture: f64,
    pub tank_water_level: f64,
    pub battery_level: f64,
    pub pump_on: bool,
}

impl Default for Garden {
    fn default() -> Self {
        Self {
            temperature: 24.0,
            humidity: 60.0,
            soil_moisture: 45.0,
            tank_water_level: 80.0,
            battery_level: 95.0,
            pump_on: false,
        }
    }
}

impl Garden {
    /// Advances the model by one publish interval.
    pub fn step(&mut self, rng: &mut impl Rng) {
        self.temperature = (self.temperature + rng.gen_range(-0.3..0.3)).clamp(5.0, 45.0);
        self.humidity = (self.humidity + rng.gen_range(-1.0..1.0)).clamp(20.0, 95.0);

        if self.pump_on {
            self.soil_moisture += 2.0;
            self.tank_water_level -= 1.0;
        } else {
            self.soil_moisture -= rng.gen_range(0.0..0.5);
        }
        self.soil_moisture = self.soil_moisture.clamp(0.0, 100.0);

        // Dry tank stops the pump
        if self.tank_water_level <= 0.0 {
            self.tank_water_level = 0.0;
            self.pump_on = false;
        }

        self.battery_level = (self.battery_level - 0.01).max(0.0);
    }

    /// Values as published, with the occasional sensor glitch.
    pub fn readings(&self, rng: &mut impl Rng) -> Vec<(&'static str, f64)> {
        let temperature = if rng.gen_bool(0.05) {
            rng.gen_range(-5.0..50.0) // 5% outliers
        } else {
            self.temperature
        };

        vec![
            ("temperature", temperature),
            ("humidity", self.humidity),
            ("soilMoisture", self.soil_moisture),
            ("tankWaterLevel", self.tank_water_level),
            ("batteryLevel", self.battery_level),
            ("pumpState", if self.pump_on { 1.0 } else { 0.0 }),
        ]
    }

    /// Push frame in the platform's `{"data": {"key": [[ts, "value"]]}}` shape.
    pub fn frame(&self, subscription_id: u32, ts: i64, rng: &mut impl Rng) -> Value {
        let data: Map<String, Value> = self
            .readings(rng)
            .into_iter()
            .map(|(key, value)| (key.to_string(), json!([[ts, format!("{:.1}", value)]])))
            .collect();

        json!({
            "subscriptionId": subscription_id,
            "errorCode": 0,
            "errorMsg": null,
            "data": data,
        })
    }
}

/// Hourly history points for a chartable key, newest first like the platform
/// returns them. Unknown keys have no history.
pub fn history(
    key: &str,
    start_ts: i64,
    end_ts: i64,
    limit: usize,
    rng: &mut impl Rng,
) -> Vec<Value> {
    const HOUR_MS: i64 = 3_600_000;
    let (base, amplitude) = match key {
        "temperature" => (24.0, 4.0),
        "humidity" => (60.0, 12.0),
        _ => return Vec::new(),
    };

    let mut points = Vec::new();
    let mut ts = end_ts - end_ts % HOUR_MS;
    while ts >= start_ts && points.len() < limit {
        let hour_of_day = (ts / HOUR_MS) % 24;
        let phase = hour_of_day as f64 * std::f64::consts::PI / 12.0;
        let value = base + amplitude * phase.sin() + rng.gen_range(-0.5..0.5);
        points.push(json!({ "ts": ts, "value": format!("{:.1}", value) }));
        ts -= HOUR_MS;
    }
    points
}
