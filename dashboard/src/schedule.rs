use crate::errors::{Error, Result};
use crate::metrics::SCHEDULE_PARSE_FAILURES_TOTAL;
use crate::platform::Platform;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Shared attribute holding the serialized schedule list.
pub const SCHEDULES_ATTRIBUTE: &str = "wateringSchedules";

pub const MIN_DURATION_MS: u32 = 5_000;
pub const MAX_DURATION_MS: u32 = 300_000;

const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// A recurring watering run. The field names on the wire are read by the
/// device firmware, so they are fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WateringSchedule {
    pub id: String,
    pub name: String,
    pub hour: u8,
    pub minute: u8,
    /// 1 = Monday .. 7 = Sunday
    #[serde(rename = "daysOfWeek")]
    pub days_of_week: Vec<u8>,
    #[serde(rename = "duration")]
    pub duration_ms: u32,
    #[serde(rename = "isEnabled")]
    pub enabled: bool,
}

impl Default for WateringSchedule {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: "Watering schedule".to_string(),
            hour: 6,
            minute: 0,
            days_of_week: (1..=7).collect(),
            duration_ms: 10_000,
            enabled: true,
        }
    }
}

impl WateringSchedule {
    /// New enabled schedule with a freshly generated id.
    pub fn new(
        name: impl Into<String>,
        hour: u8,
        minute: u8,
        days_of_week: Vec<u8>,
        duration_ms: u32,
    ) -> Self {
        Self {
            name: name.into(),
            hour,
            minute,
            days_of_week,
            duration_ms,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::Validation("Schedule id cannot be empty".to_string()));
        }
        if self.hour > 23 {
            return Err(Error::Validation(format!(
                "Hour {} out of range [0, 23]",
                self.hour
            )));
        }
        if self.minute > 59 {
            return Err(Error::Validation(format!(
                "Minute {} out of range [0, 59]",
                self.minute
            )));
        }
        if self.days_of_week.is_empty() {
            return Err(Error::Validation(
                "Schedule needs at least one weekday".to_string(),
            ));
        }
        for (i, day) in self.days_of_week.iter().enumerate() {
            if !(1..=7).contains(day) {
                return Err(Error::Validation(format!(
                    "Weekday {} out of range [1, 7]",
                    day
                )));
            }
            if self.days_of_week[..i].contains(day) {
                return Err(Error::Validation(format!("Weekday {} repeated", day)));
            }
        }
        if !(MIN_DURATION_MS..=MAX_DURATION_MS).contains(&self.duration_ms) {
            return Err(Error::Validation(format!(
                "Duration {}ms out of range [{}, {}]",
                self.duration_ms, MIN_DURATION_MS, MAX_DURATION_MS
            )));
        }
        Ok(())
    }

    /// `HH:MM`
    pub fn time_string(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }

    pub fn days_string(&self) -> String {
        let mut days = self.days_of_week.clone();
        days.sort_unstable();
        days.dedup();
        if days.len() == 7 {
            return "Every day".to_string();
        }
        days.iter()
            .filter_map(|d| DAY_NAMES.get(usize::from(*d).wrapping_sub(1)))
            .copied()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn list_to_json(schedules: &[WateringSchedule]) -> Result<String> {
    Ok(serde_json::to_string(schedules)?)
}

/// Lenient decode: anything that is not a schedule list yields an empty list.
pub fn list_from_json(json: &str) -> Vec<WateringSchedule> {
    match serde_json::from_str(json) {
        Ok(schedules) => schedules,
        Err(e) => {
            warn!("Ignoring unparseable schedule list: {}", e);
            SCHEDULE_PARSE_FAILURES_TOTAL.inc();
            Vec::new()
        }
    }
}

/// The attribute may come back as the string we stored or already decoded.
fn decode_attribute(value: Value) -> Vec<WateringSchedule> {
    match value {
        Value::String(json) => list_from_json(&json),
        Value::Null => Vec::new(),
        other => serde_json::from_value(other).unwrap_or_else(|e| {
            warn!("Ignoring unparseable schedule attribute: {}", e);
            SCHEDULE_PARSE_FAILURES_TOTAL.inc();
            Vec::new()
        }),
    }
}

/// Client-side cache of the schedule list, written back to the platform as a
/// whole on every change.
///
/// Local operations are serialized by the cache lock, which is held across
/// the remote write. Another client writing the same attribute still wins if
/// it writes last.
pub struct ScheduleStore<P> {
    platform: Arc<P>,
    device_id: String,
    cache: Mutex<Cache>,
}

#[derive(Default)]
struct Cache {
    schedules: Vec<WateringSchedule>,
    /// Set once the list has been read from the platform at least once.
    loaded: bool,
}

impl<P: Platform> ScheduleStore<P> {
    pub fn new(platform: Arc<P>, device_id: impl Into<String>) -> Self {
        Self {
            platform,
            device_id: device_id.into(),
            cache: Mutex::new(Cache::default()),
        }
    }

    pub async fn list(&self) -> Vec<WateringSchedule> {
        self.cache.lock().await.schedules.clone()
    }

    /// Reloads the list from the platform. Never fails: a missing or
    /// unparseable attribute is an empty list, and a failed request keeps
    /// whatever was cached before.
    pub async fn fetch(&self, token: &str) -> Vec<WateringSchedule> {
        let mut cache = self.cache.lock().await;

        match self.load(token).await {
            Ok(schedules) => {
                debug!("Fetched {} watering schedules", schedules.len());
                cache.schedules = schedules;
                cache.loaded = true;
            }
            Err(e) => {
                warn!(
                    "Failed to fetch watering schedules, keeping {} cached: {}",
                    cache.schedules.len(),
                    e
                );
            }
        }
        cache.schedules.clone()
    }

    /// Reads the attribute. Only the request itself can fail.
    async fn load(&self, token: &str) -> Result<Vec<WateringSchedule>> {
        let entries = self
            .platform
            .shared_attributes(token, &self.device_id, &[SCHEDULES_ATTRIBUTE])
            .await?;
        Ok(entries
            .into_iter()
            .find(|entry| entry.key == SCHEDULES_ATTRIBUTE)
            .map(|entry| decode_attribute(entry.value))
            .unwrap_or_default())
    }

    pub async fn add(&self, token: &str, schedule: WateringSchedule) -> Result<Vec<WateringSchedule>> {
        schedule.validate()?;
        info!("Adding watering schedule {} ({})", schedule.name, schedule.id);
        self.modify(token, |list| {
            list.push(schedule);
            Ok(())
        })
        .await
    }

    pub async fn update(
        &self,
        token: &str,
        schedule: WateringSchedule,
    ) -> Result<Vec<WateringSchedule>> {
        schedule.validate()?;
        info!("Updating watering schedule {}", schedule.id);
        self.modify(token, |list| {
            let slot = list
                .iter_mut()
                .find(|s| s.id == schedule.id)
                .ok_or_else(|| Error::ScheduleNotFound(schedule.id.clone()))?;
            *slot = schedule;
            Ok(())
        })
        .await
    }

    pub async fn delete(&self, token: &str, id: &str) -> Result<Vec<WateringSchedule>> {
        info!("Deleting watering schedule {}", id);
        self.modify(token, |list| {
            let before = list.len();
            list.retain(|s| s.id != id);
            if list.len() == before {
                return Err(Error::ScheduleNotFound(id.to_string()));
            }
            Ok(())
        })
        .await
    }

    pub async fn toggle_enabled(
        &self,
        token: &str,
        id: &str,
        enabled: bool,
    ) -> Result<Vec<WateringSchedule>> {
        debug!("Setting watering schedule {} enabled={}", id, enabled);
        self.modify(token, |list| {
            let slot = list
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| Error::ScheduleNotFound(id.to_string()))?;
            slot.enabled = enabled;
            Ok(())
        })
        .await
    }

    /// Applies `op` to a copy of the cached list, writes the whole list and
    /// commits the copy only once the write succeeded.
    ///
    /// The whole attribute is overwritten, so a list that was never read
    /// is loaded first. If that read fails nothing is written.
    async fn modify<F>(&self, token: &str, op: F) -> Result<Vec<WateringSchedule>>
    where
        F: FnOnce(&mut Vec<WateringSchedule>) -> Result<()>,
    {
        let mut cache = self.cache.lock().await;

        if !cache.loaded {
            debug!("Schedule list not loaded yet, reading it before writing");
            cache.schedules = self.load(token).await?;
            cache.loaded = true;
        }

        let mut next = cache.schedules.clone();
        op(&mut next)?;

        let mut attributes = Map::new();
        attributes.insert(
            SCHEDULES_ATTRIBUTE.to_string(),
            Value::String(list_to_json(&next)?),
        );
        self.platform
            .save_shared_attributes(token, &self.device_id, &Value::Object(attributes))
            .await?;

        cache.schedules = next.clone();
        Ok(next)
    }
}
