use crate::codec::parse_number;
use crate::metrics::HISTORY_FALLBACK_TOTAL;
use crate::model::{HistoryPoint, HistorySeries, HistorySource};
use crate::platform::{Platform, TimeseriesQuery, TimeseriesResponse};
use std::f64::consts::PI;
use tracing::{debug, warn};

pub const HISTORY_WINDOW_MS: i64 = 7 * 24 * 60 * 60 * 1000;
pub const HISTORY_LIMIT: usize = 100;
pub const PLACEHOLDER_POINTS: usize = 24;
const HOUR_MS: i64 = 60 * 60 * 1000;

/// A charted metric and the key spellings firmware versions have used for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Temperature,
    Humidity,
}

impl Metric {
    /// Candidate keys, most preferred first.
    pub fn key_variants(&self) -> &'static [&'static str] {
        match self {
            Metric::Temperature => &["temperature", "Temperature", "temp"],
            Metric::Humidity => &["humidity", "Humidity", "hum"],
        }
    }

    /// Smooth hourly curve used when there is no real data to chart.
    fn placeholder_value(&self, hour: usize) -> f64 {
        let phase = hour as f64 * PI / 12.0;
        match self {
            Metric::Temperature => 25.0 + 5.0 * phase.sin(),
            Metric::Humidity => 60.0 + 15.0 * phase.cos(),
        }
    }
}

/// Fetched temperature and humidity series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    pub temperature: HistorySeries,
    pub humidity: HistorySeries,
}

/// Loads the trailing seven days of both charted metrics.
///
/// Falls back to [`placeholder_series`] per metric when there is no token, the
/// request fails, or none of the metric's keys has data. The fallback is
/// labelled [`HistorySource::Placeholder`] so callers can tell.
pub async fn fetch_history<P: Platform>(
    platform: &P,
    token: Option<&str>,
    device_id: &str,
    now_ms: i64,
) -> History {
    let response = match token {
        Some(token) => {
            let query = TimeseriesQuery {
                keys: [Metric::Temperature, Metric::Humidity]
                    .iter()
                    .flat_map(|m| m.key_variants().iter().map(|k| k.to_string()))
                    .collect(),
                start_ts: now_ms - HISTORY_WINDOW_MS,
                end_ts: now_ms,
                limit: HISTORY_LIMIT,
            };
            match platform.timeseries(token, device_id, &query).await {
                Ok(response) => Some(response),
                Err(e) => {
                    warn!("History request failed: {}", e);
                    None
                }
            }
        }
        None => {
            debug!("No session token, skipping history request");
            None
        }
    };

    History {
        temperature: resolve(Metric::Temperature, response.as_ref(), now_ms),
        humidity: resolve(Metric::Humidity, response.as_ref(), now_ms),
    }
}

fn resolve(metric: Metric, response: Option<&TimeseriesResponse>, now_ms: i64) -> HistorySeries {
    if let Some(points) = response.and_then(|r| extract_series(r, metric)) {
        return HistorySeries {
            points,
            source: HistorySource::Platform,
        };
    }

    warn!("No {:?} history available, using placeholder data", metric);
    HISTORY_FALLBACK_TOTAL.inc();
    HistorySeries {
        points: placeholder_series(metric, now_ms),
        source: HistorySource::Placeholder,
    }
}

/// Points of the first key variant that has any, sorted by timestamp.
pub fn extract_series(response: &TimeseriesResponse, metric: Metric) -> Option<Vec<HistoryPoint>> {
    metric.key_variants().iter().find_map(|key| {
        let mut points: Vec<HistoryPoint> = response
            .get(*key)?
            .iter()
            .filter_map(|entry| {
                parse_number(&entry.value).map(|value| HistoryPoint {
                    ts: entry.ts,
                    value,
                })
            })
            .collect();
        if points.is_empty() {
            return None;
        }
        debug!("Using history key {} for {:?}", key, metric);
        points.sort_by_key(|p| p.ts);
        Some(points)
    })
}

/// 24 hourly points ending at `now_ms`.
pub fn placeholder_series(metric: Metric, now_ms: i64) -> Vec<HistoryPoint> {
    (0..PLACEHOLDER_POINTS)
        .map(|hour| HistoryPoint {
            ts: now_ms - (PLACEHOLDER_POINTS - 1 - hour) as i64 * HOUR_MS,
            value: metric.placeholder_value(hour),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::TimeseriesEntry;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn entries(points: &[(i64, serde_json::Value)]) -> Vec<TimeseriesEntry> {
        points
            .iter()
            .map(|(ts, value)| TimeseriesEntry {
                ts: *ts,
                value: value.clone(),
            })
            .collect()
    }

    #[test]
    fn test_placeholder_is_hourly_and_ascending() {
        let points = placeholder_series(Metric::Temperature, NOW);
        assert_eq!(points.len(), 24);
        assert_eq!(points.last().unwrap().ts, NOW);
        for pair in points.windows(2) {
            assert_eq!(pair[1].ts - pair[0].ts, HOUR_MS);
        }
        assert!(points.iter().all(|p| (20.0..=30.0).contains(&p.value)));
    }

    #[test]
    fn test_extract_sorts_ascending() {
        let mut response = TimeseriesResponse::new();
        response.insert(
            "temperature".to_string(),
            entries(&[(3, json!("23.0")), (1, json!("21.0")), (2, json!("22.0"))]),
        );

        let points = extract_series(&response, Metric::Temperature).unwrap();
        let ts: Vec<i64> = points.iter().map(|p| p.ts).collect();
        assert_eq!(ts, vec![1, 2, 3]);
        assert_eq!(points[0].value, 21.0);
    }

    #[test]
    fn test_extract_tries_key_variants_in_order() {
        let mut response = TimeseriesResponse::new();
        response.insert("temperature".to_string(), Vec::new());
        response.insert("temp".to_string(), entries(&[(1, json!("19.5"))]));
        response.insert("Humidity".to_string(), entries(&[(1, json!(70))]));
        response.insert("hum".to_string(), entries(&[(1, json!("10"))]));

        let temperature = extract_series(&response, Metric::Temperature).unwrap();
        assert_eq!(temperature, vec![HistoryPoint { ts: 1, value: 19.5 }]);

        let humidity = extract_series(&response, Metric::Humidity).unwrap();
        assert_eq!(humidity, vec![HistoryPoint { ts: 1, value: 70.0 }]);
    }

    #[test]
    fn test_extract_skips_unparseable_points() {
        let mut response = TimeseriesResponse::new();
        response.insert(
            "humidity".to_string(),
            entries(&[(1, json!("oops")), (2, json!("55"))]),
        );
        let points = extract_series(&response, Metric::Humidity).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].ts, 2);
    }

    #[test]
    fn test_extract_nothing_found() {
        assert!(extract_series(&TimeseriesResponse::new(), Metric::Humidity).is_none());
    }

    #[test]
    fn test_resolve_falls_back_per_metric() {
        let mut response = TimeseriesResponse::new();
        response.insert("temperature".to_string(), entries(&[(1, json!("20"))]));

        let temperature = resolve(Metric::Temperature, Some(&response), NOW);
        assert_eq!(temperature.source, HistorySource::Platform);

        let humidity = resolve(Metric::Humidity, Some(&response), NOW);
        assert_eq!(humidity.source, HistorySource::Placeholder);
        assert_eq!(humidity.points.len(), PLACEHOLDER_POINTS);
    }
}
