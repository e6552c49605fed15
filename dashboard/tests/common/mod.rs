#![allow(dead_code)]

use futures_util::StreamExt;
use garden_dashboard::alerts::{AlertEvent, Notifier};
use garden_dashboard::errors::{Error, Result};
use garden_dashboard::model::Credentials;
use garden_dashboard::platform::{
    AttributeEntry, Platform, RpcRequest, TelemetryStream, TimeseriesQuery, TimeseriesResponse,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

pub const DEVICE_ID: &str = "device-1";
pub const PASSWORD: &str = "secret";
pub const TOKEN: &str = "token-123";

/// In-memory stand-in for the IoT platform.
#[derive(Clone, Default)]
pub struct FakePlatform {
    pub inner: Arc<FakeInner>,
}

#[derive(Default)]
pub struct FakeInner {
    pub telemetry: Mutex<Option<mpsc::UnboundedReceiver<Result<String>>>>,
    pub rpc_calls: Mutex<Vec<(String, RpcRequest)>>,
    pub timeseries: Mutex<Option<TimeseriesResponse>>,
    pub timeseries_queries: Mutex<Vec<TimeseriesQuery>>,
    pub attributes: Mutex<HashMap<String, Value>>,
    pub attribute_writes: Mutex<usize>,
    pub fail_writes: Mutex<bool>,
    pub fail_reads: Mutex<bool>,
    /// When set, attribute writes wait for this before answering.
    pub write_gate: Mutex<Option<Arc<Notify>>>,
    pub write_started: Notify,
    /// When set, history requests wait for this before answering.
    pub history_gate: Mutex<Option<Arc<Notify>>>,
    pub history_started: Notify,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the sending side of the next telemetry socket.
    pub fn telemetry_feed(&self) -> mpsc::UnboundedSender<Result<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.telemetry.lock().unwrap() = Some(rx);
        tx
    }

    pub fn rpc_calls(&self) -> Vec<(String, RpcRequest)> {
        self.inner.rpc_calls.lock().unwrap().clone()
    }

    pub fn set_timeseries(&self, response: TimeseriesResponse) {
        *self.inner.timeseries.lock().unwrap() = Some(response);
    }

    pub fn set_attribute(&self, key: &str, value: Value) {
        self.inner
            .attributes
            .lock()
            .unwrap()
            .insert(key.to_string(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.inner.attributes.lock().unwrap().get(key).cloned()
    }

    pub fn attribute_writes(&self) -> usize {
        *self.inner.attribute_writes.lock().unwrap()
    }

    pub fn fail_writes(&self, fail: bool) {
        *self.inner.fail_writes.lock().unwrap() = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        *self.inner.fail_reads.lock().unwrap() = fail;
    }

    pub fn gate_writes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.inner.write_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn gate_history(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.inner.history_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

fn check_token(token: &str) -> Result<()> {
    if token == TOKEN {
        Ok(())
    } else {
        Err(Error::Status {
            status: 401,
            body: "bad token".to_string(),
        })
    }
}

impl Platform for FakePlatform {
    async fn login(&self, credentials: &Credentials) -> Result<String> {
        if credentials.password == PASSWORD {
            Ok(TOKEN.to_string())
        } else {
            Err(Error::Auth("platform answered 401 Unauthorized".to_string()))
        }
    }

    async fn open_telemetry(&self, token: &str, _device_id: &str) -> Result<TelemetryStream> {
        check_token(token)?;
        let rx = self.inner.telemetry.lock().unwrap().take().ok_or(Error::Status {
            status: 503,
            body: "no socket".to_string(),
        })?;
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    async fn send_one_way_rpc(
        &self,
        token: &str,
        device_id: &str,
        request: &RpcRequest,
    ) -> Result<()> {
        check_token(token)?;
        self.inner
            .rpc_calls
            .lock()
            .unwrap()
            .push((device_id.to_string(), request.clone()));
        Ok(())
    }

    async fn timeseries(
        &self,
        token: &str,
        _device_id: &str,
        query: &TimeseriesQuery,
    ) -> Result<TimeseriesResponse> {
        check_token(token)?;
        self.inner
            .timeseries_queries
            .lock()
            .unwrap()
            .push(query.clone());
        self.inner.history_started.notify_one();

        let gate = self.inner.history_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.inner
            .timeseries
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::Status {
                status: 500,
                body: "history unavailable".to_string(),
            })
    }

    async fn shared_attributes(
        &self,
        token: &str,
        _device_id: &str,
        keys: &[&str],
    ) -> Result<Vec<AttributeEntry>> {
        check_token(token)?;
        if *self.inner.fail_reads.lock().unwrap() {
            return Err(Error::Status {
                status: 500,
                body: "read failed".to_string(),
            });
        }
        let attributes = self.inner.attributes.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|key| {
                attributes.get(*key).map(|value| AttributeEntry {
                    key: key.to_string(),
                    value: value.clone(),
                    last_update_ts: Some(1),
                })
            })
            .collect())
    }

    async fn save_shared_attributes(
        &self,
        token: &str,
        _device_id: &str,
        attributes: &Value,
    ) -> Result<()> {
        check_token(token)?;
        self.inner.write_started.notify_one();

        let gate = self.inner.write_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if *self.inner.fail_writes.lock().unwrap() {
            return Err(Error::Status {
                status: 500,
                body: "write failed".to_string(),
            });
        }
        let map = attributes.as_object().cloned().unwrap_or_default();
        self.inner.attributes.lock().unwrap().extend(map);
        *self.inner.attribute_writes.lock().unwrap() += 1;
        Ok(())
    }
}

/// Notifier that remembers what it was asked to deliver.
#[derive(Default)]
pub struct CollectingNotifier {
    pub events: Mutex<Vec<AlertEvent>>,
}

impl CollectingNotifier {
    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, event: &AlertEvent) {
        self.events.lock().unwrap().push(*event);
    }
}

/// Push frame in the platform's `{"data": {"key": [[ts, "value"]]}}` shape.
pub fn frame(pairs: &[(&str, &str)]) -> String {
    let data: serde_json::Map<String, Value> = pairs
        .iter()
        .map(|(k, v)| {
            (
                k.to_string(),
                serde_json::json!([[1_700_000_000_000_i64, v]]),
            )
        })
        .collect();
    serde_json::json!({ "subscriptionId": 1, "data": data }).to_string()
}

/// A frame where every reading is comfortably inside the default thresholds.
pub fn healthy_frame() -> String {
    frame(&[
        ("temperature", "25"),
        ("humidity", "60"),
        ("soilMoisture", "50"),
        ("tankWaterLevel", "80"),
        ("batteryLevel", "90"),
        ("pumpState", "0"),
    ])
}
